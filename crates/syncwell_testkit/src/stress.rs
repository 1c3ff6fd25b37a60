//! Stress runs for the record handler.
//!
//! These drive many concurrent writers through a [`TestServer`] and report
//! how many writes were acknowledged.

use crate::connection::TestConnection;
use crate::fixtures::TestServer;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use syncwell_protocol::{Action, RecordMessage, NO_VERSION};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total writes sent.
    pub total_ops: usize,
    /// Writes acknowledged without error.
    pub successful_ops: usize,
    /// Writes acknowledged with an error or never acknowledged.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Writes per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Logs a summary of the run.
    pub fn log_summary(&self, name: &str) {
        tracing::info!(
            run = name,
            total = self.total_ops,
            successful = self.successful_ops,
            failed = self.failed_ops,
            duration = ?self.duration,
            "throughput: {:.2} writes/sec",
            self.ops_per_second
        );
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Writes per writer.
    pub operations: usize,
    /// Number of concurrent writers.
    pub writers: usize,
    /// Number of distinct records written to.
    pub record_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 200,
            writers: 4,
            record_count: 8,
        }
    }
}

/// Name of the `index`th stress record.
pub fn stress_record(index: usize) -> String {
    format!("stress/{index}")
}

/// Runs concurrent writers, each sending `operations` acknowledged updates
/// with the next available version, spread over `record_count` records.
///
/// The records are created at version 0 beforehand, so each ends at the
/// number of writes it received.
pub async fn stress_concurrent_writers(
    server: Arc<TestServer>,
    config: &StressConfig,
) -> StressTestResult {
    for index in 0..config.record_count {
        server.seed(&stress_record(index), 0, json!({}));
    }

    let start = Instant::now();
    let writers: Vec<_> = (0..config.writers)
        .map(|writer| {
            let server = server.clone();
            let config = config.clone();
            tokio::spawn(async move { run_writer(&server, writer, &config).await })
        })
        .collect();

    let mut successful = 0;
    let mut failed = 0;
    for writer in writers {
        match writer.await {
            Ok((ok, err)) => {
                successful += ok;
                failed += err;
            }
            Err(_) => failed += config.operations,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

async fn run_writer(server: &TestServer, writer: usize, config: &StressConfig) -> (usize, usize) {
    let connection = TestConnection::new();

    for op in 0..config.operations {
        let name = stress_record((writer + op) % config.record_count);
        server.send(
            &connection,
            RecordMessage::new(Action::Update, name)
                .with_version(NO_VERSION)
                .with_data(json!({ "writer": writer, "op": op }))
                .with_write_ack(format!("w{writer}-{op}")),
        );
    }

    let mut successful = 0;
    let mut failed = 0;
    for op in 0..config.operations {
        let correlation_id = format!("w{writer}-{op}");
        let ack = connection
            .wait_for(|message| {
                message.action == Action::WriteAcknowledgement
                    && message.correlation_id.as_deref() == Some(correlation_id.as_str())
            })
            .await;
        match ack {
            Some(ack) if !ack.is_error => successful += 1,
            _ => failed += 1,
        }
    }
    (successful, failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_are_all_acknowledged() {
        let server = Arc::new(TestServer::new());
        let config = StressConfig {
            operations: 50,
            writers: 4,
            record_count: 3,
        };

        let result = stress_concurrent_writers(server.clone(), &config).await;
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 200);

        assert!(server.settle().await);
        let total: i64 = (0..config.record_count)
            .filter_map(|index| server.cache.snapshot(&stress_record(index)))
            .map(|record| record.version)
            .sum();
        assert_eq!(total, 200);
    }
}
