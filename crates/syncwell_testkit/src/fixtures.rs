//! Test fixtures and server helpers.
//!
//! [`TestServer`] wires a record handler to in-memory tiers and recording
//! collaborators so tests can drive it with plain messages.

use crate::connection::TestConnection;
use crate::services::{RecordingCluster, ScriptedPermissions};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use syncwell_protocol::{RecordMessage, Version};
use syncwell_server::{HandlerContext, RecordConfig, RecordHandler, RecordServices};
use syncwell_storage::InMemoryStore;
use tracing_subscriber::EnvFilter;

/// A record handler over in-memory tiers.
pub struct TestServer {
    /// The handler under test.
    pub handler: RecordHandler,
    /// The cache tier.
    pub cache: Arc<InMemoryStore>,
    /// The storage tier.
    pub storage: Arc<InMemoryStore>,
    /// Messages relayed to the cluster.
    pub cluster: Arc<RecordingCluster>,
    /// Permission rules.
    pub permissions: Arc<ScriptedPermissions>,
}

impl TestServer {
    /// Creates a server with [`test_config`].
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Creates a server with the given configuration.
    pub fn with_config(config: RecordConfig) -> Self {
        let cache = Arc::new(InMemoryStore::new());
        let storage = Arc::new(InMemoryStore::new());
        let cluster = Arc::new(RecordingCluster::new());
        let permissions = Arc::new(ScriptedPermissions::new());

        let services = RecordServices::new(cache.clone(), storage.clone())
            .with_cluster(cluster.clone())
            .with_permission(permissions.clone());
        let handler = RecordHandler::new(Arc::new(HandlerContext::new(config, services)));

        Self {
            handler,
            cache,
            storage,
            cluster,
            permissions,
        }
    }

    /// Opens a new local connection.
    pub fn connect(&self) -> Arc<TestConnection> {
        TestConnection::new()
    }

    /// Delivers `message` from `connection`.
    pub fn send(&self, connection: &Arc<TestConnection>, message: RecordMessage) {
        self.handler.handle(Some(connection.as_connection()), message);
    }

    /// Delivers `message` as an update relayed by a cluster peer.
    pub fn receive_from_cluster(&self, message: RecordMessage) {
        self.handler.handle(None, message);
    }

    /// Puts a record in both tiers.
    pub fn seed(&self, name: &str, version: Version, data: Value) {
        self.cache.insert(name, version, data.clone());
        self.storage.insert(name, version, data);
    }

    /// Waits until no transition is active. Returns false on timeout.
    pub async fn settle(&self) -> bool {
        let idle = async {
            while self.handler.active_transitions() > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        tokio::time::timeout(crate::connection::WAIT_TIMEOUT, idle)
            .await
            .is_ok()
    }
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}

/// A configuration with short tier timeouts, so timeout paths finish fast.
pub fn test_config() -> RecordConfig {
    RecordConfig::new()
        .with_cache_retrieval_timeout(Duration::from_millis(100))
        .with_storage_retrieval_timeout(Duration::from_millis(200))
}

/// Installs a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to warnings only.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
