//! Record deletion across both tiers.

use crate::config::RecordConfig;
use crate::error::{DeletionError, Tier};
use crate::services::{ConnectionRef, RecordServices};
use std::sync::Arc;
use std::time::Duration;
use syncwell_protocol::{Action, RecordMessage};
use syncwell_storage::RecordStore;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info};

/// The deletion of a single record.
///
/// Cache and storage deletes run concurrently, each bounded by its tier's
/// retrieval timeout. A name excluded from storage counts its storage
/// delete as done without issuing it. The deletion completes once both
/// tiers have reported; the first failure ends it and later reports are
/// ignored.
pub struct RecordDeletion {
    name: String,
    cache: Arc<dyn RecordStore>,
    storage: Option<Arc<dyn RecordStore>>,
    cache_timeout: Duration,
    storage_timeout: Duration,
    connection: ConnectionRef,
    message: RecordMessage,
}

impl RecordDeletion {
    /// Prepares the deletion requested by `message` over `connection`.
    pub fn new(
        config: &RecordConfig,
        services: &RecordServices,
        connection: ConnectionRef,
        message: RecordMessage,
    ) -> Self {
        let storage = (!config.is_storage_excluded(&message.name)).then(|| services.storage.clone());
        Self {
            name: message.name.clone(),
            cache: services.cache.clone(),
            storage,
            cache_timeout: config.cache_retrieval_timeout,
            storage_timeout: config.storage_retrieval_timeout,
            connection,
            message,
        }
    }

    /// Runs the deletion.
    ///
    /// On success the requester receives `DELETE_SUCCESS` and the returned
    /// message is the request turned into a `DELETED` notice, ready to be
    /// broadcast.
    ///
    /// # Errors
    ///
    /// Returns the first tier failure or timeout. The requester receives
    /// `RECORD_DELETE_ERROR` before this returns.
    pub async fn run(self) -> Result<RecordMessage, DeletionError> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        spawn_tier_delete(
            Tier::Cache,
            self.name.clone(),
            self.cache.clone(),
            self.cache_timeout,
            tx.clone(),
        );
        match &self.storage {
            Some(storage) => spawn_tier_delete(
                Tier::Storage,
                self.name.clone(),
                storage.clone(),
                self.storage_timeout,
                tx.clone(),
            ),
            None => {
                let _ = tx.send(Ok(()));
            }
        }
        drop(tx);

        let mut completed = 0;
        while completed < 2 {
            let outcome = match rx.recv().await {
                Some(outcome) => outcome,
                None => Err(DeletionError::Interrupted {
                    name: self.name.clone(),
                }),
            };
            if let Err(err) = outcome {
                return Err(self.fail(err));
            }
            completed += 1;
        }

        info!(event = %Action::Delete, record = %self.name, "record deleted");
        self.connection
            .send_message(RecordMessage::new(Action::DeleteSuccess, self.name.clone()));

        let mut deleted = self.message;
        deleted.action = Action::Deleted;
        Ok(deleted)
    }

    fn fail(&self, err: DeletionError) -> DeletionError {
        error!(event = %Action::RecordDeleteError, record = %self.name, "{err}");
        self.connection.send_message(
            self.message
                .reply(Action::RecordDeleteError)
                .with_reason(err.to_string())
                .as_error(),
        );
        err
    }
}

/// Deletes from one tier in a detached task so that a failure of the other
/// tier does not cancel it.
fn spawn_tier_delete(
    tier: Tier,
    name: String,
    store: Arc<dyn RecordStore>,
    limit: Duration,
    tx: mpsc::UnboundedSender<Result<(), DeletionError>>,
) {
    tokio::spawn(async move {
        let outcome = match timeout(limit, store.delete(&name)).await {
            Err(_) => Err(DeletionError::Timeout { tier, name }),
            Ok(Err(source)) => Err(DeletionError::Backend { tier, name, source }),
            Ok(Ok(())) => Ok(()),
        };
        let _ = tx.send(outcome);
    });
}
