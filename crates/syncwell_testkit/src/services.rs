//! Scriptable collaborators: cluster transport and permissions.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use syncwell_protocol::{Action, RecordMessage};
use syncwell_server::{ClusterNode, ConnectionRef, PermissionError, PermissionService};

/// A cluster transport that records what is relayed to peers.
#[derive(Default)]
pub struct RecordingCluster {
    sent: Mutex<Vec<RecordMessage>>,
}

impl RecordingCluster {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every message relayed so far.
    pub fn sent(&self) -> Vec<RecordMessage> {
        self.sent.lock().clone()
    }

    /// Returns how many relayed messages had `action`.
    pub fn count(&self, action: Action) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|message| message.action == action)
            .count()
    }
}

impl ClusterNode for RecordingCluster {
    fn send(&self, message: RecordMessage) {
        self.sent.lock().push(message);
    }
}

/// Permissions that allow everything except what a test forbids.
///
/// Every check is logged as `(action, record name)`.
#[derive(Default)]
pub struct ScriptedPermissions {
    denied: Mutex<HashSet<(Action, String)>>,
    failing: Mutex<HashSet<Action>>,
    checks: Mutex<Vec<(Action, String)>>,
}

impl ScriptedPermissions {
    /// Creates permissions allowing everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Denies `action` on `name`.
    pub fn deny(&self, action: Action, name: impl Into<String>) {
        self.denied.lock().insert((action, name.into()));
    }

    /// Makes every check for `action` fail with an error.
    pub fn fail(&self, action: Action) {
        self.failing.lock().insert(action);
    }

    /// Returns the checks made so far.
    pub fn checks(&self) -> Vec<(Action, String)> {
        self.checks.lock().clone()
    }
}

#[async_trait]
impl PermissionService for ScriptedPermissions {
    async fn can_perform_action(
        &self,
        _connection: &ConnectionRef,
        message: &RecordMessage,
    ) -> Result<bool, PermissionError> {
        let key = (message.action, message.name.clone());
        self.checks.lock().push(key.clone());

        if self.failing.lock().contains(&message.action) {
            return Err(PermissionError(format!(
                "rule for {} could not be evaluated",
                message.action
            )));
        }
        Ok(!self.denied.lock().contains(&key))
    }
}
