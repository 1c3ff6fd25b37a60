//! A recording client connection.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use syncwell_protocol::{Action, RecordMessage};
use syncwell_server::{Connection, ConnectionRef};
use tokio::sync::Notify;
use uuid::Uuid;

/// How long the `wait_for*` helpers wait before giving up.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connection that records everything sent to it.
///
/// Messages and acknowledgements are kept in separate logs, in arrival
/// order.
pub struct TestConnection {
    id: Uuid,
    user_id: Option<String>,
    remote: bool,
    messages: Mutex<Vec<RecordMessage>>,
    acks: Mutex<Vec<RecordMessage>>,
    received: Notify,
}

impl TestConnection {
    /// Creates an anonymous local connection.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None, false))
    }

    /// Creates a local connection authenticated as `user_id`.
    pub fn with_user(user_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::build(Some(user_id.into()), false))
    }

    /// Creates a connection proxying a client of another node.
    pub fn remote() -> Arc<Self> {
        Arc::new(Self::build(None, true))
    }

    fn build(user_id: Option<String>, remote: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            remote,
            messages: Mutex::new(Vec::new()),
            acks: Mutex::new(Vec::new()),
            received: Notify::new(),
        }
    }

    /// Returns this connection as a handler-facing reference.
    pub fn as_connection(self: &Arc<Self>) -> ConnectionRef {
        self.clone()
    }

    /// Returns all messages received so far.
    pub fn messages(&self) -> Vec<RecordMessage> {
        self.messages.lock().clone()
    }

    /// Returns all acknowledgements received so far.
    pub fn acks(&self) -> Vec<RecordMessage> {
        self.acks.lock().clone()
    }

    /// Returns the messages received with `action`.
    pub fn received(&self, action: Action) -> Vec<RecordMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|message| message.action == action)
            .cloned()
            .collect()
    }

    /// Returns how many messages with `action` were received.
    pub fn count(&self, action: Action) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|message| message.action == action)
            .count()
    }

    /// Forgets everything received so far.
    pub fn clear(&self) {
        self.messages.lock().clear();
        self.acks.lock().clear();
    }

    /// Waits until a received message matches `predicate`, returning the
    /// first match, or `None` after [`WAIT_TIMEOUT`].
    pub async fn wait_for<F>(&self, predicate: F) -> Option<RecordMessage>
    where
        F: Fn(&RecordMessage) -> bool,
    {
        self.wait_in(&self.messages, predicate).await
    }

    /// Waits for a message with `action`.
    pub async fn wait_for_action(&self, action: Action) -> Option<RecordMessage> {
        self.wait_for(|message| message.action == action).await
    }

    /// Waits until an acknowledgement matches `predicate`.
    pub async fn wait_for_ack<F>(&self, predicate: F) -> Option<RecordMessage>
    where
        F: Fn(&RecordMessage) -> bool,
    {
        self.wait_in(&self.acks, predicate).await
    }

    async fn wait_in<F>(&self, log: &Mutex<Vec<RecordMessage>>, predicate: F) -> Option<RecordMessage>
    where
        F: Fn(&RecordMessage) -> bool,
    {
        let search = async {
            loop {
                // Registered before the check so a message arriving in
                // between still wakes us.
                let notified = self.received.notified();
                if let Some(found) = log.lock().iter().find(|message| predicate(message)) {
                    return found.clone();
                }
                notified.await;
            }
        };
        tokio::time::timeout(WAIT_TIMEOUT, search).await.ok()
    }
}

impl Connection for TestConnection {
    fn id(&self) -> Uuid {
        self.id
    }

    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    fn is_remote(&self) -> bool {
        self.remote
    }

    fn send_message(&self, message: RecordMessage) {
        self.messages.lock().push(message);
        self.received.notify_waiters();
    }

    fn send_ack_message(&self, message: RecordMessage) {
        self.acks.lock().push(message);
        self.received.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_sees_later_messages() {
        let connection = TestConnection::new();
        let sender = connection.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            sender.send_message(RecordMessage::new(Action::ReadResponse, "a"));
        });

        let found = connection.wait_for_action(Action::ReadResponse).await;
        assert_eq!(found.map(|message| message.name), Some("a".to_string()));
        assert_eq!(connection.count(Action::ReadResponse), 1);
    }

    #[test]
    fn acks_are_kept_apart() {
        let connection = TestConnection::new();
        connection.send_ack_message(RecordMessage::new(Action::Subscribe, "a"));
        assert!(connection.messages().is_empty());
        assert_eq!(connection.acks().len(), 1);
    }
}
