//! Record subscriptions.

use crate::services::ConnectionRef;
use parking_lot::RwLock;
use std::collections::HashMap;
use syncwell_protocol::{Action, RecordMessage};

/// Tracks which connections follow which records and fans messages out to
/// them.
pub trait SubscriptionRegistry: Send + Sync {
    /// Subscribes `connection` to `name`. Unless `silent`, the subscription
    /// is acknowledged.
    fn subscribe(&self, name: &str, connection: &ConnectionRef, silent: bool);

    /// Removes the subscription of `connection` to `name`. Unless `silent`,
    /// the removal is acknowledged.
    fn unsubscribe(&self, name: &str, connection: &ConnectionRef, silent: bool);

    /// Subscribes to every record the message names and acknowledges the
    /// message once.
    fn subscribe_bulk(&self, message: &RecordMessage, connection: &ConnectionRef);

    /// Unsubscribes from every record the message names and acknowledges
    /// the message once.
    fn unsubscribe_bulk(&self, message: &RecordMessage, connection: &ConnectionRef);

    /// Delivers `message` to every subscriber of `name` except
    /// `originator`.
    fn send_to_subscribers(
        &self,
        name: &str,
        message: &RecordMessage,
        no_delay: bool,
        originator: Option<&ConnectionRef>,
    );

    /// Returns true if a connection of this node follows `name`.
    fn has_local_subscribers(&self, name: &str) -> bool;

    /// Returns the connections of this node following `name`.
    fn local_subscribers(&self, name: &str) -> Vec<ConnectionRef>;
}

/// In-memory subscription registry.
///
/// Messages are delivered immediately, so `no_delay` has no effect.
#[derive(Default)]
pub struct LocalSubscriptionRegistry {
    subscribers: RwLock<HashMap<String, Vec<ConnectionRef>>>,
}

impl LocalSubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, name: &str, connection: &ConnectionRef) {
        let mut subscribers = self.subscribers.write();
        let entry = subscribers.entry(name.to_string()).or_default();
        if !entry.iter().any(|existing| existing.id() == connection.id()) {
            entry.push(connection.clone());
        }
    }

    fn remove(&self, name: &str, connection: &ConnectionRef) {
        let mut subscribers = self.subscribers.write();
        if let Some(entry) = subscribers.get_mut(name) {
            entry.retain(|existing| existing.id() != connection.id());
            if entry.is_empty() {
                subscribers.remove(name);
            }
        }
    }
}

impl SubscriptionRegistry for LocalSubscriptionRegistry {
    fn subscribe(&self, name: &str, connection: &ConnectionRef, silent: bool) {
        self.add(name, connection);
        if !silent {
            connection.send_ack_message(RecordMessage::new(Action::Subscribe, name));
        }
    }

    fn unsubscribe(&self, name: &str, connection: &ConnectionRef, silent: bool) {
        self.remove(name, connection);
        if !silent {
            connection.send_ack_message(RecordMessage::new(Action::Unsubscribe, name));
        }
    }

    fn subscribe_bulk(&self, message: &RecordMessage, connection: &ConnectionRef) {
        for name in message.target_names() {
            self.add(&name, connection);
        }
        connection.send_ack_message(message.clone());
    }

    fn unsubscribe_bulk(&self, message: &RecordMessage, connection: &ConnectionRef) {
        for name in message.target_names() {
            self.remove(&name, connection);
        }
        connection.send_ack_message(message.clone());
    }

    fn send_to_subscribers(
        &self,
        name: &str,
        message: &RecordMessage,
        _no_delay: bool,
        originator: Option<&ConnectionRef>,
    ) {
        let recipients = self.local_subscribers(name);
        let originator_id = originator.map(|connection| connection.id());
        for recipient in recipients {
            if Some(recipient.id()) != originator_id {
                recipient.send_message(message.clone());
            }
        }
    }

    fn has_local_subscribers(&self, name: &str) -> bool {
        self.subscribers.read().contains_key(name)
    }

    fn local_subscribers(&self, name: &str) -> Vec<ConnectionRef> {
        self.subscribers.read().get(name).cloned().unwrap_or_default()
    }
}
