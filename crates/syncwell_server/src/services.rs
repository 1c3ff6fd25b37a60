//! Collaborators of the record engine.
//!
//! The engine owns none of its I/O: connections, permission rules,
//! subscriptions, cluster transport and both persistence tiers are handed
//! in through [`RecordServices`].

use crate::error::PermissionError;
use crate::subscription::{LocalSubscriptionRegistry, SubscriptionRegistry};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use syncwell_protocol::{ProtocolResult, RecordMessage};
use syncwell_storage::RecordStore;
use uuid::Uuid;

/// A client connection (or a cluster peer's proxy for one).
pub trait Connection: Send + Sync {
    /// Stable identity of the connection.
    fn id(&self) -> Uuid;

    /// Authenticated user, if any.
    fn user_id(&self) -> Option<String>;

    /// True for connections that proxy a client of another node. Remote
    /// senders are never answered with transition errors and their writes
    /// are never relayed to the cluster again.
    fn is_remote(&self) -> bool {
        false
    }

    /// Sends a message to the client.
    fn send_message(&self, message: RecordMessage);

    /// Acknowledges a request.
    fn send_ack_message(&self, message: RecordMessage);

    /// Parses the payload of a message received over this connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is missing or malformed.
    fn parse_data(&self, message: &RecordMessage) -> ProtocolResult<Value> {
        message.parse_data()
    }
}

/// Shared handle to a connection.
pub type ConnectionRef = Arc<dyn Connection>;

/// Evaluates permission rules.
#[async_trait]
pub trait PermissionService: Send + Sync {
    /// Returns whether `connection` may perform `message.action` on
    /// `message.name`.
    async fn can_perform_action(
        &self,
        connection: &ConnectionRef,
        message: &RecordMessage,
    ) -> Result<bool, PermissionError>;
}

/// Allows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenPermissions;

#[async_trait]
impl PermissionService for OpenPermissions {
    async fn can_perform_action(
        &self,
        _connection: &ConnectionRef,
        _message: &RecordMessage,
    ) -> Result<bool, PermissionError> {
        Ok(true)
    }
}

/// Transport to the other nodes of a cluster.
pub trait ClusterNode: Send + Sync {
    /// Broadcasts a message to every peer.
    fn send(&self, message: RecordMessage);
}

/// A node without peers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleNode;

impl ClusterNode for SingleNode {
    fn send(&self, _message: RecordMessage) {}
}

/// Everything the record engine talks to.
#[derive(Clone)]
pub struct RecordServices {
    /// Fast tier, the source of truth for reads.
    pub cache: Arc<dyn RecordStore>,
    /// Durable tier.
    pub storage: Arc<dyn RecordStore>,
    /// Secondary permission checks for compound actions.
    pub permission: Arc<dyn PermissionService>,
    /// Record subscriptions.
    pub subscriptions: Arc<dyn SubscriptionRegistry>,
    /// Cluster transport.
    pub cluster: Arc<dyn ClusterNode>,
}

impl RecordServices {
    /// Creates services over the given tiers, allowing every action, with
    /// an in-memory subscription registry and no cluster.
    pub fn new(cache: Arc<dyn RecordStore>, storage: Arc<dyn RecordStore>) -> Self {
        Self {
            cache,
            storage,
            permission: Arc::new(OpenPermissions),
            subscriptions: Arc::new(LocalSubscriptionRegistry::new()),
            cluster: Arc::new(SingleNode),
        }
    }

    /// Sets the permission service.
    pub fn with_permission(mut self, permission: Arc<dyn PermissionService>) -> Self {
        self.permission = permission;
        self
    }

    /// Sets the subscription registry.
    pub fn with_subscriptions(mut self, subscriptions: Arc<dyn SubscriptionRegistry>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    /// Sets the cluster transport.
    pub fn with_cluster(mut self, cluster: Arc<dyn ClusterNode>) -> Self {
        self.cluster = cluster;
        self
    }
}
