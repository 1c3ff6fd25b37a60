//! The record handler: entry point for record messages.

use crate::config::RecordConfig;
use crate::deletion::RecordDeletion;
use crate::error::{RequestError, RequestResult, Tier};
use crate::request::{RecordRequest, RecordSnapshot};
use crate::services::{ConnectionRef, RecordServices};
use crate::stability::RecordStability;
use crate::stats::{HandlerStats, StatsSnapshot};
use crate::transition::{self, TransitionHandle};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use syncwell_protocol::{Action, RecordMessage, Version, NO_VERSION};
use tracing::{debug, error, warn};

/// State shared by the record handler and its transitions.
pub struct HandlerContext {
    /// Record configuration.
    pub config: RecordConfig,
    /// Collaborators.
    pub services: RecordServices,
    /// Active transitions (record name -> transition).
    pub(crate) transitions: Mutex<HashMap<String, TransitionHandle>>,
    pub(crate) next_transition_id: AtomicU64,
    pub(crate) stats: HandlerStats,
    stability: RecordStability,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: RecordConfig, services: RecordServices) -> Self {
        Self {
            config,
            services,
            transitions: Mutex::new(HashMap::new()),
            next_transition_id: AtomicU64::new(0),
            stats: HandlerStats::new(),
            stability: RecordStability::new(),
        }
    }

    /// Delivers a record change to local subscribers, except `originator`.
    ///
    /// Changes originating from a local connection are relayed to the
    /// cluster as well; changes that came from the cluster never are.
    pub fn broadcast_update(
        &self,
        name: &str,
        message: &RecordMessage,
        no_delay: bool,
        originator: Option<&ConnectionRef>,
    ) {
        self.services
            .subscriptions
            .send_to_subscribers(name, message, no_delay, originator);

        if originator.is_some_and(|connection| !connection.is_remote()) {
            self.services.cluster.send(message.clone());
        }
    }

    /// Returns true if a transition is active for `name`.
    pub fn has_transition(&self, name: &str) -> bool {
        self.transitions.lock().contains_key(name)
    }

    /// Returns the number of active transitions.
    pub fn active_transitions(&self) -> usize {
        self.transitions.lock().len()
    }

    /// Removes the transition for `name` from the table and stops it.
    fn destroy_transition(&self, name: &str, reason: &str) -> bool {
        let handle = self.transitions.lock().remove(name);
        match handle {
            Some(handle) => {
                debug!(record = %name, "destroying transition: {reason}");
                handle.destroy(reason);
                true
            }
            None => false,
        }
    }
}

/// Handler for record messages.
///
/// [`handle`](Self::handle) never blocks: work that needs the tiers or the
/// permission service runs on spawned tasks, so it must be called from
/// within a tokio runtime. Writes are routed to their record's transition
/// synchronously, so writes from one connection keep their order.
#[derive(Clone)]
pub struct RecordHandler {
    context: Arc<HandlerContext>,
}

impl RecordHandler {
    /// Creates a new record handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Returns the shared context.
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Handles a record message.
    ///
    /// A message without a connection comes from a cluster peer: the peer
    /// has already persisted it, so it is only broadcast locally.
    pub fn handle(&self, connection: Option<ConnectionRef>, message: RecordMessage) {
        let Some(connection) = connection else {
            self.handle_cluster_update(message);
            return;
        };

        let subscriptions = &self.context.services.subscriptions;
        match message.action {
            Action::Subscribe => subscriptions.subscribe_bulk(&message, &connection),
            Action::Unsubscribe => subscriptions.unsubscribe_bulk(&message, &connection),
            Action::SubscribeAndRead | Action::SubscribeCreateAndRead => {
                self.subscribe_and_read(connection, message)
            }
            Action::CreateAndUpdate | Action::CreateAndPatch => {
                self.spawn(|this| async move { this.create_and_update(connection, message).await })
            }
            Action::Read => self.spawn(|this| async move { this.read(connection, message).await }),
            Action::Head => self.spawn(|this| async move { this.head(connection, message).await }),
            Action::Has => self.spawn(|this| async move { this.has(connection, message).await }),
            Action::SubscribeAndHead => self.spawn(|this| async move {
                this.subscribe_and_head(connection, message).await
            }),
            Action::Update | Action::Patch | Action::Erase => {
                self.update(connection, message, false)
            }
            Action::Delete => self.delete(connection, message),
            Action::Notify => {
                self.spawn(|this| async move { this.notify(Some(connection), message).await })
            }
            action => warn!(
                event = "UNKNOWN_ACTION",
                %action,
                record = %message.name,
                "unsupported record action"
            ),
        }
    }

    /// Delivers a record change to local subscribers and, for local
    /// changes, to the cluster.
    pub fn broadcast_update(
        &self,
        name: &str,
        message: &RecordMessage,
        no_delay: bool,
        originator: Option<&ConnectionRef>,
    ) {
        self.context
            .broadcast_update(name, message, no_delay, originator);
    }

    /// Runs `callback` once no record request for `name` is outstanding.
    pub fn run_when_record_stable<F>(&self, name: &str, callback: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        self.context
            .stability
            .run_when_record_stable(name, Box::new(callback));
    }

    /// Marks the outstanding record request for `name` as done, releasing
    /// the next deferred callback.
    pub fn remove_record_request(&self, name: &str) {
        self.context.stability.remove_record_request(name);
    }

    /// Returns true if a transition is active for `name`.
    pub fn has_transition(&self, name: &str) -> bool {
        self.context.has_transition(name)
    }

    /// Returns the number of active transitions.
    pub fn active_transitions(&self) -> usize {
        self.context.active_transitions()
    }

    /// Returns a snapshot of the handler's counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.context.stats.snapshot()
    }

    /// Stops every active transition. Their pending acknowledgements and
    /// queued writers are answered with an error.
    pub fn close(&self) {
        let handles: Vec<_> = self.context.transitions.lock().drain().collect();
        for (name, handle) in handles {
            debug!(record = %name, "closing transition");
            handle.destroy("record handler closed");
        }
    }

    fn spawn<F, Fut>(&self, task: F)
    where
        F: FnOnce(RecordHandler) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(task(self.clone()));
    }

    async fn fetch(&self, name: &str) -> RequestResult<RecordSnapshot> {
        RecordRequest::new(name, &self.context.config, &self.context.services)
            .fetch()
            .await
    }

    fn handle_cluster_update(&self, message: RecordMessage) {
        match message.action {
            Action::Deleted => self.remote_delete(&message),
            Action::Notify => self.spawn(|this| async move { this.notify(None, message).await }),
            _ => {
                self.context
                    .destroy_transition(&message.name, "record changed on a remote node");
                self.context
                    .broadcast_update(&message.name, &message, false, None);
            }
        }
    }

    /// Routes a full or partial write to the record's transition.
    ///
    /// An update carrying a path is a partial write and travels on as a
    /// patch, so subscribers never mistake the value for the whole document.
    fn update(&self, connection: ConnectionRef, mut message: RecordMessage, upsert: bool) {
        if message.action == Action::Update && message.path.is_some() {
            message.action = Action::Patch;
        }
        transition::route_write(&self.context, connection, message, upsert);
    }

    /// Upsert. Creation and the write are permissioned separately.
    ///
    /// Records on the hot path skip transitions and are written straight to
    /// both tiers.
    async fn create_and_update(&self, connection: ConnectionRef, message: RecordMessage) {
        let original_action = message.action;
        let is_patch = message.path.is_some();
        let hot_path = self.context.config.is_hot_path(&message.name);

        if hot_path && is_patch {
            connection.send_message(message.reply(Action::InvalidPatchOnHotpath).as_error());
            return;
        }

        let mut write = message;
        write.action = if is_patch { Action::Patch } else { Action::Update };

        if !hot_path && self.context.has_transition(&write.name) {
            if self
                .permission_action(write.action, &write, original_action, &connection)
                .await
            {
                self.update(connection, write, true);
            }
            return;
        }

        if !self
            .permission_action(Action::Create, &write, original_action, &connection)
            .await
            || !self
                .permission_action(Action::Update, &write, original_action, &connection)
                .await
        {
            return;
        }

        if hot_path {
            self.force_write(connection, write).await;
        } else {
            self.update(connection, write, true);
        }
    }

    /// Writes to cache and storage directly, without version ordering.
    ///
    /// Concurrent hot path writes to one record may land in any order.
    async fn force_write(&self, connection: ConnectionRef, mut message: RecordMessage) {
        let data = match connection.parse_data(&message) {
            Ok(data) => data,
            Err(err) => {
                connection.send_message(
                    message
                        .reply(Action::InvalidMessageData)
                        .with_reason(err.to_string())
                        .as_error(),
                );
                return;
            }
        };

        let name = message.name.clone();
        let version = message.version.max(0);
        message.version = version;
        self.context.stats.record_hot_path_write();

        let services = &self.context.services;
        let write_storage = !self.context.config.is_storage_excluded(&name);

        let cache_write = async {
            let result = services.cache.set(&name, version, data.clone()).await;
            if result.is_ok() {
                self.context
                    .broadcast_update(&name, &message.for_broadcast(), false, Some(&connection));
            }
            result.map_err(|err| (Tier::Cache, err))
        };
        let storage_write = async {
            if !write_storage {
                return Ok(());
            }
            services
                .storage
                .set(&name, version, data.clone())
                .await
                .map_err(|err| (Tier::Storage, err))
        };
        let (cache_result, storage_result) = tokio::join!(cache_write, storage_write);

        let mut failure = None;
        for (tier, err) in [cache_result.err(), storage_result.err()].into_iter().flatten() {
            error!(event = %Action::RecordUpdateError, record = %name, "hot path {tier} write failed: {err}");
            failure.get_or_insert(format!("{tier} write failed: {err}"));
        }

        if let (true, Some(correlation_id)) = (message.is_write_ack, message.correlation_id.clone()) {
            let mut ack = RecordMessage::new(Action::WriteAcknowledgement, name)
                .with_write_ack(correlation_id);
            if let Some(reason) = failure {
                ack = ack.with_reason(reason).as_error();
            }
            connection.send_message(ack);
        }
    }

    async fn read(&self, connection: ConnectionRef, message: RecordMessage) {
        match self.fetch(&message.name).await {
            Ok(RecordSnapshot {
                version,
                data: Some(data),
                ..
            }) => connection.send_message(read_response(&message.name, version, data)),
            Ok(_) => connection.send_message(message.reply(Action::RecordNotFound).as_error()),
            Err(err) => send_request_error(&connection, &message, &err),
        }
    }

    /// Answers with the record's version, [`NO_VERSION`] when missing.
    async fn head(&self, connection: ConnectionRef, message: RecordMessage) {
        match self.fetch(&message.name).await {
            Ok(snapshot) => connection.send_message(
                RecordMessage::new(Action::HeadResponse, snapshot.name)
                    .with_version(snapshot.version),
            ),
            Err(err) => send_request_error(&connection, &message, &err),
        }
    }

    async fn has(&self, connection: ConnectionRef, message: RecordMessage) {
        match self.fetch(&message.name).await {
            Ok(snapshot) => connection.send_message(
                RecordMessage::new(Action::HasResponse, snapshot.name.clone())
                    .with_data(Value::Bool(snapshot.exists())),
            ),
            Err(err) => send_request_error(&connection, &message, &err),
        }
    }

    async fn subscribe_and_head(&self, connection: ConnectionRef, message: RecordMessage) {
        let names = message.target_names();
        let head = match self.context.services.cache.head_bulk(&names).await {
            Ok(head) => head,
            Err(err) => {
                error!(
                    event = %Action::SubscribeAndHead,
                    correlation_id = ?message.correlation_id,
                    "error subscribing and head bulk: {err}"
                );
                return;
            }
        };

        let mut response = RecordMessage::new(Action::HeadResponseBulk, message.name.clone())
            .with_versions(head.versions.clone());
        response.correlation_id = message.correlation_id.clone();
        connection.send_message(response);

        self.context
            .services
            .subscriptions
            .subscribe_bulk(&message, &connection);

        for name in head.missing {
            if head.versions.contains_key(&name) {
                continue;
            }
            let mut single = message.clone();
            single.name = name;
            self.head(connection.clone(), single).await;
        }
    }

    fn subscribe_and_read(&self, connection: ConnectionRef, message: RecordMessage) {
        for name in message.target_names() {
            let mut single = message.clone();
            single.name = name;
            let connection = connection.clone();
            self.spawn(|this| async move { this.subscribe_and_read_one(connection, single).await });
        }
        connection.send_ack_message(message);
    }

    async fn subscribe_and_read_one(&self, connection: ConnectionRef, message: RecordMessage) {
        let snapshot = match self.fetch(&message.name).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                send_request_error(&connection, &message, &err);
                return;
            }
        };

        if snapshot.exists() {
            self.read_and_subscribe(connection, message).await;
        } else if message.action == Action::SubscribeCreateAndRead {
            if self
                .permission_action(Action::Create, &message, message.action, &connection)
                .await
            {
                self.create(connection, message).await;
            }
        } else if self
            .permission_action(Action::Read, &message, message.action, &connection)
            .await
        {
            self.context.services.subscriptions.subscribe(
                &message.name,
                &connection,
                message.names.is_some(),
            );
            connection.send_message(read_response(&message.name, NO_VERSION, json!({})));
        }
    }

    /// Creates an empty record, then reads and subscribes to it.
    async fn create(&self, connection: ConnectionRef, message: RecordMessage) {
        let name = message.name.clone();

        if !self.context.config.is_storage_excluded(&name) {
            let storage = self.context.services.storage.clone();
            let name = name.clone();
            tokio::spawn(async move {
                if let Err(err) = storage.set(&name, 0, json!({})).await {
                    error!(event = %Action::RecordCreateError, record = %name, "storage: {err}");
                }
            });
        }

        if let Err(err) = self.context.services.cache.set(&name, 0, json!({})).await {
            error!(event = %Action::RecordCreateError, record = %name, "{err}");
            connection.send_message(
                message
                    .reply(Action::RecordCreateError)
                    .with_reason(err.to_string())
                    .as_error(),
            );
            return;
        }

        self.read_and_subscribe(connection, message).await;
    }

    /// Subscribes after a READ permission check and sends the latest state.
    async fn read_and_subscribe(&self, connection: ConnectionRef, message: RecordMessage) {
        if !self
            .permission_action(Action::Read, &message, message.action, &connection)
            .await
        {
            return;
        }

        self.context.services.subscriptions.subscribe(
            &message.name,
            &connection,
            message.names.is_some(),
        );

        match self.fetch(&message.name).await {
            Ok(RecordSnapshot {
                version,
                data: Some(data),
                ..
            }) => connection.send_message(read_response(&message.name, version, data)),
            Ok(_) => {
                error!(
                    event = %Action::RecordNotFound,
                    record = %message.name,
                    "record was removed during permission check"
                );
                connection.send_message(message.reply(Action::RecordNotFound).as_error());
            }
            Err(err) => send_request_error(&connection, &message, &err),
        }
    }

    fn delete(&self, connection: ConnectionRef, message: RecordMessage) {
        self.context
            .destroy_transition(&message.name, "record deleted");

        let deletion = RecordDeletion::new(
            &self.context.config,
            &self.context.services,
            connection.clone(),
            message,
        );
        self.spawn(|this| async move {
            if let Ok(deleted) = deletion.run().await {
                this.on_deleted(&deleted, Some(&connection));
            }
        });
    }

    /// A peer deleted the record; it is already gone from both tiers.
    fn remote_delete(&self, message: &RecordMessage) {
        self.context
            .destroy_transition(&message.name, "record deleted on a remote node");
        self.on_deleted(message, None);
    }

    /// Notifies subscribers of a deletion and drops their subscriptions.
    fn on_deleted(&self, message: &RecordMessage, originator: Option<&ConnectionRef>) {
        let notice = message.for_broadcast();
        self.context
            .broadcast_update(&message.name, &notice, true, originator);

        let subscriptions = &self.context.services.subscriptions;
        for subscriber in subscriptions.local_subscribers(&message.name) {
            subscriptions.unsubscribe(&message.name, &subscriber, true);
        }
    }

    /// Records were changed behind the server's back.
    ///
    /// From a client, the cached copies are dropped first. Records with local
    /// subscribers are then re-read and their subscribers told about the new
    /// state, or about the deletion when the record is gone.
    async fn notify(&self, connection: Option<ConnectionRef>, message: RecordMessage) {
        let names = message.target_names();

        if let Some(connection) = &connection {
            if let Err(err) = self.context.services.cache.delete_bulk(&names).await {
                error!(
                    event = %Action::RecordNotifyError,
                    "error deleting records in bulk when notifying of remote changes: {err}"
                );
                connection.send_message(
                    message
                        .reply(Action::RecordNotifyError)
                        .with_reason(err.to_string())
                        .as_error(),
                );
                return;
            }
        }

        let subscriptions = &self.context.services.subscriptions;
        let refreshes: Vec<_> = names
            .into_iter()
            .filter(|name| subscriptions.has_local_subscribers(name))
            .map(|name| {
                let this = self.clone();
                let connection = connection.clone();
                let mut request = message.clone();
                request.name = name;
                tokio::spawn(async move { this.refresh(connection, request).await })
            })
            .collect();
        for refresh in refreshes {
            let _ = refresh.await;
        }

        if let Some(connection) = connection {
            debug!(event = %Action::Notify, names = ?message.names, "records refreshed");
            connection.send_ack_message(message.clone());
            self.context.services.cluster.send(message);
        }
    }

    async fn refresh(&self, connection: Option<ConnectionRef>, request: RecordMessage) {
        match self.fetch(&request.name).await {
            Ok(RecordSnapshot {
                version,
                data: Some(data),
                ..
            }) => {
                let update = RecordMessage::new(Action::Update, request.name.clone())
                    .with_version(version)
                    .with_data(data);
                self.context
                    .services
                    .subscriptions
                    .send_to_subscribers(&request.name, &update, true, None);
            }
            Ok(_) => self.remote_delete(&RecordMessage::new(Action::Deleted, request.name)),
            Err(err) => {
                if let Some(connection) = &connection {
                    send_request_error(connection, &request, &err);
                }
            }
        }
    }

    /// Secondary permission check for compound actions. Denials and errors
    /// are answered here.
    async fn permission_action(
        &self,
        action: Action,
        message: &RecordMessage,
        original_action: Action,
        connection: &ConnectionRef,
    ) -> bool {
        let mut request = message.clone();
        request.action = action;

        let denial = match self
            .context
            .services
            .permission
            .can_perform_action(connection, &request)
            .await
        {
            Ok(true) => return true,
            Ok(false) => Action::MessageDenied,
            Err(err) => {
                error!(event = %Action::MessagePermissionError, record = %message.name, "{err}");
                Action::MessagePermissionError
            }
        };

        connection.send_message(
            message
                .reply(denial)
                .with_original_action(original_action)
                .as_error(),
        );
        false
    }
}

fn read_response(name: &str, version: Version, data: Value) -> RecordMessage {
    RecordMessage::new(Action::ReadResponse, name)
        .with_version(version)
        .with_data(data)
}

fn send_request_error(connection: &ConnectionRef, message: &RecordMessage, err: &RequestError) {
    connection.send_message(
        message
            .reply(err.action())
            .with_reason(err.to_string())
            .as_error(),
    );
}
