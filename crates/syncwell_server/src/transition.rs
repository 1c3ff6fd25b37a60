//! Record transitions.
//!
//! A transition serializes the writes to one record. It exists while writes
//! for the record are queued or in flight, and at most one exists per record
//! name.
//!
//! # Versioning
//!
//! Every write names the version it creates, or [`NO_VERSION`] for "the
//! next one". Writes are applied strictly one version at a time: a write
//! leaving a gap is answered with `INVALID_VERSION`, a write for a version
//! that is already taken with `VERSION_EXISTS`. Both answers carry the
//! current version and document so the client can rebase and retry.
//!
//! # Persistence
//!
//! An applied write is sent to storage (unless the record is excluded from
//! storage) and to the cache. Only the cache write gates the broadcast and
//! the next write; the storage write merely keeps the transition alive until
//! it settles. Any tier failure ends the transition: queued writers receive
//! `RECORD_UPDATE_ERROR` and pending write acknowledgements are resolved
//! with the failure reason.
//!
//! A write that never completes holds the transition open. Transitions
//! apply no timeouts of their own.
//!
//! # Implementation
//!
//! Each transition is a task owning all of its state and fed by a channel.
//! The handler's table maps the record name to the task's sender. The task
//! removes its entry under the table lock, and only after seeing its channel
//! empty, so a write routed to it is never lost.

use crate::error::TransitionError;
use crate::handler::HandlerContext;
use crate::request::{RecordRequest, RecordSnapshot};
use crate::services::ConnectionRef;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use syncwell_protocol::{Action, JsonPath, ProtocolError, RecordMessage, Version, NO_VERSION};
use syncwell_storage::StoreResult;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Entry of the handler's transition table.
pub(crate) struct TransitionHandle {
    id: u64,
    tx: UnboundedSender<TransitionEvent>,
}

impl TransitionHandle {
    /// Asks the transition to stop. Its pending acknowledgements and queued
    /// writers are answered with `reason`.
    pub(crate) fn destroy(&self, reason: &str) {
        let _ = self.tx.send(TransitionEvent::Destroy {
            reason: reason.to_string(),
        });
    }
}

pub(crate) enum TransitionEvent {
    Add {
        sender: ConnectionRef,
        message: RecordMessage,
        upsert: bool,
    },
    Loaded(Result<RecordSnapshot, crate::error::RequestError>),
    CacheWritten {
        ack: Option<AckKey>,
        result: StoreResult<()>,
    },
    StorageWritten {
        ack: Option<AckKey>,
        result: StoreResult<()>,
    },
    Destroy {
        reason: String,
    },
}

/// Routes a write to the record's transition, starting one if needed.
pub(crate) fn route_write(
    context: &Arc<HandlerContext>,
    sender: ConnectionRef,
    message: RecordMessage,
    upsert: bool,
) {
    let name = message.name.clone();
    let mut event = TransitionEvent::Add {
        sender,
        message,
        upsert,
    };

    let mut transitions = context.transitions.lock();
    if let Some(handle) = transitions.get(&name) {
        match handle.tx.send(event) {
            Ok(()) => return,
            Err(mpsc::error::SendError(returned)) => event = returned,
        }
    }

    let id = context.next_transition_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(event);
    transitions.insert(name.clone(), TransitionHandle { id, tx: tx.clone() });
    context.stats.record_transition_start();
    debug!(record = %name, id, "transition started");

    let transition = RecordTransition::new(id, name, context.clone(), tx);
    tokio::spawn(transition.run(rx));
}

/// Identifies a pending write acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct AckKey {
    connection: Uuid,
    correlation_id: String,
}

struct PendingAcks {
    connection: ConnectionRef,
    remaining: HashMap<String, usize>,
}

/// How a step changes the document.
enum Change {
    Replace(Value),
    Set(JsonPath, Value),
    Erase(JsonPath),
}

impl Change {
    fn parse(sender: &ConnectionRef, message: &RecordMessage) -> Result<Self, ProtocolError> {
        match message.action {
            Action::Erase => Ok(Change::Erase(message.json_path()?)),
            Action::Patch => {
                let path = message.json_path()?;
                Ok(Change::Set(path, sender.parse_data(message)?))
            }
            _ => {
                let value = sender.parse_data(message)?;
                if message.path.is_some() {
                    return Ok(Change::Set(message.json_path()?, value));
                }
                if !value.is_object() && !value.is_array() {
                    return Err(ProtocolError::NotADocument {
                        name: message.name.clone(),
                    });
                }
                Ok(Change::Replace(value))
            }
        }
    }

    fn apply(self, data: &mut Value) {
        match self {
            Change::Replace(value) => *data = value,
            Change::Set(path, value) => path.set(data, value),
            Change::Erase(path) => path.erase(data),
        }
    }
}

struct Step {
    sender: ConnectionRef,
    message: RecordMessage,
    change: Change,
}

/// The step whose cache write is in flight.
struct InFlight {
    sender: ConnectionRef,
    message: RecordMessage,
}

enum Exit {
    Drained,
    Failed(TransitionError),
    Superseded(String),
}

struct RecordTransition {
    id: u64,
    name: String,
    context: Arc<HandlerContext>,
    tx: UnboundedSender<TransitionEvent>,
    steps: VecDeque<Step>,
    version: Version,
    data: Option<Value>,
    current: Option<InFlight>,
    request_made: bool,
    upsert: bool,
    existing_versions: Vec<Step>,
    last_version: Option<Version>,
    write_acks: HashMap<Uuid, PendingAcks>,
    pending_cache_writes: usize,
    pending_storage_writes: usize,
}

impl RecordTransition {
    fn new(
        id: u64,
        name: String,
        context: Arc<HandlerContext>,
        tx: UnboundedSender<TransitionEvent>,
    ) -> Self {
        Self {
            id,
            name,
            context,
            tx,
            steps: VecDeque::new(),
            version: NO_VERSION,
            data: None,
            current: None,
            request_made: false,
            upsert: false,
            existing_versions: Vec::new(),
            last_version: None,
            write_acks: HashMap::new(),
            pending_cache_writes: 0,
            pending_storage_writes: 0,
        }
    }

    async fn run(mut self, mut rx: UnboundedReceiver<TransitionEvent>) {
        let mut next_event = None;
        let exit = loop {
            let event = match next_event.take() {
                Some(event) => event,
                None => match rx.recv().await {
                    Some(event) => event,
                    None => break Exit::Drained,
                },
            };

            match self.handle(event) {
                Ok(None) => {}
                Ok(Some(reason)) => break Exit::Superseded(reason),
                Err(err) => break Exit::Failed(err),
            }

            if self.is_drained() {
                let mut transitions = self.context.transitions.lock();
                match rx.try_recv() {
                    Ok(event) => next_event = Some(event),
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                        self.unregister(&mut transitions);
                        break Exit::Drained;
                    }
                }
            }
        };

        let stats = &self.context.stats;
        match exit {
            Exit::Drained => {
                stats.record_transition_complete();
                debug!(record = %self.name, id = self.id, "transition complete");
            }
            Exit::Superseded(reason) => {
                stats.record_transition_superseded();
                debug!(record = %self.name, id = self.id, "transition destroyed: {reason}");
                self.abort(&reason);
                self.context.transitions.lock().remove_if(&self.name, self.id);
            }
            Exit::Failed(err) => {
                stats.record_transition_failure();
                error!(event = %Action::RecordUpdateError, record = %self.name, "{err}");
                let reason = err.to_string();
                self.abort(&reason);

                let mut transitions = self.context.transitions.lock();
                self.unregister(&mut transitions);
                drop(transitions);

                while let Ok(event) = rx.try_recv() {
                    if let TransitionEvent::Add { sender, message, .. } = event {
                        self.reject(&sender, &message, &reason);
                    }
                }
            }
        }
    }

    fn unregister(&self, transitions: &mut HashMap<String, TransitionHandle>) {
        transitions.remove_if(&self.name, self.id);
    }

    /// Handles one event. `Ok(Some(reason))` asks the transition to stop.
    fn handle(&mut self, event: TransitionEvent) -> Result<Option<String>, TransitionError> {
        match event {
            TransitionEvent::Add {
                sender,
                message,
                upsert,
            } => self.add(sender, message, upsert),
            TransitionEvent::Loaded(result) => self.on_loaded(result)?,
            TransitionEvent::CacheWritten { ack, result } => self.on_cache_written(ack, result)?,
            TransitionEvent::StorageWritten { ack, result } => {
                self.on_storage_written(ack, result)?
            }
            TransitionEvent::Destroy { reason } => return Ok(Some(reason)),
        }
        Ok(None)
    }

    fn is_drained(&self) -> bool {
        self.steps.is_empty()
            && self.current.is_none()
            && self.existing_versions.is_empty()
            && self.pending_cache_writes == 0
            && self.pending_storage_writes == 0
            && !(self.request_made && self.data.is_none())
    }

    fn add(&mut self, sender: ConnectionRef, message: RecordMessage, upsert: bool) {
        let change = match Change::parse(&sender, &message) {
            Ok(change) => change,
            Err(err) => {
                warn!(event = %Action::InvalidMessageData, record = %self.name, "{err}");
                let mut reply = message
                    .reply(Action::InvalidMessageData)
                    .with_reason(err.to_string())
                    .as_error();
                reply.data = message.data.clone();
                sender.send_message(reply);
                return;
            }
        };

        let version = message.version;
        let step = Step {
            sender,
            message,
            change,
        };

        if version < NO_VERSION || version == Version::MAX {
            self.reject_version(step, "is out of range");
            return;
        }

        if let Some(last) = self.last_version {
            if version > last + 1 {
                self.reject_version(step, &format!("skips ahead of {last}"));
                return;
            }
            if version != NO_VERSION && version <= last {
                self.send_version_exists(step);
                return;
            }
        }

        if version != NO_VERSION {
            self.last_version = Some(version);
        }
        self.steps.push_back(step);

        if !self.request_made {
            self.request_made = true;
            self.upsert = upsert;
            self.load();
        } else if self.data.is_some() && self.current.is_none() {
            self.next();
        }
    }

    fn reject_version(&self, step: Step, detail: &str) {
        let version = step.message.version;
        warn!(
            event = %Action::InvalidVersion,
            record = %self.name,
            "version {version} {detail}"
        );
        let reply = step
            .message
            .reply(Action::InvalidVersion)
            .with_version(version)
            .as_error();
        step.sender.send_message(reply);
    }

    fn load(&self) {
        let context = self.context.clone();
        let tx = self.tx.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            let result = RecordRequest::new(&name, &context.config, &context.services)
                .without_promotion()
                .fetch()
                .await;
            let _ = tx.send(TransitionEvent::Loaded(result));
        });
    }

    fn on_loaded(
        &mut self,
        result: Result<RecordSnapshot, crate::error::RequestError>,
    ) -> Result<(), TransitionError> {
        let snapshot = result?;
        match snapshot.data {
            Some(data) => {
                self.version = snapshot.version;
                self.data = Some(data);
            }
            None if self.upsert => {
                self.version = 0;
                self.data = Some(json!({}));
            }
            None => {
                return Err(TransitionError::NonExistentRecord {
                    name: self.name.clone(),
                })
            }
        }

        for step in std::mem::take(&mut self.existing_versions) {
            self.send_version_exists(step);
        }
        self.next();
        Ok(())
    }

    /// Applies queued steps until one is written or the queue is empty.
    fn next(&mut self) {
        if self.current.is_some() || self.data.is_none() {
            return;
        }

        while let Some(mut step) = self.steps.pop_front() {
            // A record already at the largest version cannot move on.
            let following = self.version.checked_add(1);
            if step.message.version == NO_VERSION {
                if let Some(following) = following {
                    step.message.version = following;
                }
            }
            let version = step.message.version;

            if following.map_or(true, |following| version > following) {
                warn!(
                    event = %Action::InvalidVersion,
                    record = %self.name,
                    "version {version} skips ahead of {}",
                    self.version
                );
                let mut reply = step
                    .message
                    .reply(Action::InvalidVersion)
                    .with_version(self.version)
                    .as_error();
                if let Some(data) = &self.data {
                    reply = reply.with_data(data.clone());
                }
                step.sender.send_message(reply);
                continue;
            }

            if version <= self.version {
                self.send_version_exists(step);
                continue;
            }

            let Some(data) = self.data.as_mut() else {
                return;
            };
            let Step {
                sender,
                message,
                change,
            } = step;
            change.apply(data);
            let snapshot = data.clone();
            self.version = version;

            let write_storage = !self.context.config.is_storage_excluded(&self.name);
            let ack = match (&message.correlation_id, message.is_write_ack) {
                (Some(correlation_id), true) => {
                    Some(self.expect_ack(&sender, correlation_id, 1 + usize::from(write_storage)))
                }
                _ => None,
            };

            if write_storage {
                self.pending_storage_writes += 1;
                let storage = self.context.services.storage.clone();
                let (name, snapshot, tx, ack) =
                    (self.name.clone(), snapshot.clone(), self.tx.clone(), ack.clone());
                tokio::spawn(async move {
                    let result = storage.set(&name, version, snapshot).await;
                    let _ = tx.send(TransitionEvent::StorageWritten { ack, result });
                });
            }

            self.pending_cache_writes += 1;
            let cache = self.context.services.cache.clone();
            let (name, tx) = (self.name.clone(), self.tx.clone());
            tokio::spawn(async move {
                let result = cache.set(&name, version, snapshot).await;
                let _ = tx.send(TransitionEvent::CacheWritten { ack, result });
            });

            self.current = Some(InFlight { sender, message });
            return;
        }
    }

    fn on_cache_written(
        &mut self,
        ack: Option<AckKey>,
        result: StoreResult<()>,
    ) -> Result<(), TransitionError> {
        self.pending_cache_writes = self.pending_cache_writes.saturating_sub(1);
        result.map_err(TransitionError::CacheWrite)?;
        if let Some(ack) = ack {
            self.acknowledge(&ack);
        }

        if let Some(written) = self.current.take() {
            let broadcast = written.message.for_broadcast();
            self.context
                .broadcast_update(&self.name, &broadcast, false, Some(&written.sender));
        }
        self.next();
        Ok(())
    }

    fn on_storage_written(
        &mut self,
        ack: Option<AckKey>,
        result: StoreResult<()>,
    ) -> Result<(), TransitionError> {
        self.pending_storage_writes = self.pending_storage_writes.saturating_sub(1);
        result.map_err(TransitionError::StorageWrite)?;
        if let Some(ack) = ack {
            self.acknowledge(&ack);
        }
        Ok(())
    }

    /// Answers a stale write with the current state, or defers the answer
    /// until the record is loaded.
    fn send_version_exists(&mut self, step: Step) {
        if self.data.is_none() {
            self.existing_versions.push(step);
            return;
        }

        warn!(
            event = %Action::VersionExists,
            record = %self.name,
            "{} tried to update record {} to version {} but it already was {}",
            step.sender.user_id().unwrap_or_default(),
            self.name,
            step.message.version,
            self.version
        );
        let mut reply = step
            .message
            .reply(Action::VersionExists)
            .with_version(self.version)
            .as_error();
        if let Some(data) = &self.data {
            reply = reply.with_data(data.clone());
        }
        step.sender.send_message(reply);
    }

    fn expect_ack(&mut self, sender: &ConnectionRef, correlation_id: &str, writes: usize) -> AckKey {
        let pending = self
            .write_acks
            .entry(sender.id())
            .or_insert_with(|| PendingAcks {
                connection: sender.clone(),
                remaining: HashMap::new(),
            });
        *pending
            .remaining
            .entry(correlation_id.to_string())
            .or_insert(0) += writes;

        AckKey {
            connection: sender.id(),
            correlation_id: correlation_id.to_string(),
        }
    }

    fn acknowledge(&mut self, ack: &AckKey) {
        let Some(pending) = self.write_acks.get_mut(&ack.connection) else {
            return;
        };
        let Some(remaining) = pending.remaining.get_mut(&ack.correlation_id) else {
            return;
        };

        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            pending.remaining.remove(&ack.correlation_id);
            pending.connection.send_message(
                RecordMessage::new(Action::WriteAcknowledgement, self.name.clone())
                    .with_write_ack(ack.correlation_id.clone()),
            );
        }
        if pending.remaining.is_empty() {
            self.write_acks.remove(&ack.connection);
        }
    }

    /// Answers everything still waiting on this transition with `reason`.
    fn abort(&mut self, reason: &str) {
        let queued: Vec<Step> = self
            .steps
            .drain(..)
            .chain(self.existing_versions.drain(..))
            .collect();
        for step in queued {
            self.reject(&step.sender, &step.message, reason);
        }

        for (_, pending) in self.write_acks.drain() {
            for correlation_id in pending.remaining.into_keys() {
                pending.connection.send_message(
                    RecordMessage::new(Action::WriteAcknowledgement, self.name.clone())
                        .with_write_ack(correlation_id)
                        .with_reason(reason)
                        .as_error(),
                );
            }
        }
    }

    fn reject(&self, sender: &ConnectionRef, message: &RecordMessage, reason: &str) {
        if sender.is_remote() {
            return;
        }
        sender.send_message(
            message
                .reply(Action::RecordUpdateError)
                .with_reason(reason)
                .as_error(),
        );
    }
}

/// Table removal that only succeeds for the transition owning the entry.
trait RemoveIf {
    fn remove_if(&mut self, name: &str, id: u64);
}

impl RemoveIf for HashMap<String, TransitionHandle> {
    fn remove_if(&mut self, name: &str, id: u64) {
        if self.get(name).is_some_and(|handle| handle.id == id) {
            self.remove(name);
        }
    }
}
