//! The record message.

use crate::action::Action;
use crate::error::{ProtocolError, ProtocolResult};
use crate::json_path::JsonPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A record version. Versions start at 0 and grow by one per applied write.
pub type Version = i64;

/// The version of a record that does not exist, and the "next available"
/// version in a write request.
pub const NO_VERSION: Version = -1;

/// A message about one record (or, for bulk actions, several records).
///
/// The payload is kept as raw JSON text in [`data`](Self::data) the way it
/// arrived from the client. [`parse_data`](Self::parse_data) turns it into a
/// [`Value`]; messages built on the server side with
/// [`with_data`](Self::with_data) carry the parsed value as well, so they are
/// never parsed twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMessage {
    /// What is requested or reported.
    pub action: Action,
    /// Record name.
    pub name: String,
    /// Record names for bulk actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    /// Record version; [`NO_VERSION`] when absent or "next available".
    #[serde(default = "no_version")]
    pub version: Version,
    /// Path for partial writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Raw JSON payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip)]
    parsed_data: Option<Value>,
    /// Correlates a reply with its request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// The sender wants a `WRITE_ACKNOWLEDGEMENT` once the write is persisted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_write_ack: bool,
    /// For replies and errors: the action that caused them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_action: Option<Action>,
    /// Human readable error reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Versions per record, for bulk head responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<BTreeMap<String, Version>>,
    /// Marks an error reply.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

fn no_version() -> Version {
    NO_VERSION
}

impl RecordMessage {
    /// Creates a message for a single record.
    pub fn new(action: Action, name: impl Into<String>) -> Self {
        Self {
            action,
            name: name.into(),
            names: None,
            version: NO_VERSION,
            path: None,
            data: None,
            parsed_data: None,
            correlation_id: None,
            is_write_ack: false,
            original_action: None,
            reason: None,
            versions: None,
            is_error: false,
        }
    }

    /// Creates a bulk message addressing several records.
    pub fn bulk<I, S>(action: Action, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(action, String::new()).with_names(names)
    }

    /// Sets the version.
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Sets the payload from a JSON value.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data.to_string());
        self.parsed_data = Some(data);
        self
    }

    /// Sets the payload from raw JSON text. The text is parsed lazily.
    pub fn with_raw_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self.parsed_data = None;
        self
    }

    /// Sets the path for a partial write.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Requests a write acknowledgement for `correlation_id`.
    pub fn with_write_ack(self, correlation_id: impl Into<String>) -> Self {
        let mut message = self.with_correlation_id(correlation_id);
        message.is_write_ack = true;
        message
    }

    /// Sets the record names for a bulk action.
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the action this message answers.
    pub fn with_original_action(mut self, action: Action) -> Self {
        self.original_action = Some(action);
        self
    }

    /// Sets the error reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Sets per-record versions.
    pub fn with_versions(mut self, versions: BTreeMap<String, Version>) -> Self {
        self.versions = Some(versions);
        self
    }

    /// Marks the message as an error.
    pub fn as_error(mut self) -> Self {
        self.is_error = true;
        self
    }

    /// Builds a reply to this message.
    ///
    /// The reply keeps the record name, the correlation id and the write-ack
    /// flag, and records this message's action as its original action.
    pub fn reply(&self, action: Action) -> Self {
        let mut reply = Self::new(action, self.name.clone());
        reply.original_action = Some(self.action);
        reply.correlation_id = self.correlation_id.clone();
        reply.is_write_ack = self.is_write_ack;
        reply
    }

    /// Returns a copy suitable for broadcasting to subscribers: the
    /// acknowledgement bookkeeping of the writer is stripped.
    pub fn for_broadcast(&self) -> Self {
        let mut message = self.clone();
        message.is_write_ack = false;
        message.correlation_id = None;
        message
    }

    /// Parses the payload.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MissingData`] when there is no payload,
    /// [`ProtocolError::InvalidData`] when it is not valid JSON.
    pub fn parse_data(&self) -> ProtocolResult<Value> {
        if let Some(parsed) = &self.parsed_data {
            return Ok(parsed.clone());
        }
        let raw = self.data.as_deref().ok_or_else(|| ProtocolError::MissingData {
            name: self.name.clone(),
        })?;
        Ok(serde_json::from_str(raw)?)
    }

    /// Parses the path of a partial write.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MissingPath`] when the message has no path,
    /// [`ProtocolError::InvalidPath`] when it cannot be parsed.
    pub fn json_path(&self) -> ProtocolResult<JsonPath> {
        let path = self.path.as_deref().ok_or_else(|| ProtocolError::MissingPath {
            name: self.name.clone(),
            action: self.action,
        })?;
        JsonPath::parse(path)
    }

    /// Returns the records this message addresses: its `names` when present,
    /// otherwise its single `name`.
    pub fn target_names(&self) -> Vec<String> {
        match &self.names {
            Some(names) => names.clone(),
            None => vec![self.name.clone()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserialize_defaults_missing_version() {
        let message: RecordMessage =
            serde_json::from_str(r#"{"action":"UPDATE","name":"car/1","data":"{\"speed\":3}"}"#)
                .unwrap();
        assert_eq!(message.action, Action::Update);
        assert_eq!(message.version, NO_VERSION);
        assert!(!message.is_write_ack);
        assert_eq!(message.parse_data().unwrap(), json!({ "speed": 3 }));
    }

    #[test]
    fn serialize_uses_camel_case_and_skips_empty_fields() {
        let message = RecordMessage::new(Action::Patch, "car/1")
            .with_version(4)
            .with_path("wheels[0]")
            .with_data(json!("flat"))
            .with_write_ack("c1");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["correlationId"], "c1");
        assert_eq!(value["isWriteAck"], true);
        assert_eq!(value["data"], "\"flat\"");
        assert!(value.get("isError").is_none());
        assert!(value.get("names").is_none());
    }

    #[test]
    fn parse_data_errors() {
        let missing = RecordMessage::new(Action::Update, "a");
        assert!(matches!(
            missing.parse_data(),
            Err(ProtocolError::MissingData { .. })
        ));

        let invalid = RecordMessage::new(Action::Update, "a").with_raw_data("{nope");
        assert!(matches!(
            invalid.parse_data(),
            Err(ProtocolError::InvalidData(_))
        ));
    }

    #[test]
    fn json_path_requires_path() {
        let message = RecordMessage::new(Action::Patch, "a").with_data(json!(1));
        assert!(matches!(
            message.json_path(),
            Err(ProtocolError::MissingPath { .. })
        ));
        let message = message.with_path("x.y");
        assert_eq!(message.json_path().unwrap().as_str(), "x.y");
    }

    #[test]
    fn reply_carries_correlation() {
        let request = RecordMessage::new(Action::Update, "a").with_write_ack("c9");
        let reply = request.reply(Action::VersionExists);
        assert_eq!(reply.name, "a");
        assert_eq!(reply.original_action, Some(Action::Update));
        assert_eq!(reply.correlation_id.as_deref(), Some("c9"));
        assert!(reply.is_write_ack);
    }

    #[test]
    fn broadcast_strips_ack_bookkeeping() {
        let request = RecordMessage::new(Action::Update, "a")
            .with_version(2)
            .with_data(json!({}))
            .with_write_ack("c1");
        let broadcast = request.for_broadcast();
        assert!(!broadcast.is_write_ack);
        assert!(broadcast.correlation_id.is_none());
        assert_eq!(broadcast.version, 2);
    }

    #[test]
    fn target_names_prefers_bulk_names() {
        let single = RecordMessage::new(Action::Subscribe, "a");
        assert_eq!(single.target_names(), vec!["a".to_string()]);

        let bulk = RecordMessage::bulk(Action::Subscribe, ["b", "c"]);
        assert_eq!(bulk.target_names(), vec!["b".to_string(), "c".to_string()]);
    }
}
