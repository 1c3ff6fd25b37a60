//! Record actions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The action carried by a [`RecordMessage`](crate::RecordMessage).
///
/// Requests arrive from connections or cluster peers; responses and errors
/// are produced by the server and sent back over the originating connection
/// or broadcast to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    // Requests
    /// Create an empty record.
    Create,
    /// Read the current value of a record.
    Read,
    /// Replace the whole document.
    Update,
    /// Set a value at a path inside the document.
    Patch,
    /// Remove a path from the document.
    Erase,
    /// Delete the record from cache and storage.
    Delete,
    /// Upsert: create the record if needed, then replace its document.
    CreateAndUpdate,
    /// Upsert: create the record if needed, then patch it.
    CreateAndPatch,
    /// Subscribe to one or more records.
    Subscribe,
    /// Discard subscriptions to one or more records.
    Unsubscribe,
    /// Subscribe and read; missing records read as empty documents.
    SubscribeAndRead,
    /// Subscribe and read; missing records are created.
    SubscribeCreateAndRead,
    /// Read only the current version of a record.
    Head,
    /// Subscribe to several records and read their versions.
    SubscribeAndHead,
    /// Ask whether a record exists.
    Has,
    /// Records were changed outside of the server; invalidate and re-read.
    Notify,
    /// A record was deleted (relayed by a cluster peer or broadcast).
    Deleted,

    // Responses
    /// Current version and data of a record.
    ReadResponse,
    /// Current version of a record (`-1` when missing).
    HeadResponse,
    /// Versions of several records.
    HeadResponseBulk,
    /// Whether a record exists.
    HasResponse,
    /// The record was deleted from every tier.
    DeleteSuccess,
    /// A write requested with acknowledgement has been persisted.
    WriteAcknowledgement,

    // Errors
    /// The submitted version is stale or already taken.
    VersionExists,
    /// The submitted version leaves a gap.
    InvalidVersion,
    /// The payload could not be parsed or has the wrong shape.
    InvalidMessageData,
    /// Patches are not supported on hot path records.
    InvalidPatchOnHotpath,
    /// The write could not be applied.
    RecordUpdateError,
    /// The record could not be loaded.
    RecordLoadError,
    /// The record could not be created.
    RecordCreateError,
    /// The record could not be deleted.
    RecordDeleteError,
    /// A notify request failed.
    RecordNotifyError,
    /// The record does not exist.
    RecordNotFound,
    /// The cache did not answer in time.
    CacheRetrievalTimeout,
    /// The storage did not answer in time.
    StorageRetrievalTimeout,
    /// A secondary permission check denied the action.
    MessageDenied,
    /// A secondary permission check failed.
    MessagePermissionError,
}

impl Action {
    /// Returns the canonical upper-case name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "CREATE",
            Action::Read => "READ",
            Action::Update => "UPDATE",
            Action::Patch => "PATCH",
            Action::Erase => "ERASE",
            Action::Delete => "DELETE",
            Action::CreateAndUpdate => "CREATE_AND_UPDATE",
            Action::CreateAndPatch => "CREATE_AND_PATCH",
            Action::Subscribe => "SUBSCRIBE",
            Action::Unsubscribe => "UNSUBSCRIBE",
            Action::SubscribeAndRead => "SUBSCRIBE_AND_READ",
            Action::SubscribeCreateAndRead => "SUBSCRIBE_CREATE_AND_READ",
            Action::Head => "HEAD",
            Action::SubscribeAndHead => "SUBSCRIBE_AND_HEAD",
            Action::Has => "HAS",
            Action::Notify => "NOTIFY",
            Action::Deleted => "DELETED",
            Action::ReadResponse => "READ_RESPONSE",
            Action::HeadResponse => "HEAD_RESPONSE",
            Action::HeadResponseBulk => "HEAD_RESPONSE_BULK",
            Action::HasResponse => "HAS_RESPONSE",
            Action::DeleteSuccess => "DELETE_SUCCESS",
            Action::WriteAcknowledgement => "WRITE_ACKNOWLEDGEMENT",
            Action::VersionExists => "VERSION_EXISTS",
            Action::InvalidVersion => "INVALID_VERSION",
            Action::InvalidMessageData => "INVALID_MESSAGE_DATA",
            Action::InvalidPatchOnHotpath => "INVALID_PATCH_ON_HOTPATH",
            Action::RecordUpdateError => "RECORD_UPDATE_ERROR",
            Action::RecordLoadError => "RECORD_LOAD_ERROR",
            Action::RecordCreateError => "RECORD_CREATE_ERROR",
            Action::RecordDeleteError => "RECORD_DELETE_ERROR",
            Action::RecordNotifyError => "RECORD_NOTIFY_ERROR",
            Action::RecordNotFound => "RECORD_NOT_FOUND",
            Action::CacheRetrievalTimeout => "CACHE_RETRIEVAL_TIMEOUT",
            Action::StorageRetrievalTimeout => "STORAGE_RETRIEVAL_TIMEOUT",
            Action::MessageDenied => "MESSAGE_DENIED",
            Action::MessagePermissionError => "MESSAGE_PERMISSION_ERROR",
        }
    }

    /// Returns true for actions that mutate a record's document.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Action::Update
                | Action::Patch
                | Action::Erase
                | Action::CreateAndUpdate
                | Action::CreateAndPatch
        )
    }

    /// Returns true for actions that address a path inside the document.
    pub fn is_partial(&self) -> bool {
        matches!(self, Action::Patch | Action::Erase | Action::CreateAndPatch)
    }

    /// Returns true for actions that report a failure to the client.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Action::VersionExists
                | Action::InvalidVersion
                | Action::InvalidMessageData
                | Action::InvalidPatchOnHotpath
                | Action::RecordUpdateError
                | Action::RecordLoadError
                | Action::RecordCreateError
                | Action::RecordDeleteError
                | Action::RecordNotifyError
                | Action::RecordNotFound
                | Action::CacheRetrievalTimeout
                | Action::StorageRetrievalTimeout
                | Action::MessageDenied
                | Action::MessagePermissionError
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_serde_name() {
        for action in [
            Action::CreateAndUpdate,
            Action::SubscribeCreateAndRead,
            Action::WriteAcknowledgement,
            Action::InvalidPatchOnHotpath,
            Action::CacheRetrievalTimeout,
        ] {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action));
        }
    }

    #[test]
    fn classification() {
        assert!(Action::Patch.is_write());
        assert!(Action::Patch.is_partial());
        assert!(!Action::Update.is_partial());
        assert!(!Action::Read.is_write());
        assert!(Action::VersionExists.is_error());
        assert!(!Action::WriteAcknowledgement.is_error());
    }
}
