//! Property-based test generators using proptest.
//!
//! Provides strategies for record names, documents and write sequences.

use proptest::prelude::*;
use serde_json::{Map, Value};
use syncwell_protocol::{Action, RecordMessage};

/// Strategy for record names such as `car/12`.
pub fn record_name_strategy() -> impl Strategy<Value = String> {
    ("[a-z]{1,8}", 0u32..1000).prop_map(|(kind, id)| format!("{kind}/{id}"))
}

/// Strategy for scalar JSON values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
    ]
}

/// Strategy for flat JSON objects with up to `max_fields` scalar fields.
pub fn document_strategy(max_fields: usize) -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z]{1,6}", scalar_strategy(), 0..=max_fields).prop_map(
        |fields| {
            let map: Map<String, Value> = fields.into_iter().collect();
            Value::Object(map)
        },
    )
}

/// Strategy for paths into a document, e.g. `a.b` or `a[2]`.
pub fn path_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{1,6}",
        ("[a-z]{1,6}", "[a-z]{1,6}").prop_map(|(a, b)| format!("{a}.{b}")),
        ("[a-z]{1,6}", 0usize..4).prop_map(|(a, i)| format!("{a}[{i}]")),
    ]
}

/// A write a client may send.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Replace the whole document.
    Update {
        /// New document.
        data: Value,
    },
    /// Set one path.
    Patch {
        /// Target path.
        path: String,
        /// New value.
        value: Value,
    },
    /// Remove one path.
    Erase {
        /// Target path.
        path: String,
    },
}

impl WriteOp {
    /// Builds the message for this write against `name` at `version`.
    pub fn to_message(&self, name: &str, version: i64) -> RecordMessage {
        let message = match self {
            WriteOp::Update { data } => {
                RecordMessage::new(Action::Update, name).with_data(data.clone())
            }
            WriteOp::Patch { path, value } => RecordMessage::new(Action::Patch, name)
                .with_path(path.clone())
                .with_data(value.clone()),
            WriteOp::Erase { path } => RecordMessage::new(Action::Erase, name).with_path(path.clone()),
        };
        message.with_version(version)
    }
}

/// Strategy for a single write.
pub fn write_op_strategy() -> impl Strategy<Value = WriteOp> {
    prop_oneof![
        2 => document_strategy(4).prop_map(|data| WriteOp::Update { data }),
        3 => (path_strategy(), scalar_strategy())
            .prop_map(|(path, value)| WriteOp::Patch { path, value }),
        1 => path_strategy().prop_map(|path| WriteOp::Erase { path }),
    ]
}

/// Strategy for a sequence of writes.
pub fn write_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<WriteOp>> {
    prop::collection::vec(write_op_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncwell_protocol::JsonPath;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn record_names_have_a_kind(name in record_name_strategy()) {
            prop_assert!(name.contains('/'));
        }

        #[test]
        fn generated_paths_parse(path in path_strategy()) {
            prop_assert!(JsonPath::parse(&path).is_ok());
        }

        #[test]
        fn writes_carry_their_version(op in write_op_strategy(), version in 0i64..100) {
            let message = op.to_message("car/1", version);
            prop_assert_eq!(message.version, version);
            prop_assert!(message.action.is_write());
        }
    }
}
