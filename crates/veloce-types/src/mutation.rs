use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::key::KeyPath;

/// The kind of mutation applied to an observed container.
///
/// Displays as the JavaScript-style method name observers receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    /// A mapping field or sequence slot was assigned.
    Set,
    /// A mapping field or sequence slot was removed.
    DeleteProperty,
    Push,
    Pop,
    Shift,
    Unshift,
    /// Elements were removed and/or inserted at a position.
    Splice,
    /// Every entry of a container was removed.
    Clear,
    /// The whole document root was swapped.
    Replace,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::DeleteProperty => "deleteProperty",
            Self::Push => "push",
            Self::Pop => "pop",
            Self::Shift => "shift",
            Self::Unshift => "unshift",
            Self::Splice => "splice",
            Self::Clear => "clear",
            Self::Replace => "replace",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An observed mutation.
///
/// Produced synchronously at the moment a mutation is applied and consumed
/// immediately by the scheduler. `path` locates the mutated container at
/// the time it was first reached; `args` are the values passed to the
/// mutating call and `result` is what the call returned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub method: Method,
    pub path: KeyPath,
    pub args: Vec<Value>,
    pub result: Value,
    pub at: DateTime<Utc>,
}

impl MutationEvent {
    /// Create an event stamped with the current wall-clock time.
    pub fn new(method: Method, path: KeyPath, args: Vec<Value>, result: Value) -> Self {
        Self {
            method,
            path,
            args,
            result,
            at: Utc::now(),
        }
    }

    /// One-line description used in debug logs.
    pub fn summary(&self) -> String {
        format!("{} {} ({} args)", self.method, self.path, self.args.len())
    }
}

/// What caused a flush.
#[derive(Clone, Debug, PartialEq)]
pub enum Trigger {
    /// The mutation that most recently armed (or forced) the flush.
    Mutation(MutationEvent),
    /// An explicit `save(false)` with nothing tracked (no-proxy mode).
    Manual,
    /// An explicit `save(true)` with no pending mutation.
    Forced,
}

impl Trigger {
    /// The name passed to `on_update`: the mutation's method, or the
    /// `"manual"` / `"forced"` sentinels.
    pub fn method(&self) -> &str {
        match self {
            Self::Mutation(event) => event.method.as_str(),
            Self::Manual => "manual",
            Self::Forced => "forced",
        }
    }

    /// The result passed to `on_update`. Sentinel triggers carry `null`.
    pub fn result(&self) -> &Value {
        static NULL: Value = Value::Null;
        match self {
            Self::Mutation(event) => &event.result,
            Self::Manual | Self::Forced => &NULL,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Mutation(_))
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mutation(event) => write!(f, "{}", event.summary()),
            other => f.write_str(other.method()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(method: Method) -> MutationEvent {
        MutationEvent::new(
            method,
            KeyPath::root().child("items".into()),
            vec![json!(1)],
            json!(3),
        )
    }

    #[test]
    fn method_names_match_observer_contract() {
        assert_eq!(Method::Set.to_string(), "set");
        assert_eq!(Method::DeleteProperty.to_string(), "deleteProperty");
        assert_eq!(Method::Unshift.as_str(), "unshift");
        assert_eq!(
            serde_json::to_value(Method::DeleteProperty).unwrap(),
            json!("deleteProperty")
        );
    }

    #[test]
    fn trigger_method_and_result() {
        let trigger = Trigger::Mutation(event(Method::Push));
        assert_eq!(trigger.method(), "push");
        assert_eq!(trigger.result(), &json!(3));
        assert!(trigger.is_mutation());

        assert_eq!(Trigger::Manual.method(), "manual");
        assert_eq!(Trigger::Forced.method(), "forced");
        assert_eq!(Trigger::Forced.result(), &Value::Null);
        assert!(!Trigger::Manual.is_mutation());
    }

    #[test]
    fn summary_mentions_method_and_path() {
        let summary = event(Method::Push).summary();
        assert!(summary.contains("push"));
        assert!(summary.contains("items"));
        assert_eq!(Trigger::Forced.to_string(), "forced");
    }
}
