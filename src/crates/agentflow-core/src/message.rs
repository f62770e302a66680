//! Typed messages exchanged between executors
//!
//! Every value that travels through a workflow is a [`Payload`]: a string discriminant (`kind`)
//! plus plain JSON `data`. Rust types opt in through [`MessageData`], which fixes the kind at
//! compile time, so dispatch is a table lookup rather than runtime reflection.
//!
//! ```text
//! Message
//! ├── payload      Payload { kind: "string", data: "ab cd" }
//! ├── source_id    "upper"
//! ├── target_id    Some("reverse") | None (follow every edge)
//! └── response_to  Some(PendingRequest) for injected responses
//! ```

use crate::error::Result;
use crate::request::PendingRequest;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source id of the initial input message.
pub const INPUT_SOURCE: &str = "__input__";

/// Source id of messages carrying injected responses.
pub const RESPONSE_SOURCE: &str = "__response__";

/// Kind accepted by handlers that take any payload.
pub const ANY_KIND: &str = "any";

/// Kind of a heterogeneous batch.
pub const ANY_LIST_KIND: &str = "list<any>";

/// A type that can travel through a workflow.
///
/// Use [`message_kind!`](crate::message_kind) to implement it for your own types.
pub trait MessageData: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Discriminant stored in [`Payload::kind`].
    fn kind() -> String;
}

/// Implement [`MessageData`] for a serde type with a fixed kind.
///
/// ```rust
/// use agentflow_core::message_kind;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct DomainQuery {
///     domain: String,
/// }
///
/// message_kind!(DomainQuery, "domain_query");
/// ```
#[macro_export]
macro_rules! message_kind {
    ($ty:ty, $kind:expr) => {
        impl $crate::message::MessageData for $ty {
            fn kind() -> String {
                ($kind).to_string()
            }
        }
    };
}

message_kind!(String, "string");
message_kind!(bool, "bool");
message_kind!(i64, "int");
message_kind!(f64, "float");
message_kind!(Value, ANY_KIND);

impl<T: MessageData> MessageData for Vec<T> {
    fn kind() -> String {
        list_kind(&T::kind())
    }
}

/// The batch kind wrapping `inner`.
pub fn list_kind(inner: &str) -> String {
    format!("list<{}>", inner)
}

pub fn is_list_kind(kind: &str) -> bool {
    kind.starts_with("list<") && kind.ends_with('>')
}

/// Whether a handler registered for `handler_kind` accepts a payload of `payload_kind`.
pub fn kind_accepts(handler_kind: &str, payload_kind: &str) -> bool {
    handler_kind == payload_kind
        || handler_kind == ANY_KIND
        || (handler_kind == ANY_LIST_KIND && is_list_kind(payload_kind))
}

/// Tagged-union message value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub kind: String,
    pub data: Value,
}

impl Payload {
    /// Encode a typed value.
    pub fn new<T: MessageData>(value: &T) -> Result<Self> {
        Ok(Self {
            kind: T::kind(),
            data: serde_json::to_value(value)?,
        })
    }

    /// Build a payload from an explicit kind and raw JSON.
    pub fn from_parts(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Decode into a typed value.
    pub fn decode<T: MessageData>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Combine payloads into one batch.
    ///
    /// A homogeneous batch of kind `K` has kind `list<K>` and carries the raw data items. A
    /// heterogeneous (or empty) batch has kind `list<any>` and carries whole payload objects so
    /// that each item keeps its kind.
    pub fn batch(items: Vec<Payload>) -> Self {
        let homogeneous = match items.first() {
            Some(first) => items.iter().all(|p| p.kind == first.kind),
            None => false,
        };

        if homogeneous {
            let kind = list_kind(&items[0].kind);
            let data = items.into_iter().map(|p| p.data).collect();
            Self {
                kind,
                data: Value::Array(data),
            }
        } else {
            let data = items
                .into_iter()
                .map(|p| serde_json::json!({ "kind": p.kind, "data": p.data }))
                .collect();
            Self {
                kind: ANY_LIST_KIND.to_string(),
                data: Value::Array(data),
            }
        }
    }

    pub fn is_batch(&self) -> bool {
        is_list_kind(&self.kind)
    }

    /// Whether this payload is assignable to `T`.
    pub fn is<T: MessageData>(&self) -> bool {
        kind_accepts(&T::kind(), &self.kind)
    }
}

/// Envelope for a payload in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub payload: Payload,
    pub source_id: String,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub response_to: Option<PendingRequest>,
}

impl Message {
    pub fn new(payload: Payload, source_id: impl Into<String>) -> Self {
        Self {
            payload,
            source_id: source_id.into(),
            target_id: None,
            response_to: None,
        }
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    /// The initial input of a run, addressed to the start executor.
    pub fn input(payload: Payload, start_executor_id: impl Into<String>) -> Self {
        Self::new(payload, INPUT_SOURCE).with_target(start_executor_id)
    }

    /// A response to `request`, addressed to the executor that receives it.
    pub fn response(request: PendingRequest, payload: Payload) -> Self {
        let target = request.reply_to.clone();
        Self {
            payload,
            source_id: RESPONSE_SOURCE.to_string(),
            target_id: Some(target),
            response_to: Some(request),
        }
    }

    /// Internal messages bypass edge routing.
    pub fn is_internal(&self) -> bool {
        self.source_id == INPUT_SOURCE || self.source_id == RESPONSE_SOURCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ticket {
        id: u32,
    }

    message_kind!(Ticket, "ticket");

    #[test]
    fn test_builtin_kinds() {
        assert_eq!(String::kind(), "string");
        assert_eq!(bool::kind(), "bool");
        assert_eq!(i64::kind(), "int");
        assert_eq!(f64::kind(), "float");
        assert_eq!(Value::kind(), "any");
        assert_eq!(<Vec<String>>::kind(), "list<string>");
        assert_eq!(<Vec<Vec<i64>>>::kind(), "list<list<int>>");
        assert_eq!(Ticket::kind(), "ticket");
    }

    #[test]
    fn test_payload_typed_access() {
        let payload = Payload::new(&Ticket { id: 7 }).unwrap();
        assert_eq!(payload.kind, "ticket");
        assert_eq!(payload.data, json!({"id": 7}));
        assert!(payload.is::<Ticket>());
        assert!(payload.is::<Value>());
        assert!(!payload.is::<String>());
        assert_eq!(payload.decode::<Ticket>().unwrap(), Ticket { id: 7 });
        assert!(payload.decode::<String>().is_err());
    }

    #[test]
    fn test_accept_rules() {
        assert!(kind_accepts("string", "string"));
        assert!(kind_accepts("any", "ticket"));
        assert!(kind_accepts("list<any>", "list<string>"));
        assert!(!kind_accepts("list<any>", "string"));
        assert!(!kind_accepts("list<string>", "list<int>"));
        assert!(!kind_accepts("string", "any"));
    }

    #[test]
    fn test_homogeneous_batch() {
        let batch = Payload::batch(vec![
            Payload::new(&"a".to_string()).unwrap(),
            Payload::new(&"b".to_string()).unwrap(),
        ]);
        assert!(batch.is_batch());
        assert_eq!(batch.kind, "list<string>");
        assert_eq!(batch.decode::<Vec<String>>().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_heterogeneous_batch_keeps_item_kinds() {
        let batch = Payload::batch(vec![
            Payload::new(&1i64).unwrap(),
            Payload::new(&true).unwrap(),
        ]);
        assert_eq!(batch.kind, "list<any>");
        assert_eq!(batch.data[0], json!({"kind": "int", "data": 1}));
        assert_eq!(batch.data[1], json!({"kind": "bool", "data": true}));

        let items: Vec<Payload> = serde_json::from_value(batch.data).unwrap();
        assert_eq!(items[1].decode::<bool>().unwrap(), true);
    }

    #[test]
    fn test_internal_messages() {
        let input = Message::input(Payload::new(&1i64).unwrap(), "start");
        assert!(input.is_internal());
        assert_eq!(input.target_id.as_deref(), Some("start"));

        let plain = Message::new(Payload::new(&1i64).unwrap(), "a");
        assert!(!plain.is_internal());
        assert!(plain.target_id.is_none());
    }
}
