//! The immutable unit of communication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CiName;

/// A message addressed to one or more endpoints.
///
/// The body is the raw payload; the delimiter is appended at the wire
/// by the router and never appears inside `body`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent the message.
    pub sender: CiName,

    /// One recipient for a point-to-point send, many for a broadcast.
    pub recipients: Vec<CiName>,

    /// Raw payload, delimiter-free.
    pub body: String,

    /// Correlates a request with its response and inbox deposits.
    pub correlation_id: Uuid,

    /// When the message was created.
    pub sent_at: DateTime<Utc>,
}

impl Message {
    /// Creates a point-to-point message.
    pub fn new(sender: CiName, recipient: CiName, body: impl Into<String>) -> Self {
        Self::to_many(sender, vec![recipient], body)
    }

    /// Creates a message fanned out to several recipients.
    pub fn to_many(sender: CiName, recipients: Vec<CiName>, body: impl Into<String>) -> Self {
        Self {
            sender,
            recipients,
            body: body.into(),
            correlation_id: Uuid::new_v4(),
            sent_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_fields() {
        let msg = Message::new(CiName::new("terma"), CiName::new("numa"), "hello");
        assert_eq!(msg.sender.as_str(), "terma");
        assert_eq!(msg.recipients.len(), 1);
        assert_eq!(msg.body, "hello");
    }

    #[test]
    fn test_correlation_ids_distinct() {
        let a = Message::new(CiName::new("a"), CiName::new("b"), "x");
        let b = Message::new(CiName::new("a"), CiName::new("b"), "x");
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn test_serde_round_trip() {
        let msg = Message::to_many(
            CiName::new("terma"),
            vec![CiName::new("numa"), CiName::new("apollo")],
            "team update",
        );
        let json = serde_json::to_string(&msg).expect("serialize");
        let back: Message = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(msg, back);
    }
}
