//! Inbox entries and categories.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cim_core::CiName;

/// Inbox category. `New` is a FIFO work queue drained by `pop`; `Keep`
/// holds pinned entries read most-recent-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Unprocessed incoming messages, drained oldest-first
    New,
    /// Pinned messages retained until explicitly removed
    Keep,
}

impl Category {
    /// Directory name for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::New => "new",
            Category::Keep => "keep",
        }
    }

    /// Parses a category name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Category::New),
            "keep" => Some(Category::Keep),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single stored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxEntry {
    /// Unique entry id
    pub id: Uuid,

    /// Sender name
    pub from: CiName,

    /// Recipient name (owner of the inbox this entry lives in)
    pub to: CiName,

    /// When the entry was appended
    pub timestamp: DateTime<Utc>,

    /// Message text
    pub body: String,
}

impl InboxEntry {
    /// Creates an entry timestamped now with a fresh id.
    pub fn new(from: CiName, to: CiName, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            from,
            to,
            timestamp: Utc::now(),
            body: body.into(),
        }
    }
}
