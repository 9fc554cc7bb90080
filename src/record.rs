//! Record type: one delimiter-terminated unit of input text.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A decoded line of input with its delimiter stripped.
///
/// Records are transient. Every callback invocation receives its own clone,
/// so callbacks may keep the value for as long as they like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    seq: u64,
    text: String,
    received_at: DateTime<Utc>,
}

impl Record {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(seq: u64, text: impl Into<String>) -> Self {
        Self {
            seq,
            text: text.into(),
            received_at: Utc::now(),
        }
    }

    /// Decodes raw record bytes, replacing invalid UTF-8 sequences.
    #[must_use]
    pub fn from_bytes(seq: u64, bytes: &[u8]) -> Self {
        Self::new(seq, String::from_utf8_lossy(bytes))
    }

    /// Position of this record in the input, starting at 0.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// The record text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// When the reader produced this record.
    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Consumes the record, returning its text.
    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }
}

impl AsRef<str> for Record {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
