//! Append-only chat log.
//!
//! The log lives next to the game session so a round-solved dispatch can
//! close the round and append its system line inside the same turn; no
//! observer ever sees one without the other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::player::PeerId;

/// One chat line. `author` is `None` for system notices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub author: Option<PeerId>,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    entries: Vec<ChatEntry>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&mut self, author: PeerId, text: impl Into<String>, at: DateTime<Utc>) {
        self.entries.push(ChatEntry {
            author: Some(author),
            text: text.into(),
            at,
        });
    }

    pub fn system(&mut self, text: impl Into<String>, at: DateTime<Utc>) {
        self.entries.push(ChatEntry {
            author: None,
            text: text.into(),
            at,
        });
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_log_keeps_order() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut log = ChatLog::new();
        log.user(PeerId::new("p1"), "hello", at);
        log.system("p2 joined", at);

        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0].author, Some(PeerId::new("p1")));
        assert_eq!(log.entries()[1].author, None);
    }
}
