//! Transcript entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Who wrote a message. Closed set: the practitioner or the simulated patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Assistant,
}

/// Last id handed out, in Unix millis.
static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// Construction-time Unix millis, bumped so ids are strictly increasing within the process.
fn next_id(now: DateTime<Utc>) -> String {
    let now_ms = now.timestamp_millis();
    let prev = LAST_ID
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now_ms.max(last + 1))
        })
        .unwrap_or(now_ms);
    now_ms.max(prev + 1).to_string()
}

/// One immutable transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: String,
    text: String,
    author: Author,
    created_at: DateTime<Utc>,
}

impl Message {
    pub(crate) fn new(author: Author, text: impl Into<String>) -> Self {
        let created_at = Utc::now();
        Self {
            id: next_id(created_at),
            text: text.into(),
            author,
            created_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn author(&self) -> Author {
        self.author
    }

    pub fn is_user(&self) -> bool {
        self.author == Author::User
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_strictly_increase_within_the_same_millisecond() {
        let ids: Vec<i64> = (0..50)
            .map(|_| Message::new(Author::User, "x").id().parse().unwrap())
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn author_serializes_lowercase() {
        let m = Message::new(Author::Assistant, "Hello");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["author"], "assistant");
        assert_eq!(v["text"], "Hello");
        assert!(!m.is_user());
    }

    #[test]
    fn created_at_serializes_as_rfc3339() {
        let m = Message::new(Author::User, "Where does it hurt?");
        let v = serde_json::to_value(&m).unwrap();
        let created: DateTime<Utc> = v["createdAt"].as_str().unwrap().parse().unwrap();
        assert_eq!(created, m.created_at());
        assert_eq!(v["id"], m.id());
    }
}
