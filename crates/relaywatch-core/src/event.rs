//! Structural validation of events received from relays.
//!
//! Events arrive as untrusted JSON from an adversarial network. Signatures are
//! not verified here; we only check that an event has the shape needed for
//! aggregation:
//! - `id` and `pubkey` are 64 hex characters
//! - `sig` is present
//! - `kind` is a non-negative integer
//! - `tags` is an array of arrays

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::{MAX_FUTURE_SKEW_SECS, NOSTR_GENESIS_TIMESTAMP};

/// Well-known event kinds that get special treatment during aggregation.
pub mod kinds {
    /// NIP-01 user metadata (profile).
    pub const METADATA: u32 = 0;
    /// NIP-57 zap receipt.
    pub const ZAP_RECEIPT: u32 = 9735;
    /// NIP-65 relay list metadata.
    pub const RELAY_LIST: u32 = 10002;
}

/// A validated, not signature-checked, event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Lowercase hex event id.
    pub id: String,
    /// Lowercase hex author key.
    pub pubkey: String,
    /// Unix timestamp claimed by the author (0 when absent).
    pub created_at: u64,
    /// Event kind.
    pub kind: u32,
    /// Tag list.
    pub tags: Vec<Vec<String>>,
    /// Opaque content.
    pub content: String,
    /// Signature, kept as received.
    pub sig: String,
}

impl RawEvent {
    /// Validate a JSON value and convert it into a [`RawEvent`].
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::invalid_field("event", "not a JSON object"))?;

        let id = hex_field(obj.get("id"), "id")?;
        let pubkey = hex_field(obj.get("pubkey"), "pubkey")?;

        let sig = match obj.get("sig").and_then(Value::as_str) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => return Err(Error::invalid_field("sig", "missing")),
        };

        let kind = obj
            .get("kind")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::invalid_field("kind", "missing or not an integer"))?;
        let kind =
            u32::try_from(kind).map_err(|_| Error::invalid_field("kind", "out of range"))?;

        let created_at = obj.get("created_at").and_then(Value::as_u64).unwrap_or(0);

        let tags = match obj.get("tags") {
            Some(Value::Array(items)) => items
                .iter()
                .map(parse_tag)
                .collect::<Result<Vec<Vec<String>>>>()?,
            _ => return Err(Error::invalid_field("tags", "missing or not an array")),
        };

        let content = obj
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            id,
            pubkey,
            created_at,
            kind,
            tags,
            content,
            sig,
        })
    }

    /// Value of the first tag named `name`, if any.
    pub fn first_tag_value<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.tag_values(name).next()
    }

    /// Values (second element) of every tag named `name`.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }
}

fn hex_field(value: Option<&Value>, field: &'static str) -> Result<String> {
    let s = value
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_field(field, "missing"))?;
    if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::invalid_field(field, "not 64 hex characters"));
    }
    Ok(s.to_ascii_lowercase())
}

fn parse_tag(value: &Value) -> Result<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::invalid_field("tags", "tag is not an array"))?;
    Ok(items
        .iter()
        .map(|item| match item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect())
}

/// The UTC day an event is attributed to.
///
/// Uses the author's `created_at` unless it predates Nostr or lies too far in
/// the future, in which case the receipt time wins.
pub fn event_day(created_at: u64, received_at: i64) -> NaiveDate {
    let received = received_at.max(0) as u64;
    let ts = if created_at < NOSTR_GENESIS_TIMESTAMP
        || created_at > received.saturating_add(MAX_FUTURE_SKEW_SECS)
    {
        received
    } else {
        created_at
    };
    unix_day(ts as i64)
}

/// UTC day of a Unix timestamp.
pub fn unix_day(ts: i64) -> NaiveDate {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}

/// Storage key for a day (`YYYY-MM-DD`, sorts lexicographically).
pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ID: &str = "4ff2236ceb2fdc6dee6317cd0b841f3f020ac985bb3f99f7f4c1f973ec28d06b";
    const PUBKEY: &str = "35e433c42e5bb838daabd178d54620e427cccb214c55b95daac3dbd9506fbcaf";

    fn sample() -> Value {
        json!({
            "id": ID,
            "pubkey": PUBKEY,
            "created_at": 1758468146u64,
            "kind": 1,
            "tags": [["client", "damus"], ["p", PUBKEY]],
            "content": "hello",
            "sig": "aa"
        })
    }

    #[test]
    fn test_valid_event() {
        let event = RawEvent::from_value(&sample()).unwrap();
        assert_eq!(event.id, ID);
        assert_eq!(event.kind, 1);
        assert_eq!(event.tags.len(), 2);
        assert_eq!(event.first_tag_value("client"), Some("damus"));

        // Name borrowed from a shorter-lived owner
        let value = {
            let name = String::from("p");
            event.first_tag_value(&name).map(str::to_string)
        };
        assert_eq!(value.as_deref(), Some(PUBKEY));
        assert_eq!(event.first_tag_value("e"), None);
    }

    #[test]
    fn test_uppercase_hex_is_lowercased() {
        let mut v = sample();
        v["id"] = json!(ID.to_uppercase());
        let event = RawEvent::from_value(&v).unwrap();
        assert_eq!(event.id, ID);
    }

    #[test]
    fn test_rejects_missing_id_author_sig() {
        for field in ["id", "pubkey", "sig"] {
            let mut v = sample();
            v.as_object_mut().unwrap().remove(field);
            let err = RawEvent::from_value(&v).unwrap_err();
            assert!(err.to_string().contains(field), "{field}: {err}");
        }
    }

    #[test]
    fn test_rejects_non_integer_kind() {
        let mut v = sample();
        v["kind"] = json!(1.5);
        assert!(RawEvent::from_value(&v).is_err());
        v["kind"] = json!("1");
        assert!(RawEvent::from_value(&v).is_err());
        v["kind"] = json!(-1);
        assert!(RawEvent::from_value(&v).is_err());
    }

    #[test]
    fn test_rejects_non_array_tags() {
        let mut v = sample();
        v["tags"] = json!({"client": "x"});
        assert!(RawEvent::from_value(&v).is_err());
        v["tags"] = json!(["client"]);
        assert!(RawEvent::from_value(&v).is_err());
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(RawEvent::from_value(&json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_event_day_uses_created_at() {
        // 2025-09-21
        let day = event_day(1758468146, 1758500000);
        assert_eq!(day_key(day), "2025-09-21");
    }

    #[test]
    fn test_event_day_falls_back_for_bogus_timestamps() {
        let received = 1758468146;
        assert_eq!(event_day(5, received), event_day(received as u64, received));
        assert_eq!(
            event_day(received as u64 + 86_400 * 30, received),
            event_day(received as u64, received)
        );
    }
}
