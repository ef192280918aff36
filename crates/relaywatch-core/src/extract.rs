//! Best-effort metadata extraction from loosely structured events.
//!
//! Everything here is pure and returns `Option`: malformed input yields
//! `None`, never an error, so these helpers are safe to call on the ingestion
//! hot path.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::RawEvent;

/// Longest client name we keep; anything longer is treated as garbage.
const MAX_CLIENT_LEN: usize = 64;

/// Longest `about` text kept in a profile snapshot.
const MAX_ABOUT_LEN: usize = 280;

/// Amount prefix of a BOLT-11 invoice: `ln<network><amount><multiplier>1...`.
static BOLT11_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ln(?:bcrt|bc|tbs|tb|sb)(\d+)([munp]?)1").expect("bolt11 regex should compile")
});

/// Subset of a kind-0 profile kept per author/day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lud16: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
}

impl ProfileSnapshot {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.display_name.is_none()
            && self.picture.is_none()
            && self.nip05.is_none()
            && self.lud16.is_none()
            && self.about.is_none()
    }
}

/// Parse kind-0 content into a profile snapshot.
pub fn extract_profile(content: &str) -> Option<ProfileSnapshot> {
    let value: Value = serde_json::from_str(content).ok()?;
    let obj = value.as_object()?;

    let text = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let profile = ProfileSnapshot {
        name: text("name"),
        display_name: text("display_name").or_else(|| text("displayName")),
        picture: text("picture"),
        nip05: text("nip05"),
        lud16: text("lud16"),
        about: text("about").map(|s| s.chars().take(MAX_ABOUT_LEN).collect()),
    };

    (!profile.is_empty()).then_some(profile)
}

/// Identify the client that published an event.
///
/// Prefers the first `client` tag; falls back to a `client` field when the
/// content is a JSON object.
pub fn extract_client(event: &RawEvent) -> Option<String> {
    if let Some(name) = event.tag_values("client").find_map(clean_client) {
        return Some(name);
    }

    let content = event.content.trim_start();
    if !content.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(content).ok()?;
    value.get("client").and_then(Value::as_str).and_then(clean_client)
}

fn clean_client(raw: &str) -> Option<String> {
    let name = raw.trim();
    if name.is_empty() || name.len() > MAX_CLIENT_LEN || name.chars().any(char::is_control) {
        return None;
    }
    Some(name.to_string())
}

/// Amount in sats carried by a zap receipt.
///
/// Tries, in order: the `bolt11` invoice prefix, an `amount` tag (msats), and
/// the `amount` tag of the zap request embedded in `description`.
pub fn extract_zap_amount_sats(event: &RawEvent) -> Option<u64> {
    if let Some(sats) = event.first_tag_value("bolt11").and_then(parse_bolt11_amount_sats) {
        return Some(sats);
    }

    if let Some(msats) = event
        .first_tag_value("amount")
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Some(msats / 1000);
    }

    let description: Value = serde_json::from_str(event.first_tag_value("description")?).ok()?;
    description
        .get("tags")?
        .as_array()?
        .iter()
        .filter_map(Value::as_array)
        .find(|tag| tag.first().and_then(Value::as_str) == Some("amount"))
        .and_then(|tag| tag.get(1))
        .and_then(Value::as_str)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|msats| msats / 1000)
}

/// Decode the amount prefix of a BOLT-11 invoice into sats.
///
/// Only the human-readable part is inspected; the invoice is not verified.
pub fn parse_bolt11_amount_sats(invoice: &str) -> Option<u64> {
    let invoice = invoice.trim().to_ascii_lowercase();
    let invoice = invoice.strip_prefix("lightning:").unwrap_or(&invoice);
    let caps = BOLT11_AMOUNT.captures(invoice)?;
    let amount: u64 = caps.get(1)?.as_str().parse().ok()?;

    // 1 BTC = 100_000_000 sats
    match caps.get(2).map(|m| m.as_str()).unwrap_or("") {
        "" => amount.checked_mul(100_000_000),
        "m" => amount.checked_mul(100_000),
        "u" => amount.checked_mul(100),
        "n" => Some(amount / 10),
        "p" => Some(amount / 10_000),
        _ => None,
    }
}
