//! Wire frames exchanged with relays.
//!
//! Inbound text is decoded exactly once into a [`RelayFrame`]; everything past
//! this boundary works with the closed enum. Event payloads stay as raw JSON
//! values because structural validation belongs to the pipeline.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use relaywatch_core::kinds;

/// Why an inbound frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON")]
    NotJson,
    #[error("frame is not a JSON array")]
    NotArray,
    #[error("frame has no string label")]
    MissingLabel,
    #[error("{label} frame has {got} elements, expected at least {expected}")]
    Arity {
        label: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{label} frame has a non-string {field}")]
    FieldType {
        label: &'static str,
        field: &'static str,
    },
}

/// A message sent by a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayFrame {
    /// `["EVENT", <sub>, <event>]`
    Event { subscription: String, event: Value },
    /// `["EOSE", <sub>]`
    Eose { subscription: String },
    /// `["NOTICE", <message>]`
    Notice { message: String },
    /// `["OK", <event id>, <accepted>, <message>]`
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    /// `["AUTH", <challenge>]`
    Auth { challenge: String },
    /// `["CLOSED", <sub>, <message>]`
    Closed {
        subscription: String,
        message: String,
    },
    /// Any other label.
    Unknown { label: String },
}

impl RelayFrame {
    /// Decode one text message.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(|_| FrameError::NotJson)?;
        let Value::Array(mut items) = value else {
            return Err(FrameError::NotArray);
        };
        let label = match items.first() {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(FrameError::MissingLabel),
        };

        let frame = match label.as_str() {
            "EVENT" => {
                require(&items, "EVENT", 3)?;
                let event = items.swap_remove(2);
                Self::Event {
                    subscription: string_at(&items, 1, "EVENT", "subscription")?,
                    event,
                }
            }
            "EOSE" => {
                require(&items, "EOSE", 2)?;
                Self::Eose {
                    subscription: string_at(&items, 1, "EOSE", "subscription")?,
                }
            }
            "NOTICE" => {
                require(&items, "NOTICE", 2)?;
                Self::Notice {
                    message: string_at(&items, 1, "NOTICE", "message")?,
                }
            }
            "OK" => {
                require(&items, "OK", 3)?;
                Self::Ok {
                    event_id: string_at(&items, 1, "OK", "event id")?,
                    accepted: items[2].as_bool().unwrap_or(false),
                    message: optional_string_at(&items, 3),
                }
            }
            "AUTH" => {
                require(&items, "AUTH", 2)?;
                Self::Auth {
                    challenge: string_at(&items, 1, "AUTH", "challenge")?,
                }
            }
            "CLOSED" => {
                require(&items, "CLOSED", 2)?;
                Self::Closed {
                    subscription: string_at(&items, 1, "CLOSED", "subscription")?,
                    message: optional_string_at(&items, 2),
                }
            }
            _ => Self::Unknown { label },
        };

        Ok(frame)
    }

    /// Frame label, for logging.
    pub fn label(&self) -> &str {
        match self {
            Self::Event { .. } => "EVENT",
            Self::Eose { .. } => "EOSE",
            Self::Notice { .. } => "NOTICE",
            Self::Ok { .. } => "OK",
            Self::Auth { .. } => "AUTH",
            Self::Closed { .. } => "CLOSED",
            Self::Unknown { label } => label,
        }
    }
}

fn require(items: &[Value], label: &'static str, expected: usize) -> Result<(), FrameError> {
    if items.len() < expected {
        return Err(FrameError::Arity {
            label,
            expected,
            got: items.len(),
        });
    }
    Ok(())
}

fn string_at(
    items: &[Value],
    idx: usize,
    label: &'static str,
    field: &'static str,
) -> Result<String, FrameError> {
    items
        .get(idx)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(FrameError::FieldType { label, field })
}

fn optional_string_at(items: &[Value], idx: usize) -> String {
    items
        .get(idx)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Subscription filter (NIP-01). Unset fields are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl Filter {
    /// Everything, live only: `{"limit": 0}` skips stored history.
    pub fn firehose() -> Self {
        Self {
            limit: Some(0),
            ..Default::default()
        }
    }

    /// Relay-list records published by `authors`.
    pub fn relay_lists(authors: Vec<String>) -> Self {
        Self {
            kinds: Some(vec![kinds::RELAY_LIST]),
            authors: Some(authors),
            ..Default::default()
        }
    }
}

/// A message sent to a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// `["REQ", <sub>, <filter>...]`
    Req {
        subscription: String,
        filters: Vec<Filter>,
    },
    /// `["CLOSE", <sub>]`
    Close { subscription: String },
}

impl ClientFrame {
    /// Encode as the JSON text sent over the socket.
    pub fn to_json(&self) -> String {
        let frame = match self {
            Self::Req {
                subscription,
                filters,
            } => {
                let mut items = Vec::with_capacity(filters.len() + 2);
                items.push(Value::from("REQ"));
                items.push(Value::from(subscription.as_str()));
                items.extend(
                    filters
                        .iter()
                        .map(|f| serde_json::to_value(f).unwrap_or_default()),
                );
                Value::Array(items)
            }
            Self::Close { subscription } => {
                Value::Array(vec![Value::from("CLOSE"), Value::from(subscription.as_str())])
            }
        };
        frame.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_event_frame() {
        let text = r#"["EVENT","sub1",{"id":"abc","kind":1}]"#;
        match RelayFrame::parse(text).unwrap() {
            RelayFrame::Event {
                subscription,
                event,
            } => {
                assert_eq!(subscription, "sub1");
                assert_eq!(event["kind"], 1);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_parse_control_frames() {
        assert_eq!(
            RelayFrame::parse(r#"["EOSE","s"]"#).unwrap(),
            RelayFrame::Eose {
                subscription: "s".into()
            }
        );
        assert_eq!(
            RelayFrame::parse(r#"["NOTICE","slow down"]"#).unwrap(),
            RelayFrame::Notice {
                message: "slow down".into()
            }
        );
        assert_eq!(
            RelayFrame::parse(r#"["OK","id",true]"#).unwrap(),
            RelayFrame::Ok {
                event_id: "id".into(),
                accepted: true,
                message: String::new()
            }
        );
        assert_eq!(
            RelayFrame::parse(r#"["CLOSED","s","auth-required: nope"]"#).unwrap(),
            RelayFrame::Closed {
                subscription: "s".into(),
                message: "auth-required: nope".into()
            }
        );
        assert_eq!(
            RelayFrame::parse(r#"["AUTH","challenge"]"#).unwrap().label(),
            "AUTH"
        );
        assert_eq!(
            RelayFrame::parse(r#"["COUNT","s",{"count":1}]"#).unwrap(),
            RelayFrame::Unknown {
                label: "COUNT".into()
            }
        );
    }

    #[test]
    fn test_parse_malformed() {
        assert_eq!(RelayFrame::parse("not json"), Err(FrameError::NotJson));
        assert_eq!(RelayFrame::parse(r#"{"EVENT":1}"#), Err(FrameError::NotArray));
        assert_eq!(RelayFrame::parse("[]"), Err(FrameError::MissingLabel));
        assert_eq!(RelayFrame::parse("[1,2]"), Err(FrameError::MissingLabel));
        assert!(matches!(
            RelayFrame::parse(r#"["EVENT","s"]"#),
            Err(FrameError::Arity { label: "EVENT", .. })
        ));
        assert!(matches!(
            RelayFrame::parse(r#"["EOSE",5]"#),
            Err(FrameError::FieldType { .. })
        ));
    }

    #[test]
    fn test_encode_firehose_req() {
        let frame = ClientFrame::Req {
            subscription: "live".into(),
            filters: vec![Filter::firehose()],
        };
        let value: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value, json!(["REQ", "live", {"limit": 0}]));
    }

    #[test]
    fn test_encode_relay_list_req_and_close() {
        let frame = ClientFrame::Req {
            subscription: "d1".into(),
            filters: vec![Filter::relay_lists(vec!["ab".into(), "cd".into()])],
        };
        let value: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(
            value,
            json!(["REQ", "d1", {"authors": ["ab", "cd"], "kinds": [10002]}])
        );

        let close = ClientFrame::Close {
            subscription: "d1".into(),
        };
        assert_eq!(close.to_json(), r#"["CLOSE","d1"]"#);
    }
}
