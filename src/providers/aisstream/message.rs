//! Incoming AisStream messages
//!
//! See: https://aisstream.io/documentation

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::errors::TrackerError;
use crate::models::RawPosition;
use crate::providers::marinesia::value_to_string;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Server-side error, usually about the API key or subscription
    Error(String),
    SubscriptionAck { error: Option<String> },
    Position(RawPosition),
    /// Valid message of a type we did not subscribe to
    Ignored(String),
    /// JSON without any recognizable type
    Untyped,
}

/// Whether a server error points at a bad or missing API key
pub fn is_api_key_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["api", "key", "auth"].iter().any(|hint| lower.contains(hint))
}

pub fn parse_message(text: &str) -> Result<StreamMessage, TrackerError> {
    let message: Value = serde_json::from_str(text)?;

    if let Some(error) = first_of(&message, &["error", "Error", "message"]) {
        return Ok(StreamMessage::Error(text_of(error)));
    }

    let message_type = first_of(&message, &["MessageType", "messageType", "type", "Message_Type"])
        .and_then(Value::as_str);

    match message_type {
        Some("PositionReport" | "position_report" | "Position_Report") => {
            Ok(StreamMessage::Position(position_report(&message)))
        }
        Some("SubscriptionResponse" | "subscription_response" | "Subscription_Response") => {
            Ok(StreamMessage::SubscriptionAck {
                error: subscription_error(&message),
            })
        }
        Some(other) => Ok(StreamMessage::Ignored(other.to_string())),
        None => Ok(StreamMessage::Untyped),
    }
}

/// Error carried by a subscription acknowledgement, either in
/// `Message.SubscriptionResponse` or in a top-level `response`
fn subscription_error(message: &Value) -> Option<String> {
    message
        .get("Message")
        .and_then(|inner| inner.get("SubscriptionResponse"))
        .or_else(|| message.get("response"))
        .and_then(|response| first_of(response, &["error", "Error"]))
        .map(text_of)
}

fn position_report(message: &Value) -> RawPosition {
    let inner = message.get("Message");
    let data = inner
        .and_then(|m| first_of(m, &["PositionReport", "positionReport"]))
        .or_else(|| message.get("PositionReport"))
        .unwrap_or(message);

    let number = |keys: &[&str]| first_of(data, keys).and_then(as_f64);

    let timestamp = first_of(data, &["Timestamp", "timestamp"])
        .filter(|t| t.is_string())
        .or_else(|| {
            message
                .get("MetaData")
                .and_then(|meta| first_of(meta, &["time_utc", "Timestamp", "timestamp"]))
        })
        .map(text_of)
        .map(|t| normalize_timestamp(&t));

    RawPosition {
        mmsi: first_of(data, &["UserID", "userID", "MMSI", "mmsi", "Mmsi"]).and_then(value_to_string),
        latitude: number(&["Latitude", "latitude", "Lat", "lat"]),
        longitude: number(&["Longitude", "longitude", "Lon", "Lng", "lon"]),
        course: number(&["Cog", "cog", "CourseOverGround", "courseOverGround", "Course", "course"]),
        speed: number(&["Sog", "sog", "SpeedOverGround", "speedOverGround", "Speed", "speed"]),
        heading: number(&["TrueHeading", "trueHeading", "Heading", "heading"]),
        timestamp,
    }
}

/// First non-null value among `keys`
fn first_of<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| value.get(*key).filter(|v| !v.is_null()))
}

fn as_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// AisStream metadata times look like `2022-12-29 18:22:32.318353 +0000 UTC`.
/// Convert those to RFC 3339 and pass anything else through.
fn normalize_timestamp(value: &str) -> String {
    let trimmed = value.trim().trim_end_matches(" UTC");
    DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f %z")
        .map(|t| {
            t.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::AutoSi, true)
        })
        .unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_position_report() {
        let text = r#"{
            "MessageType": "PositionReport",
            "Message": {
                "PositionReport": {
                    "UserID": 248692000,
                    "Latitude": 36.05,
                    "Longitude": 14.24,
                    "Sog": 12.3,
                    "Cog": 90,
                    "Timestamp": "2025-01-01T00:00:00Z"
                }
            }
        }"#;

        let expected = RawPosition {
            mmsi: Some("248692000".to_string()),
            latitude: Some(36.05),
            longitude: Some(14.24),
            course: Some(90.0),
            speed: Some(12.3),
            heading: None,
            timestamp: Some("2025-01-01T00:00:00Z".to_string()),
        };
        assert_eq!(parse_message(text).unwrap(), StreamMessage::Position(expected));
    }

    #[test]
    fn parse_lowercase_variants_and_metadata_time() {
        let text = r#"{
            "messageType": "PositionReport",
            "Message": {
                "positionReport": {
                    "mmsi": "215123000",
                    "lat": "36.0441",
                    "lon": 14.2652,
                    "TrueHeading": 74
                }
            },
            "MetaData": { "time_utc": "2025-03-02 10:15:00.5 +0000 UTC" }
        }"#;

        match parse_message(text).unwrap() {
            StreamMessage::Position(raw) => {
                assert_eq!(raw.mmsi.as_deref(), Some("215123000"));
                assert_eq!(raw.latitude, Some(36.0441));
                assert_eq!(raw.heading, Some(74.0));
                assert_eq!(raw.timestamp.as_deref(), Some("2025-03-02T10:15:00.500Z"));
            }
            other => panic!("expected position, got {:?}", other),
        }
    }

    #[test]
    fn parse_error_message() {
        let message = parse_message(r#"{"error": "Api Key Is Not Valid"}"#).unwrap();
        assert_eq!(message, StreamMessage::Error("Api Key Is Not Valid".to_string()));
        assert!(is_api_key_error("Api Key Is Not Valid"));

        let other = parse_message(r#"{"Error": "too many subscriptions"}"#).unwrap();
        assert_eq!(other, StreamMessage::Error("too many subscriptions".to_string()));
        assert!(!is_api_key_error("too many subscriptions"));
    }

    #[test]
    fn parse_subscription_response() {
        let ok = parse_message(r#"{"MessageType": "SubscriptionResponse", "response": {}}"#).unwrap();
        assert_eq!(ok, StreamMessage::SubscriptionAck { error: None });

        let failed = parse_message(
            r#"{"MessageType": "SubscriptionResponse", "response": {"error": "bad box"}}"#,
        )
        .unwrap();
        assert_eq!(
            failed,
            StreamMessage::SubscriptionAck {
                error: Some("bad box".to_string())
            }
        );
    }

    #[test]
    fn parse_type_name_variants() {
        for kind in ["PositionReport", "position_report", "Position_Report"] {
            let text = format!(
                r#"{{"MessageType": "{}", "Message": {{"PositionReport": {{"UserID": 248692000, "Latitude": 36.05, "Longitude": 14.24}}}}}}"#,
                kind
            );
            match parse_message(&text).unwrap() {
                StreamMessage::Position(raw) => {
                    assert_eq!(raw.mmsi.as_deref(), Some("248692000"), "{}", kind)
                }
                other => panic!("{}: expected position, got {:?}", kind, other),
            }
        }

        for kind in ["SubscriptionResponse", "subscription_response", "Subscription_Response"] {
            let text = format!(r#"{{"MessageType": "{}"}}"#, kind);
            assert_eq!(
                parse_message(&text).unwrap(),
                StreamMessage::SubscriptionAck { error: None },
                "{}",
                kind
            );
        }
    }

    #[test]
    fn subscription_error_from_nested_response() {
        let lower = parse_message(
            r#"{"MessageType": "subscription_response", "Message": {"SubscriptionResponse": {"error": "bad box"}}}"#,
        )
        .unwrap();
        assert_eq!(
            lower,
            StreamMessage::SubscriptionAck {
                error: Some("bad box".to_string())
            }
        );

        let upper = parse_message(
            r#"{"MessageType": "SubscriptionResponse", "Message": {"SubscriptionResponse": {"Error": "no key"}}}"#,
        )
        .unwrap();
        assert_eq!(
            upper,
            StreamMessage::SubscriptionAck {
                error: Some("no key".to_string())
            }
        );
    }

    #[test]
    fn parse_other_types() {
        assert_eq!(
            parse_message(r#"{"MessageType": "ShipStaticData"}"#).unwrap(),
            StreamMessage::Ignored("ShipStaticData".to_string())
        );
        assert_eq!(parse_message(r#"{"foo": 1}"#).unwrap(), StreamMessage::Untyped);
        assert!(parse_message("not json").is_err());
    }

    #[test]
    fn unknown_timestamp_format_passes_through() {
        assert_eq!(normalize_timestamp("yesterday"), "yesterday");
    }
}
