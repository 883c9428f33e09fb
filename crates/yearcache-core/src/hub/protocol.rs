//! Message envelopes exchanged between UI contexts and the hub.
//!
//! Every message is a `{"type": ..., "payload": ...}` JSON object.
//! Inbound: `FETCH_DATA`, `BROADCAST_STATUS`. Outbound: `DATA_RESULT`,
//! `STATUS_UPDATE`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::{composite_key, UpstreamResponse, SUCCESS_STATUS};

/// Status used for transport and parse failures.
pub const ERROR_STATUS: &str = "Error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct FetchRequest {
    pub symbol: String,
    pub year: i32,
    /// Caller's correlation token, echoed on the matching `DATA_RESULT`.
    #[serde(default)]
    pub key: String,
}

impl FetchRequest {
    pub fn new(symbol: impl Into<String>, year: i32, key: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            year,
            key: key.into(),
        }
    }

    pub fn composite_key(&self) -> String {
        composite_key(&self.symbol, self.year)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct FetchResult {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "ts", ts(optional))]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "ts", ts(optional))]
    pub message: Option<String>,
    pub key: String,
}

impl FetchResult {
    pub fn success(data: Value, key: impl Into<String>) -> Self {
        Self {
            status: SUCCESS_STATUS.to_string(),
            data: Some(data),
            message: None,
            key: key.into(),
        }
    }

    pub fn error(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            status: ERROR_STATUS.to_string(),
            data: None,
            message: Some(message.into()),
            key: key.into(),
        }
    }

    /// Pass an upstream envelope through, tagged with the caller's key.
    pub fn from_upstream(response: &UpstreamResponse, key: impl Into<String>) -> Self {
        Self {
            status: response.status.clone(),
            data: Some(response.data.clone()),
            message: response.message.clone(),
            key: key.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SUCCESS_STATUS
    }
}

/// Messages a UI context sends to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HubRequest {
    FetchData(FetchRequest),
    BroadcastStatus(Value),
}

/// Messages the hub delivers to UI contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HubEvent {
    DataResult(FetchResult),
    StatusUpdate(Value),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_fetch_data_envelope() {
        let raw = r#"{"type":"FETCH_DATA","payload":{"symbol":"2330_TW","year":2025,"key":"req-1"}}"#;
        let request: HubRequest = serde_json::from_str(raw).unwrap();
        let HubRequest::FetchData(fetch) = request else {
            panic!("expected FETCH_DATA");
        };
        assert_eq!(fetch.composite_key(), "2330_TW-2025");
        assert_eq!(fetch.key, "req-1");
    }

    #[test]
    fn test_parse_broadcast_envelope() {
        let raw = r#"{"type":"BROADCAST_STATUS","payload":{"syncing":true}}"#;
        let request: HubRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request, HubRequest::BroadcastStatus(json!({"syncing": true})));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let raw = r#"{"type":"SHUTDOWN","payload":null}"#;
        assert!(serde_json::from_str::<HubRequest>(raw).is_err());
    }

    #[test]
    fn test_serialize_events() {
        let event = HubEvent::DataResult(FetchResult::error("connection refused", "k"));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "DATA_RESULT",
                "payload": {"status": "Error", "message": "connection refused", "key": "k"}
            })
        );

        let event = HubEvent::StatusUpdate(json!("Syncing"));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "STATUS_UPDATE", "payload": "Syncing"})
        );
    }

    #[test]
    fn test_from_upstream_keeps_status() {
        let upstream = UpstreamResponse {
            status: "Pending".to_string(),
            data: json!("Pending"),
            message: None,
        };
        let result = FetchResult::from_upstream(&upstream, "k2");
        assert!(!result.is_success());
        assert_eq!(result.key, "k2");
        assert_eq!(result.data, Some(json!("Pending")));
    }
}
