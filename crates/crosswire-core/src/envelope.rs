//! Wire envelope shapes.
//!
//! Request:  `{"id": 1, "method": "call", "params": [...]}` — `id` present
//! means the sender expects a reply; absent means fire-and-forget.
//! Response: `{"id": 1, "ssid": "", "result": ...}` on success, or
//! `{"id": 1, "ssid": "", "error": {"code": 1, "message": "...", "data": ...}}`
//! on failure. Field names are part of the protocol and must not change.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved method names of the higher-level call convention.
pub mod method {
    /// Invoke a method on a target api: params `[target, method, args]`.
    pub const CALL: &str = "call";
    /// Fire-and-forget push to a subscription: params `[callback_id, args]`.
    pub const NOTICE: &str = "notice";
    /// Invoke a peer-registered callback: params `[callback_id, args]`.
    pub const CALLBACK: &str = "callback";
}

/// A request envelope: a call (with id) or a notice (without).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    pub params: Vec<Value>,
}

impl Request {
    /// A request that expects a reply correlated by `id`.
    pub fn call(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// A fire-and-forget request; no reply is ever sent for it.
    pub fn notice(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// A response envelope, correlated to a request by `id`.
///
/// `ssid` is the session tag echoed from the caller's context; the engine
/// never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default)]
    pub ssid: String,
    #[serde(flatten)]
    pub outcome: ReplyOutcome,
}

impl Response {
    pub fn result(id: u64, ssid: impl Into<String>, value: Value) -> Self {
        Self {
            id,
            ssid: ssid.into(),
            outcome: ReplyOutcome::Result(value),
        }
    }

    pub fn error(id: u64, ssid: impl Into<String>, error: ErrorObject) -> Self {
        Self {
            id,
            ssid: ssid.into(),
            outcome: ReplyOutcome::Error(error),
        }
    }
}

/// Exactly one of `result` or `error`; anything else fails decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyOutcome {
    Result(Value),
    Error(ErrorObject),
}

/// Serializable projection of a failure: `{code, message, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_request_carries_id() {
        let request = Request::call(7, method::CALL, vec![json!(0), json!("get_info"), json!([])]);
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(
            encoded,
            json!({"id": 7, "method": "call", "params": [0, "get_info", []]})
        );
    }

    #[test]
    fn notice_request_omits_id_key() {
        let request = Request::notice(method::NOTICE, vec![json!(5), json!(["x"])]);
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded, json!({"method": "notice", "params": [5, ["x"]]}));
        assert!(encoded.as_object().unwrap().get("id").is_none());
    }

    #[test]
    fn success_response_shape() {
        let response = Response::result(1, "", json!({"version": "1.0"}));
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(
            encoded,
            json!({"id": 1, "ssid": "", "result": {"version": "1.0"}})
        );
    }

    #[test]
    fn error_response_shape() {
        let response = Response::error(
            2,
            "sess",
            ErrorObject {
                code: 1,
                message: "boom".into(),
                data: json!({"detail": true}),
            },
        );
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(
            encoded,
            json!({
                "id": 2,
                "ssid": "sess",
                "error": {"code": 1, "message": "boom", "data": {"detail": true}}
            })
        );
    }

    #[test]
    fn response_ssid_defaults_to_empty() {
        let response: Response = serde_json::from_value(json!({"id": 3, "result": 42})).unwrap();
        assert_eq!(response.ssid, "");
        assert_eq!(response.outcome, ReplyOutcome::Result(json!(42)));
    }

    #[test]
    fn response_requires_exactly_one_outcome() {
        assert!(serde_json::from_value::<Response>(json!({"id": 1, "ssid": ""})).is_err());
        assert!(
            serde_json::from_value::<Response>(json!({
                "id": 1,
                "result": 1,
                "error": {"code": 1, "message": "x", "data": null}
            }))
            .is_err()
        );
    }

    #[test]
    fn error_object_data_defaults_to_null() {
        let error: ErrorObject =
            serde_json::from_value(json!({"code": 4, "message": "bad"})).unwrap();
        assert_eq!(error.data, Value::Null);
    }

    #[test]
    fn response_with_null_result_roundtrips() {
        let response = Response::result(9, "", Value::Null);
        let text = serde_json::to_string(&response).unwrap();
        let back: Response = serde_json::from_str(&text).unwrap();
        assert_eq!(back, response);
    }
}
