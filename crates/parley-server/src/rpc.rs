use serde::{Deserialize, Serialize};

/// Inbound request: `{ method, params?, id? }`.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// Outbound response: `{ id, success, result?, error?: { code, message } }`.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<serde_json::Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const RATE_LIMITED: i32 = -32000;
pub const BUSY: i32 = -32001;
pub const VALIDATION_ERROR: i32 = -32002;
pub const NOT_FOUND: i32 = -32003;
pub const PROVIDER_UNAVAILABLE: i32 = -32004;

/// Numeric codes are internal; clients see the string form.
pub fn error_code_to_string(code: i32) -> &'static str {
    match code {
        PARSE_ERROR => "PARSE_ERROR",
        METHOD_NOT_FOUND => "METHOD_NOT_FOUND",
        INVALID_PARAMS => "INVALID_PARAMS",
        INTERNAL_ERROR => "INTERNAL_ERROR",
        RATE_LIMITED => "RATE_LIMITED",
        BUSY => "BUSY",
        VALIDATION_ERROR => "VALIDATION_ERROR",
        NOT_FOUND => "NOT_FOUND",
        PROVIDER_UNAVAILABLE => "PROVIDER_UNAVAILABLE",
        _ => "UNKNOWN_ERROR",
    }
}

impl RpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code: error_code_to_string(code).to_string(),
                message: message.into(),
            }),
        }
    }

    pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INVALID_PARAMS, msg)
    }

    pub fn internal_error(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INTERNAL_ERROR, msg)
    }

    pub fn parse_error() -> Self {
        Self::error(None, PARSE_ERROR, "Parse error")
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

/// Extract a required string param from the params object.
pub fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing required parameter: {key}"))
}

pub fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub fn optional_u64(params: &serde_json::Value, key: &str) -> Option<u64> {
    params.get(key).and_then(|v| v.as_u64())
}

pub fn optional_bool(params: &serde_json::Value, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rpc_request() {
        let json = r#"{"method":"chat.send","params":{"session_id":"default","message":"hello"},"id":1}"#;
        let req: RpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.method, "chat.send");
        assert!(req.params.is_some());
        assert_eq!(req.id, Some(serde_json::json!(1)));
    }

    #[test]
    fn params_and_id_are_optional() {
        let req: RpcRequest = serde_json::from_str(r#"{"method":"health"}"#).unwrap();
        assert!(req.params.is_none());
        assert!(req.id.is_none());
    }

    #[test]
    fn success_response_omits_error() {
        let resp = RpcResponse::success(Some(serde_json::json!(1)), serde_json::json!({"ok": true}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn error_response_has_string_code() {
        let resp = RpcResponse::error(Some(serde_json::json!("a")), RATE_LIMITED, "slow down");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["id"], "a");
        assert_eq!(json["error"]["code"], "RATE_LIMITED");
        assert_eq!(json["error"]["message"], "slow down");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn error_codes_map_to_strings() {
        assert_eq!(error_code_to_string(PARSE_ERROR), "PARSE_ERROR");
        assert_eq!(error_code_to_string(BUSY), "BUSY");
        assert_eq!(error_code_to_string(VALIDATION_ERROR), "VALIDATION_ERROR");
        assert_eq!(error_code_to_string(NOT_FOUND), "NOT_FOUND");
        assert_eq!(error_code_to_string(PROVIDER_UNAVAILABLE), "PROVIDER_UNAVAILABLE");
        assert_eq!(error_code_to_string(-1), "UNKNOWN_ERROR");
    }

    #[test]
    fn method_not_found_names_the_method() {
        let resp = RpcResponse::method_not_found(None, "foo.bar");
        assert_eq!(resp.error_code(), Some("METHOD_NOT_FOUND"));
        assert!(resp.error.unwrap().message.contains("foo.bar"));
    }

    #[test]
    fn param_helpers() {
        let params = serde_json::json!({"name": "x", "limit": 5, "flag": true, "neg": -1});
        assert_eq!(require_str(&params, "name").unwrap(), "x");
        assert!(require_str(&params, "limit").is_err());
        assert!(require_str(&params, "missing").is_err());
        assert_eq!(optional_str(&params, "missing"), None);
        assert_eq!(optional_u64(&params, "limit"), Some(5));
        assert_eq!(optional_u64(&params, "neg"), None);
        assert_eq!(optional_bool(&params, "flag"), Some(true));
    }

    #[test]
    fn parse_error_has_no_id() {
        let resp = RpcResponse::parse_error();
        assert!(resp.id.is_none());
        assert!(!resp.success);
        assert_eq!(resp.error_code(), Some("PARSE_ERROR"));
    }
}
