use serde::Serialize;
use serde_json::Value;

/// Uniform response envelope for every HTTP endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        }
    }

    pub fn ok_with_message(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
            error: None,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn error_with_data(error: impl Into<String>, data: Value) -> Self {
        Self {
            success: false,
            message: None,
            data: Some(data),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_omits_unset_fields() {
        let body = serde_json::to_value(ApiResponse::message("done")).unwrap();
        assert_eq!(body, serde_json::json!({"success": true, "message": "done"}));

        let err = serde_json::to_value(ApiResponse::error("broken")).unwrap();
        assert_eq!(err, serde_json::json!({"success": false, "error": "broken"}));
    }
}
