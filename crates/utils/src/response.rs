use serde::{Deserialize, Serialize};

/// JSON envelope shared by every API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn success_envelope_carries_data() {
        let body = serde_json::to_value(ApiResponse::success(vec![1, 2])).unwrap();
        assert_eq!(
            body,
            json!({ "success": true, "data": [1, 2], "message": null })
        );
    }

    #[test]
    fn error_envelope_carries_message() {
        let body = serde_json::to_value(ApiResponse::<()>::error("Invalid state")).unwrap();
        assert_eq!(
            body,
            json!({ "success": false, "data": null, "message": "Invalid state" })
        );
    }
}
