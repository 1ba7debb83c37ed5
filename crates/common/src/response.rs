use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Wire shape of an error inside the uniform response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorBody {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code.as_str().to_string(),
            message: err.message.clone(),
        }
    }
}

/// Uniform `{success, data|error, meta?}` envelope for every HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: None,
        }
    }

    pub fn ok_with_meta(data: T, meta: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: Some(meta),
        }
    }

    pub fn err(err: &AppError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody::from(err)),
            meta: None,
        }
    }
}

/// Cursor-paginated listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        let has_more = next_cursor.is_some();
        Self {
            items,
            next_cursor,
            has_more,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_omits_error() {
        let resp = ApiResponse::ok(serde_json::json!({"id": "m1"}));
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["data"]["id"], "m1");
        assert!(v.get("error").is_none());
    }

    #[test]
    fn err_envelope_carries_code() {
        let err = AppError::not_found("message not found");
        let resp = ApiResponse::<()>::err(&err);
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"]["code"], "NOT_FOUND");
    }

    #[test]
    fn page_uses_camel_case_keys() {
        let page = Page::new(vec![1, 2], Some("2024-01-01T00:00:00Z".into()));
        let v = serde_json::to_value(&page).unwrap();
        assert_eq!(v["hasMore"], true);
        assert!(v["nextCursor"].is_string());
    }
}
