// 错误响应格式化

use crate::errors::ShellError;
use actix_web::HttpResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 错误响应结构
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// 错误详情
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    #[serde(skip)]
    pub status: u16,
}

impl ErrorResponse {
    /// 从 ShellError 创建错误响应
    pub fn from_error(error: &ShellError) -> Self {
        let details = match error {
            ShellError::Validation { field, .. } => Some(serde_json::json!({ "field": field })),
            ShellError::InvalidArchive { file_name: Some(file_name), .. } => {
                Some(serde_json::json!({ "file_name": file_name }))
            }
            ShellError::NotInstalled { plugin_id } | ShellError::Plugin { plugin_id, .. } => {
                Some(serde_json::json!({ "plugin_id": plugin_id }))
            }
            ShellError::PayloadTooLarge { limit } => Some(serde_json::json!({ "limit": limit })),
            ShellError::Timeout { operation, timeout_ms } => Some(serde_json::json!({
                "operation": operation,
                "timeout_ms": timeout_ms,
            })),
            ShellError::ExternalService { service, .. } => {
                Some(serde_json::json!({ "service": service }))
            }
            _ => None,
        };

        Self {
            success: false,
            error: ErrorDetail {
                code: error.error_code().to_string(),
                message: error.to_string(),
                details,
                status: error.status_code(),
            },
            timestamp: Utc::now(),
            request_id: None,
        }
    }

    /// 设置请求 ID
    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// 转换为 HTTP 响应
    pub fn into_http_response(self) -> HttpResponse {
        let mut response = HttpResponse::build(
            actix_web::http::StatusCode::from_u16(self.error.status)
                .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR),
        );

        if let Some(ref request_id) = self.request_id {
            response.insert_header(("X-Request-ID", request_id.clone()));
        }

        response.json(self)
    }
}
