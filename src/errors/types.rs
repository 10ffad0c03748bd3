// 统一错误类型定义

use actix_web::{HttpResponse, ResponseError};
use plugin_shell_common::CommonError;
use serde::{Deserialize, Serialize};

use thiserror::Error;
use tracing::error;

/// Plugin Shell 统一错误类型
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "error_type", content = "details")]
pub enum ShellError {
    /// 配置错误
    #[error("配置错误: {message}")]
    Configuration { message: String },

    /// 验证错误（格式错误的输入）
    #[error("验证错误: {field} - {message}")]
    Validation { field: String, message: String },

    /// 无效的归档
    #[error("无效的插件包: {message}")]
    InvalidArchive { message: String, file_name: Option<String> },

    /// 资源未找到
    #[error("资源未找到: {resource}")]
    NotFound { resource: String },

    /// 插件未安装
    #[error("插件未安装: {plugin_id}")]
    NotInstalled { plugin_id: String },

    /// 不支持的操作或类型
    #[error("不支持: {message}")]
    Unsupported { message: String },

    /// 上传内容过大
    #[error("上传内容超过限制: {limit} 字节")]
    PayloadTooLarge { limit: u64 },

    /// 超时错误
    #[error("超时: {operation}")]
    Timeout { operation: String, timeout_ms: Option<u64> },

    /// 组件解析失败
    #[error("组件解析失败: {message}")]
    Resolution { message: String },

    /// 插件运行错误
    #[error("插件错误: {plugin_id} - {message}")]
    Plugin { plugin_id: String, message: String },

    /// 存储错误
    #[error("存储错误: {message}")]
    Storage { message: String },

    /// 外部服务错误
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    /// 内部服务器错误
    #[error("内部服务器错误: {message}")]
    Internal { message: String },
}

impl ShellError {
    /// 获取错误代码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::InvalidArchive { .. } => "INVALID_ARCHIVE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::NotInstalled { .. } => "NOT_INSTALLED",
            Self::Unsupported { .. } => "UNSUPPORTED",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::Timeout { .. } => "TIMEOUT_ERROR",
            Self::Resolution { .. } => "RESOLUTION_ERROR",
            Self::Plugin { .. } => "PLUGIN_ERROR",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Configuration { .. } => 500,
            Self::Validation { .. } => 400,
            Self::InvalidArchive { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::NotInstalled { .. } => 404,
            Self::Unsupported { .. } => 422,
            Self::PayloadTooLarge { .. } => 413,
            Self::Timeout { .. } => 504,
            Self::Resolution { .. } => 422,
            Self::Plugin { .. } => 500,
            Self::Storage { .. } => 500,
            Self::ExternalService { .. } => 502,
            Self::Internal { .. } => 500,
        }
    }

    /// 是否为客户端错误
    pub fn is_client_error(&self) -> bool {
        matches!(self.status_code(), 400..=499)
    }

    /// 是否为服务器错误
    pub fn is_server_error(&self) -> bool {
        matches!(self.status_code(), 500..=599)
    }

    /// 是否应该记录错误日志
    pub fn should_log(&self) -> bool {
        !matches!(
            self,
            Self::Validation { .. } | Self::NotFound { .. } | Self::NotInstalled { .. }
        )
    }

    /// 是否属于"未找到"类错误
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::NotInstalled { .. })
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// 创建验证错误
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_archive(message: impl Into<String>) -> Self {
        Self::InvalidArchive {
            message: message.into(),
            file_name: None,
        }
    }

    /// 创建无效归档错误（带文件名）
    pub fn invalid_archive_with_name(message: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self::InvalidArchive {
            message: message.into(),
            file_name: Some(file_name.into()),
        }
    }

    /// 创建资源未找到错误
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into() }
    }

    pub fn not_installed(plugin_id: impl Into<String>) -> Self {
        Self::NotInstalled { plugin_id: plugin_id.into() }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported { message: message.into() }
    }

    pub fn payload_too_large(limit: u64) -> Self {
        Self::PayloadTooLarge { limit }
    }

    /// 创建超时错误
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: None,
        }
    }

    /// 创建超时错误（带超时值）
    pub fn timeout_after(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: Some(timeout_ms),
        }
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution { message: message.into() }
    }

    pub fn plugin(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plugin {
            plugin_id: plugin_id.into(),
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// 创建外部服务错误
    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}

/// 实现 ResponseError trait 以便与 Actix Web 集成
impl ResponseError for ShellError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(self.status_code())
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        if self.should_log() {
            error!(
                error_code = %self.error_code(),
                error_message = %self,
                "处理请求时发生错误"
            );
        }

        crate::errors::ErrorResponse::from_error(self).into_http_response()
    }
}

/// 从 CommonError 转换
impl From<CommonError> for ShellError {
    fn from(err: CommonError) -> Self {
        match err.code.as_str() {
            "VALIDATION_ERROR" => Self::validation("general", err.message),
            "NOT_FOUND" => Self::not_found(err.message),
            "CONFIGURATION_ERROR" => Self::configuration(err.message),
            _ => Self::internal(err.message),
        }
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for ShellError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(format!("配置加载错误: {}", err))
    }
}

/// 从 std::io::Error 转换
impl From<std::io::Error> for ShellError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(format!("文件或目录: {}", err)),
            std::io::ErrorKind::TimedOut => Self::timeout("文件操作"),
            _ => Self::storage(format!("IO 错误: {}", err)),
        }
    }
}

/// 从 serde_json::Error 转换
impl From<serde_json::Error> for ShellError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation("json", format!("JSON 解析错误: {}", err))
    }
}

/// 从 zip::result::ZipError 转换
impl From<zip::result::ZipError> for ShellError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::invalid_archive(format!("ZIP 解析失败: {}", err))
    }
}

/// 从 reqwest::Error 转换
impl From<reqwest::Error> for ShellError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout("注册中心请求")
        } else {
            Self::external_service("plugin-registry", err.to_string())
        }
    }
}

/// 后台任务异常
impl From<tokio::task::JoinError> for ShellError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(format!("后台任务失败: {}", err))
    }
}

/// 统一结果类型
pub type ShellResult<T> = Result<T, ShellError>;
