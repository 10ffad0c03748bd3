// 配置验证器
// 提供详细的配置验证逻辑

use crate::config::{AppConfig, EnvironmentConfig, LoggingConfig, RuntimeConfig, ServerConfig, StorageConfig};
use plugin_shell_common::CommonError;
use url::Url;

/// 配置验证器
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证完整配置，汇总所有错误
    pub fn validate_all(config: &AppConfig) -> Result<(), Vec<CommonError>> {
        let errors: Vec<CommonError> = [
            Self::validate_server(&config.server),
            Self::validate_storage(&config.storage),
            Self::validate_runtime(&config.runtime),
            Self::validate_logging(&config.logging),
            Self::validate_environment(&config.environment),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// 验证服务器配置
    pub fn validate_server(config: &ServerConfig) -> Result<(), CommonError> {
        if config.port == 0 {
            return Err(CommonError::validation("服务器端口不能为 0"));
        }

        if config.host.is_empty() {
            return Err(CommonError::validation("服务器主机地址不能为空"));
        }

        if let Some(workers) = config.workers {
            if workers == 0 {
                return Err(CommonError::validation("工作线程数不能为 0"));
            }
            if workers > 32 {
                return Err(CommonError::validation("工作线程数不建议超过 32"));
            }
        }

        Ok(())
    }

    /// 验证存储配置
    pub fn validate_storage(config: &StorageConfig) -> Result<(), CommonError> {
        if config.app_root.trim().is_empty() {
            return Err(CommonError::validation("应用根目录不能为空"));
        }

        if config.data_dir.trim().is_empty() {
            return Err(CommonError::validation("数据目录不能为空"));
        }

        if config.max_upload_size == 0 {
            return Err(CommonError::validation("上传大小上限不能为 0"));
        }

        if config.max_upload_size > 512 * 1024 * 1024 {
            return Err(CommonError::validation("上传大小上限不建议超过 512MB"));
        }

        Ok(())
    }

    /// 验证运行时配置
    pub fn validate_runtime(config: &RuntimeConfig) -> Result<(), CommonError> {
        if Url::parse(&config.registry_url).is_err() {
            return Err(CommonError::validation("注册中心 URL 格式无效"));
        }

        if config.poll_interval_ms == 0 {
            return Err(CommonError::validation("轮询间隔不能为 0"));
        }

        if config.registration_timeout_ms < config.poll_interval_ms {
            return Err(CommonError::validation("注册超时不能小于轮询间隔"));
        }

        Ok(())
    }

    /// 验证日志配置
    pub fn validate_logging(config: &LoggingConfig) -> Result<(), CommonError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.level.to_lowercase().as_str()) {
            return Err(CommonError::validation(format!("无效的日志级别: {}", config.level)));
        }

        let valid_formats = ["json", "pretty", "compact", "full"];
        if !valid_formats.contains(&config.format.as_str()) {
            return Err(CommonError::validation(format!("无效的日志格式: {}", config.format)));
        }

        if config.file_enabled && config.file_path.as_deref().map_or(true, str::is_empty) {
            return Err(CommonError::validation("启用文件日志时必须配置日志文件路径"));
        }

        Ok(())
    }

    /// 验证环境配置
    pub fn validate_environment(config: &EnvironmentConfig) -> Result<(), CommonError> {
        let valid_envs = ["development", "test", "staging", "production"];
        if !valid_envs.contains(&config.name.as_str()) {
            return Err(CommonError::validation(format!("无效的环境名称: {}", config.name)));
        }

        Ok(())
    }
}
