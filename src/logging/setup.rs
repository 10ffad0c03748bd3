// 日志系统设置

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 日志系统初始化器
pub struct LoggingSetup;

impl LoggingSetup {
    /// 初始化日志系统
    ///
    /// 启用文件日志时返回写入线程的守卫，调用方需持有到进程退出，否则缓冲日志会丢失。
    pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
        let env_filter = Self::env_filter(&config.level);

        let console = match config.format.as_str() {
            "json" => fmt::layer().json().with_target(true).with_file(true).with_line_number(true).boxed(),
            "pretty" => fmt::layer().pretty().with_target(true).with_thread_ids(true).boxed(),
            "compact" => fmt::layer().compact().with_target(true).boxed(),
            _ => fmt::layer().with_target(true).with_thread_names(true).boxed(),
        };

        let (file_layer, guard) = match (config.file_enabled, config.file_path.as_deref()) {
            (true, Some(file_path)) => {
                let (directory, prefix) = Self::split_log_path(file_path);
                let appender = tracing_appender::rolling::daily(directory, prefix);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer().json().with_ansi(false).with_writer(writer).boxed();
                (Some(layer), Some(guard))
            }
            _ => (None, None),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(file_layer)
            .try_init()
            .context("日志系统已经初始化")?;

        tracing::info!("日志系统初始化完成: 级别={}, 格式={}", config.level, config.format);
        if guard.is_some() {
            tracing::info!("文件日志已启用: {:?}", config.file_path);
        }

        Ok(guard)
    }

    /// 创建环境过滤器，RUST_LOG 优先
    pub fn env_filter(level: &str) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// 拆分日志文件路径为目录和文件名前缀
    pub fn split_log_path(file_path: &str) -> (String, String) {
        let path = Path::new(file_path);
        let directory = path
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ".".to_string());
        let prefix = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "plugin-shell.log".to_string());
        (directory, prefix)
    }

    /// 解析日志级别
    pub fn parse_level(level: &str) -> Level {
        match level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// 创建开发环境日志配置
    pub fn development_config() -> LoggingConfig {
        LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
            file_enabled: false,
            file_path: None,
        }
    }

    /// 创建生产环境日志配置
    pub fn production_config() -> LoggingConfig {
        LoggingConfig {
            level: "info".to_string(),
            format: "json".to_string(),
            file_enabled: true,
            file_path: Some("./logs/plugin-shell.log".to_string()),
        }
    }
}
