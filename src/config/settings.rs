// 应用程序设置和配置
// 定义配置结构体和加载逻辑

use config::{Config, ConfigError, Environment, File};
use plugin_shell_common::CommonError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 应用程序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
    pub environment: EnvironmentConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

/// 插件存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 应用根目录，目录条目中的相对路径以此解析
    pub app_root: String,
    /// 注册中心数据目录（目录文件、installed/、packages/、uploads/）
    pub data_dir: String,
    /// 上传包大小上限（字节）
    pub max_upload_size: u64,
}

impl StorageConfig {
    pub fn app_root_path(&self) -> PathBuf {
        PathBuf::from(&self.app_root)
    }

    /// 数据目录；相对路径按应用根目录解析
    pub fn data_dir_path(&self) -> PathBuf {
        let data_dir = Path::new(&self.data_dir);
        if data_dir.is_absolute() {
            data_dir.to_path_buf()
        } else {
            self.app_root_path().join(data_dir)
        }
    }
}

/// 注册槽模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotModeSetting {
    /// 每次加载使用唯一的注册键
    PerLoad,
    /// 所有插件共用一个固定注册键（旧版插件包）
    Shared,
}

/// 运行时加载器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// 注册中心 HTTP 地址（远程宿主使用）
    pub registry_url: String,
    /// 等待插件注册的超时（毫秒）
    pub registration_timeout_ms: u64,
    /// 轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    pub slot_mode: SlotModeSetting,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file_enabled: bool,
    pub file_path: Option<String>,
}

/// 环境配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    pub debug: bool,
    pub version: String,
}

impl AppConfig {
    /// 从环境变量和配置文件加载配置
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::builder();

        // 1. 加载默认配置
        config = config.add_source(Config::try_from(&AppConfig::default())?);

        // 2. 尝试加载配置文件
        if Path::new("config.toml").exists() {
            config = config.add_source(File::with_name("config"));
        }

        // 3. 加载环境变量（优先级最高）
        config = config.add_source(
            Environment::with_prefix("PLUGIN_SHELL")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut app_config: AppConfig = config.build()?.try_deserialize()?;
        app_config.environment.version = env!("CARGO_PKG_VERSION").to_string();

        Ok(app_config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), CommonError> {
        use crate::config::ConfigValidator;

        ConfigValidator::validate_all(self).map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.message.clone()).collect();
            CommonError::configuration(format!("配置验证失败: {}", messages.join("; ")))
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment.name == "development"
    }

    pub fn is_production(&self) -> bool {
        self.environment.name == "production"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                workers: None,
            },
            storage: StorageConfig {
                app_root: ".".to_string(),
                data_dir: "data/plugins".to_string(),
                max_upload_size: 20 * 1024 * 1024, // 20MB
            },
            runtime: RuntimeConfig {
                registry_url: "http://127.0.0.1:8080/api/plugins".to_string(),
                registration_timeout_ms: 5000,
                poll_interval_ms: 100,
                slot_mode: SlotModeSetting::PerLoad,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
                file_enabled: false,
                file_path: None,
            },
            environment: EnvironmentConfig {
                name: "development".to_string(),
                debug: true,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}
