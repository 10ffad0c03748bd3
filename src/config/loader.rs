// 配置加载器
// 处理配置文件加载和环境变量解析

use crate::config::AppConfig;
use config::ConfigError;
use dotenvy::dotenv;
use plugin_shell_common::CommonError;
use std::sync::OnceLock;
use tracing::{info, warn};

/// 全局配置实例
static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 初始化配置
    pub fn init() -> Result<&'static AppConfig, CommonError> {
        if let Err(e) = dotenv() {
            warn!("无法加载 .env 文件: {}", e);
        }

        let config = AppConfig::load().map_err(convert_config_error)?;
        config.validate()?;

        CONFIG
            .set(config)
            .map_err(|_| CommonError::internal("配置已经初始化"))?;

        let config = Self::get()?;
        info!("配置加载成功: 环境={}, 版本={}", config.environment.name, config.environment.version);

        Ok(config)
    }

    /// 获取配置
    pub fn get() -> Result<&'static AppConfig, CommonError> {
        CONFIG
            .get()
            .ok_or_else(|| CommonError::configuration("配置未初始化，请先调用 ConfigLoader::init()"))
    }

    /// 打印配置摘要
    pub fn print_summary(config: &AppConfig) {
        println!("=== Plugin Shell 配置摘要 ===");
        println!("环境: {}", config.environment.name);
        println!("版本: {}", config.environment.version);
        println!("服务器: {}:{}", config.server.host, config.server.port);
        println!("工作线程: {:?}", config.server.workers);
        println!("应用根目录: {}", config.storage.app_root);
        println!("数据目录: {}", config.storage.data_dir_path().display());
        println!("上传上限: {} 字节", config.storage.max_upload_size);
        println!("注册超时: {}ms", config.runtime.registration_timeout_ms);
        println!("日志级别: {}", config.logging.level);
        println!("=============================");
    }
}

/// 配置错误转换辅助函数
pub fn convert_config_error(err: ConfigError) -> CommonError {
    CommonError::configuration(format!("配置错误: {}", err))
}
