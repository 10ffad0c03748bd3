use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};

use plugin_shell::api::routes::ApiRouteConfig;
use plugin_shell::config::ConfigLoader;
use plugin_shell::errors::RequestTracingMiddleware;
use plugin_shell::health;
use plugin_shell::logging::LoggingSetup;
use plugin_shell::services::RegistryService;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // 初始化配置
    let config = ConfigLoader::init()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

    // 初始化结构化日志系统；guard 需存活到进程结束
    let _log_guard = LoggingSetup::init(&config.logging)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    tracing::info!("🚀 启动 Plugin Shell v{}", config.environment.version);

    // 初始化注册中心存储
    let registry = Arc::new(RegistryService::from_config(&config.storage));
    registry
        .ensure_layout()
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    match registry.get_catalog().await {
        Ok(plugins) => tracing::info!("插件目录已加载: {} 个条目", plugins.len()),
        Err(e) => tracing::warn!("插件目录读取失败: {}", e),
    }

    // 打印配置摘要
    ConfigLoader::print_summary(config);

    tracing::info!("🌐 服务器启动地址: http://{}:{}", config.server.host, config.server.port);
    tracing::info!("📋 健康检查: http://{}:{}/health", config.server.host, config.server.port);

    let storage = web::Data::new(config.storage.clone());
    let registry = web::Data::new(registry);

    // 启动 HTTP 服务器
    let mut server = HttpServer::new(move || {
        let app = App::new()
            // CORS 配置
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            // 请求 ID 与处理耗时
            .wrap(RequestTracingMiddleware)
            // 添加 tracing 中间件
            .wrap(tracing_actix_web::TracingLogger::default())
            .app_data(registry.clone())
            .app_data(storage.clone())
            // 根路径
            .route("/", web::get().to(health::index));

        // 根据环境配置不同的路由
        if cfg!(debug_assertions) {
            app.configure(ApiRouteConfig::configure_dev)
        } else {
            app.configure(ApiRouteConfig::configure_prod)
        }
    });

    // 配置服务器参数
    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server
        .bind((config.server.host.clone(), config.server.port))?
        .run()
        .await
}
