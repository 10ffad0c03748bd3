// 健康检查
// 报告服务状态以及注册中心的目录、安装数量

use std::sync::Arc;

use actix_web::{web, HttpResponse, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::warn;
use utoipa::ToSchema;

use crate::services::RegistryService;

/// 健康检查响应
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy` 或 `degraded`
    pub status: String,
    pub service: String,
    pub version: String,
    pub catalog: Option<usize>,
    pub installed: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

/// 健康检查端点
///
/// 注册中心存储读取失败时返回 503，状态为 `degraded`。
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "服务健康", body = HealthResponse),
        (status = 503, description = "注册中心存储不可用", body = HealthResponse)
    )
)]
pub async fn health_check(registry: web::Data<Arc<RegistryService>>) -> Result<HttpResponse> {
    let catalog = registry.get_catalog().await.map(|entries| entries.len());
    let installed = registry.list_installed().await.map(|records| records.len());

    let healthy = catalog.is_ok() && installed.is_ok();
    if let Err(e) = catalog.as_ref().and(installed.as_ref()) {
        warn!("健康检查发现存储异常: {}", e);
    }

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        service: "plugin-shell".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        catalog: catalog.ok(),
        installed: installed.ok(),
        timestamp: Utc::now(),
    };

    if healthy {
        Ok(HttpResponse::Ok().json(response))
    } else {
        Ok(HttpResponse::ServiceUnavailable().json(response))
    }
}

/// 根路径处理器
pub async fn index() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "message": "Plugin Shell 插件注册中心",
        "version": env!("CARGO_PKG_VERSION"),
        "api": "/api/plugins",
        "runtime": plugin_shell_common::RUNTIME_PREFIX,
        "docs": "/api/docs/"
    })))
}
