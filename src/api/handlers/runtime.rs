// 插件运行时静态资源
// 从已安装目录提供插件文件，供宿主注入脚本

use std::path::Path;
use std::sync::Arc;

use actix_web::{http::header, web, HttpResponse};
use plugin_shell_common::RUNTIME_PREFIX;

use crate::errors::{ErrorResponse, ShellResult};
use crate::services::RegistryService;

/// 按扩展名判断内容类型
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "js" | "mjs" | "cjs" => "application/javascript; charset=utf-8",
        "json" | "map" => "application/json; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "txt" | "md" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// 获取插件运行时文件
#[utoipa::path(
    get,
    path = "/plugins-runtime/{plugin_id}/{path}",
    params(
        ("plugin_id" = String, Path, description = "插件 ID"),
        ("path" = String, Path, description = "插件目录内的相对路径")
    ),
    responses(
        (status = 200, description = "文件内容"),
        (status = 400, description = "路径无效", body = ErrorResponse),
        (status = 404, description = "插件未安装或文件不存在", body = ErrorResponse)
    ),
    tag = "runtime"
)]
pub async fn serve_runtime_file(
    registry: web::Data<Arc<RegistryService>>,
    path: web::Path<(String, String)>,
) -> ShellResult<HttpResponse> {
    let (plugin_id, relative) = path.into_inner();
    let file = registry.installed_file(&plugin_id, &relative).await?;
    let bytes = tokio::fs::read(&file).await?;

    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, content_type_for(&file)))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .body(bytes))
}

/// 配置运行时静态资源路由
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route(
        &format!("{}/{{plugin_id}}/{{path:.*}}", RUNTIME_PREFIX),
        web::get().to(serve_runtime_file),
    );
}
