// 插件注册中心 API 处理器
// 目录浏览、安装、上传、审核、卸载和更新

use std::path::PathBuf;
use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures::StreamExt;
use plugin_shell_common::{CatalogEntry, InstallResult, InstalledPluginRecord, UploadResult};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::errors::{ErrorResponse, ShellError, ShellResult};
use crate::services::RegistryService;

/// 上传表单中的文件字段名
pub const UPLOAD_FIELD: &str = "plugin";

/// 目录列表响应
#[derive(Debug, Serialize, ToSchema)]
pub struct CatalogListResponse {
    #[schema(value_type = Vec<Object>)]
    pub plugins: Vec<CatalogEntry>,
}

/// 已安装插件列表响应
#[derive(Debug, Serialize, ToSchema)]
pub struct InstalledListResponse {
    #[schema(value_type = Vec<Object>)]
    pub plugins: Vec<InstalledPluginRecord>,
}

/// 安装请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct InstallRequest {
    pub id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InstallResponse {
    #[schema(value_type = Object)]
    pub plugin: InstallResult,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    #[schema(value_type = Object)]
    pub plugin: UploadResult,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CatalogEntryResponse {
    #[schema(value_type = Object)]
    pub plugin: CatalogEntry,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InstalledPluginResponse {
    #[schema(value_type = Object)]
    pub plugin: InstalledPluginRecord,
}

/// 获取插件目录
#[utoipa::path(
    get,
    path = "/api/plugins/catalog",
    responses(
        (status = 200, description = "插件目录", body = CatalogListResponse),
        (status = 500, description = "服务器内部错误", body = ErrorResponse)
    ),
    tag = "plugins"
)]
pub async fn get_catalog(registry: web::Data<Arc<RegistryService>>) -> ShellResult<HttpResponse> {
    let plugins = registry.get_catalog().await?;
    Ok(HttpResponse::Ok().json(CatalogListResponse { plugins }))
}

/// 获取已安装插件
#[utoipa::path(
    get,
    path = "/api/plugins/installed",
    responses(
        (status = 200, description = "已安装插件", body = InstalledListResponse),
        (status = 500, description = "服务器内部错误", body = ErrorResponse)
    ),
    tag = "plugins"
)]
pub async fn list_installed(registry: web::Data<Arc<RegistryService>>) -> ShellResult<HttpResponse> {
    let plugins = registry.list_installed().await?;
    Ok(HttpResponse::Ok().json(InstalledListResponse { plugins }))
}

/// 从目录安装插件
#[utoipa::path(
    post,
    path = "/api/plugins/install",
    request_body = InstallRequest,
    responses(
        (status = 200, description = "安装成功", body = InstallResponse),
        (status = 400, description = "请求参数错误", body = ErrorResponse),
        (status = 404, description = "插件不存在或不可用", body = ErrorResponse),
        (status = 422, description = "分发类型不支持", body = ErrorResponse)
    ),
    tag = "plugins"
)]
pub async fn install_plugin(
    registry: web::Data<Arc<RegistryService>>,
    request: web::Json<InstallRequest>,
) -> ShellResult<HttpResponse> {
    let id = request.id.trim();
    if id.is_empty() {
        return Err(ShellError::validation("id", "缺少插件 id"));
    }

    info!("安装插件请求: {}", id);
    let plugin = registry.install_from_catalog(id).await?;
    Ok(HttpResponse::Ok().json(InstallResponse { plugin }))
}

/// 上传插件包
///
/// 文件先流式写入 `uploads/`，超过 `storage.max_upload_size` 立即中止并返回 413。
/// 上传只登记到目录（状态 submitted），不会自动安装。
#[utoipa::path(
    post,
    path = "/api/plugins/upload",
    request_body(content = String, description = "插件包（zip / tar / tar.gz），字段名 plugin", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "登记成功", body = UploadResponse),
        (status = 400, description = "缺少文件或插件包无效", body = ErrorResponse),
        (status = 413, description = "文件过大", body = ErrorResponse)
    ),
    tag = "plugins"
)]
pub async fn upload_plugin(
    registry: web::Data<Arc<RegistryService>>,
    storage: web::Data<StorageConfig>,
    mut payload: Multipart,
) -> ShellResult<HttpResponse> {
    let limit = storage.max_upload_size;
    let mut upload: Option<(UploadGuard, String)> = None;

    while let Some(field) = payload.next().await {
        let mut field = field.map_err(|e| ShellError::validation(UPLOAD_FIELD, format!("表单解析失败: {}", e)))?;

        if field.name() != UPLOAD_FIELD || upload.is_some() {
            while field.next().await.is_some() {}
            continue;
        }

        let original_name = field
            .content_disposition()
            .get_filename()
            .map(|name| name.to_string())
            .unwrap_or_else(|| "plugin-upload".to_string());

        // 之后任何一步提前返回都会删掉这个文件
        let target = UploadGuard::new(registry.uploads_dir().join(format!("{}.upload", Uuid::new_v4())));
        receive_file(&mut field, target.path(), limit).await?;
        upload = Some((target, original_name));
    }

    let (target, original_name) = upload
        .ok_or_else(|| ShellError::validation(UPLOAD_FIELD, "缺少上传文件（字段 plugin）"))?;

    info!("收到插件包上传: {}", original_name);
    // 导入器接管文件，成功失败都会自行清理
    let path = target.into_path();
    let plugin = registry.register_uploaded_plugin(&path, &original_name).await?;
    Ok(HttpResponse::Ok().json(UploadResponse { plugin }))
}

/// 上传临时文件守卫，未移交给导入器前被丢弃时删除文件
struct UploadGuard {
    path: PathBuf,
    armed: bool,
}

impl UploadGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn into_path(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("删除未完成的上传文件失败 {}: {}", self.path.display(), e);
            }
        }
    }
}

async fn receive_file(field: &mut actix_multipart::Field, target: &std::path::Path, limit: u64) -> ShellResult<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::File::create(target).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| ShellError::validation(UPLOAD_FIELD, format!("读取上传数据失败: {}", e)))?;
        written += chunk.len() as u64;
        if written > limit {
            warn!("上传文件超过上限: {} 字节", limit);
            return Err(ShellError::payload_too_large(limit));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

/// 审核通过上传的插件
#[utoipa::path(
    post,
    path = "/api/plugins/{plugin_id}/approve",
    params(("plugin_id" = String, Path, description = "插件 ID")),
    responses(
        (status = 200, description = "审核通过", body = CatalogEntryResponse),
        (status = 404, description = "插件不存在", body = ErrorResponse)
    ),
    tag = "plugins"
)]
pub async fn approve_plugin(
    registry: web::Data<Arc<RegistryService>>,
    path: web::Path<String>,
) -> ShellResult<HttpResponse> {
    let plugin = registry.approve(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(CatalogEntryResponse { plugin }))
}

/// 卸载插件
#[utoipa::path(
    delete,
    path = "/api/plugins/{plugin_id}",
    params(("plugin_id" = String, Path, description = "插件 ID")),
    responses(
        (status = 204, description = "卸载成功"),
        (status = 404, description = "插件未安装", body = ErrorResponse)
    ),
    tag = "plugins"
)]
pub async fn uninstall_plugin(
    registry: web::Data<Arc<RegistryService>>,
    path: web::Path<String>,
) -> ShellResult<HttpResponse> {
    let plugin_id = path.into_inner();
    registry.uninstall(&plugin_id).await?;
    info!("插件已卸载: {}", plugin_id);
    Ok(HttpResponse::NoContent().finish())
}

/// 更新已安装插件的清单
#[utoipa::path(
    put,
    path = "/api/plugins/{plugin_id}",
    params(("plugin_id" = String, Path, description = "插件 ID")),
    request_body(content = Object, description = "清单字段补丁"),
    responses(
        (status = 200, description = "更新成功", body = InstalledPluginResponse),
        (status = 400, description = "补丁无效", body = ErrorResponse),
        (status = 404, description = "插件未安装", body = ErrorResponse)
    ),
    tag = "plugins"
)]
pub async fn update_plugin(
    registry: web::Data<Arc<RegistryService>>,
    path: web::Path<String>,
    patch: web::Json<serde_json::Value>,
) -> ShellResult<HttpResponse> {
    let plugin = registry.update_installed(&path.into_inner(), &patch).await?;
    Ok(HttpResponse::Ok().json(InstalledPluginResponse { plugin }))
}

/// 配置插件注册中心路由
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/plugins")
            .route("/catalog", web::get().to(get_catalog))
            .route("/installed", web::get().to(list_installed))
            .route("/install", web::post().to(install_plugin))
            .route("/upload", web::post().to(upload_plugin))
            .route("/{plugin_id}/approve", web::post().to(approve_plugin))
            .route("/{plugin_id}", web::delete().to(uninstall_plugin))
            .route("/{plugin_id}", web::put().to(update_plugin)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::RegistryLayout;
    use actix_web::{http::StatusCode, test, App};
    use plugin_shell_common::MANIFEST_FILE;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_weather_insights(root: &std::path::Path) {
        let dir = root.join("plugins/marketplace/weather-insights");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::json!({
                "id": "weather-insights",
                "name": "Weather Insights",
                "version": "1.0.0",
                "main": "main.js",
                "tabs": [{"id": "forecast", "label": "Forecast", "path": "/weather", "component": "Forecast"}]
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(dir.join("main.js"), "// weather").unwrap();
    }

    fn registry(temp_dir: &TempDir) -> Arc<RegistryService> {
        let root = temp_dir.path().to_path_buf();
        Arc::new(RegistryService::new(RegistryLayout::new(root.clone(), root.join("data/plugins"))))
    }

    fn storage(limit: u64) -> StorageConfig {
        StorageConfig {
            app_root: ".".to_string(),
            data_dir: "data/plugins".to_string(),
            max_upload_size: limit,
        }
    }

    fn zip_bytes(manifest: &serde_json::Value) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::default();
        writer.start_file("aspice/manifest.json", options).unwrap();
        writer.write_all(manifest.to_string().as_bytes()).unwrap();
        writer.start_file("aspice/main.js", options).unwrap();
        writer.write_all(b"// aspice").unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn multipart_body(field: &str, file_name: &str, data: &[u8]) -> (String, Vec<u8>) {
        let boundary = "plugin-shell-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"{f}\"; filename=\"{n}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                b = boundary,
                f = field,
                n = file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        (format!("multipart/form-data; boundary={}", boundary), body)
    }

    macro_rules! app {
        ($registry:expr, $limit:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($registry.clone()))
                    .app_data(web::Data::new(storage($limit)))
                    .service(web::scope("/api").configure(configure_routes)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_install_list_and_uninstall() {
        let temp_dir = TempDir::new().unwrap();
        write_weather_insights(temp_dir.path());
        let registry = registry(&temp_dir);
        let app = app!(registry, 1024 * 1024);

        let req = test::TestRequest::get().uri("/api/plugins/catalog").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let plugins = body["plugins"].as_array().unwrap();
        assert!(plugins.iter().any(|p| p["id"] == "weather-insights"));
        // 文件系统路径不对外暴露
        assert!(plugins.iter().all(|p| p["distribution"].get("path").map_or(true, |v| v.is_null())));

        let req = test::TestRequest::post()
            .uri("/api/plugins/install")
            .set_json(serde_json::json!({"id": "weather-insights"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["plugin"]["baseUrl"], "/plugins-runtime/weather-insights");

        let req = test::TestRequest::get().uri("/api/plugins/installed").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["plugins"].as_array().unwrap().len(), 1);

        let req = test::TestRequest::delete().uri("/api/plugins/weather-insights").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::delete().uri("/api/plugins/weather-insights").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_install_errors() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(&temp_dir);
        let app = app!(registry, 1024);

        let req = test::TestRequest::post()
            .uri("/api/plugins/install")
            .set_json(serde_json::json!({"id": "  "}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/plugins/install")
            .set_json(serde_json::json!({"id": "missing"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[actix_web::test]
    async fn test_upload_registers_submitted_entry() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(&temp_dir);
        let app = app!(registry, 1024 * 1024);

        let archive = zip_bytes(&serde_json::json!({
            "id": "aspice-plugin",
            "name": "ASPICE Assessment",
            "version": "0.3.0",
            "main": "main.js"
        }));
        let (content_type, body) = multipart_body(UPLOAD_FIELD, "aspice-plugin.zip", &archive);
        let req = test::TestRequest::post()
            .uri("/api/plugins/upload")
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["plugin"]["manifest"]["id"], "aspice-plugin");
        assert!(body["plugin"]["baseUrl"].is_null());

        let entry = registry.get_catalog().await.unwrap().into_iter().find(|e| e.id == "aspice-plugin").unwrap();
        assert_eq!(entry.status, plugin_shell_common::CatalogStatus::Submitted);
        assert_eq!(entry.original_name.as_deref(), Some("aspice-plugin.zip"));

        let req = test::TestRequest::post().uri("/api/plugins/aspice-plugin/approve").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["plugin"]["status"], "approved");
    }

    #[actix_web::test]
    async fn test_upload_too_large_and_missing_field() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(&temp_dir);
        let app = app!(registry, 16);

        let (content_type, body) = multipart_body(UPLOAD_FIELD, "big.zip", &[0u8; 64]);
        let req = test::TestRequest::post()
            .uri("/api/plugins/upload")
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let (content_type, body) = multipart_body("other", "big.zip", b"tiny");
        let req = test::TestRequest::post()
            .uri("/api/plugins/upload")
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // 中止的上传不会留下文件
        let leftovers = std::fs::read_dir(registry.uploads_dir()).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[actix_web::test]
    async fn test_upload_with_malformed_trailing_part_leaves_no_file() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(&temp_dir);
        let app = app!(registry, 1024 * 1024);

        let archive = zip_bytes(&serde_json::json!({"id": "aspice-plugin", "version": "0.3.0", "main": "main.js"}));
        let (content_type, mut body) = multipart_body(UPLOAD_FIELD, "aspice-plugin.zip", &archive);
        // 去掉结束边界，追加一个没有 Content-Disposition 且未结束的分段
        let closing = b"\r\n--plugin-shell-boundary--\r\n".len();
        body.truncate(body.len() - closing);
        body.extend_from_slice(b"\r\n--plugin-shell-boundary\r\nContent-Type: text/plain\r\n\r\ntrailing");

        let req = test::TestRequest::post()
            .uri("/api/plugins/upload")
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let leftovers = std::fs::read_dir(registry.uploads_dir()).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);
        assert!(registry.get_catalog().await.unwrap().iter().all(|e| e.id != "aspice-plugin"));
    }

    #[actix_web::test]
    async fn test_update_rejects_id_change() {
        let temp_dir = TempDir::new().unwrap();
        write_weather_insights(temp_dir.path());
        let registry = registry(&temp_dir);
        registry.install_from_catalog("weather-insights").await.unwrap();
        let app = app!(registry, 1024);

        let req = test::TestRequest::put()
            .uri("/api/plugins/weather-insights")
            .set_json(serde_json::json!({"version": "1.1.0"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["plugin"]["manifest"]["version"], "1.1.0");

        let req = test::TestRequest::put()
            .uri("/api/plugins/weather-insights")
            .set_json(serde_json::json!({"id": "other"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
