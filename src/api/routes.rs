// API 路由定义
// 汇总注册中心接口、运行时静态资源和 API 文档

use actix_web::{web, HttpResponse, Result as ActixResult};
use utoipa::OpenApi;

use crate::api::handlers::{plugin, runtime};

/// API 文档聚合
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Plugin Shell API",
        description = "插件注册中心与运行时资源接口文档",
        version = "0.1.0",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    paths(
        crate::health::health_check,
        plugin::get_catalog,
        plugin::list_installed,
        plugin::install_plugin,
        plugin::upload_plugin,
        plugin::approve_plugin,
        plugin::uninstall_plugin,
        plugin::update_plugin,
        runtime::serve_runtime_file,
    ),
    components(schemas(
        crate::health::HealthResponse,
        plugin::CatalogListResponse,
        plugin::InstalledListResponse,
        plugin::InstallRequest,
        plugin::InstallResponse,
        plugin::UploadResponse,
        plugin::CatalogEntryResponse,
        plugin::InstalledPluginResponse,
        crate::errors::ErrorResponse,
        crate::errors::ErrorDetail,
    )),
    tags(
        (name = "health", description = "健康检查"),
        (name = "plugins", description = "插件目录与安装管理"),
        (name = "runtime", description = "已安装插件的静态资源"),
    )
)]
pub struct ApiDoc;

/// 配置 API 路由
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .configure(plugin::configure_routes)
            .route("/openapi.json", web::get().to(get_openapi_spec)),
    )
    .configure(runtime::configure_routes);
}

/// 获取 OpenAPI 规范
async fn get_openapi_spec() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(ApiDoc::openapi()))
}

/// 配置 Swagger UI
pub fn configure_swagger_ui(cfg: &mut web::ServiceConfig) {
    cfg.service(
        utoipa_swagger_ui::SwaggerUi::new("/api/docs/{_:.*}")
            .url("/api/openapi.json", ApiDoc::openapi()),
    );
}

/// API 路由配置辅助函数
pub struct ApiRouteConfig;

impl ApiRouteConfig {
    /// 配置所有路由
    pub fn configure_all(cfg: &mut web::ServiceConfig) {
        cfg.route("/health", web::get().to(crate::health::health_check));
        configure_routes(cfg);
    }

    /// 开发环境额外提供 Swagger UI
    pub fn configure_dev(cfg: &mut web::ServiceConfig) {
        // Swagger UI 要先于 /api scope 注册，否则会被 scope 吞掉
        configure_swagger_ui(cfg);
        Self::configure_all(cfg);
    }

    pub fn configure_prod(cfg: &mut web::ServiceConfig) {
        Self::configure_all(cfg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{RegistryLayout, RegistryService};
    use actix_web::{http::StatusCode, test as actix_test, App};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_openapi_lists_plugin_paths() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/api/plugins/catalog"));
        assert!(paths.iter().any(|p| p.as_str() == "/api/plugins/{plugin_id}/approve"));
        assert!(paths.iter().any(|p| p.as_str() == "/health"));
    }

    #[actix_web::test]
    async fn test_openapi_endpoint_and_health() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let registry = Arc::new(RegistryService::new(RegistryLayout::new(root.clone(), root.join("data/plugins"))));

        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(registry))
                .configure(ApiRouteConfig::configure_prod),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/api/openapi.json").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = actix_test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["installed"], 0);
    }
}
