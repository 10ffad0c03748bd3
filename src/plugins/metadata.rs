// 插件元数据来源
// 运行时加载器通过这些接口查询插件的入口地址

use std::time::Duration;

use async_trait::async_trait;
use plugin_shell_common::InstalledPluginRecord;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::errors::{ShellError, ShellResult};

/// 加载器需要的插件元数据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetadata {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub version: String,
    /// 入口脚本地址；未配置入口时为空
    pub url: Option<String>,
}

impl PluginMetadata {
    /// 从安装记录构造
    ///
    /// slug 取清单中的 `slug` 字段，缺省时等于 id。给定 origin 时入口地址转换为绝对地址。
    pub fn from_record(record: &InstalledPluginRecord, origin: Option<&Url>) -> Self {
        let slug = record
            .manifest
            .extra
            .get("slug")
            .and_then(|value| value.as_str())
            .unwrap_or(&record.id)
            .to_string();

        let url = record.entry_url().map(|path| match origin {
            Some(origin) => origin.join(&path).map(String::from).unwrap_or(path),
            None => path,
        });

        Self {
            id: record.id.clone(),
            slug,
            name: record.manifest.display_name().to_string(),
            version: record.manifest.version.clone(),
            url,
        }
    }
}

/// 已安装插件列表来源
#[async_trait]
pub trait InstalledPluginSource: Send + Sync {
    async fn installed_plugins(&self) -> ShellResult<Vec<InstalledPluginRecord>>;
}

/// 按 slug 或 id 查询插件元数据
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn by_slug(&self, slug: &str) -> ShellResult<Option<PluginMetadata>>;

    async fn by_id(&self, id: &str) -> ShellResult<Option<PluginMetadata>>;
}

/// 在安装记录中按 slug 查找
pub fn find_by_slug(records: &[InstalledPluginRecord], slug: &str, origin: Option<&Url>) -> Option<PluginMetadata> {
    records
        .iter()
        .map(|record| PluginMetadata::from_record(record, origin))
        .find(|metadata| metadata.slug == slug)
}

/// 在安装记录中按 id 查找
pub fn find_by_id(records: &[InstalledPluginRecord], id: &str, origin: Option<&Url>) -> Option<PluginMetadata> {
    records
        .iter()
        .find(|record| record.id == id)
        .map(|record| PluginMetadata::from_record(record, origin))
}

#[derive(Debug, Deserialize)]
struct InstalledListResponse {
    plugins: Vec<InstalledPluginRecord>,
}

/// 远程注册中心客户端
///
/// 通过 HTTP 接口读取已安装插件，供独立运行的宿主使用。
pub struct RegistryClient {
    http_client: reqwest::Client,
    /// 插件接口根地址，如 `http://127.0.0.1:8080/api/plugins/`
    registry_url: Url,
}

impl RegistryClient {
    pub fn new(registry_url: &str, timeout: Duration) -> ShellResult<Self> {
        // 保证以 `/` 结尾，join 时不会吞掉最后一段
        let normalized = format!("{}/", registry_url.trim_end_matches('/'));
        let registry_url = Url::parse(&normalized)
            .map_err(|e| ShellError::configuration(format!("无效的注册中心地址 {}: {}", registry_url, e)))?;

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ShellError::configuration(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            http_client,
            registry_url,
        })
    }

    /// 已安装列表接口地址
    pub fn installed_url(&self) -> ShellResult<Url> {
        self.registry_url
            .join("installed")
            .map_err(|e| ShellError::configuration(format!("无效的注册中心地址: {}", e)))
    }

    /// 运行时文件所在的源站
    pub fn origin(&self) -> Url {
        let mut origin = self.registry_url.clone();
        origin.set_path("/");
        origin.set_query(None);
        origin
    }
}

#[async_trait]
impl InstalledPluginSource for RegistryClient {
    async fn installed_plugins(&self) -> ShellResult<Vec<InstalledPluginRecord>> {
        let url = self.installed_url()?;
        debug!("查询已安装插件: {}", url);

        let response = self.http_client.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ShellError::external_service(
                "plugin-registry",
                format!("HTTP {}: {}", status, error_text),
            ));
        }

        let body: InstalledListResponse = response.json().await?;
        Ok(body.plugins)
    }
}

#[async_trait]
impl MetadataSource for RegistryClient {
    async fn by_slug(&self, slug: &str) -> ShellResult<Option<PluginMetadata>> {
        let records = self.installed_plugins().await?;
        Ok(find_by_slug(&records, slug, Some(&self.origin())))
    }

    async fn by_id(&self, id: &str) -> ShellResult<Option<PluginMetadata>> {
        let records = self.installed_plugins().await?;
        Ok(find_by_id(&records, id, Some(&self.origin())))
    }
}
