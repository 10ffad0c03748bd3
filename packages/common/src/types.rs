// 通用类型定义
// 插件清单、目录条目与安装记录

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 清单文件名
pub const MANIFEST_FILE: &str = "manifest.json";

/// 已安装插件的静态服务前缀
pub const RUNTIME_PREFIX: &str = "/plugins-runtime";

/// 计算插件的运行时基础 URL
pub fn runtime_base_url(plugin_id: &str) -> String {
    format!("{}/{}", RUNTIME_PREFIX, plugin_id)
}

/// 插件清单
///
/// 由插件作者提供，每个版本不可变。`id` 是目录、安装与运行时记录之间唯一的关联键。
/// 未识别的字段保存在 `extra` 中，快照可以原样写回。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tabs: Vec<TabDefinition>,
    #[serde(default)]
    pub activation_events: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// 入口文件路径（相对插件根目录）
    #[serde(default)]
    pub main: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PluginManifest {
    /// 清单是否带有标识
    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// 显示名称，缺省时回退到 id
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    /// 按 id 查找标签页定义
    pub fn tab(&self, tab_id: &str) -> Option<&TabDefinition> {
        self.tabs.iter().find(|tab| tab.id == tab_id)
    }
}

/// 标签页定义
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabDefinition {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub path: String,
    /// 组件名称
    #[serde(default)]
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

/// 目录条目状态
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CatalogStatus {
    Approved,
    #[default]
    Pending,
    Submitted,
}

/// 分发方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionKind {
    /// 应用目录内的本地目录
    LocalDirectory,
    /// 上传后落地的包目录
    UploadedDirectory,
    /// 未知类型
    Other,
}

impl DistributionKind {
    pub const LOCAL_DIRECTORY: &'static str = "local-directory";
    pub const UPLOADED_DIRECTORY: &'static str = "uploaded-directory";

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalDirectory => Self::LOCAL_DIRECTORY,
            Self::UploadedDirectory => Self::UPLOADED_DIRECTORY,
            Self::Other => "other",
        }
    }
}

/// 目录条目指向的可安装源
///
/// `type` 保留原始字符串，未知类型写回时不会丢失。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Distribution {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Distribution {
    pub fn local_directory(path: impl Into<String>) -> Self {
        Self {
            kind: DistributionKind::LOCAL_DIRECTORY.to_string(),
            path: Some(path.into()),
        }
    }

    pub fn uploaded_directory(path: impl Into<String>) -> Self {
        Self {
            kind: DistributionKind::UPLOADED_DIRECTORY.to_string(),
            path: Some(path.into()),
        }
    }

    pub fn kind(&self) -> DistributionKind {
        match self.kind.as_str() {
            DistributionKind::LOCAL_DIRECTORY => DistributionKind::LocalDirectory,
            DistributionKind::UPLOADED_DIRECTORY => DistributionKind::UploadedDirectory,
            _ => DistributionKind::Other,
        }
    }
}

/// 插件目录条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub tab_count: usize,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: CatalogStatus,
    #[serde(default)]
    pub distribution: Distribution,
    /// 来源（如 `upload`）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    /// 上传包的 sha256
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogEntry {
    /// 对外展示的副本：分发信息只保留类型，不暴露文件系统路径
    pub fn redacted(&self) -> Self {
        let mut entry = self.clone();
        entry.distribution.path = None;
        entry
    }
}

/// 目录文件内容
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub updated_at: DateTime<Utc>,
    pub plugins: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.plugins.iter().find(|entry| entry.id == id)
    }
}

/// 安装元数据（安装目录中的旁车文件）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallMetadata {
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 已安装插件记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPluginRecord {
    pub id: String,
    pub manifest: PluginManifest,
    pub base_url: String,
    pub installed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl InstalledPluginRecord {
    /// 入口脚本的服务地址
    pub fn entry_url(&self) -> Option<String> {
        let main = self.manifest.main.trim_start_matches("./").trim_start_matches('/');
        if main.is_empty() {
            None
        } else {
            Some(format!("{}/{}", self.base_url.trim_end_matches('/'), main))
        }
    }
}

/// 从目录安装的结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallResult {
    pub id: String,
    pub manifest: PluginManifest,
    pub base_url: String,
}

/// 上传登记的结果（上传从不自动安装，`baseUrl` 恒为 null）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub manifest: PluginManifest,
    pub base_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_preserves_unknown_fields() {
        let raw = r#"{
            "id": "weather-insights",
            "name": "Weather Insights",
            "version": "1.2.0",
            "main": "dist/index.js",
            "activationEvents": ["onStartup"],
            "tabs": [{"id": "forecast", "label": "预报", "component": "ForecastPage", "position": 2}],
            "homepage": "https://example.com"
        }"#;

        let manifest: PluginManifest = serde_json::from_str(raw).unwrap();
        assert!(manifest.has_id());
        assert_eq!(manifest.activation_events, vec!["onStartup"]);
        assert_eq!(manifest.tab("forecast").unwrap().position, Some(2));
        assert_eq!(manifest.extra.get("homepage").unwrap(), "https://example.com");

        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["homepage"], "https://example.com");
        assert_eq!(value["activationEvents"][0], "onStartup");
    }

    #[test]
    fn test_manifest_without_id() {
        let manifest: PluginManifest = serde_json::from_str(r#"{"name": "匿名"}"#).unwrap();
        assert!(!manifest.has_id());
        assert_eq!(manifest.display_name(), "匿名");
    }

    #[test]
    fn test_distribution_kind_keeps_unknown_type() {
        let dist: Distribution = serde_json::from_str(r#"{"type": "git", "path": "x"}"#).unwrap();
        assert_eq!(dist.kind(), DistributionKind::Other);
        assert_eq!(serde_json::to_value(&dist).unwrap()["type"], "git");

        assert_eq!(
            Distribution::local_directory("plugins/a").kind(),
            DistributionKind::LocalDirectory
        );
    }

    #[test]
    fn test_catalog_entry_redaction() {
        let raw = r#"{
            "id": "weather-insights",
            "status": "approved",
            "distribution": {"type": "local-directory", "path": "plugins/marketplace/weather-insights"}
        }"#;
        let entry: CatalogEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(entry.status, CatalogStatus::Approved);

        let value = serde_json::to_value(entry.redacted()).unwrap();
        assert_eq!(value["distribution"], serde_json::json!({"type": "local-directory"}));
    }

    #[test]
    fn test_catalog_requires_plugins_array() {
        let missing = serde_json::from_str::<Catalog>(r#"{"updatedAt": "2024-01-01T00:00:00Z"}"#);
        assert!(missing.is_err());
    }

    #[test]
    fn test_entry_url() {
        let record = InstalledPluginRecord {
            id: "weather-insights".to_string(),
            manifest: PluginManifest {
                id: "weather-insights".to_string(),
                main: "./dist/index.js".to_string(),
                ..Default::default()
            },
            base_url: runtime_base_url("weather-insights"),
            installed_at: None,
            updated_at: None,
        };
        assert_eq!(
            record.entry_url().as_deref(),
            Some("/plugins-runtime/weather-insights/dist/index.js")
        );
    }
}
