// 插件目录存储
// 基于 JSON 文件的目录读写；所有修改经由同一把写锁串行执行

use std::path::{Path, PathBuf};

use chrono::Utc;
use plugin_shell_common::{Catalog, CatalogEntry, CatalogStatus, Distribution, PluginManifest};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use crate::errors::{ShellError, ShellResult};
use crate::storage::fs::write_json_atomic;

/// 目录条目的覆盖字段
///
/// 为 `None` 的字段不参与合并，不会抹掉已有值。
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CatalogStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// 分发信息单独做一层浅合并
    #[serde(skip)]
    pub distribution: Option<DistributionPatch>,
}

impl CatalogOverrides {
    /// 用清单的展示字段作为覆盖值（重新上传时刷新展示信息）
    pub fn display_from(manifest: &PluginManifest) -> Self {
        Self {
            name: Some(manifest.name.clone()),
            version: Some(manifest.version.clone()),
            description: Some(manifest.description.clone()),
            author: Some(manifest.author.clone()),
            summary: manifest.summary.clone(),
            tab_count: Some(manifest.tabs.len()),
            tags: Some(manifest.tags.clone()),
            ..Default::default()
        }
    }
}

/// 分发信息的部分更新
#[derive(Debug, Clone, Default, Serialize)]
pub struct DistributionPatch {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl From<Distribution> for DistributionPatch {
    fn from(distribution: Distribution) -> Self {
        Self {
            kind: Some(distribution.kind),
            path: distribution.path,
        }
    }
}

/// 插件目录存储
pub struct CatalogStore {
    /// 目录文件路径
    path: PathBuf,
    /// 写锁：读-改-写必须串行
    write_lock: Mutex<()>,
    /// 默认目录条目
    seed: Vec<CatalogEntry>,
}

impl CatalogStore {
    /// 创建使用内置默认条目的目录存储
    pub fn new(path: PathBuf) -> Self {
        Self::with_seed(path, default_catalog_entries())
    }

    pub fn with_seed(path: PathBuf, seed: Vec<CatalogEntry>) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
            seed,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 默认目录
    pub fn default_catalog(&self) -> Catalog {
        Catalog {
            updated_at: Utc::now(),
            plugins: self.seed.clone(),
        }
    }

    /// 读取目录
    ///
    /// 文件缺失或内容损坏时写入并返回默认目录，损坏的内容被丢弃。
    pub async fn read(&self) -> ShellResult<Catalog> {
        if let Some(catalog) = self.load().await? {
            return Ok(catalog);
        }

        let _guard = self.write_lock.lock().await;
        self.read_locked().await
    }

    /// 写入目录并更新时间戳
    pub async fn write(&self, catalog: Catalog) -> ShellResult<Catalog> {
        let _guard = self.write_lock.lock().await;
        self.persist(catalog).await
    }

    /// 按 id 查找条目
    pub async fn get(&self, id: &str) -> ShellResult<Option<CatalogEntry>> {
        Ok(self.read().await?.get(id).cloned())
    }

    /// 插入或更新目录条目
    ///
    /// 合并顺序：清单派生的基础字段 → 已有条目 → 覆盖字段；分发信息单独浅合并。
    pub async fn upsert(
        &self,
        manifest: &PluginManifest,
        overrides: CatalogOverrides,
    ) -> ShellResult<CatalogEntry> {
        if !manifest.has_id() {
            return Err(ShellError::validation("manifest", "清单缺少 id"));
        }

        let _guard = self.write_lock.lock().await;
        let mut catalog = self.read_locked().await?;

        let position = catalog.plugins.iter().position(|entry| entry.id == manifest.id);
        let existing = position.map(|index| &catalog.plugins[index]);
        let entry = merge_entry(manifest, existing, &overrides)?;

        match position {
            Some(index) => catalog.plugins[index] = entry.clone(),
            None => catalog.plugins.push(entry.clone()),
        }
        self.persist(catalog).await?;

        info!("目录条目已更新: {} (status={:?})", entry.id, entry.status);
        Ok(entry)
    }

    /// 修改条目状态
    pub async fn set_status(&self, id: &str, status: CatalogStatus) -> ShellResult<CatalogEntry> {
        let _guard = self.write_lock.lock().await;
        let mut catalog = self.read_locked().await?;

        let entry = catalog
            .plugins
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| ShellError::not_found(format!("目录条目: {}", id)))?;
        entry.status = status;
        entry.updated_at = Some(Utc::now());
        let entry = entry.clone();

        self.persist(catalog).await?;
        Ok(entry)
    }

    /// 调用方已持有写锁
    async fn read_locked(&self) -> ShellResult<Catalog> {
        match self.load().await? {
            Some(catalog) => Ok(catalog),
            None => self.persist(self.default_catalog()).await,
        }
    }

    /// 读取并解析目录文件；缺失或损坏返回 None
    async fn load(&self) -> ShellResult<Option<Catalog>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("目录文件不存在，将创建默认目录: {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(ShellError::storage(format!(
                    "读取目录文件失败 {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        match serde_json::from_str::<Catalog>(&content) {
            Ok(catalog) => Ok(Some(catalog)),
            Err(e) => {
                warn!("目录文件损坏，重置为默认目录: {} ({})", self.path.display(), e);
                Ok(None)
            }
        }
    }

    async fn persist(&self, mut catalog: Catalog) -> ShellResult<Catalog> {
        catalog.updated_at = Utc::now();
        write_json_atomic(&self.path, &catalog).await?;
        debug!("目录已写入: {} 个条目", catalog.plugins.len());
        Ok(catalog)
    }
}

/// 合并清单、已有条目与覆盖字段
fn merge_entry(
    manifest: &PluginManifest,
    existing: Option<&CatalogEntry>,
    overrides: &CatalogOverrides,
) -> ShellResult<CatalogEntry> {
    let now = Value::String(Utc::now().to_rfc3339());

    let mut merged = Map::new();
    merged.insert("id".into(), Value::String(manifest.id.clone()));
    merged.insert("name".into(), Value::String(manifest.name.clone()));
    merged.insert("version".into(), Value::String(manifest.version.clone()));
    merged.insert("description".into(), Value::String(manifest.description.clone()));
    merged.insert("author".into(), Value::String(manifest.author.clone()));
    if let Some(summary) = &manifest.summary {
        merged.insert("summary".into(), Value::String(summary.clone()));
    }
    merged.insert("tabCount".into(), Value::from(manifest.tabs.len()));
    merged.insert("tags".into(), to_value(&manifest.tags)?);
    merged.insert("status".into(), to_value(&CatalogStatus::Pending)?);

    let mut distribution = Map::new();
    if let Some(existing) = existing {
        overlay(&mut merged, to_object(existing)?);
        distribution = to_object(&existing.distribution)?;
    }
    overlay(&mut merged, to_object(overrides)?);
    if let Some(patch) = &overrides.distribution {
        overlay(&mut distribution, to_object(patch)?);
    }
    merged.insert("distribution".into(), Value::Object(distribution));

    // id 是唯一关联键，任何覆盖都不能改变
    merged.insert("id".into(), Value::String(manifest.id.clone()));
    if existing.is_none() {
        merged.insert("createdAt".into(), now.clone());
    }
    merged.insert("updatedAt".into(), now);

    serde_json::from_value(Value::Object(merged))
        .map_err(|e| ShellError::internal(format!("目录条目合并失败: {}", e)))
}

/// 浅合并，跳过 null 值
fn overlay(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        if !value.is_null() {
            target.insert(key, value);
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> ShellResult<Value> {
    serde_json::to_value(value).map_err(|e| ShellError::internal(format!("序列化失败: {}", e)))
}

fn to_object<T: Serialize>(value: &T) -> ShellResult<Map<String, Value>> {
    match to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(ShellError::internal("期望 JSON 对象")),
    }
}

/// 内置的默认目录条目
pub fn default_catalog_entries() -> Vec<CatalogEntry> {
    vec![
        seed_entry(
            "weather-insights",
            "Weather Insights",
            "在车辆原型中展示天气对续航和驾驶的影响",
            vec!["weather", "dashboard"],
            1,
        ),
        seed_entry(
            "signal-inspector",
            "Signal Inspector",
            "浏览和检查车辆信号的实时取值",
            vec!["signals", "debug"],
            2,
        ),
    ]
}

fn seed_entry(id: &str, name: &str, description: &str, tags: Vec<&str>, tab_count: usize) -> CatalogEntry {
    CatalogEntry {
        id: id.to_string(),
        name: name.to_string(),
        version: "1.0.0".to_string(),
        description: description.to_string(),
        author: "Plugin Shell Team".to_string(),
        summary: None,
        tab_count,
        tags: tags.into_iter().map(String::from).collect(),
        status: CatalogStatus::Approved,
        distribution: Distribution::local_directory(format!("plugins/marketplace/{}", id)),
        source: Some("bundled".to_string()),
        original_name: None,
        checksum: None,
        created_at: None,
        updated_at: None,
        extra: Map::new(),
    }
}
