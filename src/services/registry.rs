// 插件注册中心服务
// 目录与安装存储的唯一所有者，对外提供目录、安装、上传与卸载操作

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use plugin_shell_common::{
    runtime_base_url, CatalogEntry, CatalogStatus, InstallResult, InstalledPluginRecord, UploadResult,
};
use serde_json::Value;
use tokio::fs;
use tracing::{info, instrument};

use crate::config::StorageConfig;
use crate::errors::{ShellError, ShellResult};
use crate::plugins::metadata::{find_by_id, find_by_slug, InstalledPluginSource, MetadataSource, PluginMetadata};
use crate::services::ingestion::{ArchiveIngestor, EXTRACT_RATIO};
use crate::storage::fs::{is_hidden, validate_plugin_id};
use crate::storage::{default_catalog_entries, CatalogStore, InstallationStore};

/// 数据目录布局
#[derive(Debug, Clone)]
pub struct RegistryLayout {
    pub app_root: PathBuf,
    pub data_dir: PathBuf,
    pub catalog_file: PathBuf,
    pub installed_dir: PathBuf,
    pub packages_dir: PathBuf,
    pub uploads_dir: PathBuf,
}

impl RegistryLayout {
    pub fn new(app_root: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            catalog_file: data_dir.join("catalog.json"),
            installed_dir: data_dir.join("installed"),
            packages_dir: data_dir.join("packages"),
            uploads_dir: data_dir.join("uploads"),
            app_root,
            data_dir,
        }
    }
}

/// 插件注册中心服务
pub struct RegistryService {
    layout: RegistryLayout,
    catalog: Arc<CatalogStore>,
    installations: InstallationStore,
    ingestor: ArchiveIngestor,
}

impl RegistryService {
    /// 按存储配置创建
    ///
    /// 解压上限取上传上限的 `EXTRACT_RATIO` 倍。
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(RegistryLayout::new(config.app_root_path(), config.data_dir_path()))
            .with_extract_limit(config.max_upload_size.saturating_mul(EXTRACT_RATIO))
    }

    pub fn new(layout: RegistryLayout) -> Self {
        Self::with_seed(layout, default_catalog_entries())
    }

    /// 使用指定的默认目录条目创建
    pub fn with_seed(layout: RegistryLayout, seed: Vec<CatalogEntry>) -> Self {
        let catalog = Arc::new(CatalogStore::with_seed(layout.catalog_file.clone(), seed));
        let installations = InstallationStore::new(
            layout.installed_dir.clone(),
            layout.app_root.clone(),
            layout.packages_dir.clone(),
        );
        let ingestor = ArchiveIngestor::new(
            catalog.clone(),
            layout.app_root.clone(),
            layout.packages_dir.clone(),
            layout.uploads_dir.clone(),
        );

        Self {
            layout,
            catalog,
            installations,
            ingestor,
        }
    }

    /// 设置插件包解压后的总大小上限
    pub fn with_extract_limit(mut self, limit: u64) -> Self {
        self.ingestor = self.ingestor.with_extract_limit(limit);
        self
    }

    pub fn layout(&self) -> &RegistryLayout {
        &self.layout
    }

    /// 上传文件的暂存目录
    pub fn uploads_dir(&self) -> &Path {
        &self.layout.uploads_dir
    }

    /// 创建数据目录结构
    pub async fn ensure_layout(&self) -> ShellResult<()> {
        for dir in [
            &self.layout.installed_dir,
            &self.layout.packages_dir,
            &self.layout.uploads_dir,
        ] {
            fs::create_dir_all(dir).await?;
        }
        info!("插件数据目录: {}", self.layout.data_dir.display());
        Ok(())
    }

    /// 获取插件目录（隐藏文件系统路径）
    pub async fn get_catalog(&self) -> ShellResult<Vec<CatalogEntry>> {
        let catalog = self.catalog.read().await?;
        Ok(catalog.plugins.iter().map(CatalogEntry::redacted).collect())
    }

    /// 列出已安装插件
    pub async fn list_installed(&self) -> ShellResult<Vec<InstalledPluginRecord>> {
        self.installations.list().await
    }

    /// 从目录安装插件
    #[instrument(skip(self))]
    pub async fn install_from_catalog(&self, id: &str) -> ShellResult<InstallResult> {
        validate_plugin_id(id)?;
        let entry = self
            .catalog
            .get(id)
            .await?
            .ok_or_else(|| ShellError::not_found(format!("目录中的插件: {}", id)))?;

        let record = self.installations.install(&entry).await?;
        Ok(InstallResult {
            id: record.id,
            manifest: record.manifest,
            base_url: record.base_url,
        })
    }

    /// 登记上传的插件包，不会自动安装
    #[instrument(skip(self, file_path))]
    pub async fn register_uploaded_plugin(&self, file_path: &Path, original_name: &str) -> ShellResult<UploadResult> {
        let ingested = self.ingestor.ingest(file_path, original_name).await?;
        Ok(UploadResult {
            manifest: ingested.manifest,
            base_url: None,
        })
    }

    /// 卸载插件
    #[instrument(skip(self))]
    pub async fn uninstall(&self, id: &str) -> ShellResult<()> {
        self.installations.uninstall(id).await
    }

    /// 更新已安装插件的清单快照
    pub async fn update_installed(&self, id: &str, patch: &Value) -> ShellResult<InstalledPluginRecord> {
        self.installations.update(id, patch).await
    }

    /// 审核通过目录条目
    pub async fn approve(&self, id: &str) -> ShellResult<CatalogEntry> {
        validate_plugin_id(id)?;
        let entry = self.catalog.set_status(id, CatalogStatus::Approved).await?;
        Ok(entry.redacted())
    }

    /// 解析已安装插件中的可服务文件
    ///
    /// 拒绝空路径、`..` 以及隐藏文件（包括安装元数据旁车文件）。
    pub async fn installed_file(&self, id: &str, relative: &str) -> ShellResult<PathBuf> {
        let plugin_dir = self.installations.plugin_dir(id)?;
        if !fs::try_exists(&plugin_dir).await? {
            return Err(ShellError::not_installed(id));
        }

        let mut path = plugin_dir;
        let mut depth = 0;
        for segment in relative.split('/').filter(|s| !s.is_empty() && *s != ".") {
            if segment == ".." || segment.contains('\\') || is_hidden(segment) {
                return Err(ShellError::validation("path", format!("无效的文件路径: {}", relative)));
            }
            path.push(segment);
            depth += 1;
        }
        if depth == 0 {
            return Err(ShellError::validation("path", "文件路径不能为空"));
        }

        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(path),
            _ => Err(ShellError::not_found(format!(
                "{}/{}",
                runtime_base_url(id),
                relative.trim_start_matches('/')
            ))),
        }
    }
}

#[async_trait]
impl InstalledPluginSource for RegistryService {
    async fn installed_plugins(&self) -> ShellResult<Vec<InstalledPluginRecord>> {
        self.list_installed().await
    }
}

#[async_trait]
impl MetadataSource for RegistryService {
    async fn by_slug(&self, slug: &str) -> ShellResult<Option<PluginMetadata>> {
        let records = self.list_installed().await?;
        Ok(find_by_slug(&records, slug, None))
    }

    async fn by_id(&self, id: &str) -> ShellResult<Option<PluginMetadata>> {
        let records = self.list_installed().await?;
        Ok(find_by_id(&records, id, None))
    }
}
