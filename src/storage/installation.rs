// 插件安装存储
// installed/ 下每个插件一个目录：插件文件 + 安装元数据旁车文件

use std::path::{Path, PathBuf};

use chrono::Utc;
use plugin_shell_common::{
    runtime_base_url, CatalogEntry, DistributionKind, InstallMetadata, InstalledPluginRecord,
    PluginManifest, MANIFEST_FILE,
};
use serde_json::Value;
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use crate::errors::{ShellError, ShellResult};
use crate::storage::fs::{
    copy_dir_recursive, is_hidden, read_manifest, staging_path, swap_into_place, validate_plugin_id,
    write_json_atomic,
};

/// 安装元数据旁车文件名
pub const INSTALL_METADATA_FILE: &str = ".plugin-install.json";

/// 插件安装存储
pub struct InstallationStore {
    /// installed/ 目录
    root: PathBuf,
    /// 应用根目录，分发路径以此解析
    app_root: PathBuf,
    /// 上传包目录，uploaded-directory 的回退位置
    packages_dir: PathBuf,
    /// 安装、卸载与更新串行执行
    lock: Mutex<()>,
}

impl InstallationStore {
    pub fn new(root: PathBuf, app_root: PathBuf, packages_dir: PathBuf) -> Self {
        Self {
            root,
            app_root,
            packages_dir,
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 插件安装目录
    pub fn plugin_dir(&self, id: &str) -> ShellResult<PathBuf> {
        validate_plugin_id(id)?;
        Ok(self.root.join(id))
    }

    /// 列出已安装插件
    ///
    /// 清单无法读取的目录记录警告后跳过，不影响其他插件。
    pub async fn list(&self) -> ShellResult<Vec<InstalledPluginRecord>> {
        let mut records = Vec::new();

        if !fs::try_exists(&self.root).await? {
            return Ok(records);
        }

        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_hidden(&name) || !entry.file_type().await?.is_dir() {
                continue;
            }

            match self.read_record(&entry.path(), &name).await {
                Ok(record) => records.push(record),
                Err(e) => warn!("跳过无法读取的已安装插件 {}: {}", name, e),
            }
        }

        records.sort_by(|a, b| a.id.cmp(&b.id));
        debug!("已安装插件: {} 个", records.len());
        Ok(records)
    }

    /// 获取单个已安装插件
    pub async fn get(&self, id: &str) -> ShellResult<InstalledPluginRecord> {
        let dir = self.plugin_dir(id)?;
        if !fs::try_exists(&dir).await? {
            return Err(ShellError::not_installed(id));
        }
        self.read_record(&dir, id).await
    }

    /// 解析目录条目的分发源路径
    pub async fn resolve_source(&self, entry: &CatalogEntry) -> ShellResult<PathBuf> {
        let distribution = &entry.distribution;

        match distribution.kind() {
            DistributionKind::LocalDirectory => {
                let path = distribution.path.as_deref().ok_or_else(|| {
                    ShellError::validation("distribution.path", format!("插件 {} 未配置源目录", entry.id))
                })?;
                let source = self.app_root.join(path);
                if !fs::try_exists(&source).await? {
                    return Err(ShellError::not_found(format!("插件源目录: {}", source.display())));
                }
                Ok(source)
            }
            DistributionKind::UploadedDirectory => {
                let mut candidates = Vec::new();
                if let Some(path) = distribution.path.as_deref() {
                    candidates.push(self.app_root.join(path));
                }
                // 约定的回退位置：packages/<id>
                candidates.push(self.packages_dir.join(&entry.id));

                for candidate in candidates {
                    if fs::try_exists(&candidate).await? {
                        return Ok(candidate);
                    }
                }
                Err(ShellError::not_found(format!("插件 {} 的上传包目录", entry.id)))
            }
            DistributionKind::Other => Err(ShellError::unsupported(format!(
                "不支持的分发类型: '{}'",
                distribution.kind
            ))),
        }
    }

    /// 从目录条目安装插件
    ///
    /// 新内容先复制到隐藏的暂存目录并写好元数据，再整体替换旧安装。
    pub async fn install(&self, entry: &CatalogEntry) -> ShellResult<InstalledPluginRecord> {
        let target = self.plugin_dir(&entry.id)?;
        let source = self.resolve_source(entry).await?;

        let manifest = read_manifest(&source).await?;
        if !manifest.has_id() {
            return Err(ShellError::validation("manifest", "清单缺少 id"));
        }
        if manifest.id != entry.id {
            return Err(ShellError::validation(
                "manifest.id",
                format!("清单 id '{}' 与目录条目 '{}' 不一致", manifest.id, entry.id),
            ));
        }

        let _guard = self.lock.lock().await;
        fs::create_dir_all(&self.root).await?;

        let now = Utc::now();
        let installed_at = self
            .read_metadata(&target)
            .await
            .map(|previous| previous.installed_at)
            .unwrap_or(now);

        let staging = staging_path(&target, "staging")?;
        let staged = async {
            let copied = copy_dir_recursive(&source, &staging).await?;
            write_json_atomic(
                &staging.join(INSTALL_METADATA_FILE),
                &InstallMetadata { installed_at, updated_at: now },
            )
            .await?;
            Ok::<u64, ShellError>(copied)
        }
        .await;

        let copied = match staged {
            Ok(copied) => copied,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging).await;
                return Err(e);
            }
        };

        swap_into_place(&staging, &target).await?;
        info!("插件已安装: {} ({} 个文件, 源={})", entry.id, copied, source.display());

        self.read_record(&target, &entry.id).await
    }

    /// 卸载插件
    pub async fn uninstall(&self, id: &str) -> ShellResult<()> {
        let dir = self.plugin_dir(id)?;

        let _guard = self.lock.lock().await;
        if !fs::try_exists(&dir).await? {
            return Err(ShellError::not_installed(id));
        }

        fs::remove_dir_all(&dir).await?;
        info!("插件已卸载: {}", id);
        Ok(())
    }

    /// 用 JSON 补丁更新已安装插件的清单快照
    ///
    /// 补丁不能修改 id，也不能删掉入口文件。
    pub async fn update(&self, id: &str, patch: &Value) -> ShellResult<InstalledPluginRecord> {
        let dir = self.plugin_dir(id)?;
        let patch = patch
            .as_object()
            .ok_or_else(|| ShellError::validation("patch", "更新内容必须是 JSON 对象"))?;

        if let Some(patched_id) = patch.get("id") {
            if patched_id.as_str() != Some(id) {
                return Err(ShellError::validation("id", "不能修改插件 id"));
            }
        }

        let _guard = self.lock.lock().await;
        if !fs::try_exists(&dir).await? {
            return Err(ShellError::not_installed(id));
        }

        let current = read_manifest(&dir).await?;
        let mut merged = match serde_json::to_value(&current)? {
            Value::Object(map) => map,
            _ => return Err(ShellError::internal("清单序列化结果不是对象")),
        };
        for (key, value) in patch {
            if value.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }

        let updated: PluginManifest = serde_json::from_value(Value::Object(merged))?;
        if !current.main.is_empty() && updated.main.is_empty() {
            return Err(ShellError::validation("main", "不能删除入口文件"));
        }

        write_json_atomic(&dir.join(MANIFEST_FILE), &updated).await?;

        let now = Utc::now();
        let installed_at = self.read_metadata(&dir).await.map(|m| m.installed_at).unwrap_or(now);
        write_json_atomic(
            &dir.join(INSTALL_METADATA_FILE),
            &InstallMetadata { installed_at, updated_at: now },
        )
        .await?;

        info!("已安装插件已更新: {}", id);
        self.read_record(&dir, id).await
    }

    async fn read_record(&self, dir: &Path, id: &str) -> ShellResult<InstalledPluginRecord> {
        let manifest = read_manifest(dir).await?;
        if !manifest.has_id() {
            return Err(ShellError::validation("manifest", format!("{} 的清单缺少 id", id)));
        }

        let metadata = self.read_metadata(dir).await;
        Ok(InstalledPluginRecord {
            id: id.to_string(),
            manifest,
            base_url: runtime_base_url(id),
            installed_at: metadata.as_ref().map(|m| m.installed_at),
            updated_at: metadata.as_ref().map(|m| m.updated_at),
        })
    }

    /// 读取旁车元数据；缺失或损坏返回 None
    async fn read_metadata(&self, dir: &Path) -> Option<InstallMetadata> {
        let content = fs::read_to_string(dir.join(INSTALL_METADATA_FILE)).await.ok()?;
        match serde_json::from_str(&content) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("安装元数据损坏 {}: {}", dir.display(), e);
                None
            }
        }
    }
}
