// 插件包导入
// 解压上传的归档、定位清单、落地到 packages/<id> 并登记到目录

use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use plugin_shell_common::{CatalogEntry, CatalogStatus, Distribution, PluginManifest, MANIFEST_FILE};
use sha2::{Digest, Sha256};
use tar::Archive;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zip::ZipArchive;

use crate::errors::{ShellError, ShellResult};
use crate::storage::fs::{
    copy_dir_recursive, read_manifest, relative_to, staging_path, swap_into_place, validate_plugin_id,
};
use crate::storage::{CatalogOverrides, CatalogStore, DistributionPatch};

/// 归档格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    /// 根据原始文件名判断格式
    pub fn from_file_name(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// 根据文件头判断格式
    pub fn sniff(path: &Path) -> io::Result<Option<Self>> {
        let mut magic = [0u8; 4];
        let read = File::open(path)?.read(&mut magic)?;
        let kind = match &magic[..read] {
            [b'P', b'K', 0x03, 0x04] => Some(Self::Zip),
            [0x1f, 0x8b, ..] => Some(Self::TarGz),
            _ => None,
        };
        Ok(kind)
    }
}

/// 导入结果
#[derive(Debug, Clone)]
pub struct IngestedPlugin {
    pub manifest: PluginManifest,
    pub entry: CatalogEntry,
    pub package_dir: PathBuf,
}

/// 临时资源守卫：离开作用域时删除解压目录和上传的归档
struct ScratchGuard {
    paths: Vec<PathBuf>,
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            let result = if path.is_dir() {
                std::fs::remove_dir_all(path)
            } else {
                std::fs::remove_file(path)
            };
            if let Err(e) = result {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("清理临时文件失败 {}: {}", path.display(), e);
                }
            }
        }
    }
}

/// 解压后总大小的默认上限
pub const DEFAULT_EXTRACT_LIMIT: u64 = 200 * 1024 * 1024;

/// 解压上限相对上传上限的倍数
pub const EXTRACT_RATIO: u64 = 10;

/// 插件包导入器
pub struct ArchiveIngestor {
    catalog: Arc<CatalogStore>,
    app_root: PathBuf,
    packages_dir: PathBuf,
    uploads_dir: PathBuf,
    /// 解压写出的总字节数上限
    extract_limit: u64,
}

impl ArchiveIngestor {
    pub fn new(
        catalog: Arc<CatalogStore>,
        app_root: PathBuf,
        packages_dir: PathBuf,
        uploads_dir: PathBuf,
    ) -> Self {
        Self {
            catalog,
            app_root,
            packages_dir,
            uploads_dir,
            extract_limit: DEFAULT_EXTRACT_LIMIT,
        }
    }

    pub fn with_extract_limit(mut self, limit: u64) -> Self {
        self.extract_limit = limit;
        self
    }

    pub fn extract_limit(&self) -> u64 {
        self.extract_limit
    }

    /// 导入上传的插件包
    ///
    /// 无论成功与否，解压目录和上传文件都会被删除。导入只登记目录条目，不会安装插件。
    pub async fn ingest(&self, archive_path: &Path, original_name: &str) -> ShellResult<IngestedPlugin> {
        let scratch = self.uploads_dir.join(format!("extract-{}", Uuid::new_v4().simple()));
        let _guard = ScratchGuard {
            paths: vec![scratch.clone(), archive_path.to_path_buf()],
        };

        fs::create_dir_all(&scratch).await?;
        debug!("解压插件包: {} -> {}", original_name, scratch.display());

        let checksum = {
            let archive = archive_path.to_path_buf();
            let dest = scratch.clone();
            let name = original_name.to_string();
            let limit = self.extract_limit;
            tokio::task::spawn_blocking(move || extract_archive(&archive, &name, &dest, limit)).await??
        };

        let manifest_dir = find_manifest_dir(&scratch)
            .await?
            .ok_or_else(|| ShellError::invalid_archive_with_name("插件包中未找到 manifest.json", original_name))?;

        let manifest = read_manifest(&manifest_dir).await?;
        if !manifest.has_id() {
            return Err(ShellError::invalid_archive_with_name("清单缺少 id", original_name));
        }
        validate_plugin_id(&manifest.id)?;

        let package_dir = self.store_package(&manifest.id, &manifest_dir).await?;

        let overrides = CatalogOverrides {
            status: Some(CatalogStatus::Submitted),
            source: Some("upload".to_string()),
            original_name: Some(original_name.to_string()),
            checksum: Some(checksum),
            distribution: Some(DistributionPatch::from(Distribution::uploaded_directory(
                relative_to(&package_dir, &self.app_root),
            ))),
            ..CatalogOverrides::display_from(&manifest)
        };
        let entry = self.catalog.upsert(&manifest, overrides).await?;

        info!("插件包已登记: {} v{} (来自 {})", manifest.id, manifest.version, original_name);
        Ok(IngestedPlugin {
            manifest,
            entry,
            package_dir,
        })
    }

    /// 只复制清单所在目录到 packages/<id>，替换旧包
    async fn store_package(&self, id: &str, manifest_dir: &Path) -> ShellResult<PathBuf> {
        fs::create_dir_all(&self.packages_dir).await?;
        let target = self.packages_dir.join(id);
        let staging = staging_path(&target, "staging")?;

        if let Err(e) = copy_dir_recursive(manifest_dir, &staging).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e);
        }
        swap_into_place(&staging, &target).await?;

        Ok(target)
    }
}

/// 深度优先查找清单：当前目录优先，其次按名称顺序进入子目录
pub async fn find_manifest_dir(root: &Path) -> ShellResult<Option<PathBuf>> {
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        if fs::try_exists(dir.join(MANIFEST_FILE)).await? {
            return Ok(Some(dir));
        }

        let mut children = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                children.push(entry.path());
            }
        }
        children.sort();
        stack.extend(children.into_iter().rev());
    }

    Ok(None)
}

/// 解压预算：累计写出的字节数不得超过上限
struct ExtractBudget {
    remaining: u64,
    limit: u64,
}

impl ExtractBudget {
    fn new(limit: u64) -> Self {
        Self { remaining: limit, limit }
    }

    /// 写出单个条目；多读一个字节用来判断是否超限
    fn copy<R: Read>(&mut self, reader: &mut R, out: &Path) -> ShellResult<()> {
        let mut file = File::create(out)?;
        let written = io::copy(&mut reader.take(self.remaining.saturating_add(1)), &mut file)?;
        if written > self.remaining {
            warn!("插件包解压后超过 {} 字节，停止解压", self.limit);
            return Err(ShellError::payload_too_large(self.limit));
        }
        self.remaining -= written;
        Ok(())
    }
}

/// 解压归档并返回其 sha256
fn extract_archive(archive: &Path, original_name: &str, dest: &Path, limit: u64) -> ShellResult<String> {
    let kind = match ArchiveKind::from_file_name(original_name) {
        Some(kind) => Some(kind),
        None => ArchiveKind::sniff(archive)?,
    }
    .ok_or_else(|| ShellError::invalid_archive_with_name("不支持的插件包格式", original_name))?;

    let mut budget = ExtractBudget::new(limit);
    let extracted = match kind {
        ArchiveKind::Zip => extract_zip(archive, dest, &mut budget),
        ArchiveKind::Tar => extract_tar(File::open(archive)?, dest, &mut budget),
        ArchiveKind::TarGz => extract_tar(GzDecoder::new(File::open(archive)?), dest, &mut budget),
    };
    extracted.map_err(|e| match e {
        ShellError::InvalidArchive { .. } | ShellError::PayloadTooLarge { .. } => e,
        other => ShellError::invalid_archive_with_name(format!("解压失败: {}", other), original_name),
    })?;

    let mut hasher = Sha256::new();
    io::copy(&mut File::open(archive)?, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn extract_zip(archive: &Path, dest: &Path, budget: &mut ExtractBudget) -> ShellResult<()> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let raw = entry.name().replace('\\', "/");
        let Some(relative) = sanitize_entry_path(Path::new(&raw))? else {
            continue;
        };
        let out = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        // S_IFLNK
        if entry.unix_mode().is_some_and(|mode| mode & 0o170000 == 0o120000) {
            debug!("跳过符号链接: {}", raw);
            continue;
        }

        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        budget.copy(&mut entry, &out)?;
    }

    Ok(())
}

fn extract_tar<R: Read>(reader: R, dest: &Path, budget: &mut ExtractBudget) -> ShellResult<()> {
    let mut archive = Archive::new(reader);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw = entry.path()?.to_path_buf();
        let Some(relative) = sanitize_entry_path(&raw)? else {
            continue;
        };
        let out = dest.join(relative);
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            std::fs::create_dir_all(&out)?;
        } else if entry_type.is_file() {
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)?;
            }
            budget.copy(&mut entry, &out)?;
        } else {
            debug!("跳过非常规条目: {}", raw.display());
        }
    }

    Ok(())
}

/// 规范化归档内路径；绝对路径或 `..` 视为恶意条目
fn sanitize_entry_path(path: &Path) -> ShellResult<Option<PathBuf>> {
    let mut clean = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ShellError::invalid_archive(format!(
                    "归档条目越出解压目录: {}",
                    path.display()
                )));
            }
        }
    }

    Ok(if clean.as_os_str().is_empty() { None } else { Some(clean) })
}
