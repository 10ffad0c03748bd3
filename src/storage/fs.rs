// 文件系统辅助函数
// 原子写入、目录复制与暂存替换

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use plugin_shell_common::{PluginManifest, MANIFEST_FILE};
use regex::Regex;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{ShellError, ShellResult};

/// 插件 id 同时是目录名，不允许路径分隔符和 `..`
static PLUGIN_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("valid plugin id regex"));

/// 校验插件 id
pub fn validate_plugin_id(id: &str) -> ShellResult<()> {
    if id.trim().is_empty() {
        return Err(ShellError::validation("id", "插件 id 不能为空"));
    }
    if !PLUGIN_ID_RE.is_match(id) || id.contains("..") {
        return Err(ShellError::validation("id", format!("无效的插件 id: {}", id)));
    }
    Ok(())
}

/// 读取目录中的插件清单
pub async fn read_manifest(dir: &Path) -> ShellResult<PluginManifest> {
    let path = dir.join(MANIFEST_FILE);
    let content = fs::read_to_string(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ShellError::not_found(format!("插件清单: {}", path.display())),
        _ => ShellError::storage(format!("读取清单失败 {}: {}", path.display(), e)),
    })?;

    serde_json::from_str(&content)
        .map_err(|e| ShellError::validation("manifest", format!("清单解析失败 {}: {}", path.display(), e)))
}

/// 写入 JSON：先写同目录下的临时文件，再重命名到目标位置
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> ShellResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| ShellError::storage(format!("无效的文件路径: {}", path.display())))?;
    fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let content = serde_json::to_vec_pretty(value)
        .map_err(|e| ShellError::internal(format!("序列化失败: {}", e)))?;
    fs::write(&temp_path, content).await?;

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(ShellError::storage(format!("替换文件失败 {}: {}", path.display(), e)));
    }

    Ok(())
}

/// 递归复制目录，跳过符号链接
pub async fn copy_dir_recursive(source: &Path, target: &Path) -> ShellResult<u64> {
    let mut copied = 0u64;
    let mut pending = vec![(source.to_path_buf(), target.to_path_buf())];

    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to).await?;
        let mut entries = fs::read_dir(&from).await?;

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let dest = to.join(entry.file_name());

            if file_type.is_dir() {
                pending.push((entry.path(), dest));
            } else if file_type.is_file() {
                fs::copy(entry.path(), &dest).await?;
                copied += 1;
            } else {
                debug!("跳过非常规文件: {}", entry.path().display());
            }
        }
    }

    Ok(copied)
}

/// 在目标目录旁创建隐藏的暂存目录路径
pub fn staging_path(target: &Path, tag: &str) -> ShellResult<PathBuf> {
    let parent = target
        .parent()
        .ok_or_else(|| ShellError::storage(format!("无效的目录: {}", target.display())))?;
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(parent.join(format!(".{}-{}-{}", tag, name, Uuid::new_v4().simple())))
}

/// 用暂存目录替换目标目录
///
/// 旧目录先移到隐藏的回收路径，再把暂存目录重命名到位。任何时刻目标路径要么是旧内容，
/// 要么是完整的新内容，要么不存在。
pub async fn swap_into_place(staging: &Path, target: &Path) -> ShellResult<()> {
    let trash = if fs::try_exists(target).await? {
        let trash = staging_path(target, "trash")?;
        fs::rename(target, &trash).await?;
        Some(trash)
    } else {
        None
    };

    if let Err(e) = fs::rename(staging, target).await {
        // 放回旧目录
        if let Some(trash) = &trash {
            let _ = fs::rename(trash, target).await;
        }
        return Err(ShellError::storage(format!("替换目录失败 {}: {}", target.display(), e)));
    }

    if let Some(trash) = trash {
        if let Err(e) = fs::remove_dir_all(&trash).await {
            warn!("清理旧目录失败 {}: {}", trash.display(), e);
        }
    }

    Ok(())
}

/// 把路径表示为相对根目录的字符串，无法相对化时返回绝对路径
pub fn relative_to(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// 是否为隐藏条目（暂存、回收或旁车文件）
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}
