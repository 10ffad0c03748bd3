// 插件接口定义
// 运行时插件模块、组件、挂载钩子与激活上下文

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use plugin_shell_common::{PluginManifest, TabDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ShellResult;

/// 组件属性
///
/// 属性以引用身份比较：同一个 `Arc` 视为未变化。
pub type Props = Arc<Value>;

/// 默认的组件入口名
pub const DEFAULT_ENTRY: &str = "default";

/// 运行时插件状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    /// 已加载，未激活
    Loaded,
    /// 已激活
    Active,
    /// 加载或激活失败
    Error,
    /// 已禁用
    Disabled,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loaded => "loaded",
            Self::Active => "active",
            Self::Error => "error",
            Self::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// 宿主提供的渲染容器
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Container {
    id: String,
}

impl Container {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 在当前容器下创建子容器
    pub fn child(&self, name: &str) -> Self {
        Self {
            id: format!("{}/{}", self.id, name),
        }
    }
}

/// 可渲染组件
#[async_trait]
pub trait Component: Send + Sync {
    /// 挂载到容器
    async fn attach(&self, container: &Container, props: Props) -> ShellResult<()>;

    /// 属性变化
    async fn update(&self, _props: Props) -> ShellResult<()> {
        Ok(())
    }

    /// 从容器移除
    async fn detach(&self) -> ShellResult<()> {
        Ok(())
    }
}

/// 插件导出的挂载钩子
#[async_trait]
pub trait MountHooks: Send + Sync {
    async fn mount(&self, element: &Container, props: Props) -> ShellResult<()>;

    async fn unmount(&self, element: &Container) -> ShellResult<()>;
}

/// 插件脚本注册到注册槽中的对象
#[async_trait]
pub trait PluginModule: Send + Sync {
    /// 按入口名导出的组件
    fn component(&self, _name: &str) -> Option<Arc<dyn Component>> {
        None
    }

    /// 挂载钩子
    fn mount_hooks(&self) -> Option<Arc<dyn MountHooks>> {
        None
    }

    /// 激活；插件可以通过上下文注册标签页
    async fn activate(&self, _context: PluginContext) -> ShellResult<()> {
        Ok(())
    }

    async fn deactivate(&self) -> ShellResult<()> {
        Ok(())
    }
}

/// 标签页注册入口
#[async_trait]
pub trait TabRegistrar: Send + Sync {
    /// 注册标签页，返回完整的标签页 id
    async fn register_tab(
        &self,
        plugin_id: &str,
        definition: TabDefinition,
        component: Option<Arc<dyn Component>>,
    ) -> ShellResult<String>;
}

/// 插件激活上下文
#[derive(Clone)]
pub struct PluginContext {
    pub plugin_id: String,
    pub manifest: PluginManifest,
    pub base_url: String,
    registrar: Arc<dyn TabRegistrar>,
}

impl PluginContext {
    pub fn new(
        manifest: PluginManifest,
        base_url: impl Into<String>,
        registrar: Arc<dyn TabRegistrar>,
    ) -> Self {
        Self {
            plugin_id: manifest.id.clone(),
            manifest,
            base_url: base_url.into(),
            registrar,
        }
    }

    /// 注册标签页
    pub async fn register_tab(
        &self,
        definition: TabDefinition,
        component: Option<Arc<dyn Component>>,
    ) -> ShellResult<String> {
        self.registrar.register_tab(&self.plugin_id, definition, component).await
    }

    /// 插件内资源的访问地址
    pub fn asset_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_id", &self.plugin_id)
            .field("base_url", &self.base_url)
            .finish()
    }
}
