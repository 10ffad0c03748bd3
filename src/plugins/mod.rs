// 插件运行时模块
// 动态加载、组件解析、生命周期与标签页管理

pub mod plugin_interface;
pub mod slots;
pub mod bundles;
pub mod metadata;
pub mod plugin_loader;
pub mod component;
pub mod lifecycle;
pub mod plugin_registry;
pub mod plugin_manager;

pub use plugin_interface::*;
pub use bundles::{Bundle, ScriptHost, ScriptKind, StaticBundleHost};
pub use metadata::{InstalledPluginSource, MetadataSource, PluginMetadata, RegistryClient};
pub use plugin_loader::{LoadOutcome, LoaderConfig, ResolvedComponent, RuntimeLoader};
pub use component::{MountedComponent, PluginView, ViewState};
pub use lifecycle::PluginLifecycle;
pub use plugin_registry::{RegisteredTab, TabRegistry};
pub use plugin_manager::{PluginManager, PluginSummary, RefreshReport};
pub use slots::{RegistrationNamespace, SlotMode};
