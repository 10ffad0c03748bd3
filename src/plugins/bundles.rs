// 脚本宿主
// 把插件入口脚本注入宿主环境；进程内实现以 Rust 工厂代替真正的脚本

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use url::Url;

use crate::errors::{ShellError, ShellResult};
use crate::plugins::plugin_interface::PluginModule;
use crate::plugins::slots::{RegistrationNamespace, SHARED_SLOT};

/// 脚本注入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    /// 普通脚本
    Classic,
    /// ES 模块
    Module,
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classic => f.write_str("classic"),
            Self::Module => f.write_str("module"),
        }
    }
}

/// 宿主环境
///
/// `inject` 在脚本加载完成（或加载失败）时返回。脚本可能在返回之后才完成注册，
/// 加载器负责轮询注册槽。
#[async_trait]
pub trait ScriptHost: Send + Sync {
    async fn inject(&self, url: &str, kind: ScriptKind, namespace: &RegistrationNamespace) -> ShellResult<()>;
}

/// 插件工厂
pub type ModuleFactory = Arc<dyn Fn() -> Arc<dyn PluginModule> + Send + Sync>;

/// 进程内插件包
#[derive(Clone)]
pub struct Bundle {
    /// 能够正常执行的注入方式；其余方式加载成功但不会注册
    kinds: Vec<ScriptKind>,
    /// 脚本加载后到完成注册的延迟
    delay: Option<Duration>,
    factory: ModuleFactory,
}

impl Bundle {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Arc<dyn PluginModule> + Send + Sync + 'static,
    {
        Self {
            kinds: vec![ScriptKind::Classic, ScriptKind::Module],
            delay: None,
            factory: Arc::new(factory),
        }
    }

    pub fn with_kinds(mut self, kinds: &[ScriptKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    /// 只能作为模块执行的插件包
    pub fn module_only(self) -> Self {
        self.with_kinds(&[ScriptKind::Module])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn supports(&self, kind: ScriptKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// 进程内脚本宿主
///
/// 插件包按 URL 路径登记，查询参数中的 `slot` 决定发布到哪个槽位，`nonce` 是本次加载的令牌。
#[derive(Default)]
pub struct StaticBundleHost {
    bundles: RwLock<HashMap<String, Bundle>>,
    injections: Mutex<Vec<(String, ScriptKind)>>,
}

impl StaticBundleHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记插件包
    pub async fn register(&self, path: impl Into<String>, bundle: Bundle) {
        self.bundles.write().await.insert(path.into(), bundle);
    }

    pub async fn unregister(&self, path: &str) -> bool {
        self.bundles.write().await.remove(path).is_some()
    }

    /// 注入历史：(完整 URL, 注入方式)
    pub async fn injections(&self) -> Vec<(String, ScriptKind)> {
        self.injections.lock().await.clone()
    }
}

/// 脚本地址中与注册相关的部分
#[derive(Debug, PartialEq, Eq)]
struct ScriptTarget {
    path: String,
    slot: Option<String>,
    nonce: Option<String>,
}

/// 拆出 URL 路径与 `slot`、`nonce` 参数；支持相对地址
fn split_url(url: &str) -> ShellResult<ScriptTarget> {
    let base = Url::parse("http://localhost/")
        .map_err(|e| ShellError::internal(format!("无效的基础地址: {}", e)))?;
    let parsed = base
        .join(url)
        .map_err(|e| ShellError::validation("url", format!("无效的脚本地址 {}: {}", url, e)))?;

    let param = |name: &str| {
        parsed
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    };
    Ok(ScriptTarget {
        path: parsed.path().to_string(),
        slot: param("slot"),
        nonce: param("nonce"),
    })
}

#[async_trait]
impl ScriptHost for StaticBundleHost {
    async fn inject(&self, url: &str, kind: ScriptKind, namespace: &RegistrationNamespace) -> ShellResult<()> {
        self.injections.lock().await.push((url.to_string(), kind));

        let ScriptTarget { path, slot, nonce } = split_url(url)?;
        let bundle = self
            .bundles
            .read()
            .await
            .get(&path)
            .cloned()
            .ok_or_else(|| ShellError::not_found(format!("插件脚本: {}", path)))?;

        if !bundle.supports(kind) {
            // 与浏览器一致：脚本加载成功但执行出错，不会注册
            warn!("插件脚本无法以 {} 方式执行: {}", kind, path);
            return Ok(());
        }

        let slot = slot.unwrap_or_else(|| SHARED_SLOT.to_string());
        let Some(nonce) = nonce else {
            warn!("插件脚本地址缺少加载令牌，注册会被丢弃: {}", path);
            return Ok(());
        };
        let namespace = namespace.clone();
        let factory = bundle.factory.clone();
        match bundle.delay {
            Some(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    namespace.publish(&slot, &nonce, factory());
                });
            }
            None => {
                namespace.publish(&slot, &nonce, factory());
            }
        }

        debug!("插件脚本已执行: {} ({})", path, kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::slots::{SlotAllocator, SlotMode};

    struct Empty;
    impl PluginModule for Empty {}

    fn empty_bundle() -> Bundle {
        Bundle::new(|| Arc::new(Empty) as Arc<dyn PluginModule>)
    }

    #[test]
    fn test_split_url() {
        let target = split_url("/plugins-runtime/demo/main.js?v=1-2&slot=abc&nonce=n1").unwrap();
        assert_eq!(target.path, "/plugins-runtime/demo/main.js");
        assert_eq!(target.slot.as_deref(), Some("abc"));
        assert_eq!(target.nonce.as_deref(), Some("n1"));

        let target = split_url("http://127.0.0.1:8080/plugins-runtime/demo/main.js").unwrap();
        assert_eq!(target.path, "/plugins-runtime/demo/main.js");
        assert!(target.slot.is_none());
        assert!(target.nonce.is_none());
    }

    #[tokio::test]
    async fn test_inject_publishes_to_slot() {
        let host = StaticBundleHost::new();
        host.register("/a.js", empty_bundle()).await;
        let namespace = RegistrationNamespace::new();
        let lease = SlotAllocator::new(SlotMode::PerLoad).acquire(&namespace).await;

        let url = format!("/a.js?slot={}&nonce={}", lease.key(), lease.nonce());
        host.inject(&url, ScriptKind::Classic, &namespace).await.unwrap();
        assert!(lease.peek().is_some());

        assert!(host.inject("/missing.js", ScriptKind::Classic, &namespace).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_inject_without_nonce_does_not_register() {
        let host = StaticBundleHost::new();
        host.register("/a.js", empty_bundle()).await;
        let namespace = RegistrationNamespace::new();
        let lease = SlotAllocator::new(SlotMode::PerLoad).acquire(&namespace).await;

        host.inject(&format!("/a.js?slot={}", lease.key()), ScriptKind::Classic, &namespace)
            .await
            .unwrap();
        assert!(lease.peek().is_none());
        assert!(namespace.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_kind_loads_without_registering() {
        let host = StaticBundleHost::new();
        host.register("/m.js", empty_bundle().module_only()).await;
        let namespace = RegistrationNamespace::new();
        let lease = SlotAllocator::new(SlotMode::PerLoad).acquire(&namespace).await;
        let url = format!("/m.js?slot={}&nonce={}", lease.key(), lease.nonce());

        host.inject(&url, ScriptKind::Classic, &namespace).await.unwrap();
        assert!(namespace.is_empty());

        host.inject(&url, ScriptKind::Module, &namespace).await.unwrap();
        assert!(lease.peek().is_some());
        assert_eq!(host.injections().await.len(), 2);
    }
}
