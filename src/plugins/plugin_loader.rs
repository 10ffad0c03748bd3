// 插件运行时加载器
// 注入入口脚本、等待插件注册并解析组件

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::errors::{ShellError, ShellResult};
use crate::plugins::bundles::{ScriptHost, ScriptKind};
use crate::plugins::component::MountedComponent;
use crate::plugins::metadata::{MetadataSource, PluginMetadata};
use crate::plugins::plugin_interface::{Component, PluginModule, DEFAULT_ENTRY};
use crate::plugins::slots::{RegistrationNamespace, SlotAllocator, SlotLease, SlotMode};

/// 加载器配置
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// 等待注册的超时
    pub registration_timeout: Duration,
    /// 轮询间隔
    pub poll_interval: Duration,
    pub slot_mode: SlotMode,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            registration_timeout: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(100),
            slot_mode: SlotMode::PerLoad,
        }
    }
}

impl From<&RuntimeConfig> for LoaderConfig {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            registration_timeout: Duration::from_millis(config.registration_timeout_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            slot_mode: config.slot_mode,
        }
    }
}

/// 加载阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Idle,
    FetchMetadata,
    InjectScript(ScriptKind),
    WaitForRegistration,
    ResolveComponent,
    Ready,
    Error,
}

/// 加载结果
pub enum LoadOutcome<T> {
    Ready(T),
    /// 加载被取消；携带取消前已经注册的模块
    Cancelled(Option<Arc<dyn PluginModule>>),
}

impl<T> fmt::Debug for LoadOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(_) => f.write_str("Ready(..)"),
            Self::Cancelled(module) => write!(f, "Cancelled(registered: {})", module.is_some()),
        }
    }
}

impl<T> LoadOutcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Cancelled(_) => None,
        }
    }
}

/// 已解析的组件
#[derive(Clone)]
pub struct ResolvedComponent {
    pub module: Arc<dyn PluginModule>,
    pub component: Arc<dyn Component>,
}

enum Registration {
    Registered(Arc<dyn PluginModule>),
    TimedOut,
    Cancelled(Option<Arc<dyn PluginModule>>),
}

/// 插件运行时加载器
pub struct RuntimeLoader {
    host: Arc<dyn ScriptHost>,
    metadata: Option<Arc<dyn MetadataSource>>,
    namespace: RegistrationNamespace,
    slots: SlotAllocator,
    config: LoaderConfig,
    /// 缓存破坏参数的序号
    counter: AtomicU64,
    /// 每个加载目标（slug 或地址）最近所处的阶段
    stages: Mutex<HashMap<String, LoadStage>>,
}

impl RuntimeLoader {
    pub fn new(host: Arc<dyn ScriptHost>, namespace: RegistrationNamespace, config: LoaderConfig) -> Self {
        Self {
            host,
            metadata: None,
            namespace,
            slots: SlotAllocator::new(config.slot_mode),
            config,
            counter: AtomicU64::new(0),
            stages: Mutex::new(HashMap::new()),
        }
    }

    /// 设置元数据来源（按 slug 加载时需要）
    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataSource>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn namespace(&self) -> &RegistrationNamespace {
        &self.namespace
    }

    /// 按 slug 加载组件
    pub async fn load_by_slug(
        &self,
        slug: &str,
        entry: &str,
        cancel: &CancellationToken,
    ) -> ShellResult<LoadOutcome<ResolvedComponent>> {
        self.stage(slug, LoadStage::FetchMetadata);
        let metadata = match self.fetch_metadata(slug).await {
            Ok(metadata) => metadata,
            Err(e) => {
                self.stage(slug, LoadStage::Error);
                return Err(e);
            }
        };
        if cancel.is_cancelled() {
            return Ok(LoadOutcome::Cancelled(None));
        }

        let Some(url) = metadata.url else {
            self.stage(slug, LoadStage::Error);
            return Err(ShellError::validation("url", format!("插件 {} 没有配置入口地址", metadata.id)));
        };
        self.load_component(&url, entry, cancel).await
    }

    /// 查询插件元数据：先按 slug，再按 id
    pub async fn fetch_metadata(&self, slug: &str) -> ShellResult<PluginMetadata> {
        let source = self
            .metadata
            .as_ref()
            .ok_or_else(|| ShellError::configuration("运行时加载器未配置元数据来源"))?;

        let by_slug = match source.by_slug(slug).await {
            Ok(found) => found,
            Err(e) => {
                warn!("按 slug 查询插件失败，改用 id: {} ({})", slug, e);
                None
            }
        };
        let metadata = match by_slug {
            Some(metadata) => Some(metadata),
            None => source.by_id(slug).await?,
        };

        metadata.ok_or_else(|| ShellError::not_found(format!("插件: {}", slug)))
    }

    /// 加载脚本并解析组件
    pub async fn load_component(
        &self,
        url: &str,
        entry: &str,
        cancel: &CancellationToken,
    ) -> ShellResult<LoadOutcome<ResolvedComponent>> {
        let module = match self.load_module(url, cancel).await? {
            LoadOutcome::Ready(module) => module,
            LoadOutcome::Cancelled(module) => return Ok(LoadOutcome::Cancelled(module)),
        };

        self.stage(url, LoadStage::ResolveComponent);
        let component = match resolve_component(&module, entry) {
            Ok(component) => component,
            Err(e) => {
                self.stage(url, LoadStage::Error);
                return Err(e);
            }
        };
        if cancel.is_cancelled() {
            return Ok(LoadOutcome::Cancelled(Some(module)));
        }

        self.stage(url, LoadStage::Ready);
        Ok(LoadOutcome::Ready(ResolvedComponent { module, component }))
    }

    /// 注入脚本并等待插件注册
    ///
    /// 先以普通脚本注入；注入失败或超时未注册时，以模块方式重试同一地址。
    pub async fn load_module(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> ShellResult<LoadOutcome<Arc<dyn PluginModule>>> {
        self.stage(url, LoadStage::Idle);

        let lease = tokio::select! {
            lease = self.slots.acquire(&self.namespace) => lease,
            _ = cancel.cancelled() => return Ok(LoadOutcome::Cancelled(None)),
        };

        let mut last_error = None;
        for kind in [ScriptKind::Classic, ScriptKind::Module] {
            self.stage(url, LoadStage::InjectScript(kind));
            let versioned = self.versioned_url(url, lease.key(), lease.nonce());

            let injected = tokio::select! {
                result = self.host.inject(&versioned, kind, &self.namespace) => result,
                _ = cancel.cancelled() => return Ok(LoadOutcome::Cancelled(lease.take())),
            };
            if let Err(e) = injected {
                warn!("插件脚本注入失败 ({}): {} - {}", kind, url, e);
                last_error = Some(e);
                continue;
            }

            self.stage(url, LoadStage::WaitForRegistration);
            match self.wait_for_registration(&lease, cancel).await {
                Registration::Registered(module) => {
                    info!("插件脚本已注册: {} ({})", url, kind);
                    return Ok(LoadOutcome::Ready(module));
                }
                Registration::Cancelled(module) => return Ok(LoadOutcome::Cancelled(module)),
                Registration::TimedOut => {
                    let timeout_ms = self.config.registration_timeout.as_millis() as u64;
                    warn!("插件在 {}ms 内未注册 ({}): {}", timeout_ms, kind, url);
                    last_error = Some(ShellError::timeout_after(
                        format!("插件未在 {}ms 内完成注册: {}", timeout_ms, url),
                        timeout_ms,
                    ));
                }
            }
        }

        self.stage(url, LoadStage::Error);
        Err(last_error.unwrap_or_else(|| ShellError::internal("插件加载失败")))
    }

    async fn wait_for_registration(&self, lease: &SlotLease, cancel: &CancellationToken) -> Registration {
        let deadline = Instant::now() + self.config.registration_timeout;

        loop {
            if let Some(module) = lease.take() {
                return Registration::Registered(module);
            }

            let now = Instant::now();
            if now >= deadline {
                return Registration::TimedOut;
            }

            let pause = self.config.poll_interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = cancel.cancelled() => return Registration::Cancelled(lease.take()),
            }
        }
    }

    /// 附加缓存破坏参数、槽位和加载令牌
    pub fn versioned_url(&self, url: &str, slot: &str, nonce: &str) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        let separator = if url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}v={}-{}&slot={}&nonce={}",
            url,
            separator,
            Utc::now().timestamp_millis(),
            sequence,
            slot,
            nonce
        )
    }

    /// 目标最近一次所处的加载阶段
    pub fn last_stage(&self, target: &str) -> Option<LoadStage> {
        let stages = self.stages.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        stages.get(target).copied()
    }

    fn stage(&self, target: &str, stage: LoadStage) {
        debug!(target: "plugin_loader", "{} -> {:?}", target, stage);
        let mut stages = self.stages.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        stages.insert(target.to_string(), stage);
    }
}

/// 解析组件：显式导出的组件优先，其次包装挂载钩子
///
/// 入口名为空时使用 `DEFAULT_ENTRY`。
pub fn resolve_component(module: &Arc<dyn PluginModule>, entry: &str) -> ShellResult<Arc<dyn Component>> {
    let entry = if entry.trim().is_empty() { DEFAULT_ENTRY } else { entry };
    if let Some(component) = module.component(entry) {
        return Ok(component);
    }

    if let Some(hooks) = module.mount_hooks() {
        return Ok(Arc::new(MountedComponent::new(hooks)));
    }

    Err(ShellError::resolution(format!("插件没有导出组件 '{}' 或挂载函数", entry)))
}
