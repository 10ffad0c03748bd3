// 插件组件
// 挂载钩子包装组件，以及在宿主中渲染插件的视图

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::ShellResult;
use crate::plugins::plugin_interface::{Component, Container, MountHooks, Props};
use crate::plugins::plugin_loader::{LoadOutcome, RuntimeLoader};

/// 挂载元素的名称
const MOUNT_ELEMENT: &str = "plugin-root";

struct Mounted {
    element: Container,
    props: Props,
}

/// 把 `mount`/`unmount` 钩子包装为组件
///
/// 挂载到容器下自有的子元素；属性身份变化时先卸载再重新挂载。
pub struct MountedComponent {
    hooks: Arc<dyn MountHooks>,
    state: Mutex<Option<Mounted>>,
}

impl MountedComponent {
    pub fn new(hooks: Arc<dyn MountHooks>) -> Self {
        Self {
            hooks,
            state: Mutex::new(None),
        }
    }

    pub async fn is_mounted(&self) -> bool {
        self.state.lock().await.is_some()
    }
}

#[async_trait]
impl Component for MountedComponent {
    async fn attach(&self, container: &Container, props: Props) -> ShellResult<()> {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.take() {
            self.hooks.unmount(&previous.element).await?;
        }

        let element = container.child(MOUNT_ELEMENT);
        self.hooks.mount(&element, props.clone()).await?;
        *state = Some(Mounted { element, props });
        Ok(())
    }

    async fn update(&self, props: Props) -> ShellResult<()> {
        let mut state = self.state.lock().await;
        let Some(mounted) = state.as_mut() else {
            return Ok(());
        };
        if Arc::ptr_eq(&mounted.props, &props) {
            return Ok(());
        }

        self.hooks.unmount(&mounted.element).await?;
        self.hooks.mount(&mounted.element, props.clone()).await?;
        mounted.props = props;
        Ok(())
    }

    async fn detach(&self) -> ShellResult<()> {
        // 取出状态后再卸载，重复调用不会再次卸载
        let mounted = self.state.lock().await.take();
        match mounted {
            Some(mounted) => self.hooks.unmount(&mounted.element).await,
            None => Ok(()),
        }
    }
}

/// 插件视图状态
#[derive(Clone)]
pub enum ViewState {
    Loading,
    Ready(Arc<dyn Component>),
    Failed(String),
}

impl ViewState {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed(message) => Some(message),
            _ => None,
        }
    }
}

impl fmt::Debug for ViewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => f.write_str("Loading"),
            Self::Ready(_) => f.write_str("Ready"),
            Self::Failed(message) => f.debug_tuple("Failed").field(message).finish(),
        }
    }
}

/// 在宿主容器中渲染一个插件
///
/// 创建后立即在后台加载；`detach` 取消加载并卸载组件，之后不会再发布任何状态。
pub struct PluginView {
    state: watch::Receiver<ViewState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    mounted: Arc<Mutex<Option<Arc<dyn Component>>>>,
}

impl PluginView {
    pub fn spawn(
        loader: Arc<RuntimeLoader>,
        slug: impl Into<String>,
        entry: impl Into<String>,
        container: Container,
        props: Props,
    ) -> Self {
        let slug = slug.into();
        let entry = entry.into();
        let (sender, state) = watch::channel(ViewState::Loading);
        let cancel = CancellationToken::new();
        let mounted: Arc<Mutex<Option<Arc<dyn Component>>>> = Arc::new(Mutex::new(None));

        let task = {
            let cancel = cancel.clone();
            let mounted = mounted.clone();
            tokio::spawn(async move {
                let next = match loader.load_by_slug(&slug, &entry, &cancel).await {
                    Ok(LoadOutcome::Ready(resolved)) => {
                        if cancel.is_cancelled() {
                            return;
                        }
                        match resolved.component.attach(&container, props).await {
                            Ok(()) => {
                                *mounted.lock().await = Some(resolved.component.clone());
                                ViewState::Ready(resolved.component)
                            }
                            Err(e) => ViewState::Failed(e.to_string()),
                        }
                    }
                    Ok(LoadOutcome::Cancelled(module)) => {
                        // 取消前模块已注册：尽力卸载
                        if let Some(hooks) = module.and_then(|module| module.mount_hooks()) {
                            if let Err(e) = hooks.unmount(&container.child(MOUNT_ELEMENT)).await {
                                debug!("取消后卸载插件失败 {}: {}", slug, e);
                            }
                        }
                        return;
                    }
                    Err(e) => {
                        warn!("插件视图加载失败 {}: {}", slug, e);
                        ViewState::Failed(e.to_string())
                    }
                };

                if !cancel.is_cancelled() {
                    let _ = sender.send(next);
                }
            })
        };

        Self {
            state,
            cancel,
            task: Mutex::new(Some(task)),
            mounted,
        }
    }

    pub fn state(&self) -> ViewState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.clone()
    }

    /// 等待加载结束（就绪或失败）
    pub async fn settled(&self) -> ViewState {
        let mut receiver = self.state.clone();
        loop {
            let current = receiver.borrow_and_update().clone();
            if !current.is_loading() {
                return current;
            }
            if receiver.changed().await.is_err() {
                return receiver.borrow().clone();
            }
        }
    }

    /// 属性变化时通知组件
    pub async fn update_props(&self, props: Props) -> ShellResult<()> {
        let component = self.mounted.lock().await.clone();
        match component {
            Some(component) => component.update(props).await,
            None => Ok(()),
        }
    }

    /// 卸载视图
    pub async fn detach(&self) {
        self.cancel.cancel();

        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("插件视图任务异常结束: {}", e);
            }
        }

        let component = self.mounted.lock().await.take();
        if let Some(component) = component {
            if let Err(e) = component.detach().await {
                debug!("卸载插件组件失败: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ShellError;
    use crate::plugins::bundles::{Bundle, StaticBundleHost};
    use crate::plugins::metadata::{MetadataSource, PluginMetadata};
    use crate::plugins::plugin_interface::{PluginModule, DEFAULT_ENTRY};
    use crate::plugins::plugin_loader::LoaderConfig;
    use crate::plugins::slots::{RegistrationNamespace, SlotMode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingHooks {
        mounts: AtomicUsize,
        unmounts: AtomicUsize,
    }

    #[async_trait]
    impl MountHooks for CountingHooks {
        async fn mount(&self, element: &Container, _props: Props) -> ShellResult<()> {
            assert!(element.id().ends_with("/plugin-root"));
            self.mounts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn unmount(&self, _element: &Container) -> ShellResult<()> {
            self.unmounts.fetch_add(1, Ordering::SeqCst);
            Err(ShellError::internal("unmount 失败也应被忽略"))
        }
    }

    struct HookModule(Arc<CountingHooks>);

    impl PluginModule for HookModule {
        fn mount_hooks(&self) -> Option<Arc<dyn MountHooks>> {
            Some(self.0.clone())
        }
    }

    struct FixedMetadata;

    #[async_trait]
    impl MetadataSource for FixedMetadata {
        async fn by_slug(&self, slug: &str) -> ShellResult<Option<PluginMetadata>> {
            Ok((slug == "weather").then(|| PluginMetadata {
                id: "weather-insights".to_string(),
                slug: "weather".to_string(),
                name: "Weather Insights".to_string(),
                version: "1.0.0".to_string(),
                url: Some("/plugins-runtime/weather-insights/main.js".to_string()),
            }))
        }

        async fn by_id(&self, id: &str) -> ShellResult<Option<PluginMetadata>> {
            Ok((id == "no-url").then(|| PluginMetadata {
                id: "no-url".to_string(),
                slug: "no-url".to_string(),
                name: "No URL".to_string(),
                version: "0.1.0".to_string(),
                url: None,
            }))
        }
    }

    async fn loader_with(hooks: Arc<CountingHooks>, delay: Duration) -> Arc<RuntimeLoader> {
        let host = Arc::new(StaticBundleHost::new());
        host.register(
            "/plugins-runtime/weather-insights/main.js",
            Bundle::new(move || Arc::new(HookModule(hooks.clone())) as Arc<dyn PluginModule>).with_delay(delay),
        )
        .await;
        let config = LoaderConfig {
            registration_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
            slot_mode: SlotMode::PerLoad,
        };
        Arc::new(RuntimeLoader::new(host, RegistrationNamespace::new(), config).with_metadata(Arc::new(FixedMetadata)))
    }

    #[tokio::test]
    async fn test_mounted_component_remounts_on_new_props() {
        let hooks = Arc::new(CountingHooks::default());
        let component = MountedComponent::new(hooks.clone());
        let props: Props = Arc::new(serde_json::json!({"city": "上海"}));

        component.attach(&Container::new("tab"), props.clone()).await.unwrap();
        component.update(props.clone()).await.unwrap();
        assert_eq!(hooks.mounts.load(Ordering::SeqCst), 1);

        // 卸载失败会被上报
        let err = component.update(Arc::new(serde_json::json!({"city": "北京"}))).await;
        assert!(err.is_err());
        assert_eq!(hooks.unmounts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_view_becomes_ready_and_detaches_once() {
        let hooks = Arc::new(CountingHooks::default());
        let loader = loader_with(hooks.clone(), Duration::ZERO).await;

        let view = PluginView::spawn(loader, "weather", DEFAULT_ENTRY, Container::new("tab"), Arc::new(serde_json::json!({})));
        assert!(view.settled().await.is_ready());
        assert_eq!(hooks.mounts.load(Ordering::SeqCst), 1);

        view.detach().await;
        view.detach().await;
        assert_eq!(hooks.unmounts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_detach_while_waiting_publishes_nothing() {
        let hooks = Arc::new(CountingHooks::default());
        let loader = loader_with(hooks.clone(), Duration::from_millis(200)).await;

        let view = PluginView::spawn(loader, "weather", DEFAULT_ENTRY, Container::new("tab"), Arc::new(serde_json::json!({})));
        tokio::time::sleep(Duration::from_millis(30)).await;
        view.detach().await;

        // 等到插件脚本本来会注册之后
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(view.state().is_loading());
        assert_eq!(hooks.mounts.load(Ordering::SeqCst), 0);
        assert!(hooks.unmounts.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn test_view_failures() {
        let hooks = Arc::new(CountingHooks::default());
        let loader = loader_with(hooks, Duration::ZERO).await;

        let missing = PluginView::spawn(loader.clone(), "ghost", DEFAULT_ENTRY, Container::new("a"), Arc::new(serde_json::json!({})));
        let state = missing.settled().await;
        assert!(state.error().is_some_and(|message| message.contains("ghost")));

        let no_url = PluginView::spawn(loader, "no-url", DEFAULT_ENTRY, Container::new("b"), Arc::new(serde_json::json!({})));
        assert_eq!(no_url.settled().await.error().map(|m| m.contains("入口地址")), Some(true));
    }
}
