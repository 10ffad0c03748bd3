// 插件管理器
// 把已安装插件加载到运行时、激活并注册标签页；单个插件失败不影响其他插件

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use plugin_shell_common::{InstalledPluginRecord, PluginManifest};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RuntimeConfig;
use crate::errors::{ShellError, ShellResult};
use crate::plugins::bundles::ScriptHost;
use crate::plugins::lifecycle::{PluginLifecycle, StatusTransition};
use crate::plugins::metadata::{InstalledPluginSource, RegistryClient};
use crate::plugins::plugin_interface::{PluginContext, PluginModule, PluginStatus, TabRegistrar};
use crate::plugins::plugin_loader::{LoadOutcome, LoaderConfig, RuntimeLoader};
use crate::plugins::plugin_registry::{tab_key, TabRegistry};
use crate::plugins::slots::RegistrationNamespace;

/// 访问注册中心 HTTP 接口的超时
const REGISTRY_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// 运行时中的插件
pub struct LoadedPlugin {
    pub manifest: PluginManifest,
    /// 加载失败时为空
    pub instance: Option<Arc<dyn PluginModule>>,
    pub lifecycle: PluginLifecycle,
    /// 已注册的标签页 id
    pub tabs: Vec<String>,
    pub base_url: String,
    /// 最近一次错误
    pub error: Option<String>,
}

impl LoadedPlugin {
    pub fn status(&self) -> PluginStatus {
        self.lifecycle.status()
    }
}

/// 插件概要
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub status: PluginStatus,
    pub tabs: Vec<String>,
    pub base_url: String,
    pub error: Option<String>,
    pub history: Vec<StatusTransition>,
}

impl From<&LoadedPlugin> for PluginSummary {
    fn from(plugin: &LoadedPlugin) -> Self {
        Self {
            id: plugin.manifest.id.clone(),
            name: plugin.manifest.display_name().to_string(),
            version: plugin.manifest.version.clone(),
            status: plugin.status(),
            tabs: plugin.tabs.clone(),
            base_url: plugin.base_url.clone(),
            error: plugin.error.clone(),
            history: plugin.lifecycle.history().to_vec(),
        }
    }
}

/// 同步结果
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RefreshReport {
    pub loaded: Vec<String>,
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

/// 插件管理器
pub struct PluginManager {
    source: Arc<dyn InstalledPluginSource>,
    loader: Arc<RuntimeLoader>,
    tabs: Arc<TabRegistry>,
    plugins: RwLock<HashMap<String, LoadedPlugin>>,
    /// 同步与重新加载串行执行
    refresh_lock: Mutex<()>,
    /// 关闭时取消进行中的加载
    shutdown: CancellationToken,
}

impl PluginManager {
    pub fn new(source: Arc<dyn InstalledPluginSource>, loader: Arc<RuntimeLoader>, tabs: Arc<TabRegistry>) -> Self {
        Self {
            source,
            loader,
            tabs,
            plugins: RwLock::new(HashMap::new()),
            refresh_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    /// 按运行时配置组装：注册中心客户端同时作为已安装列表和元数据来源
    pub fn from_config(config: &RuntimeConfig, host: Arc<dyn ScriptHost>) -> ShellResult<Self> {
        let client = Arc::new(RegistryClient::new(&config.registry_url, REGISTRY_HTTP_TIMEOUT)?);
        let loader = RuntimeLoader::new(host, RegistrationNamespace::new(), LoaderConfig::from(config))
            .with_metadata(client.clone());

        info!(
            "插件管理器使用注册中心 {} (注册超时 {}ms, 槽位模式 {:?})",
            config.registry_url, config.registration_timeout_ms, config.slot_mode
        );
        Ok(Self::new(client, Arc::new(loader), Arc::new(TabRegistry::new())))
    }

    pub fn loader(&self) -> Arc<RuntimeLoader> {
        self.loader.clone()
    }

    pub fn tabs(&self) -> Arc<TabRegistry> {
        self.tabs.clone()
    }

    /// 首次加载全部已安装插件
    pub async fn initialize(&self) -> ShellResult<RefreshReport> {
        info!("初始化插件管理器");
        self.refresh_installed_plugins().await
    }

    /// 与已安装列表同步：加载新插件，卸载已移除的插件
    pub async fn refresh_installed_plugins(&self) -> ShellResult<RefreshReport> {
        let _guard = self.refresh_lock.lock().await;
        let records = self.source.installed_plugins().await?;
        let mut report = RefreshReport::default();

        let installed: HashSet<&str> = records.iter().map(|record| record.id.as_str()).collect();
        let known: Vec<String> = self.plugins.read().await.keys().cloned().collect();

        for id in known.iter().filter(|id| !installed.contains(id.as_str())) {
            self.unload_plugin(id).await;
            report.removed.push(id.clone());
        }

        for record in records.iter().filter(|record| !known.contains(&record.id)) {
            match self.load_and_activate(record).await {
                Ok(()) => report.loaded.push(record.id.clone()),
                Err(e) => {
                    warn!("插件加载失败，继续处理其他插件: {} - {}", record.id, e);
                    report.failed.push(record.id.clone());
                }
            }
        }

        info!(
            "插件同步完成: 加载 {} 个, 移除 {} 个, 失败 {} 个",
            report.loaded.len(),
            report.removed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// 重新加载插件：停用、卸载、加载、激活
    pub async fn reload_plugin(&self, plugin_id: &str) -> ShellResult<()> {
        let _guard = self.refresh_lock.lock().await;
        info!("重新加载插件: {}", plugin_id);

        let record = self.installed_record(plugin_id).await?;
        self.unload_plugin(plugin_id).await;
        self.load_and_activate(&record).await
    }

    /// 激活已加载的插件并注册标签页
    pub async fn activate_plugin(&self, plugin_id: &str) -> ShellResult<()> {
        let (instance, manifest, base_url) = {
            let plugins = self.plugins.read().await;
            let plugin = plugins
                .get(plugin_id)
                .ok_or_else(|| ShellError::not_found(format!("运行时插件: {}", plugin_id)))?;
            if !PluginLifecycle::can_transition(plugin.status(), PluginStatus::Active) {
                return Err(ShellError::plugin(
                    plugin_id,
                    format!("当前状态 {} 不能激活", plugin.status()),
                ));
            }
            let instance = plugin
                .instance
                .clone()
                .ok_or_else(|| ShellError::plugin(plugin_id, "插件未加载"))?;
            (instance, plugin.manifest.clone(), plugin.base_url.clone())
        };

        let registrar: Arc<dyn TabRegistrar> = self.tabs.clone();
        let context = PluginContext::new(manifest.clone(), base_url, registrar);
        if let Err(e) = instance.activate(context).await {
            return Err(self.fail(plugin_id, e).await);
        }

        // 插件没有自行注册的清单标签页由管理器补注册
        for definition in &manifest.tabs {
            if self.tabs.contains(&tab_key(plugin_id, &definition.id)).await {
                continue;
            }
            let component = instance.component(&definition.component);
            if component.is_none() {
                warn!("插件 {} 没有导出组件 {}", plugin_id, definition.component);
            }
            if let Err(e) = self.tabs.register_tab(plugin_id, definition.clone(), component).await {
                return Err(self.fail(plugin_id, e).await);
            }
        }

        let tab_ids = self.tabs.plugin_tabs(plugin_id).await;
        let mut plugins = self.plugins.write().await;
        let plugin = plugins
            .get_mut(plugin_id)
            .ok_or_else(|| ShellError::not_found(format!("运行时插件: {}", plugin_id)))?;
        plugin.lifecycle.transition(PluginStatus::Active, "激活成功")?;
        plugin.tabs = tab_ids;
        plugin.error = None;

        info!("插件已激活: {} ({} 个标签页)", plugin_id, plugin.tabs.len());
        Ok(())
    }

    /// 停用插件，注销标签页
    pub async fn deactivate_plugin(&self, plugin_id: &str) -> ShellResult<()> {
        let instance = {
            let plugins = self.plugins.read().await;
            let plugin = plugins
                .get(plugin_id)
                .ok_or_else(|| ShellError::not_found(format!("运行时插件: {}", plugin_id)))?;
            if plugin.status() != PluginStatus::Active {
                return Err(ShellError::plugin(plugin_id, format!("插件未激活 ({})", plugin.status())));
            }
            plugin.instance.clone()
        };

        self.tabs.unregister_plugin_tabs(plugin_id).await;
        if let Some(instance) = instance {
            if let Err(e) = instance.deactivate().await {
                return Err(self.fail(plugin_id, e).await);
            }
        }

        let mut plugins = self.plugins.write().await;
        if let Some(plugin) = plugins.get_mut(plugin_id) {
            plugin.lifecycle.transition(PluginStatus::Loaded, "已停用")?;
            plugin.tabs.clear();
        }
        info!("插件已停用: {}", plugin_id);
        Ok(())
    }

    /// 禁用插件
    pub async fn disable_plugin(&self, plugin_id: &str) -> ShellResult<()> {
        if self.status(plugin_id).await == Some(PluginStatus::Active) {
            if let Err(e) = self.deactivate_plugin(plugin_id).await {
                warn!("禁用前停用插件失败: {} - {}", plugin_id, e);
            }
        }

        let mut plugins = self.plugins.write().await;
        let plugin = plugins
            .get_mut(plugin_id)
            .ok_or_else(|| ShellError::not_found(format!("运行时插件: {}", plugin_id)))?;
        plugin.lifecycle.transition(PluginStatus::Disabled, "已禁用")?;
        info!("插件已禁用: {}", plugin_id);
        Ok(())
    }

    /// 启用被禁用的插件
    pub async fn enable_plugin(&self, plugin_id: &str) -> ShellResult<()> {
        let loaded = {
            let mut plugins = self.plugins.write().await;
            let plugin = plugins
                .get_mut(plugin_id)
                .ok_or_else(|| ShellError::not_found(format!("运行时插件: {}", plugin_id)))?;
            if plugin.status() != PluginStatus::Disabled {
                return Err(ShellError::plugin(plugin_id, "插件未被禁用"));
            }
            plugin.lifecycle.transition(PluginStatus::Loaded, "已启用")?;
            plugin.instance.is_some()
        };

        if loaded {
            self.activate_plugin(plugin_id).await
        } else {
            self.reload_plugin(plugin_id).await
        }
    }

    pub async fn status(&self, plugin_id: &str) -> Option<PluginStatus> {
        self.plugins.read().await.get(plugin_id).map(LoadedPlugin::status)
    }

    pub async fn get_plugin(&self, plugin_id: &str) -> Option<PluginSummary> {
        self.plugins.read().await.get(plugin_id).map(PluginSummary::from)
    }

    pub async fn list_plugins(&self) -> Vec<PluginSummary> {
        let mut summaries: Vec<PluginSummary> = self.plugins.read().await.values().map(PluginSummary::from).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// 取消进行中的加载，停用全部插件
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let ids: Vec<String> = self.plugins.read().await.keys().cloned().collect();
        for id in ids {
            self.unload_plugin(&id).await;
        }
    }

    async fn installed_record(&self, plugin_id: &str) -> ShellResult<InstalledPluginRecord> {
        self.source
            .installed_plugins()
            .await?
            .into_iter()
            .find(|record| record.id == plugin_id)
            .ok_or_else(|| ShellError::not_installed(plugin_id))
    }

    async fn load_and_activate(&self, record: &InstalledPluginRecord) -> ShellResult<()> {
        let mut plugin = LoadedPlugin {
            manifest: record.manifest.clone(),
            instance: None,
            lifecycle: PluginLifecycle::new(&record.id),
            tabs: Vec::new(),
            base_url: record.base_url.clone(),
            error: None,
        };

        let loaded = match record.entry_url() {
            Some(url) => self.loader.load_module(&url, &self.shutdown).await,
            None => Err(ShellError::validation("main", format!("插件 {} 没有入口文件", record.id))),
        };

        match loaded {
            Ok(LoadOutcome::Ready(instance)) => plugin.instance = Some(instance),
            Ok(LoadOutcome::Cancelled(_)) => {
                return Err(ShellError::plugin(&record.id, "加载已取消"));
            }
            Err(e) => {
                error!("插件加载失败: {} - {}", record.id, e);
                plugin.lifecycle.transition(PluginStatus::Error, &e.to_string())?;
                plugin.error = Some(e.to_string());
                self.plugins.write().await.insert(record.id.clone(), plugin);
                return Err(e);
            }
        }

        self.plugins.write().await.insert(record.id.clone(), plugin);
        self.activate_plugin(&record.id).await
    }

    /// 停用并从运行时移除；错误只记录日志
    async fn unload_plugin(&self, plugin_id: &str) {
        if self.status(plugin_id).await == Some(PluginStatus::Active) {
            if let Err(e) = self.deactivate_plugin(plugin_id).await {
                warn!("卸载前停用插件失败: {} - {}", plugin_id, e);
            }
        }
        self.tabs.unregister_plugin_tabs(plugin_id).await;
        if self.plugins.write().await.remove(plugin_id).is_some() {
            info!("插件已从运行时移除: {}", plugin_id);
        }
    }

    /// 记录插件错误：注销已注册的标签页，状态置为 error
    async fn fail(&self, plugin_id: &str, err: ShellError) -> ShellError {
        error!("插件错误: {} - {}", plugin_id, err);
        self.tabs.unregister_plugin_tabs(plugin_id).await;

        let mut plugins = self.plugins.write().await;
        if let Some(plugin) = plugins.get_mut(plugin_id) {
            let _ = plugin.lifecycle.transition(PluginStatus::Error, &err.to_string());
            plugin.error = Some(err.to_string());
            plugin.tabs.clear();
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::bundles::{Bundle, StaticBundleHost};
    use crate::plugins::plugin_interface::{Component, Container, Props};
    use crate::plugins::plugin_loader::LoaderConfig;
    use crate::plugins::slots::{RegistrationNamespace, SlotMode};
    use async_trait::async_trait;
    use plugin_shell_common::{runtime_base_url, TabDefinition};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Forecast;

    #[async_trait]
    impl Component for Forecast {
        async fn attach(&self, _container: &Container, _props: Props) -> ShellResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Counters {
        activations: AtomicUsize,
        deactivations: AtomicUsize,
    }

    struct WeatherModule(Arc<Counters>);

    #[async_trait]
    impl PluginModule for WeatherModule {
        fn component(&self, name: &str) -> Option<Arc<dyn Component>> {
            (name == "Forecast").then(|| Arc::new(Forecast) as Arc<dyn Component>)
        }

        async fn activate(&self, context: PluginContext) -> ShellResult<()> {
            self.0.activations.fetch_add(1, Ordering::SeqCst);
            let settings = TabDefinition {
                id: "settings".to_string(),
                label: "Settings".to_string(),
                path: "/weather/settings".to_string(),
                component: "Settings".to_string(),
                position: Some(9),
                ..Default::default()
            };
            context.register_tab(settings, None).await?;
            Ok(())
        }

        async fn deactivate(&self) -> ShellResult<()> {
            self.0.deactivations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// 注册一个标签页后激活失败
    struct BrokenModule;

    #[async_trait]
    impl PluginModule for BrokenModule {
        async fn activate(&self, context: PluginContext) -> ShellResult<()> {
            let partial = TabDefinition {
                id: "partial".to_string(),
                label: "Partial".to_string(),
                ..Default::default()
            };
            context.register_tab(partial, None).await?;
            Err(ShellError::plugin(&context.plugin_id, "激活时出错"))
        }
    }

    #[derive(Default)]
    struct FakeSource {
        records: Mutex<Vec<InstalledPluginRecord>>,
    }

    impl FakeSource {
        async fn set(&self, records: Vec<InstalledPluginRecord>) {
            *self.records.lock().await = records;
        }
    }

    #[async_trait]
    impl InstalledPluginSource for FakeSource {
        async fn installed_plugins(&self) -> ShellResult<Vec<InstalledPluginRecord>> {
            Ok(self.records.lock().await.clone())
        }
    }

    fn record(id: &str, tabs: Vec<TabDefinition>) -> InstalledPluginRecord {
        InstalledPluginRecord {
            id: id.to_string(),
            manifest: PluginManifest {
                id: id.to_string(),
                name: id.to_string(),
                version: "1.0.0".to_string(),
                main: "main.js".to_string(),
                tabs,
                ..Default::default()
            },
            base_url: runtime_base_url(id),
            installed_at: None,
            updated_at: None,
        }
    }

    fn forecast_tab() -> TabDefinition {
        TabDefinition {
            id: "forecast".to_string(),
            label: "Forecast".to_string(),
            path: "/weather".to_string(),
            component: "Forecast".to_string(),
            position: Some(1),
            ..Default::default()
        }
    }

    struct Harness {
        source: Arc<FakeSource>,
        counters: Arc<Counters>,
        manager: PluginManager,
    }

    async fn harness() -> Harness {
        let counters = Arc::new(Counters::default());
        let host = Arc::new(StaticBundleHost::new());
        {
            let counters = counters.clone();
            host.register(
                "/plugins-runtime/weather-insights/main.js",
                Bundle::new(move || Arc::new(WeatherModule(counters.clone())) as Arc<dyn PluginModule>),
            )
            .await;
        }
        host.register(
            "/plugins-runtime/broken/main.js",
            Bundle::new(|| Arc::new(BrokenModule) as Arc<dyn PluginModule>),
        )
        .await;

        let loader = Arc::new(RuntimeLoader::new(
            host,
            RegistrationNamespace::new(),
            LoaderConfig {
                registration_timeout: Duration::from_millis(50),
                poll_interval: Duration::from_millis(5),
                slot_mode: SlotMode::PerLoad,
            },
        ));

        let source = Arc::new(FakeSource::default());
        source
            .set(vec![
                record("weather-insights", vec![forecast_tab()]),
                record("broken", Vec::new()),
                record("ghost", Vec::new()),
            ])
            .await;

        let manager = PluginManager::new(source.clone(), loader, Arc::new(TabRegistry::new()));
        Harness {
            source,
            counters,
            manager,
        }
    }

    #[tokio::test]
    async fn test_initialize_isolates_failures() {
        let h = harness().await;

        let report = h.manager.initialize().await.unwrap();
        assert_eq!(report.loaded, vec!["weather-insights"]);
        assert_eq!(report.failed, vec!["broken", "ghost"]);

        assert_eq!(h.manager.status("weather-insights").await, Some(PluginStatus::Active));
        assert_eq!(h.manager.status("broken").await, Some(PluginStatus::Error));
        assert_eq!(h.manager.status("ghost").await, Some(PluginStatus::Error));
        assert!(h.manager.get_plugin("broken").await.unwrap().error.is_some());

        let tabs: Vec<String> = h.manager.tabs().get_active_tabs().await.into_iter().map(|t| t.id).collect();
        assert_eq!(tabs, vec!["weather-insights.forecast", "weather-insights.settings"]);

        let forecast = h.manager.tabs().get_tab("weather-insights.forecast").await.unwrap();
        assert!(forecast.component.is_some());
    }

    #[tokio::test]
    async fn test_refresh_removes_uninstalled_plugins() {
        let h = harness().await;
        h.manager.initialize().await.unwrap();

        h.source.set(vec![record("broken", Vec::new())]).await;
        let report = h.manager.refresh_installed_plugins().await.unwrap();

        let mut removed = report.removed.clone();
        removed.sort();
        assert_eq!(removed, vec!["ghost", "weather-insights"]);
        assert!(report.loaded.is_empty());
        assert_eq!(h.counters.deactivations.load(Ordering::SeqCst), 1);
        assert!(h.manager.tabs().get_active_tabs().await.is_empty());
        assert_eq!(h.manager.list_plugins().await.len(), 1);
    }

    #[tokio::test]
    async fn test_reload_plugin() {
        let h = harness().await;
        h.manager.initialize().await.unwrap();

        h.manager.reload_plugin("weather-insights").await.unwrap();
        assert_eq!(h.counters.activations.load(Ordering::SeqCst), 2);
        assert_eq!(h.counters.deactivations.load(Ordering::SeqCst), 1);
        assert_eq!(h.manager.tabs().plugin_tabs("weather-insights").await.len(), 2);

        assert!(h.manager.reload_plugin("not-there").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_disable_and_enable() {
        let h = harness().await;
        h.manager.initialize().await.unwrap();

        h.manager.disable_plugin("weather-insights").await.unwrap();
        assert_eq!(h.manager.status("weather-insights").await, Some(PluginStatus::Disabled));
        assert!(h.manager.tabs().get_active_tabs().await.is_empty());
        assert!(h.manager.activate_plugin("weather-insights").await.is_err());

        h.manager.enable_plugin("weather-insights").await.unwrap();
        assert_eq!(h.manager.status("weather-insights").await, Some(PluginStatus::Active));
        assert_eq!(h.manager.tabs().len().await, 2);

        let history = h.manager.get_plugin("weather-insights").await.unwrap().history;
        let statuses: Vec<_> = history.iter().map(|t| t.to_status).collect();
        assert_eq!(
            statuses,
            vec![PluginStatus::Active, PluginStatus::Loaded, PluginStatus::Disabled, PluginStatus::Loaded, PluginStatus::Active]
        );
    }

    #[tokio::test]
    async fn test_deactivate_requires_active() {
        let h = harness().await;
        h.manager.initialize().await.unwrap();

        h.manager.deactivate_plugin("weather-insights").await.unwrap();
        assert_eq!(h.manager.status("weather-insights").await, Some(PluginStatus::Loaded));
        assert!(h.manager.deactivate_plugin("weather-insights").await.is_err());
        assert!(h.manager.deactivate_plugin("broken").await.is_err());
    }

    #[actix_web::test]
    async fn test_from_config_loads_through_registry_http() {
        use crate::services::{RegistryLayout, RegistryService};
        use actix_web::{web, App, HttpServer};

        let temp_dir = tempfile::TempDir::new().unwrap();
        let dir = temp_dir.path().join("plugins/marketplace/weather-insights");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(plugin_shell_common::MANIFEST_FILE),
            serde_json::json!({
                "id": "weather-insights",
                "name": "Weather Insights",
                "version": "1.0.0",
                "main": "main.js",
                "tabs": [{"id": "forecast", "label": "Forecast", "path": "/weather", "component": "Forecast"}]
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(dir.join("main.js"), "// weather").unwrap();

        let root = temp_dir.path().to_path_buf();
        let registry = Arc::new(RegistryService::new(RegistryLayout::new(root.clone(), root.join("data/plugins"))));
        registry.install_from_catalog("weather-insights").await.unwrap();

        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(registry.clone()))
                .service(web::scope("/api").configure(crate::api::handlers::plugin::configure_routes))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        let counters = Arc::new(Counters::default());
        let host = Arc::new(StaticBundleHost::new());
        {
            let counters = counters.clone();
            host.register(
                "/plugins-runtime/weather-insights/main.js",
                Bundle::new(move || Arc::new(WeatherModule(counters.clone())) as Arc<dyn PluginModule>),
            )
            .await;
        }

        let config = RuntimeConfig {
            registry_url: format!("http://{}/api/plugins", addr),
            registration_timeout_ms: 300,
            poll_interval_ms: 10,
            slot_mode: SlotMode::Shared,
        };
        let manager = PluginManager::from_config(&config, host).unwrap();
        assert_eq!(manager.loader().config().registration_timeout, Duration::from_millis(300));
        assert_eq!(manager.loader().config().poll_interval, Duration::from_millis(10));
        assert_eq!(manager.loader().config().slot_mode, SlotMode::Shared);

        let report = manager.initialize().await.unwrap();
        assert_eq!(report.loaded, vec!["weather-insights"]);
        assert_eq!(manager.status("weather-insights").await, Some(PluginStatus::Active));
        assert_eq!(counters.activations.load(Ordering::SeqCst), 1);
        assert!(manager.tabs().contains("weather-insights.forecast").await);

        // 元数据同样经由注册中心接口解析
        let metadata = manager.loader().fetch_metadata("weather-insights").await.unwrap();
        assert_eq!(
            metadata.url.as_deref(),
            Some(format!("http://{}/plugins-runtime/weather-insights/main.js", addr).as_str())
        );

        manager.shutdown().await;
        handle.stop(true).await;
    }

    #[test]
    fn test_from_config_rejects_bad_registry_url() {
        let config = RuntimeConfig {
            registry_url: "not a url".to_string(),
            registration_timeout_ms: 300,
            poll_interval_ms: 10,
            slot_mode: SlotMode::PerLoad,
        };
        let result = PluginManager::from_config(&config, Arc::new(StaticBundleHost::new()));
        assert_eq!(result.err().unwrap().error_code(), "CONFIGURATION_ERROR");
    }
}
