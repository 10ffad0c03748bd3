// 标签页注册表
// 维护插件注册的标签页，宿主界面从这里读取要渲染的标签页

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use plugin_shell_common::TabDefinition;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::{ShellError, ShellResult};
use crate::plugins::plugin_interface::{Component, TabRegistrar};

/// 组合插件 id 与标签页 id
pub fn tab_key(plugin_id: &str, tab_id: &str) -> String {
    format!("{}.{}", plugin_id, tab_id)
}

/// 已注册的标签页
#[derive(Clone)]
pub struct RegisteredTab {
    /// `<pluginId>.<tabId>`
    pub id: String,
    pub plugin_id: String,
    pub definition: TabDefinition,
    pub component: Option<Arc<dyn Component>>,
    pub is_active: bool,
    pub registered_at: DateTime<Utc>,
}

impl fmt::Debug for RegisteredTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTab")
            .field("id", &self.id)
            .field("plugin_id", &self.plugin_id)
            .field("label", &self.definition.label)
            .field("has_component", &self.component.is_some())
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// 排序：position 升序（未设置的排在最后），再按标签名
fn display_order(a: &RegisteredTab, b: &RegisteredTab) -> Ordering {
    let position = |tab: &RegisteredTab| tab.definition.position.unwrap_or(i32::MAX);
    position(a)
        .cmp(&position(b))
        .then_with(|| a.definition.label.cmp(&b.definition.label))
        .then_with(|| a.id.cmp(&b.id))
}

/// 标签页注册表
#[derive(Default)]
pub struct TabRegistry {
    tabs: RwLock<HashMap<String, RegisteredTab>>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册标签页；同 id 的旧注册会被替换
    pub async fn register_tab(
        &self,
        plugin_id: &str,
        definition: TabDefinition,
        component: Option<Arc<dyn Component>>,
    ) -> ShellResult<String> {
        if definition.id.trim().is_empty() {
            return Err(ShellError::validation("tab.id", format!("插件 {} 的标签页缺少 id", plugin_id)));
        }

        let id = tab_key(plugin_id, &definition.id);
        let tab = RegisteredTab {
            id: id.clone(),
            plugin_id: plugin_id.to_string(),
            definition,
            component,
            is_active: false,
            registered_at: Utc::now(),
        };

        let mut tabs = self.tabs.write().await;
        if tabs.insert(id.clone(), tab).is_some() {
            warn!("标签页重复注册，已替换: {}", id);
        } else {
            info!("标签页已注册: {}", id);
        }
        Ok(id)
    }

    pub async fn unregister_tab(&self, tab_id: &str) -> bool {
        let removed = self.tabs.write().await.remove(tab_id).is_some();
        if removed {
            debug!("标签页已注销: {}", tab_id);
        }
        removed
    }

    /// 注销插件的全部标签页，返回被注销的 id
    pub async fn unregister_plugin_tabs(&self, plugin_id: &str) -> Vec<String> {
        let mut tabs = self.tabs.write().await;
        let ids: Vec<String> = tabs
            .values()
            .filter(|tab| tab.plugin_id == plugin_id)
            .map(|tab| tab.id.clone())
            .collect();
        for id in &ids {
            tabs.remove(id);
        }
        if !ids.is_empty() {
            debug!("插件 {} 的 {} 个标签页已注销", plugin_id, ids.len());
        }
        ids
    }

    /// 切换当前激活的标签页
    pub async fn set_active_tab(&self, tab_id: &str) -> ShellResult<()> {
        let mut tabs = self.tabs.write().await;
        if !tabs.contains_key(tab_id) {
            return Err(ShellError::not_found(format!("标签页: {}", tab_id)));
        }
        for tab in tabs.values_mut() {
            tab.is_active = tab.id == tab_id;
        }
        Ok(())
    }

    pub async fn active_tab(&self) -> Option<RegisteredTab> {
        self.tabs.read().await.values().find(|tab| tab.is_active).cloned()
    }

    /// 宿主界面要显示的标签页
    pub async fn get_active_tabs(&self) -> Vec<RegisteredTab> {
        let mut tabs: Vec<RegisteredTab> = self.tabs.read().await.values().cloned().collect();
        tabs.sort_by(display_order);
        tabs
    }

    pub async fn get_tab(&self, tab_id: &str) -> Option<RegisteredTab> {
        self.tabs.read().await.get(tab_id).cloned()
    }

    pub async fn contains(&self, tab_id: &str) -> bool {
        self.tabs.read().await.contains_key(tab_id)
    }

    /// 插件已注册的标签页 id
    pub async fn plugin_tabs(&self, plugin_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tabs
            .read()
            .await
            .values()
            .filter(|tab| tab.plugin_id == plugin_id)
            .map(|tab| tab.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.tabs.read().await.len()
    }
}

#[async_trait]
impl TabRegistrar for TabRegistry {
    async fn register_tab(
        &self,
        plugin_id: &str,
        definition: TabDefinition,
        component: Option<Arc<dyn Component>>,
    ) -> ShellResult<String> {
        TabRegistry::register_tab(self, plugin_id, definition, component).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(id: &str, label: &str, position: Option<i32>) -> TabDefinition {
        TabDefinition {
            id: id.to_string(),
            label: label.to_string(),
            path: format!("/{}", id),
            component: "Main".to_string(),
            position,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_register_and_order() {
        let registry = TabRegistry::new();
        registry.register_tab("weather-insights", tab("forecast", "Forecast", Some(2)), None).await.unwrap();
        registry.register_tab("signal-inspector", tab("signals", "Signals", Some(1)), None).await.unwrap();
        registry.register_tab("signal-inspector", tab("about", "About", None), None).await.unwrap();
        registry.register_tab("weather-insights", tab("alerts", "Alerts", Some(2)), None).await.unwrap();

        let ids: Vec<String> = registry.get_active_tabs().await.into_iter().map(|t| t.id).collect();
        assert_eq!(
            ids,
            vec![
                "signal-inspector.signals",
                "weather-insights.alerts",
                "weather-insights.forecast",
                "signal-inspector.about",
            ]
        );
    }

    #[tokio::test]
    async fn test_unregister_plugin_tabs() {
        let registry = TabRegistry::new();
        registry.register_tab("a", tab("one", "One", None), None).await.unwrap();
        registry.register_tab("a", tab("two", "Two", None), None).await.unwrap();
        registry.register_tab("b", tab("one", "One", None), None).await.unwrap();

        let mut removed = registry.unregister_plugin_tabs("a").await;
        removed.sort();
        assert_eq!(removed, vec!["a.one", "a.two"]);
        assert_eq!(registry.len().await, 1);
        assert!(registry.unregister_tab("b.one").await);
        assert!(!registry.unregister_tab("b.one").await);
    }

    #[tokio::test]
    async fn test_set_active_tab() {
        let registry = TabRegistry::new();
        registry.register_tab("a", tab("one", "One", None), None).await.unwrap();
        registry.register_tab("a", tab("two", "Two", None), None).await.unwrap();

        registry.set_active_tab("a.two").await.unwrap();
        assert_eq!(registry.active_tab().await.unwrap().id, "a.two");
        registry.set_active_tab("a.one").await.unwrap();
        assert!(!registry.get_tab("a.two").await.unwrap().is_active);

        assert!(registry.set_active_tab("a.three").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rejects_tab_without_id() {
        let registry = TabRegistry::new();
        assert!(registry.register_tab("a", tab("", "Nameless", None), None).await.is_err());
    }
}
