// 插件生命周期
// 校验运行时状态转换并记录转换历史

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::errors::{ShellError, ShellResult};
use crate::plugins::plugin_interface::PluginStatus;

/// 历史记录上限
const MAX_HISTORY: usize = 100;

/// 状态转换记录
#[derive(Debug, Clone, Serialize)]
pub struct StatusTransition {
    pub from_status: PluginStatus,
    pub to_status: PluginStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// 单个插件的生命周期
#[derive(Debug, Clone)]
pub struct PluginLifecycle {
    plugin_id: String,
    status: PluginStatus,
    last_status_change: DateTime<Utc>,
    history: Vec<StatusTransition>,
}

impl PluginLifecycle {
    /// 新加载的插件处于 loaded 状态
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            status: PluginStatus::Loaded,
            last_status_change: Utc::now(),
            history: Vec::new(),
        }
    }

    pub fn status(&self) -> PluginStatus {
        self.status
    }

    pub fn last_status_change(&self) -> DateTime<Utc> {
        self.last_status_change
    }

    pub fn history(&self) -> &[StatusTransition] {
        &self.history
    }

    /// 是否允许从 `from` 转到 `to`
    pub fn can_transition(from: PluginStatus, to: PluginStatus) -> bool {
        use PluginStatus::*;

        matches!(
            (from, to),
            (Loaded, Active)
                | (Active, Loaded)
                | (_, Error)
                | (Loaded | Active | Error, Disabled)
                | (Disabled, Loaded)
                | (Error, Loaded)
        )
    }

    /// 状态转换
    pub fn transition(&mut self, to: PluginStatus, reason: &str) -> ShellResult<()> {
        let from = self.status;
        if !Self::can_transition(from, to) {
            return Err(ShellError::plugin(
                &self.plugin_id,
                format!("不允许的状态转换: {} -> {}", from, to),
            ));
        }

        debug!("插件状态转换: {} - {} -> {} ({})", self.plugin_id, from, to, reason);
        self.status = to;
        self.last_status_change = Utc::now();
        self.history.push(StatusTransition {
            from_status: from,
            to_status: to,
            timestamp: self.last_status_change,
            reason: reason.to_string(),
        });
        if self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }

        Ok(())
    }
}
