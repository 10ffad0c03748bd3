// 注册命名空间
// 插件脚本执行后把自身发布到命名空间中的某个槽位，加载器轮询该槽位

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::plugins::plugin_interface::PluginModule;

pub use crate::config::SlotModeSetting as SlotMode;

/// 旧版插件包使用的固定注册键
pub const SHARED_SLOT: &str = "__plugin_shell_registration__";

/// 槽位表：已发布的模块以及每个槽位当前持有者的加载令牌
#[derive(Default)]
struct SlotTable {
    modules: HashMap<String, Arc<dyn PluginModule>>,
    owners: HashMap<String, String>,
}

/// 注册命名空间（进程内共享）
///
/// 只有槽位被某次加载持有、且令牌一致时注册才会生效。加载结束后才到达的注册直接丢弃。
#[derive(Clone, Default)]
pub struct RegistrationNamespace {
    table: Arc<Mutex<SlotTable>>,
}

impl RegistrationNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, SlotTable> {
        // 持锁期间不会 panic，中毒时直接取回数据
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 插件发布自身；令牌不属于槽位当前持有者时返回 false
    pub fn publish(&self, key: &str, nonce: &str, module: Arc<dyn PluginModule>) -> bool {
        let mut table = self.table();
        if table.owners.get(key).map(String::as_str) != Some(nonce) {
            debug!("丢弃过期的插件注册: {} (令牌 {})", key, nonce);
            return false;
        }
        debug!("插件已注册到槽位: {}", key);
        table.modules.insert(key.to_string(), module);
        true
    }

    pub fn peek(&self, key: &str) -> Option<Arc<dyn PluginModule>> {
        self.table().modules.get(key).cloned()
    }

    pub fn take(&self, key: &str) -> Option<Arc<dyn PluginModule>> {
        self.table().modules.remove(key)
    }

    /// 已发布且尚未取走的模块数
    pub fn len(&self) -> usize {
        self.table().modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前被持有的槽位数
    pub fn held(&self) -> usize {
        self.table().owners.len()
    }

    fn claim(&self, key: &str, nonce: &str) {
        let mut table = self.table();
        if table.modules.remove(key).is_some() {
            debug!("清除槽位中的残留注册: {}", key);
        }
        table.owners.insert(key.to_string(), nonce.to_string());
    }

    fn release(&self, key: &str, nonce: &str) {
        let mut table = self.table();
        if table.owners.get(key).map(String::as_str) == Some(nonce) {
            table.owners.remove(key);
            table.modules.remove(key);
        }
    }
}

/// 槽位分配器
pub struct SlotAllocator {
    mode: SlotMode,
    /// 共享模式下同一时刻只允许一次加载
    shared_lock: Arc<AsyncMutex<()>>,
}

impl SlotAllocator {
    pub fn new(mode: SlotMode) -> Self {
        Self {
            mode,
            shared_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn mode(&self) -> SlotMode {
        self.mode
    }

    /// 为一次加载分配槽位和加载令牌
    ///
    /// 共享模式会等待上一次加载结束。
    pub async fn acquire(&self, namespace: &RegistrationNamespace) -> SlotLease {
        let (key, guard) = match self.mode {
            SlotMode::PerLoad => (format!("plugin-slot-{}", Uuid::new_v4().simple()), None),
            SlotMode::Shared => {
                let guard = self.shared_lock.clone().lock_owned().await;
                (SHARED_SLOT.to_string(), Some(guard))
            }
        };
        let nonce = Uuid::new_v4().simple().to_string();
        namespace.claim(&key, &nonce);

        SlotLease {
            key,
            nonce,
            namespace: namespace.clone(),
            _guard: guard,
        }
    }
}

/// 一次加载持有的槽位，释放时清空槽位并作废令牌
pub struct SlotLease {
    key: String,
    nonce: String,
    namespace: RegistrationNamespace,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl SlotLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn peek(&self) -> Option<Arc<dyn PluginModule>> {
        self.namespace.peek(&self.key)
    }

    pub fn take(&self) -> Option<Arc<dyn PluginModule>> {
        self.namespace.take(&self.key)
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        // 先于 _guard 执行，下一次共享加载拿到锁时槽位已经作废
        self.namespace.release(&self.key, &self.nonce);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Empty;
    impl PluginModule for Empty {}

    #[tokio::test]
    async fn test_per_load_keys_are_unique_and_released() {
        let namespace = RegistrationNamespace::new();
        let allocator = SlotAllocator::new(SlotMode::PerLoad);

        let first = allocator.acquire(&namespace).await;
        let second = allocator.acquire(&namespace).await;
        assert_ne!(first.key(), second.key());
        assert_ne!(first.nonce(), second.nonce());

        assert!(namespace.publish(first.key(), first.nonce(), Arc::new(Empty)));
        assert!(first.peek().is_some());
        assert!(second.peek().is_none());

        let (key, nonce) = (first.key().to_string(), first.nonce().to_string());
        drop(first);
        assert_eq!(namespace.held(), 1);
        assert!(namespace.is_empty());

        // 加载结束后到达的注册不会留在命名空间里
        assert!(!namespace.publish(&key, &nonce, Arc::new(Empty)));
        drop(second);
        assert!(namespace.is_empty());
        assert_eq!(namespace.held(), 0);
    }

    #[tokio::test]
    async fn test_publish_requires_matching_nonce() {
        let namespace = RegistrationNamespace::new();
        let allocator = SlotAllocator::new(SlotMode::PerLoad);
        let lease = allocator.acquire(&namespace).await;

        assert!(!namespace.publish(lease.key(), "someone-else", Arc::new(Empty)));
        assert!(!namespace.publish("plugin-slot-unknown", lease.nonce(), Arc::new(Empty)));
        assert!(namespace.is_empty());
    }

    #[tokio::test]
    async fn test_shared_mode_serializes_loads() {
        let namespace = RegistrationNamespace::new();
        let allocator = Arc::new(SlotAllocator::new(SlotMode::Shared));

        let lease = allocator.acquire(&namespace).await;
        assert_eq!(lease.key(), SHARED_SLOT);

        let waiter = {
            let allocator = allocator.clone();
            let namespace = namespace.clone();
            tokio::spawn(async move { allocator.acquire(&namespace).await.key().to_string() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(lease);
        assert_eq!(waiter.await.unwrap(), SHARED_SLOT);
    }

    #[tokio::test]
    async fn test_shared_slot_rejects_previous_load() {
        let namespace = RegistrationNamespace::new();
        let allocator = SlotAllocator::new(SlotMode::Shared);

        let stale = allocator.acquire(&namespace).await;
        let stale_nonce = stale.nonce().to_string();
        drop(stale);

        let current = allocator.acquire(&namespace).await;
        assert!(!namespace.publish(SHARED_SLOT, &stale_nonce, Arc::new(Empty)));
        assert!(current.peek().is_none());

        assert!(namespace.publish(SHARED_SLOT, current.nonce(), Arc::new(Empty)));
        assert!(current.take().is_some());
    }
}
