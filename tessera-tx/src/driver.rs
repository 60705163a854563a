//! 驱动契约
//!
//! 每种数据库后端提供一个 [`TransactionDriver`] 适配器，负责连接的获取与归还以及
//! begin / commit / rollback 三个操作。传播语义完全由 [`crate::TransactionContextManager`] 决定，
//! 适配器之间不共享基类。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{TxError, TxResult};
use crate::memory::MemoryDriver;

/// 驱动持有的不透明连接句柄
pub struct Connection {
    id: u64,
    handle: Box<dyn Any + Send + Sync>,
}

impl Connection {
    pub fn new<H: Any + Send + Sync>(id: u64, handle: H) -> Self {
        Self {
            id,
            handle: Box::new(handle),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// 以驱动自己的会话类型访问句柄
    pub fn downcast_ref<H: Any>(&self) -> Option<&H> {
        self.handle.downcast_ref::<H>()
    }

    pub fn downcast_mut<H: Any>(&mut self) -> Option<&mut H> {
        self.handle.downcast_mut::<H>()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

/// 事务驱动适配器
///
/// 后端特有的错误以 `anyhow::Error` 返回，由事务对象包装为 [`TxError::Driver`]。
#[async_trait]
pub trait TransactionDriver: Send + Sync + 'static {
    /// 驱动名称（用于日志与错误信息）
    fn name(&self) -> &str;

    /// 从连接管理器获取连接
    async fn get_connection(&self) -> anyhow::Result<Connection>;

    /// 把连接归还给连接管理器
    async fn release_connection(&self, connection: Connection) -> anyhow::Result<()>;

    async fn begin(&self, connection: &mut Connection) -> anyhow::Result<()>;

    async fn commit(&self, connection: &mut Connection) -> anyhow::Result<()>;

    async fn rollback(&self, connection: &mut Connection) -> anyhow::Result<()>;
}

/// 驱动工厂
pub type DriverFactory = Arc<dyn Fn() -> Arc<dyn TransactionDriver> + Send + Sync>;

/// 驱动注册表
///
/// 按配置中的驱动名称选择适配器。
pub struct DriverRegistry {
    factories: RwLock<HashMap<String, DriverFactory>>,
}

impl DriverRegistry {
    /// 创建空的驱动注册表
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// 创建包含内置 `memory` 驱动的注册表
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(
            "memory",
            Arc::new(|| Arc::new(MemoryDriver::new()) as Arc<dyn TransactionDriver>),
        );
        registry
    }

    /// 注册驱动工厂，同名工厂会被替换
    pub fn register(&self, name: impl Into<String>, factory: DriverFactory) {
        let name = name.into();
        tracing::debug!("Registering transaction driver: {}", name);
        self.factories.write().insert(name, factory);
    }

    /// 按名称创建驱动
    pub fn create(&self, name: &str) -> TxResult<Arc<dyn TransactionDriver>> {
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TxError::UnknownDriver(name.to_string()))?;
        Ok(factory())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_downcast() {
        let mut connection = Connection::new(3, String::from("session"));

        assert_eq!(connection.id(), 3);
        assert_eq!(connection.downcast_ref::<String>().unwrap(), "session");
        assert!(connection.downcast_ref::<u32>().is_none());

        connection.downcast_mut::<String>().unwrap().push_str("-1");
        assert_eq!(connection.downcast_ref::<String>().unwrap(), "session-1");
    }

    #[test]
    fn test_registry_selects_by_name() {
        let registry = DriverRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["memory"]);

        let driver = registry.create("memory").unwrap();
        assert_eq!(driver.name(), "memory");

        assert!(matches!(
            registry.create("oracle"),
            Err(TxError::UnknownDriver(name)) if name == "oracle"
        ));
    }

    #[test]
    fn test_register_custom_driver() {
        let registry = DriverRegistry::new();
        assert!(registry.names().is_empty());

        let shared = Arc::new(MemoryDriver::named("replica"));
        let driver = Arc::clone(&shared);
        registry.register(
            "replica",
            Arc::new(move || Arc::clone(&driver) as Arc<dyn TransactionDriver>),
        );

        assert_eq!(registry.create("replica").unwrap().name(), "replica");
    }
}
