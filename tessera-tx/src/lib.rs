//! Tessera TX - 事务传播
//!
//! 提供与具体数据库无关的事务传播：
//! - 驱动契约（begin / commit / rollback / 连接获取与归还）
//! - 按配置名称选择驱动适配器
//! - 以逻辑线程为键的事务上下文管理，嵌套调用只参与、最外层负责提交或回滚
//! - 内存参考驱动，用于测试与演示

pub mod driver;
pub mod error;
pub mod manager;
pub mod memory;
pub mod transaction;

// 重新导出核心类型
pub use driver::{Connection, DriverFactory, DriverRegistry, TransactionDriver};
pub use error::{TxError, TxResult};
pub use manager::{Outcome, Settlement, SharedTransaction, TransactionContextManager};
pub use memory::{DriverEvent, FailurePoint, MemoryDriver, MemorySession};
pub use transaction::{Transaction, TransactionId, TransactionState};

/// 预导入模块
pub mod prelude {
    pub use crate::driver::{Connection, DriverRegistry, TransactionDriver};
    pub use crate::error::{TxError, TxResult};
    pub use crate::manager::{Outcome, Settlement, TransactionContextManager};
    pub use crate::memory::{MemoryDriver, MemorySession};
    pub use crate::transaction::{Transaction, TransactionId, TransactionState};
}
