// tessera-core: 运行时的基础协作组件
//
// 提供拦截引擎与事务传播依赖的外部协作者：
// - 实例注册表（单例 / 原型作用域）
// - 逻辑线程调用上下文
// - TOML 配置
// - 日志初始化

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod registry;
pub mod scope;

// 重新导出常用类型
pub use config::{AopSection, PointcutSection, RuntimeConfig, TransactionSection};
pub use context::{CallContext, LogicalThreadId, LogicalThreads};
pub use error::{CoreError, CoreResult, Result};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use registry::{
    DefaultInstanceRegistry, Instance, InstanceFactory, InstanceRegistry, InstanceRegistryExt,
};
pub use scope::Scope;

/// Prelude 模块，包含常用的 traits 和类型
pub mod prelude {
    pub use crate::config::RuntimeConfig;
    pub use crate::context::{CallContext, LogicalThreadId, LogicalThreads};
    pub use crate::error::{CoreError, CoreResult};
    pub use crate::logging::{LogFormat, LogLevel, LoggingConfig};
    pub use crate::registry::{DefaultInstanceRegistry, InstanceRegistry, InstanceRegistryExt};
    pub use crate::scope::Scope;
    pub use anyhow::{anyhow, Context};
}
