//! Tessera AOP - 面向切面编程与事务代理
//!
//! 提供方法拦截与事务传播的组合：
//! - `*` 通配的切点表达式，匹配 `实例.方法`
//! - 多种通知类型（Before、After、Around、AfterReturning、AfterThrowing）
//! - 显式创建的 AopFactory，取代全局注册表
//! - 组合式方法代理，异步与同步方法各有执行路径
//! - 嵌套事务方法只参与，由最外层提交或回滚
//! - 通过 inventory 声明切面，由 `AopFactory::auto_load` 显式加载

pub mod advice;
pub mod aspect;
pub mod component;
pub mod error;
pub mod expression;
pub mod factory;
pub mod interceptor;
pub mod joinpoint;
pub mod pointcut;
pub mod runtime;

// 重新导出核心类型
pub use advice::{AdviceBinding, AdviceChain, AdviceType, Phase};
pub use aspect::{AdviceDeclaration, Aspect, AspectRegistration, PointcutDeclaration, TracingAspect};
pub use component::{Component, ProxyTable};
pub use error::{AopResult, ConfigurationError, InvocationError, MethodResult};
pub use expression::{compile, compile_values, Anchor, MatchExpression};
pub use factory::{AopFactory, DEFAULT_TRANSACTION_POINTCUT};
pub use interceptor::{Method, ProxiedMethod};
pub use joinpoint::JoinPoint;
pub use pointcut::Pointcut;
pub use runtime::{AopRuntime, TRACE_POINTCUT};

// 导出 inventory 供声明式注册使用
pub use inventory;

/// 预导入模块
pub mod prelude {
    pub use crate::advice::{AdviceBinding, AdviceType, Phase};
    pub use crate::aspect::{AdviceDeclaration, Aspect, AspectRegistration, PointcutDeclaration};
    pub use crate::component::{Component, ProxyTable};
    pub use crate::error::{AopResult, ConfigurationError, InvocationError, MethodResult};
    pub use crate::factory::AopFactory;
    pub use crate::interceptor::{Method, ProxiedMethod};
    pub use crate::joinpoint::JoinPoint;
    pub use crate::runtime::AopRuntime;
    pub use async_trait::async_trait;
    pub use tessera_core::{CallContext, RuntimeConfig};
}
