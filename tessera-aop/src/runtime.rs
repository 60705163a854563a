//! 运行时引导
//!
//! 按 [`RuntimeConfig`] 组装实例注册表、事务驱动、事务上下文管理器与 AOP 工厂：
//!
//! ```ignore
//! let runtime = AopRuntime::from_file("tessera.toml")?;
//! runtime.init_logging()?;
//! runtime.register_component("AccountService", service)?;
//! runtime.install();
//!
//! let ctx = runtime.start_unit_of_work("POST /transfer");
//! runtime.invoke(&ctx, "AccountService", "transferFunds", args).await?;
//! ```

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tessera_core::{
    CallContext, CoreResult, DefaultInstanceRegistry, InstanceRegistry, LogicalThreads, RuntimeConfig,
};
use tessera_tx::{DriverRegistry, TransactionContextManager};

use crate::advice::AdviceBinding;
use crate::aspect::TracingAspect;
use crate::component::{Component, ProxyTable};
use crate::error::{AopResult, MethodResult};
use crate::factory::AopFactory;

/// 内置 tracing 切面使用的切点 id
pub const TRACE_POINTCUT: &str = "tessera.trace";

/// AOP 运行时
pub struct AopRuntime {
    config: RuntimeConfig,
    registry: Arc<DefaultInstanceRegistry>,
    factory: Arc<AopFactory>,
    proxies: Arc<ProxyTable>,
    threads: LogicalThreads,
}

impl AopRuntime {
    /// 使用内置驱动（`memory`）构建运行时
    pub fn from_config(config: RuntimeConfig) -> AopResult<Self> {
        Self::with_drivers(config, &DriverRegistry::with_defaults())
    }

    pub fn from_file(path: impl AsRef<Path>) -> AopResult<Self> {
        let config = RuntimeConfig::from_file(path)?;
        Self::from_config(config)
    }

    /// 使用给定的驱动注册表构建运行时，驱动按 `[transaction].driver` 选择
    pub fn with_drivers(config: RuntimeConfig, drivers: &DriverRegistry) -> AopResult<Self> {
        let registry = Arc::new(DefaultInstanceRegistry::new());
        let mut factory = AopFactory::new(Arc::clone(&registry) as Arc<dyn InstanceRegistry>);

        if config.transaction.enabled {
            let driver = drivers.create(&config.transaction.driver)?;
            let manager = Arc::new(TransactionContextManager::new(driver));
            factory = factory.enable_transactions(manager, &config.transaction.pointcut)?;
            factory.mark_transactional_values(&config.transaction.expressions)?;
        }

        if config.aop.enabled {
            for section in &config.aop.pointcuts {
                factory.register_pointcut_values(&section.id, &section.expressions)?;
            }

            if !config.aop.trace.is_empty() {
                factory.register_pointcut_values(TRACE_POINTCUT, &config.aop.trace)?;
                factory.add_aspect(TracingAspect::NAME, Arc::new(TracingAspect))?;
                for binding in [
                    AdviceBinding::before(TRACE_POINTCUT, TracingAspect::NAME, "enter"),
                    AdviceBinding::after_returning(TRACE_POINTCUT, TracingAspect::NAME, "returned"),
                    AdviceBinding::after_throwing(TRACE_POINTCUT, TracingAspect::NAME, "failed"),
                    AdviceBinding::after(TRACE_POINTCUT, TracingAspect::NAME, "exit"),
                ] {
                    factory.add_advice(binding)?;
                }
            }

            factory.auto_load()?;
        } else {
            tracing::info!("AOP disabled by configuration, only transactions are applied");
        }

        tracing::info!(
            "Runtime '{}' ready: {} pointcut(s), transactions {}",
            config.name.as_deref().unwrap_or("tessera"),
            factory.pointcut_ids().len(),
            if factory.transactions().is_some() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            config,
            registry,
            factory: Arc::new(factory),
            proxies: Arc::new(ProxyTable::new()),
            threads: LogicalThreads::new(),
        })
    }

    /// 按 `[logging]` 段初始化日志
    pub fn init_logging(&self) -> CoreResult<()> {
        self.config.logging.init()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DefaultInstanceRegistry> {
        &self.registry
    }

    pub fn factory(&self) -> &Arc<AopFactory> {
        &self.factory
    }

    pub fn transactions(&self) -> Option<&Arc<TransactionContextManager>> {
        self.factory.transactions()
    }

    /// 代理表，组件可以持有它的弱引用以经由代理调用自身的方法
    pub fn proxies(&self) -> &Arc<ProxyTable> {
        &self.proxies
    }

    pub fn register_component(&self, name: &str, component: Arc<dyn Component>) -> AopResult<()> {
        self.factory.register_component(name, component)
    }

    /// 扫描已注册的组件并安装代理
    pub fn install(&self) -> usize {
        self.factory.install(&self.proxies)
    }

    /// 为新的工作单元分配逻辑线程
    pub fn start_unit_of_work(&self, label: impl Into<String>) -> CallContext {
        self.threads.next_labeled(label)
    }

    pub async fn invoke(
        &self,
        ctx: &CallContext,
        instance: &str,
        method: &str,
        args: Vec<Value>,
    ) -> MethodResult {
        self.proxies.invoke(ctx, instance, method, args).await
    }

    /// 关闭运行时，回滚遗留的事务并清空代理表
    ///
    /// 返回回滚的事务数量。
    pub async fn shutdown(&self) -> usize {
        let orphans = match self.transactions() {
            Some(manager) => manager.shutdown().await,
            None => 0,
        };
        self.proxies.clear();
        tracing::info!("Runtime shut down, {} orphaned transaction(s) rolled back", orphans);
        orphans
    }
}
