//! 切面（Aspect）定义
//!
//! 切面是横切关注点的模块化。切面实例注册在实例注册表中，通知绑定按名称找到切面，
//! 再以方法名分派到具体的通知逻辑。

use std::sync::Arc;

use async_trait::async_trait;

use crate::advice::AdviceType;
use crate::joinpoint::JoinPoint;

/// 切面 Trait
///
/// ```ignore
/// struct AuditAspect;
///
/// #[async_trait]
/// impl Aspect for AuditAspect {
///     fn name(&self) -> &str {
///         "AuditAspect"
///     }
///
///     async fn advise(&self, method: &str, jp: &mut JoinPoint) -> anyhow::Result<()> {
///         match method {
///             "record" => tracing::info!("audit {}", jp.signature()),
///             other => anyhow::bail!("AuditAspect has no advice '{}'", other),
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Aspect: Send + Sync + 'static {
    /// 切面名称
    fn name(&self) -> &str;

    /// 执行名为 `method` 的通知
    ///
    /// 返回错误会中止同一桶中剩余的通知。
    async fn advise(&self, method: &str, join_point: &mut JoinPoint) -> anyhow::Result<()>;
}

// ============================================================================
// 声明式注册（通过 inventory 收集，由 AopFactory::auto_load 显式加载）
// ============================================================================

/// 切面注册器
pub struct AspectRegistration {
    /// 切面名称
    pub name: &'static str,

    /// 创建切面实例的函数
    pub creator: fn() -> Arc<dyn Aspect>,
}

impl AspectRegistration {
    pub const fn new(name: &'static str, creator: fn() -> Arc<dyn Aspect>) -> Self {
        Self { name, creator }
    }

    /// 创建切面实例
    pub fn create_instance(&self) -> Arc<dyn Aspect> {
        (self.creator)()
    }
}

/// 切点声明，归属于某个切面
pub struct PointcutDeclaration {
    pub aspect: &'static str,
    pub id: &'static str,
    pub expressions: &'static [&'static str],
    /// 同一切面内的声明顺序
    pub order: u32,
}

impl PointcutDeclaration {
    pub const fn new(
        aspect: &'static str,
        id: &'static str,
        expressions: &'static [&'static str],
        order: u32,
    ) -> Self {
        Self {
            aspect,
            id,
            expressions,
            order,
        }
    }
}

/// 通知声明，通知方法位于声明它的切面上
pub struct AdviceDeclaration {
    pub aspect: &'static str,
    pub pointcut: &'static str,
    pub advice_type: AdviceType,
    pub method: &'static str,
    /// 同一切面内的声明顺序
    pub order: u32,
}

impl AdviceDeclaration {
    pub const fn new(
        aspect: &'static str,
        pointcut: &'static str,
        advice_type: AdviceType,
        method: &'static str,
        order: u32,
    ) -> Self {
        Self {
            aspect,
            pointcut,
            advice_type,
            method,
            order,
        }
    }
}

inventory::collect!(AspectRegistration);
inventory::collect!(PointcutDeclaration);
inventory::collect!(AdviceDeclaration);

/// 获取所有注册的切面注册器
pub fn get_all_aspect_registrations() -> impl Iterator<Item = &'static AspectRegistration> {
    inventory::iter::<AspectRegistration>()
}

pub fn get_all_pointcut_declarations() -> impl Iterator<Item = &'static PointcutDeclaration> {
    inventory::iter::<PointcutDeclaration>()
}

pub fn get_all_advice_declarations() -> impl Iterator<Item = &'static AdviceDeclaration> {
    inventory::iter::<AdviceDeclaration>()
}

// ============================================================================
// 预定义的切面
// ============================================================================

/// 调用追踪切面
///
/// 通知方法：`enter`（前置）、`returned`（返回后）、`failed`（异常）、`exit`（后置）。
pub struct TracingAspect;

impl TracingAspect {
    pub const NAME: &'static str = "TracingAspect";
}

#[async_trait]
impl Aspect for TracingAspect {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn advise(&self, method: &str, join_point: &mut JoinPoint) -> anyhow::Result<()> {
        let thread = join_point.context().thread_id();
        match method {
            "enter" => {
                tracing::info!(thread = %thread, "→ Entering: {}", join_point.signature());
            }
            "returned" => {
                tracing::debug!(
                    thread = %thread,
                    "{} returned {}",
                    join_point.signature(),
                    join_point.return_value().unwrap_or(&serde_json::Value::Null)
                );
            }
            "failed" => {
                if let Some(error) = join_point.error() {
                    tracing::warn!(thread = %thread, "❌ Exception in {}: {}", join_point.signature(), error);
                }
            }
            "exit" => {
                let outcome = if join_point.is_failed() {
                    "failed"
                } else {
                    "ok"
                };
                tracing::info!(
                    thread = %thread,
                    "← Exiting: {} ({}, took {:?})",
                    join_point.signature(),
                    outcome,
                    join_point.elapsed()
                );
            }
            other => anyhow::bail!("{} has no advice method '{}'", Self::NAME, other),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessera_core::LogicalThreads;

    #[tokio::test]
    async fn test_tracing_aspect_methods() {
        let ctx = LogicalThreads::new().next_context();
        let mut jp = JoinPoint::new("Svc".into(), "save".into(), vec![], ctx);
        let aspect = TracingAspect;

        for method in ["enter", "returned", "failed", "exit"] {
            aspect.advise(method, &mut jp).await.unwrap();
        }
        jp.set_return_value(json!(1));
        assert!(aspect.advise("returned", &mut jp).await.is_ok());

        let err = aspect.advise("explode", &mut jp).await.unwrap_err();
        assert!(err.to_string().contains("explode"));
    }

    #[test]
    fn test_registration_creates_instance() {
        fn create() -> Arc<dyn Aspect> {
            Arc::new(TracingAspect)
        }
        let registration = AspectRegistration::new(TracingAspect::NAME, create);
        assert_eq!(registration.create_instance().name(), "TracingAspect");
    }
}
