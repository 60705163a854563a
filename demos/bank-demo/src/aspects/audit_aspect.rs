//! 审计切面 - 通过 inventory 声明，由 `AopFactory::auto_load` 加载

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tessera_aop::prelude::*;

/// 审计切面 - 记录转账的成功与失败
#[derive(Default)]
pub struct AuditAspect {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl AuditAspect {
    pub const NAME: &'static str = "AuditAspect";

    fn record_success(&self, jp: &JoinPoint) {
        let total = self.succeeded.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            "🟢 [Audit] {} {:?} -> {} ({} succeeded so far)",
            jp.signature(),
            jp.args(),
            jp.return_value().cloned().unwrap_or_default(),
            total
        );
    }

    fn record_failure(&self, jp: &JoinPoint) {
        let total = self.failed.fetch_add(1, Ordering::SeqCst) + 1;
        match jp.error() {
            Some(err) => tracing::warn!(
                "🔴 [Audit] {} {:?} failed after {:?}: {} ({} failed so far)",
                jp.signature(),
                jp.args(),
                jp.elapsed(),
                err,
                total
            ),
            None => tracing::warn!("🔴 [Audit] {} failed without an error", jp.signature()),
        }
    }
}

#[async_trait]
impl Aspect for AuditAspect {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn advise(&self, method: &str, jp: &mut JoinPoint) -> anyhow::Result<()> {
        match method {
            "recordSuccess" => self.record_success(jp),
            "recordFailure" => self.record_failure(jp),
            other => anyhow::bail!("AuditAspect has no advice method '{}'", other),
        }
        Ok(())
    }
}

tessera_aop::inventory::submit! {
    AspectRegistration::new(AuditAspect::NAME, || Arc::new(AuditAspect::default()) as Arc<dyn Aspect>)
}

tessera_aop::inventory::submit! {
    PointcutDeclaration::new(AuditAspect::NAME, "audit.transfers", &["AccountService.transferFunds"], 0)
}

tessera_aop::inventory::submit! {
    AdviceDeclaration::new(AuditAspect::NAME, "audit.transfers", AdviceType::AfterReturning, "recordSuccess", 0)
}

tessera_aop::inventory::submit! {
    AdviceDeclaration::new(AuditAspect::NAME, "audit.transfers", AdviceType::AfterThrowing, "recordFailure", 1)
}
