//! 方法拦截器
//!
//! [`ProxiedMethod`] 组合持有原始方法，每次调用时按以下顺序执行通知链：
//!
//! ```text
//! try {
//!     事务 enter（需要事务时）
//!     before 通知
//!     原始方法
//!     事务 exit(Success)
//!     returns 通知
//! } catch {
//!     事务 exit(Failure)（已 enter 且尚未 exit 时）
//!     throws 通知
//! } finally {
//!     after 通知
//! }
//! ```
//!
//! 调用方得到（可能被通知替换的）返回值或第一个观察到的错误。

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use once_cell::sync::OnceCell;
use serde_json::Value;
use tessera_core::CallContext;
use tessera_tx::{Outcome, Settlement, TransactionContextManager, TxResult};

use crate::advice::{AdviceBinding, AdviceChain, Phase};
use crate::error::{InvocationError, MethodResult};
use crate::factory::AopFactory;
use crate::joinpoint::JoinPoint;

/// 异步方法体
pub type AsyncFn =
    Arc<dyn Fn(CallContext, Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// 同步方法体
pub type SyncFn = Arc<dyn Fn(&CallContext, Vec<Value>) -> anyhow::Result<Value> + Send + Sync>;

/// 被代理的原始方法
#[derive(Clone)]
pub enum Method {
    /// 返回 future 的方法，每一步都会被 await
    Async(AsyncFn),
    /// 内联执行的方法
    Sync(SyncFn),
}

impl Method {
    pub fn asynchronous<F, Fut>(body: F) -> Self
    where
        F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let body: AsyncFn = Arc::new(
            move |ctx: CallContext, args: Vec<Value>| -> BoxFuture<'static, anyhow::Result<Value>> {
                Box::pin(body(ctx, args))
            },
        );
        Method::Async(body)
    }

    pub fn synchronous<F>(body: F) -> Self
    where
        F: Fn(&CallContext, Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Method::Sync(Arc::new(body))
    }

    /// 把异步方法绑定到目标实例
    ///
    /// ```ignore
    /// Method::bind_async(&service, |svc, ctx, args| async move { svc.debit(&ctx, args).await })
    /// ```
    pub fn bind_async<T, F, Fut>(target: &Arc<T>, body: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>, CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let target = Arc::clone(target);
        Self::asynchronous(move |ctx, args| body(Arc::clone(&target), ctx, args))
    }

    /// 把同步方法绑定到目标实例
    pub fn bind_sync<T, F>(target: &Arc<T>, body: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T, &CallContext, Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let target = Arc::clone(target);
        Self::synchronous(move |ctx: &CallContext, args| body(&*target, ctx, args))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Method::Async(_))
    }

    async fn invoke(&self, ctx: CallContext, args: Vec<Value>) -> anyhow::Result<Value> {
        match self {
            Method::Async(body) => body(ctx, args).await,
            Method::Sync(body) => body(&ctx, args),
        }
    }
}

/// 一次调用内的事务进出状态
struct TxScope<'a> {
    manager: Option<&'a TransactionContextManager>,
    entered: bool,
    exited: bool,
}

impl<'a> TxScope<'a> {
    fn new(manager: Option<&'a TransactionContextManager>) -> Self {
        Self {
            manager,
            entered: false,
            exited: false,
        }
    }

    async fn enter(&mut self, ctx: &CallContext) -> TxResult<()> {
        if let Some(manager) = self.manager {
            manager.enter(ctx).await?;
            self.entered = true;
        }
        Ok(())
    }

    /// 只在已进入且尚未退出时生效
    async fn exit(&mut self, ctx: &CallContext, outcome: Outcome) -> TxResult<Option<Settlement>> {
        match self.manager {
            Some(manager) if self.entered && !self.exited => {
                self.exited = true;
                manager.exit(ctx, outcome).await.map(Some)
            }
            _ => Ok(None),
        }
    }
}

/// 方法代理
pub struct ProxiedMethod {
    factory: Arc<AopFactory>,
    instance: Arc<str>,
    method: Arc<str>,
    original: Method,
    chain: OnceCell<Arc<AdviceChain>>,
}

impl ProxiedMethod {
    pub(crate) fn new(factory: Arc<AopFactory>, instance: &str, method: &str, original: Method) -> Self {
        Self {
            factory,
            instance: Arc::from(instance),
            method: Arc::from(method),
            original,
            chain: OnceCell::new(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn signature(&self) -> String {
        format!("{}.{}", self.instance, self.method)
    }

    /// 通知链，首次访问时解析，之后在代理的生命周期内保持不变
    pub fn chain(&self) -> &Arc<AdviceChain> {
        self.chain
            .get_or_init(|| self.factory.get_advices(&self.instance, &self.method))
    }

    /// 调用被代理的方法
    pub async fn call(&self, ctx: &CallContext, args: Vec<Value>) -> MethodResult {
        let chain = Arc::clone(self.chain());
        if chain.is_empty() {
            return self
                .original
                .invoke(ctx.clone(), args)
                .await
                .map_err(InvocationError::Method);
        }

        tracing::trace!(thread = %ctx.thread_id(), "Intercepting {}", self.signature());
        let manager = if chain.has_transaction {
            self.factory.transactions().map(|manager| manager.as_ref())
        } else {
            None
        };
        let mut tx = TxScope::new(manager);
        let mut join_point = JoinPoint::new(
            Arc::clone(&self.instance),
            Arc::clone(&self.method),
            args,
            ctx.clone(),
        );

        if let Err(error) = self.proceed(&chain, &mut join_point, &mut tx).await {
            tracing::trace!(thread = %ctx.thread_id(), "{} failed: {}", self.signature(), error);
            let rollback = tx.exit(ctx, Outcome::Failure).await;
            join_point.fail(error);
            if let Err(rollback_error) = rollback {
                self.suppressed(Phase::AfterThrowing, rollback_error.into());
            }
            if let Err(advice_error) = self.run_bucket(&chain.throws, Phase::AfterThrowing, &mut join_point).await {
                self.suppressed(Phase::AfterThrowing, advice_error);
            }
        }

        if let Err(advice_error) = self.run_bucket(&chain.after, Phase::After, &mut join_point).await {
            if let Some(rejected) = join_point.fail(advice_error) {
                self.suppressed(Phase::After, rejected);
            }
        }

        join_point.into_result()
    }

    async fn proceed(
        &self,
        chain: &AdviceChain,
        join_point: &mut JoinPoint,
        tx: &mut TxScope<'_>,
    ) -> Result<(), InvocationError> {
        let ctx = join_point.context().clone();

        tx.enter(&ctx).await?;
        self.run_bucket(&chain.before, Phase::Before, join_point).await?;

        let value = self
            .original
            .invoke(ctx.clone(), join_point.args().to_vec())
            .await?;
        join_point.set_return_value(value);

        tx.exit(&ctx, Outcome::Success).await?;
        self.run_bucket(&chain.returns, Phase::AfterReturning, join_point).await
    }

    /// 依次执行一个桶中的通知，遇到错误立即停止
    async fn run_bucket(
        &self,
        bucket: &[AdviceBinding],
        phase: Phase,
        join_point: &mut JoinPoint,
    ) -> Result<(), InvocationError> {
        join_point.set_phase(phase);
        for binding in bucket {
            let aspect = self.factory.resolve_aspect(&binding.aspect)?;
            tracing::trace!("  ├─ {} advice {}.{}", phase, binding.aspect, binding.method);
            aspect
                .advise(&binding.method, join_point)
                .await
                .map_err(|source| InvocationError::Advice {
                    aspect: binding.aspect.clone(),
                    method: binding.method.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// 记录在第一个错误之后出现的错误
    fn suppressed(&self, phase: Phase, error: InvocationError) {
        tracing::error!(
            error = &error as &(dyn std::error::Error + 'static),
            "Error during {} phase of {} was suppressed by an earlier error",
            phase,
            self.signature()
        );
    }
}

impl std::fmt::Debug for ProxiedMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxiedMethod")
            .field("signature", &self.signature())
            .field("async", &self.original.is_async())
            .field("chain", &self.chain.get())
            .finish()
    }
}
