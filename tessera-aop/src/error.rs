use serde_json::Value;
use tessera_core::CoreError;
use tessera_tx::TxError;
use thiserror::Error;

pub type AopResult<T> = Result<T, ConfigurationError>;

/// 被代理方法的调用结果
pub type MethodResult = Result<Value, InvocationError>;

/// 配置错误
///
/// 在注册阶段同步抛出，不做恢复，用于中止启动。
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Malformed expression in pointcut '{pointcut}': {reason}")]
    MalformedExpression { pointcut: String, reason: String },

    #[error("Pointcut '{0}' is already registered")]
    DuplicatePointcut(String),

    #[error("Unknown pointcut '{0}'")]
    UnknownPointcut(String),

    #[error("Transactions are not enabled for this factory")]
    TransactionsNotEnabled,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Driver(#[from] TxError),
}

/// 调用错误
///
/// 目标方法或通知失败，在后置通知链与事务退出执行完之后返回给调用方。
#[derive(Debug, Error)]
pub enum InvocationError {
    /// 目标方法返回的错误
    #[error(transparent)]
    Method(#[from] anyhow::Error),

    #[error("Advice {aspect}.{method} failed")]
    Advice {
        aspect: String,
        method: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Aspect '{0}' is not registered")]
    AspectNotFound(String),

    #[error("No proxied method '{instance}.{method}'")]
    MethodNotFound { instance: String, method: String },

    /// 事务驱动失败（获取连接、begin、commit、rollback）
    #[error(transparent)]
    Driver(#[from] TxError),
}

impl InvocationError {
    /// 错误是否来自事务驱动
    pub fn is_driver(&self) -> bool {
        matches!(self, InvocationError::Driver(_))
    }
}
