use thiserror::Error;

/// 用户代码使用的统一错误类型
///
/// 业务方法和切面通知返回 `anyhow::Result`，通过 `.context()` 添加上下文信息。
pub use anyhow::Result;

/// 核心协作组件的结果类型
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// 实例注册表、配置与日志相关的错误
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Instance '{0}' is already registered")]
    InstanceAlreadyExists(String),

    #[error("Instance '{0}' not found")]
    InstanceNotFound(String),

    #[error("Instance '{name}' is not of type '{expected}'")]
    TypeMismatch {
        name: String,
        expected: &'static str,
    },

    #[error("Failed to read config file '{path}': {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to initialize logging: {0}")]
    LoggingInitFailed(String),
}
