//! 运行时配置
//!
//! 配置文件使用 TOML 格式，所有段都是可选的：
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [aop]
//! trace = ["*Service.*"]
//!
//! [[aop.pointcuts]]
//! id = "audit"
//! expressions = ["AccountService.*"]
//!
//! [transaction]
//! enabled = true
//! driver = "memory"
//! expressions = ["AccountService.transfer*"]
//! ```
//!
//! 切点表达式保留为原始的 `toml::Value`，由 AOP 层校验并在出错时报告所属切点 id。

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{CoreError, CoreResult};
use crate::logging::LoggingConfig;

/// 运行时配置根
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// 应用名称
    pub name: Option<String>,

    /// 缺少 `[logging]` 段时从环境变量读取
    #[serde(default = "LoggingConfig::from_env")]
    pub logging: LoggingConfig,

    pub aop: AopSection,

    pub transaction: TransactionSection,
}

/// `[aop]` 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AopSection {
    /// 是否加载声明式切面与配置中的切点
    pub enabled: bool,

    /// 由内置 tracing 切面记录进入/退出日志的表达式
    pub trace: Vec<toml::Value>,

    /// 配置中声明的切点
    pub pointcuts: Vec<PointcutSection>,
}

impl Default for AopSection {
    fn default() -> Self {
        Self {
            enabled: true,
            trace: Vec::new(),
            pointcuts: Vec::new(),
        }
    }
}

/// `[[aop.pointcuts]]` 条目
#[derive(Debug, Clone, Deserialize)]
pub struct PointcutSection {
    pub id: String,

    #[serde(default)]
    pub expressions: Vec<toml::Value>,
}

/// `[transaction]` 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransactionSection {
    pub enabled: bool,

    /// 驱动适配器名称，在驱动注册表中查找
    pub driver: String,

    /// 事务切点 id
    pub pointcut: String,

    /// 需要事务的方法表达式
    pub expressions: Vec<toml::Value>,
}

impl Default for TransactionSection {
    fn default() -> Self {
        Self {
            enabled: false,
            driver: "memory".to_string(),
            pointcut: "transaction".to_string(),
            expressions: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// 从 TOML 字符串解析
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: Self = toml::from_str(content)?;
        tracing::debug!(
            "Loaded runtime config: {} pointcut(s), transactions {}",
            config.aop.pointcuts.len(),
            if config.transaction.enabled { "enabled" } else { "disabled" }
        );
        Ok(config)
    }

    /// 从文件加载
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| CoreError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}
