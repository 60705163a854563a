//! 通知（Advice）定义
//!
//! 通知绑定把某个切点与切面上的一个方法关联起来，通知链是针对单个 `实例.方法`
//! 按桶划分后的绑定集合。

use std::fmt;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdviceType {
    /// 前置通知
    Before,
    /// 后置通知（无论成功还是失败都执行）
    After,
    /// 返回后通知（成功返回时执行）
    AfterReturning,
    /// 异常通知（抛出异常时执行）
    AfterThrowing,
    /// 环绕通知（在前置与后置两端各执行一次）
    Around,
}

/// 通知执行阶段，环绕通知据此区分两端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Before,
    AfterReturning,
    AfterThrowing,
    After,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Before => "before",
            Phase::AfterReturning => "returning",
            Phase::AfterThrowing => "throwing",
            Phase::After => "after",
        };
        f.write_str(name)
    }
}

/// 通知绑定，不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdviceBinding {
    pub advice_type: AdviceType,
    /// 所属切点 id
    pub pointcut: String,
    /// 目标切面名称（在实例注册表中查找）
    pub aspect: String,
    /// 切面上的通知方法名
    pub method: String,
}

impl AdviceBinding {
    pub fn new(
        advice_type: AdviceType,
        pointcut: impl Into<String>,
        aspect: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            advice_type,
            pointcut: pointcut.into(),
            aspect: aspect.into(),
            method: method.into(),
        }
    }

    pub fn before(pointcut: impl Into<String>, aspect: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(AdviceType::Before, pointcut, aspect, method)
    }

    pub fn after(pointcut: impl Into<String>, aspect: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(AdviceType::After, pointcut, aspect, method)
    }

    pub fn after_returning(
        pointcut: impl Into<String>,
        aspect: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self::new(AdviceType::AfterReturning, pointcut, aspect, method)
    }

    pub fn after_throwing(
        pointcut: impl Into<String>,
        aspect: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self::new(AdviceType::AfterThrowing, pointcut, aspect, method)
    }

    pub fn around(pointcut: impl Into<String>, aspect: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(AdviceType::Around, pointcut, aspect, method)
    }
}

impl fmt::Display for AdviceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({}.{} @ {})", self.advice_type, self.aspect, self.method, self.pointcut)
    }
}

/// 通知链
///
/// 环绕通知按声明顺序排在 `before` 的最前面、`after` 的最后面，
/// 普通的前置与后置通知总是在环绕边界之内执行。
#[derive(Debug, Clone, Default)]
pub struct AdviceChain {
    pub before: Vec<AdviceBinding>,
    pub after: Vec<AdviceBinding>,
    pub returns: Vec<AdviceBinding>,
    pub throws: Vec<AdviceBinding>,
    /// 是否匹配事务切点
    pub has_transaction: bool,
}

impl AdviceChain {
    /// 没有任何通知且不需要事务
    pub fn is_empty(&self) -> bool {
        !self.has_transaction
            && self.before.is_empty()
            && self.after.is_empty()
            && self.returns.is_empty()
            && self.throws.is_empty()
    }

    pub fn len(&self) -> usize {
        self.before.len() + self.after.len() + self.returns.len() + self.throws.len()
    }
}

/// 按类型分桶，并把环绕通知折叠到前置与后置两端
#[derive(Default)]
pub(crate) struct ChainBuilder {
    around: Vec<AdviceBinding>,
    chain: AdviceChain,
}

impl ChainBuilder {
    pub(crate) fn push(&mut self, binding: &AdviceBinding) {
        let bucket = match binding.advice_type {
            AdviceType::Before => &mut self.chain.before,
            AdviceType::After => &mut self.chain.after,
            AdviceType::AfterReturning => &mut self.chain.returns,
            AdviceType::AfterThrowing => &mut self.chain.throws,
            AdviceType::Around => &mut self.around,
        };
        bucket.push(binding.clone());
    }

    pub(crate) fn transactional(&mut self) {
        self.chain.has_transaction = true;
    }

    pub(crate) fn build(self) -> AdviceChain {
        let ChainBuilder { around, mut chain } = self;
        if !around.is_empty() {
            let mut before = around.clone();
            before.append(&mut chain.before);
            chain.before = before;
            chain.after.extend(around);
        }
        chain
    }
}
