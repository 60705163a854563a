//! 切点（Pointcut）
//!
//! 切点由 id 唯一标识，持有按顺序追加的表达式与通知绑定。

use crate::advice::AdviceBinding;
use crate::expression::MatchExpression;

/// 切点
#[derive(Debug, Clone)]
pub struct Pointcut {
    id: String,
    aspect: Option<String>,
    expressions: Vec<MatchExpression>,
    advices: Vec<AdviceBinding>,
    transactional: bool,
}

impl Pointcut {
    pub(crate) fn new(id: impl Into<String>, aspect: Option<String>) -> Self {
        Self {
            id: id.into(),
            aspect,
            expressions: Vec::new(),
            advices: Vec::new(),
            transactional: false,
        }
    }

    /// 事务切点：匹配的方法只获得事务语义，不参与普通通知链
    pub(crate) fn transaction(id: impl Into<String>) -> Self {
        Self {
            transactional: true,
            ..Self::new(id, None)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 声明该切点的切面
    pub fn aspect(&self) -> Option<&str> {
        self.aspect.as_deref()
    }

    pub fn expressions(&self) -> &[MatchExpression] {
        &self.expressions
    }

    pub fn advices(&self) -> &[AdviceBinding] {
        &self.advices
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// 任一表达式匹配 `实例.方法` 即命中
    pub fn matches(&self, subject: &str) -> bool {
        self.expressions.iter().any(|expr| expr.matches(subject))
    }

    pub(crate) fn extend_expressions(&mut self, expressions: impl IntoIterator<Item = MatchExpression>) {
        self.expressions.extend(expressions);
    }

    pub(crate) fn push_advice(&mut self, binding: AdviceBinding) {
        self.advices.push(binding);
    }

    pub(crate) fn claim(&mut self, aspect: &str) {
        if self.aspect.is_none() {
            self.aspect = Some(aspect.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::compile_all;

    #[test]
    fn test_matches_any_expression() {
        let mut pointcut = Pointcut::new("audit", None);
        assert!(!pointcut.matches("Svc.save"));

        pointcut.extend_expressions(compile_all("audit", &["Repo.*", "Svc.save"]).unwrap());
        assert!(pointcut.matches("Svc.save"));
        assert!(pointcut.matches("Repo.find"));
        assert!(!pointcut.matches("Svc.load"));
    }

    #[test]
    fn test_claim_keeps_first_owner() {
        let mut pointcut = Pointcut::new("audit", None);
        pointcut.claim("AuditAspect");
        pointcut.claim("OtherAspect");
        assert_eq!(pointcut.aspect(), Some("AuditAspect"));

        let tx = Pointcut::transaction("transaction");
        assert!(tx.is_transactional());
        assert!(tx.aspect().is_none());
    }
}
