//! 切点表达式
//!
//! 表达式匹配 `"<实例名>.<方法名>"` 形式的主体，`*` 匹配任意字符序列（包括空串）：
//! - `*` - 匹配所有方法
//! - `UserService.*` - UserService 的所有方法
//! - `*Service.find*` - 所有以 Service 结尾的实例上以 find 开头的方法
//!
//! 其余字符按字面匹配。

use std::fmt;

use regex::{Regex, RegexBuilder};

use crate::error::{AopResult, ConfigurationError};

/// 锚定方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Anchor {
    /// 在主体中任意位置出现即可
    None,
    /// 从主体开头匹配
    Left,
    /// 匹配到主体结尾
    Right,
    /// 完整匹配
    #[default]
    Both,
}

/// 编译后的匹配表达式，不可变
#[derive(Clone)]
pub struct MatchExpression {
    raw: String,
    regex: Regex,
}

impl MatchExpression {
    /// 原始表达式
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, subject: &str) -> bool {
        self.regex.is_match(subject)
    }
}

impl fmt::Debug for MatchExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MatchExpression").field(&self.raw).finish()
    }
}

impl fmt::Display for MatchExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// 编译表达式
///
/// `pointcut` 只用于错误信息。
pub fn compile(pointcut: &str, raw: &str, anchor: Anchor) -> AopResult<MatchExpression> {
    if raw.trim().is_empty() {
        return Err(malformed(pointcut, "expression is blank"));
    }

    let mut pattern = String::with_capacity(raw.len() + 8);
    if matches!(anchor, Anchor::Left | Anchor::Both) {
        pattern.push('^');
    }
    for (i, literal) in raw.split('*').enumerate() {
        if i > 0 {
            pattern.push_str(".*");
        }
        pattern.push_str(&regex::escape(literal));
    }
    if matches!(anchor, Anchor::Right | Anchor::Both) {
        pattern.push('$');
    }

    // `*` 也要跨越换行
    let regex = RegexBuilder::new(&pattern)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| malformed(pointcut, e.to_string()))?;
    Ok(MatchExpression {
        raw: raw.to_string(),
        regex,
    })
}

/// 编译一组完整匹配的表达式
pub fn compile_all(pointcut: &str, raws: &[&str]) -> AopResult<Vec<MatchExpression>> {
    raws.iter()
        .map(|raw| compile(pointcut, raw, Anchor::Both))
        .collect()
}

/// 编译配置文件中的表达式列表，元素必须是字符串
pub fn compile_values(pointcut: &str, values: &[toml::Value]) -> AopResult<Vec<MatchExpression>> {
    values
        .iter()
        .map(|value| match value.as_str() {
            Some(raw) => compile(pointcut, raw, Anchor::Both),
            None => Err(malformed(
                pointcut,
                format!("expected a string, found {} `{}`", value.type_str(), value),
            )),
        })
        .collect()
}

fn malformed(pointcut: &str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::MalformedExpression {
        pointcut: pointcut.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(raw: &str) -> MatchExpression {
        compile("test", raw, Anchor::Both).unwrap()
    }

    #[test]
    fn test_wildcard_matches_any_sequence() {
        let all = full("*");
        assert!(all.matches(""));
        assert!(all.matches("Svc.save"));

        let expr = full("Svc.*");
        assert!(expr.matches("Svc.save"));
        assert!(expr.matches("Svc."));
        assert!(!expr.matches("OtherSvc.save"));
        assert!(!expr.matches("Svc"));

        let expr = full("*Service.find*");
        assert!(expr.matches("UserService.find"));
        assert!(expr.matches("Service.findById"));
        assert!(!expr.matches("UserService.save"));
    }

    #[test]
    fn test_wildcard_spans_line_breaks() {
        assert!(full("Svc.*").matches("Svc.a\nb"));
        assert!(full("*").matches("\n"));
        assert!(full("*.save").matches("Multi\nLine.save"));
        assert!(!full("Svc.save").matches("Svc.save\n"));
    }

    #[test]
    fn test_literals_are_escaped() {
        let expr = full("Svc.save");
        assert!(expr.matches("Svc.save"));
        assert!(!expr.matches("SvcXsave"));

        let expr = full("/api/users+(v1)");
        assert!(expr.matches("/api/users+(v1)"));
        assert!(!expr.matches("/api/userss(v1)"));
    }

    #[test]
    fn test_anchors() {
        let none = compile("test", "Svc", Anchor::None).unwrap();
        assert!(none.matches("MySvc.save"));

        let left = compile("test", "Svc", Anchor::Left).unwrap();
        assert!(left.matches("Svc.save"));
        assert!(!left.matches("MySvc.save"));

        let right = compile("test", "save", Anchor::Right).unwrap();
        assert!(right.matches("Svc.save"));
        assert!(!right.matches("Svc.saveAll"));

        let both = full("Svc");
        assert!(!both.matches("Svc.save"));
    }

    #[test]
    fn test_blank_expression_names_pointcut() {
        let err = compile("audit", "  ", Anchor::Both).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MalformedExpression { ref pointcut, .. } if pointcut == "audit"
        ));
    }

    #[test]
    fn test_compile_values() {
        let values = vec![
            toml::Value::String("Svc.*".into()),
            toml::Value::String("Repo.save".into()),
        ];
        let compiled = compile_values("audit", &values).unwrap();
        assert_eq!(compiled.len(), 2);
        assert_eq!(compiled[1].raw(), "Repo.save");

        let values = vec![toml::Value::String("Svc.*".into()), toml::Value::Integer(7)];
        let err = compile_values("audit", &values).unwrap_err();
        match err {
            ConfigurationError::MalformedExpression { pointcut, reason } => {
                assert_eq!(pointcut, "audit");
                assert!(reason.contains("integer"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_compile_all() {
        let compiled = compile_all("p", &["A.*", "B.run"]).unwrap();
        assert_eq!(compiled.iter().map(|e| e.raw()).collect::<Vec<_>>(), vec!["A.*", "B.run"]);
        assert!(compile_all("p", &["A.*", ""]).is_err());
    }
}
