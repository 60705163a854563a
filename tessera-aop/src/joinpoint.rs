//! 连接点（JoinPoint）定义
//!
//! 一次被代理调用的上下文记录，以 `&mut` 依次传给每个通知。通知可以读取参数、
//! 观察或替换返回值、观察错误，但无法再次进入目标方法。

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tessera_core::CallContext;

use crate::advice::Phase;
use crate::error::{InvocationError, MethodResult};

/// 连接点信息
pub struct JoinPoint {
    instance: Arc<str>,
    method: Arc<str>,
    args: Vec<Value>,
    return_value: Option<Value>,
    error: Option<InvocationError>,
    phase: Phase,
    context: CallContext,
    timestamp: Instant,
}

impl JoinPoint {
    pub(crate) fn new(instance: Arc<str>, method: Arc<str>, args: Vec<Value>, context: CallContext) -> Self {
        Self {
            instance,
            method,
            args,
            return_value: None,
            error: None,
            phase: Phase::Before,
            context,
            timestamp: Instant::now(),
        }
    }

    /// 目标实例名称
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// 方法名称
    pub fn method(&self) -> &str {
        &self.method
    }

    /// 完整的方法签名，如 `Svc.save`
    pub fn signature(&self) -> String {
        format!("{}.{}", self.instance, self.method)
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// 目标方法的返回值（可能已被通知替换）
    pub fn return_value(&self) -> Option<&Value> {
        self.return_value.as_ref()
    }

    /// 替换返回值
    pub fn set_return_value(&mut self, value: Value) {
        self.return_value = Some(value);
    }

    /// 已观察到的错误
    pub fn error(&self) -> Option<&InvocationError> {
        self.error.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// 当前执行的通知阶段
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn context(&self) -> &CallContext {
        &self.context
    }

    /// 调用开始时间
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// 记录错误，只保留第一个
    pub(crate) fn fail(&mut self, error: InvocationError) -> Option<InvocationError> {
        if self.error.is_some() {
            return Some(error);
        }
        self.error = Some(error);
        None
    }

    pub(crate) fn into_result(self) -> MethodResult {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.return_value.unwrap_or(Value::Null)),
        }
    }
}

impl fmt::Debug for JoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinPoint")
            .field("signature", &self.signature())
            .field("args", &self.args)
            .field("return_value", &self.return_value)
            .field("error", &self.error.as_ref().map(|e| e.to_string()))
            .field("phase", &self.phase)
            .field("thread", &self.context.thread_id())
            .finish()
    }
}

impl fmt::Display for JoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.instance, self.method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;
    use tessera_core::LogicalThreads;

    fn join_point() -> JoinPoint {
        let ctx = LogicalThreads::new().next_context();
        JoinPoint::new("Svc".into(), "save".into(), vec![json!("x")], ctx)
    }

    #[test]
    fn test_signature_and_args() {
        let jp = join_point();
        assert_eq!(jp.signature(), "Svc.save");
        assert_eq!(jp.to_string(), "Svc.save");
        assert_eq!(jp.arg(0), Some(&json!("x")));
        assert!(jp.arg(1).is_none());
        assert_eq!(jp.phase(), Phase::Before);
    }

    #[test]
    fn test_return_value_is_replaceable() {
        let mut jp = join_point();
        jp.set_return_value(json!(42));
        jp.set_return_value(json!(84));
        assert_eq!(jp.into_result().unwrap(), json!(84));

        assert_eq!(join_point().into_result().unwrap(), Value::Null);
    }

    #[test]
    fn test_first_error_wins() {
        let mut jp = join_point();
        assert!(jp.fail(InvocationError::Method(anyhow!("first"))).is_none());

        let rejected = jp.fail(InvocationError::Method(anyhow!("second")));
        assert_eq!(rejected.unwrap().to_string(), "second");
        assert!(jp.is_failed());

        jp.set_return_value(json!(1));
        assert_eq!(jp.into_result().unwrap_err().to_string(), "first");
    }
}
