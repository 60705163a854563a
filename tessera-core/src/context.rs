//! 逻辑线程调用上下文
//!
//! 每个入站工作单元（例如一次请求）在进入任何事务方法之前分配一个新的逻辑线程 id。
//! 该 id 不依赖任务本地存储隐式传播，而是通过 `CallContext` 显式传给调用链中的每个代理方法。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 逻辑线程 id
///
/// 由 [`LogicalThreads`] 单调递增分配，进程生命周期内不会复用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalThreadId(u64);

impl LogicalThreadId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogicalThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lt-{}", self.0)
    }
}

/// 调用上下文
///
/// 一个工作单元内的所有调用共享同一个上下文（克隆代价很低）。
#[derive(Debug, Clone)]
pub struct CallContext {
    thread_id: LogicalThreadId,
    label: Option<Arc<str>>,
    started_at: Instant,
}

impl CallContext {
    fn new(thread_id: LogicalThreadId, label: Option<Arc<str>>) -> Self {
        Self {
            thread_id,
            label,
            started_at: Instant::now(),
        }
    }

    /// 逻辑线程 id
    pub fn thread_id(&self) -> LogicalThreadId {
        self.thread_id
    }

    /// 工作单元标签（例如请求路径）
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// 自工作单元开始以来经过的时间
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// 工作单元的 tracing span
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "unit_of_work",
            thread = %self.thread_id,
            label = self.label().unwrap_or_default()
        )
    }
}

/// 逻辑线程 id 分配器
///
/// 由应用启动代码持有，每个入站工作单元调用一次 [`LogicalThreads::next_context`]。
#[derive(Debug)]
pub struct LogicalThreads {
    next: AtomicU64,
}

impl LogicalThreads {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// 为新的工作单元分配上下文
    pub fn next_context(&self) -> CallContext {
        CallContext::new(self.allocate(), None)
    }

    /// 为新的工作单元分配带标签的上下文
    pub fn next_labeled(&self, label: impl Into<String>) -> CallContext {
        let label: String = label.into();
        CallContext::new(self.allocate(), Some(Arc::from(label)))
    }

    /// 已分配的上下文数量
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - 1
    }

    fn allocate(&self) -> LogicalThreadId {
        LogicalThreadId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for LogicalThreads {
    fn default() -> Self {
        Self::new()
    }
}
