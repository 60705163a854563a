//! 内存驱动
//!
//! 参考驱动适配器：事务内的写入暂存在连接会话中，commit 时应用到共享存储，
//! rollback 时丢弃。驱动记录所有操作事件，并支持在指定操作上注入故障。

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::driver::{Connection, TransactionDriver};

/// 驱动事件，携带连接 id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverEvent {
    Acquire(u64),
    Begin(u64),
    Commit(u64),
    Rollback(u64),
    Release(u64),
}

/// 可注入故障的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    Connect,
    Begin,
    Commit,
    Rollback,
    Release,
}

/// 内存连接会话
///
/// 通过 `Connection::downcast_mut::<MemorySession>()` 获取。
#[derive(Debug, Default)]
pub struct MemorySession {
    pending: Vec<(String, Option<Value>)>,
    in_transaction: bool,
}

impl MemorySession {
    /// 暂存写入
    pub fn put(&mut self, key: impl Into<String>, value: Value) {
        self.pending.push((key.into(), Some(value)));
    }

    /// 暂存删除
    pub fn delete(&mut self, key: impl Into<String>) {
        self.pending.push((key.into(), None));
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

/// 内存驱动
pub struct MemoryDriver {
    name: String,
    committed: RwLock<BTreeMap<String, Value>>,
    journal: Mutex<Vec<DriverEvent>>,
    failures: Mutex<HashSet<FailurePoint>>,
    next_connection: AtomicU64,
    open_connections: AtomicUsize,
    latency: Option<Duration>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            committed: RwLock::new(BTreeMap::new()),
            journal: Mutex::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
            next_connection: AtomicU64::new(1),
            open_connections: AtomicUsize::new(0),
            latency: None,
        }
    }

    /// 每个驱动操作先等待给定时长，模拟网络往返
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// 让指定操作在之后的调用中失败
    pub fn fail_on(&self, point: FailurePoint) {
        self.failures.lock().insert(point);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// 读取已提交的值
    pub fn get(&self, key: &str) -> Option<Value> {
        self.committed.read().get(key).cloned()
    }

    /// 已提交数据的快照
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.committed.read().clone()
    }

    /// 事件日志
    pub fn journal(&self) -> Vec<DriverEvent> {
        self.journal.lock().clone()
    }

    pub fn begins(&self) -> usize {
        self.count(|e| matches!(e, DriverEvent::Begin(_)))
    }

    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, DriverEvent::Commit(_)))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, DriverEvent::Rollback(_)))
    }

    /// 尚未归还的连接数量
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }

    fn count(&self, predicate: impl Fn(&DriverEvent) -> bool) -> usize {
        self.journal.lock().iter().filter(|e| predicate(e)).count()
    }

    async fn round_trip(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check(&self, point: FailurePoint) -> anyhow::Result<()> {
        if self.failures.lock().contains(&point) {
            bail!("injected {:?} failure", point);
        }
        Ok(())
    }

    fn record(&self, event: DriverEvent) {
        self.journal.lock().push(event);
    }

    fn session(connection: &mut Connection) -> anyhow::Result<&mut MemorySession> {
        let id = connection.id();
        connection
            .downcast_mut::<MemorySession>()
            .ok_or_else(|| anyhow!("connection {} was not opened by a memory driver", id))
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionDriver for MemoryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_connection(&self) -> anyhow::Result<Connection> {
        self.round_trip().await;
        self.check(FailurePoint::Connect)?;
        let id = self.next_connection.fetch_add(1, Ordering::SeqCst);
        self.open_connections.fetch_add(1, Ordering::SeqCst);
        self.record(DriverEvent::Acquire(id));
        Ok(Connection::new(id, MemorySession::default()))
    }

    async fn release_connection(&self, connection: Connection) -> anyhow::Result<()> {
        self.round_trip().await;
        // 连接即使归还失败也视为已离开连接池
        self.open_connections.fetch_sub(1, Ordering::SeqCst);
        self.check(FailurePoint::Release)?;
        self.record(DriverEvent::Release(connection.id()));
        Ok(())
    }

    async fn begin(&self, connection: &mut Connection) -> anyhow::Result<()> {
        self.round_trip().await;
        self.check(FailurePoint::Begin)?;
        let id = connection.id();
        let session = Self::session(connection)?;
        if session.in_transaction {
            bail!("connection {} is already in a transaction", id);
        }
        session.in_transaction = true;
        self.record(DriverEvent::Begin(id));
        Ok(())
    }

    async fn commit(&self, connection: &mut Connection) -> anyhow::Result<()> {
        self.round_trip().await;
        self.check(FailurePoint::Commit)?;
        let id = connection.id();
        let session = Self::session(connection)?;

        let mut committed = self.committed.write();
        for (key, value) in session.pending.drain(..) {
            match value {
                Some(value) => {
                    committed.insert(key, value);
                }
                None => {
                    committed.remove(&key);
                }
            }
        }
        session.in_transaction = false;
        drop(committed);

        self.record(DriverEvent::Commit(id));
        Ok(())
    }

    async fn rollback(&self, connection: &mut Connection) -> anyhow::Result<()> {
        self.round_trip().await;
        self.check(FailurePoint::Rollback)?;
        let id = connection.id();
        let session = Self::session(connection)?;
        session.pending.clear();
        session.in_transaction = false;
        self.record(DriverEvent::Rollback(id));
        Ok(())
    }
}
