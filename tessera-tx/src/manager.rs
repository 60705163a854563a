//! 事务上下文管理器
//!
//! 以逻辑线程 id 为键，每个逻辑线程最多关联一个活动事务：
//!
//! ```text
//! Absent --enter--> Active(nesting=1, begin) --enter--> nesting+1
//!                          |                             |
//!                          |<---------exit(nesting>1)----|  只参与，不结算
//!                          |
//!                     exit(nesting==1)
//!                          |-- Success --> commit   --> 归还连接, 移除 --> Absent
//!                          '-- Failure --> rollback --> 归还连接, 移除 --> Absent
//! ```
//!
//! 嵌套计数是决定由谁结算事务的唯一机制。计数保存在映射项中，与映射一起由同一把
//! 互斥锁保护，嵌套的进入和退出从不等待事务锁，方法可以持有事务会话调用其他事务方法。
//! 映射表是不同逻辑线程之间唯一共享的可变状态，互斥锁只在映射操作期间持有，不跨越 await。

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tessera_core::{CallContext, LogicalThreadId};
use tokio::sync::watch;

use crate::driver::TransactionDriver;
use crate::error::{TxError, TxResult};
use crate::transaction::{Transaction, TransactionId};

/// 在同一逻辑线程的嵌套调用之间共享的事务
pub type SharedTransaction = Arc<tokio::sync::Mutex<Transaction>>;

/// 调用结果，决定最外层退出时提交还是回滚
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// 一次 `exit` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// 嵌套调用退出，事务仍处于活动状态
    Participated { depth: usize },
    Committed,
    RolledBack,
}

/// begin 的进展：`None` 进行中，`Some(true)` 已开始，`Some(false)` 失败
type Readiness = watch::Receiver<Option<bool>>;

/// 映射项
struct ActiveTransaction {
    id: TransactionId,
    transaction: SharedTransaction,
    nesting: usize,
    ready: Readiness,
}

/// 一次 `enter` 在映射锁内做出的决定
enum Admission {
    Started {
        id: TransactionId,
        transaction: SharedTransaction,
        ready: watch::Sender<Option<bool>>,
    },
    Joined {
        id: TransactionId,
        depth: usize,
        ready: Readiness,
    },
}

/// 事务上下文管理器
pub struct TransactionContextManager {
    driver: Arc<dyn TransactionDriver>,
    active: Mutex<HashMap<LogicalThreadId, ActiveTransaction>>,
    next_id: AtomicU64,
}

impl TransactionContextManager {
    pub fn new(driver: Arc<dyn TransactionDriver>) -> Self {
        Self {
            driver,
            active: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn driver(&self) -> &Arc<dyn TransactionDriver> {
        &self.driver
    }

    /// 进入事务方法
    ///
    /// 逻辑线程没有活动事务时创建事务、获取连接并 begin；否则只增加嵌套计数。
    /// 返回进入后的嵌套深度。begin 失败时连接被归还、映射项被移除。
    ///
    /// 同一逻辑线程的并发进入会等待正在进行的 begin；begin 失败时它们各自重新开始。
    pub async fn enter(&self, ctx: &CallContext) -> TxResult<usize> {
        let thread = ctx.thread_id();
        loop {
            match self.admit(thread) {
                Admission::Started {
                    id,
                    transaction,
                    ready,
                } => return self.start(thread, id, transaction, ready).await,
                Admission::Joined {
                    id,
                    depth,
                    mut ready,
                } => {
                    let begun = match ready.wait_for(Option::is_some).await {
                        Ok(state) => *state == Some(true),
                        Err(_) => {
                            // 开始事务的调用被放弃，begin 不会再有结果
                            self.withdraw(thread, id);
                            return Err(TxError::Abandoned(id));
                        }
                    };
                    if begun {
                        tracing::trace!(transaction = %id, thread = %thread, depth, "Joined active transaction");
                        return Ok(depth);
                    }
                    tracing::debug!(transaction = %id, thread = %thread, "Joined transaction failed to begin, starting over");
                }
            }
        }
    }

    /// 在映射锁内加入已有事务，或登记一个新事务
    fn admit(&self, thread: LogicalThreadId) -> Admission {
        match self.active.lock().entry(thread) {
            Entry::Occupied(mut entry) => {
                let active = entry.get_mut();
                active.nesting += 1;
                Admission::Joined {
                    id: active.id,
                    depth: active.nesting,
                    ready: active.ready.clone(),
                }
            }
            Entry::Vacant(entry) => {
                let id = TransactionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
                let transaction: SharedTransaction = Arc::new(tokio::sync::Mutex::new(
                    Transaction::new(id, Arc::clone(&self.driver)),
                ));
                let (sender, receiver) = watch::channel(None);
                entry.insert(ActiveTransaction {
                    id,
                    transaction: Arc::clone(&transaction),
                    nesting: 1,
                    ready: receiver,
                });
                Admission::Started {
                    id,
                    transaction,
                    ready: sender,
                }
            }
        }
    }

    async fn start(
        &self,
        thread: LogicalThreadId,
        id: TransactionId,
        transaction: SharedTransaction,
        ready: watch::Sender<Option<bool>>,
    ) -> TxResult<usize> {
        let mut tx = transaction.lock().await;
        let started = match tx.acquire().await {
            Ok(()) => tx.begin().await,
            Err(err) => Err(err),
        };

        if let Err(err) = started {
            // 先移除映射项，再通知等待者，等待者不会再加入这个事务
            self.remove(thread, id);
            ready.send_replace(Some(false));
            if let Err(release_err) = tx.release().await {
                tracing::warn!(transaction = %id, thread = %thread, error = &release_err as &(dyn std::error::Error + 'static), "Failed to release connection after failed begin");
            }
            tracing::warn!(transaction = %id, thread = %thread, error = &err as &(dyn std::error::Error + 'static), "Transaction failed to begin");
            return Err(err);
        }
        drop(tx);
        ready.send_replace(Some(true));

        tracing::debug!(
            transaction = %id,
            thread = %thread,
            driver = self.driver.name(),
            "Transaction begun"
        );
        Ok(1)
    }

    /// 撤回一次未完成的加入
    fn withdraw(&self, thread: LogicalThreadId, id: TransactionId) {
        let mut active = self.active.lock();
        if let Some(entry) = active.get_mut(&thread).filter(|entry| entry.id == id) {
            entry.nesting = entry.nesting.saturating_sub(1);
        }
    }

    /// 移除映射项，映射项已属于另一个事务时保持不变
    fn remove(&self, thread: LogicalThreadId, id: TransactionId) {
        let mut active = self.active.lock();
        if active.get(&thread).is_some_and(|entry| entry.id == id) {
            active.remove(&thread);
        }
    }

    /// 退出事务方法
    ///
    /// 嵌套层数大于 1 时只减少计数；最外层退出时先移除映射项，再按 `outcome`
    /// 提交或回滚并归还连接。提交失败时会尝试回滚，并返回提交错误。
    pub async fn exit(&self, ctx: &CallContext, outcome: Outcome) -> TxResult<Settlement> {
        let thread = ctx.thread_id();
        let (id, shared) = {
            let mut active = self.active.lock();
            let entry = active
                .get_mut(&thread)
                .ok_or(TxError::NoActiveTransaction(thread))?;
            entry.nesting = entry.nesting.saturating_sub(1);
            if entry.nesting > 0 {
                let depth = entry.nesting;
                tracing::trace!(transaction = %entry.id, thread = %thread, depth, ?outcome, "Left nested transactional call");
                return Ok(Settlement::Participated { depth });
            }
            // 结算之前移除，同一逻辑线程随后的进入会开始新事务，不会加入正在结算的事务
            match active.remove(&thread) {
                Some(entry) => (entry.id, entry.transaction),
                None => return Err(TxError::NoActiveTransaction(thread)),
            }
        };

        let mut tx = shared.lock().await;
        let settled = match outcome {
            Outcome::Success => match tx.commit().await {
                Ok(()) => Ok(Settlement::Committed),
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::error!(transaction = %id, error = &rollback_err as &(dyn std::error::Error + 'static), "Rollback after failed commit also failed");
                    }
                    Err(err)
                }
            },
            Outcome::Failure => tx.rollback().await.map(|()| Settlement::RolledBack),
        };

        if let Err(err) = tx.release().await {
            tracing::warn!(transaction = %id, thread = %thread, error = &err as &(dyn std::error::Error + 'static), "Failed to release connection");
        }
        drop(tx);

        match &settled {
            Ok(settlement) => {
                tracing::info!(transaction = %id, thread = %thread, "Transaction settled: {:?}", settlement)
            }
            Err(err) => {
                tracing::error!(transaction = %id, thread = %thread, error = err as &(dyn std::error::Error + 'static), "Transaction failed to settle")
            }
        }
        settled
    }

    /// 当前逻辑线程的活动事务
    pub fn current(&self, ctx: &CallContext) -> Option<SharedTransaction> {
        self.active
            .lock()
            .get(&ctx.thread_id())
            .map(|entry| Arc::clone(&entry.transaction))
    }

    /// 当前逻辑线程的嵌套深度，没有活动事务时为 `None`
    pub fn depth(&self, ctx: &CallContext) -> Option<usize> {
        self.active.lock().get(&ctx.thread_id()).map(|entry| entry.nesting)
    }

    pub fn is_active(&self, ctx: &CallContext) -> bool {
        self.active.lock().contains_key(&ctx.thread_id())
    }

    /// 活动事务数量
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// 回滚并清理所有遗留的事务
    ///
    /// 被调用方放弃的挂起调用会留下映射项，进程关闭时调用此方法。返回清理的数量。
    pub async fn shutdown(&self) -> usize {
        let orphans: Vec<_> = self.active.lock().drain().collect();
        for (thread, entry) in &orphans {
            let mut tx = entry.transaction.lock().await;
            tracing::warn!(transaction = %entry.id, thread = %thread, nesting = entry.nesting, "Rolling back orphaned transaction");
            if tx.is_begun() {
                if let Err(err) = tx.rollback().await {
                    tracing::error!(transaction = %entry.id, error = &err as &(dyn std::error::Error + 'static), "Failed to roll back orphaned transaction");
                }
            }
            if let Err(err) = tx.release().await {
                tracing::warn!(transaction = %entry.id, error = &err as &(dyn std::error::Error + 'static), "Failed to release orphaned connection");
            }
        }
        orphans.len()
    }
}
