//! 事务对象
//!
//! 事务在其生命周期内独占驱动连接，并保证 begin 只执行一次、commit 或 rollback 只结算一次。

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::driver::{Connection, TransactionDriver};
use crate::error::{TxError, TxResult};

/// 事务 id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn new(id: u64) -> Self {
        TransactionId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// 事务生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// 已创建，尚未 begin
    Idle,
    Begun,
    Committed,
    RolledBack,
}

/// 事务对象
pub struct Transaction {
    id: TransactionId,
    driver: Arc<dyn TransactionDriver>,
    connection: Option<Connection>,
    state: TransactionState,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, driver: Arc<dyn TransactionDriver>) -> Self {
        Self {
            id,
            driver,
            connection: None,
            state: TransactionState::Idle,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_begun(&self) -> bool {
        self.state == TransactionState::Begun
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn connection_mut(&mut self) -> TxResult<&mut Connection> {
        let id = self.id;
        self.connection.as_mut().ok_or(TxError::NoConnection(id))
    }

    /// 以驱动会话类型访问连接
    ///
    /// ```ignore
    /// let shared = manager.current(&ctx).expect("inside a transactional method");
    /// let mut tx = shared.lock().await;
    /// tx.session_mut::<MemorySession>().unwrap().put("alice", json!(90));
    /// ```
    pub fn session_mut<H: Any>(&mut self) -> Option<&mut H> {
        self.connection.as_mut()?.downcast_mut::<H>()
    }

    /// 从连接管理器获取连接
    pub(crate) async fn acquire(&mut self) -> TxResult<()> {
        if self.connection.is_none() {
            let connection = self
                .driver
                .get_connection()
                .await
                .map_err(|e| TxError::driver(self.driver.name(), "get connection", e))?;
            tracing::trace!(transaction = %self.id, connection = connection.id(), "Connection acquired");
            self.connection = Some(connection);
        }
        Ok(())
    }

    pub(crate) async fn begin(&mut self) -> TxResult<()> {
        if self.state != TransactionState::Idle {
            return Err(TxError::AlreadyBegun(self.id));
        }
        let driver = Arc::clone(&self.driver);
        let connection = self.connection_mut()?;
        driver
            .begin(connection)
            .await
            .map_err(|e| TxError::driver(driver.name(), "begin", e))?;
        self.state = TransactionState::Begun;
        Ok(())
    }

    pub(crate) async fn commit(&mut self) -> TxResult<()> {
        self.ensure_begun()?;
        let driver = Arc::clone(&self.driver);
        let connection = self.connection_mut()?;
        driver
            .commit(connection)
            .await
            .map_err(|e| TxError::driver(driver.name(), "commit", e))?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    pub(crate) async fn rollback(&mut self) -> TxResult<()> {
        self.ensure_begun()?;
        let driver = Arc::clone(&self.driver);
        let connection = self.connection_mut()?;
        driver
            .rollback(connection)
            .await
            .map_err(|e| TxError::driver(driver.name(), "rollback", e))?;
        self.state = TransactionState::RolledBack;
        Ok(())
    }

    /// 归还连接，没有连接时什么都不做
    pub(crate) async fn release(&mut self) -> TxResult<()> {
        match self.connection.take() {
            Some(connection) => self
                .driver
                .release_connection(connection)
                .await
                .map_err(|e| TxError::driver(self.driver.name(), "release connection", e)),
            None => Ok(()),
        }
    }

    fn ensure_begun(&self) -> TxResult<()> {
        match self.state {
            TransactionState::Begun => Ok(()),
            TransactionState::Idle => Err(TxError::NotBegun(self.id)),
            TransactionState::Committed | TransactionState::RolledBack => {
                Err(TxError::AlreadySettled(self.id))
            }
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("driver", &self.driver.name())
            .field("connection", &self.connection)
            .field("state", &self.state)
            .finish()
    }
}
