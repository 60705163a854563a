use tessera_core::LogicalThreadId;
use thiserror::Error;

use crate::transaction::TransactionId;

pub type TxResult<T> = Result<T, TxError>;

/// 事务错误
#[derive(Debug, Error)]
pub enum TxError {
    /// 驱动操作失败（获取连接、begin、commit、rollback、归还连接）
    #[error("Driver '{driver}' failed to {operation}")]
    Driver {
        driver: String,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Transaction {0} has already begun")]
    AlreadyBegun(TransactionId),

    #[error("Transaction {0} has not begun")]
    NotBegun(TransactionId),

    #[error("Transaction {0} is already settled")]
    AlreadySettled(TransactionId),

    #[error("Transaction {0} holds no connection")]
    NoConnection(TransactionId),

    #[error("Transaction {0} was abandoned before it began")]
    Abandoned(TransactionId),

    #[error("No active transaction for logical thread {0}")]
    NoActiveTransaction(LogicalThreadId),

    #[error("Unknown transaction driver '{0}'")]
    UnknownDriver(String),
}

impl TxError {
    pub(crate) fn driver(driver: &str, operation: &'static str, source: anyhow::Error) -> Self {
        TxError::Driver {
            driver: driver.to_string(),
            operation,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_chain_prints_cause_once() {
        let err = TxError::driver("memory", "commit", anyhow::anyhow!("disk full"));
        assert_eq!(err.to_string(), "Driver 'memory' failed to commit");

        let chain = format!("{:#}", anyhow::Error::new(err));
        assert_eq!(chain, "Driver 'memory' failed to commit: disk full");
        assert_eq!(chain.matches("disk full").count(), 1);
    }
}
