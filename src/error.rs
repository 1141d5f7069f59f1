use thiserror::Error;

use super::common::{AccountId, TxId};

/// Closed error taxonomy for the banking core (§4.6 / §7 of the design doc).
///
/// Every variant carries a stable numeric `code()` in addition to its
/// `Display` message, since some callers (wire protocols, metrics) key off
/// the code rather than matching the variant.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("store operation failed: {0}")]
    DbError(Box<dyn std::error::Error + Send + Sync>),

    #[error("account {account} has insufficient balance for this operation")]
    InsufficientBalance { account: AccountId },

    #[error("account {0} does not exist")]
    NonExistingAccount(AccountId),

    #[error("transaction {0} does not exist")]
    NonExistingTransaction(TxId),

    #[error("account {0} is closed")]
    ClosedAccount(AccountId),
}

impl CoreError {
    /// Stable numeric code, see §4.6.
    pub fn code(&self) -> u8 {
        match self {
            CoreError::DbError(_) => 0,
            CoreError::InsufficientBalance { .. } => 1,
            CoreError::NonExistingAccount(_) => 2,
            CoreError::NonExistingTransaction(_) => 3,
            CoreError::ClosedAccount(_) => 4,
        }
    }
}

// redb's database, transaction, table, storage, and commit errors are
// heterogeneous types from the same crate; they all funnel into the single
// `DB_ERROR` variant since the core makes no distinction between them, only
// the store adapter does.
impl From<redb::DatabaseError> for CoreError {
    fn from(e: redb::DatabaseError) -> Self {
        CoreError::DbError(Box::new(e))
    }
}

impl From<redb::TransactionError> for CoreError {
    fn from(e: redb::TransactionError) -> Self {
        CoreError::DbError(Box::new(e))
    }
}

impl From<redb::TableError> for CoreError {
    fn from(e: redb::TableError) -> Self {
        CoreError::DbError(Box::new(e))
    }
}

impl From<redb::StorageError> for CoreError {
    fn from(e: redb::StorageError) -> Self {
        CoreError::DbError(Box::new(e))
    }
}

impl From<redb::CommitError> for CoreError {
    fn from(e: redb::CommitError) -> Self {
        CoreError::DbError(Box::new(e))
    }
}

impl From<bincode::Error> for CoreError {
    fn from(e: bincode::Error) -> Self {
        CoreError::DbError(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
