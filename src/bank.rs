//! §4.7: wires the store adapter, sequence allocators, account service,
//! transfer coordinator, and recovery sweeper into one owned value. No
//! process-wide singletons — construct a `Bank` and pass it around.

use std::path::Path;
use std::sync::Arc;

use redb::Database;

use crate::account::{AccountService, ACCOUNTS_TABLE};
use crate::error::Result;
use crate::recovery::RecoverySweeper;
use crate::store::Store;
use crate::transaction::{TransactionStore, TRANSACTIONS_TABLE};
use crate::transfer::TransferCoordinator;

pub struct Bank {
    pub accounts: AccountService,
    pub transfer: TransferCoordinator,
    pub recovery: RecoverySweeper,
    /// Read-only handle to the transaction log, for callers (and tests)
    /// that want to inspect a transaction's state directly rather than
    /// through the account-balance side effects of §4.4/§4.5.
    pub transactions: TransactionStore,
}

impl Bank {
    /// Open (creating if absent) a file-backed bank at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path)?;
        Self::from_database(db)
    }

    /// In-memory bank: no file survives the process, used by tests and
    /// short-lived embeddings that don't need crash durability.
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::from_database(db)
    }

    fn from_database(db: Database) -> Result<Self> {
        let db = Arc::new(db);

        // Ensure both tables exist even before the first insert, so
        // `find_cursor`/`max_id` never have to special-case "never opened".
        {
            let write_txn = db.begin_write()?;
            write_txn.open_table(ACCOUNTS_TABLE)?;
            write_txn.open_table(TRANSACTIONS_TABLE)?;
            write_txn.commit()?;
        }

        let accounts = Store::new(Arc::clone(&db));
        let transactions = Store::new(db);

        Ok(Self {
            accounts: AccountService::new(accounts.clone(), transactions.clone()),
            transfer: TransferCoordinator::new(accounts.clone(), transactions.clone()),
            recovery: RecoverySweeper::new(accounts, transactions.clone()),
            transactions,
        })
    }

    /// Wipe both collections (§4.3). Delegates to the account service,
    /// which is the component that holds references to both stores.
    pub fn reset(&self) -> Result<()> {
        self.accounts.reset()
    }
}
