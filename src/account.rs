//! Account entity and C3: account service.

use std::collections::HashSet;

use redb::TableDefinition;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::common::{AccountId, TxId, Value};
use crate::error::{CoreError, Result};
use crate::sequence::SequenceAllocator;
use crate::store::{Document, Store};
use crate::transaction::Transaction;

pub(crate) const ACCOUNTS_TABLE: TableDefinition<'static, u64, Vec<u8>> =
    TableDefinition::new("accounts");

/// A single account record (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub closed: bool,
    pub balance: Value,
    pub pending_transactions: HashSet<TxId>,
}

impl Account {
    fn new(id: AccountId) -> Self {
        Self {
            id,
            closed: false,
            balance: Value::ZERO,
            pending_transactions: HashSet::new(),
        }
    }
}

impl Document for Account {
    const TABLE: TableDefinition<'static, u64, Vec<u8>> = ACCOUNTS_TABLE;

    fn id(&self) -> u64 {
        self.id
    }
}

pub type AccountStore = Store<Account>;

/// C3: create / close / deposit / withdraw / balance / isClosed / reset.
///
/// Holds a reference to the transaction store purely so `reset` can wipe
/// both collections (§4.3) — it never reads or writes transaction documents
/// otherwise; that's [`crate::transfer::TransferCoordinator`]'s job.
pub struct AccountService {
    accounts: AccountStore,
    transactions: Store<Transaction>,
    ids: SequenceAllocator<Account>,
}

impl AccountService {
    pub fn new(accounts: AccountStore, transactions: Store<Transaction>) -> Self {
        let ids = SequenceAllocator::new(accounts.clone());
        Self {
            accounts,
            transactions,
            ids,
        }
    }

    pub(crate) fn store(&self) -> &AccountStore {
        &self.accounts
    }

    /// Allocate an id and insert the default (open, zero-balance) account.
    pub fn create_account(&self) -> Result<AccountId> {
        let id = self.ids.next_id()?;
        self.accounts.insert(&Account::new(id))?;
        Ok(id)
    }

    fn fetch(&self, id: AccountId) -> Result<Account> {
        self.accounts
            .find_one(id)?
            .ok_or(CoreError::NonExistingAccount(id))
    }

    /// Idempotent: closing an already-closed account is a no-op, logged as
    /// a warning rather than surfaced as an error (§4.3, §7).
    pub fn close_account(&self, id: AccountId) -> Result<()> {
        let account = self.fetch(id)?;
        if account.closed {
            warn!(account = id, "close_account called on an already-closed account");
            return Ok(());
        }
        self.accounts.update(id, |_| true, |a| a.closed = true)?;
        Ok(())
    }

    pub fn balance(&self, id: AccountId) -> Result<Value> {
        Ok(self.fetch(id)?.balance)
    }

    pub fn is_closed(&self, id: AccountId) -> Result<bool> {
        Ok(self.fetch(id)?.closed)
    }

    /// Unconditional `$inc balance`. Does **not** check `closed` — this is
    /// an open question preserved unchanged from the original design (§9),
    /// not silently fixed here.
    pub fn deposit(&self, id: AccountId, amount: Value) -> Result<Value> {
        self.fetch(id)?; // NON_EXISTING_ACCOUNT if missing
        let matched = self.accounts.update(id, |_| true, |a| a.balance += amount)?;
        if !matched {
            return Err(CoreError::NonExistingAccount(id));
        }
        self.balance(id)
    }

    pub fn withdraw(&self, id: AccountId, amount: Value) -> Result<Value> {
        let account = self.fetch(id)?;
        if account.closed {
            return Err(CoreError::ClosedAccount(id));
        }
        if amount > account.balance {
            return Err(CoreError::InsufficientBalance { account: id });
        }
        // Read-then-write, not atomic across the two calls: concurrent
        // withdrawals on the same account may oversubscribe. Documented
        // limitation (§4.3), unchanged from the original design.
        self.accounts.update(id, |_| true, |a| a.balance -= amount)?;
        self.balance(id)
    }

    /// Wipe both collections.
    pub fn reset(&self) -> Result<()> {
        self.accounts.delete_all()?;
        self.transactions.delete_all()?;
        Ok(())
    }
}
