//! Transaction entity: the durable log entry the 2PC protocol advances
//! through its state machine (§3, §4.4).

use redb::TableDefinition;
use serde::{Deserialize, Serialize};

use crate::common::{AccountId, EpochMillis, TxId, Value};
use crate::store::Document;

pub(crate) const TRANSACTIONS_TABLE: TableDefinition<'static, u64, Vec<u8>> =
    TableDefinition::new("transactions");

/// One step of the roll-forward / roll-back state machine (§3).
///
/// ```text
/// roll-forward: Initial -> Pending -> Applied -> Done
/// roll-back:    Pending -> Canceling -> Canceled
/// ```
///
/// `Done` and `Canceled` are terminal; no transition ever reverses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxState {
    Initial,
    Pending,
    Applied,
    Done,
    Canceling,
    Canceled,
}

impl TxState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TxState::Done | TxState::Canceled)
    }
}

/// A transfer's durable record (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub source: AccountId,
    pub destination: AccountId,
    pub value: Value,
    pub state: TxState,
    pub last_modified: EpochMillis,
}

impl Transaction {
    pub fn new(id: TxId, source: AccountId, destination: AccountId, value: Value) -> Self {
        Self {
            id,
            source,
            destination,
            value,
            state: TxState::Initial,
            last_modified: crate::common::now_millis(),
        }
    }

    /// Whether `lastModified` is older than `now - age_threshold_ms`,
    /// i.e. whether this transaction is "stuck" (§4.5, glossary).
    pub fn is_stuck(&self, now: EpochMillis, age_threshold_ms: u64) -> bool {
        now.saturating_sub(self.last_modified) >= age_threshold_ms
    }
}

impl Document for Transaction {
    const TABLE: TableDefinition<'static, u64, Vec<u8>> = TRANSACTIONS_TABLE;

    fn id(&self) -> u64 {
        self.id
    }
}

pub type TransactionStore = crate::store::Store<Transaction>;
