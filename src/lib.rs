//! Transactional banking core: a two-phase-commit protocol layered over an
//! embedded document store that only guarantees single-document atomic
//! updates. See `SPEC_FULL.md` and `DESIGN.md` in the repository root for
//! the full design rationale.
//!
//! The entry point is [`Bank`], which wires together the store adapter
//! (`store`), sequence allocator (`sequence`), account service (`account`),
//! transfer coordinator (`transfer`), and recovery sweeper (`recovery`).

pub mod account;
pub mod bank;
pub mod common;
pub mod error;
pub mod recovery;
pub mod sequence;
pub mod store;
pub mod transaction;
pub mod transfer;

pub use bank::Bank;
pub use error::{CoreError, Result};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::Bank;

    /// In-memory bank for unit tests; no file touches disk.
    pub fn test_bank() -> Bank {
        Bank::open_in_memory().expect("failed to open in-memory test bank")
    }
}
