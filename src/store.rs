//! C1: store adapter.
//!
//! A thin, generically-typed wrapper over [`redb`], an embedded
//! transactional key-value engine. Each entity kind (`Account`,
//! `Transaction`) implements [`Document`] to name its own table; [`Store`]
//! then gives every entity kind the same five operations: `insert`,
//! `find_one`, `find_cursor`, `update`, `delete_all`, plus `max_id` for the
//! sequence allocator.
//!
//! The one rule this module exists to enforce: every [`Store::update`] call
//! touches exactly one key inside exactly one write transaction. redb can
//! span a single write transaction across many tables and keys, but doing
//! that here would silently turn this into a real multi-document
//! transaction and defeat the reason the 2PC protocol in [`crate::transfer`]
//! needs to exist. The store is deliberately kept at the granularity the
//! spec assumes: single-document atomicity only.

use std::marker::PhantomData;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// One persisted entity kind, backed by one redb table.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The table this document kind lives in. Keyed by `u64` id, valued by
    /// the document's bincode encoding.
    const TABLE: TableDefinition<'static, u64, Vec<u8>>;

    fn id(&self) -> u64;
}

/// Typed handle to one [`Document`] kind's table.
pub struct Store<D: Document> {
    db: Arc<Database>,
    _marker: PhantomData<D>,
}

// Manual impl: `#[derive(Clone)]` would require `D: Clone`, which isn't
// needed since we only ever clone the `Arc`.
impl<D: Document> Clone for Store<D> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            _marker: PhantomData,
        }
    }
}

impl<D: Document> Store<D> {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            _marker: PhantomData,
        }
    }

    /// Insert a new document. Fails with `DB_ERROR` on any store failure.
    pub fn insert(&self, doc: &D) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(D::TABLE)?;
            table.insert(doc.id(), bincode::serialize(doc)?)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Read a single document by id.
    pub fn find_one(&self, id: u64) -> Result<Option<D>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(D::TABLE)?;
        match table.get(id)? {
            Some(guard) => Ok(Some(bincode::deserialize(&guard.value())?)),
            None => Ok(None),
        }
    }

    /// Finite, forward-only sequence of documents matching `predicate`.
    /// Collected eagerly under one read transaction since redb's table
    /// iterator cannot outlive the transaction it was opened from; callers
    /// should treat the returned `Vec` as a one-shot stream, not as a
    /// materialized snapshot to mutate against.
    pub fn find_cursor(&self, predicate: impl Fn(&D) -> bool) -> Result<Vec<D>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(D::TABLE)?;
        let mut matches = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let doc: D = bincode::deserialize(&value.value())?;
            if predicate(&doc) {
                matches.push(doc);
            }
        }
        Ok(matches)
    }

    /// Atomic conditional update: read the document at `id`; if it exists
    /// and `precondition` holds against it, apply `mutate` and write the
    /// result back inside the same write transaction. Returns whether the
    /// precondition matched — the "matched count" distinction from §4.1 that
    /// every idempotent step in [`crate::transfer`] and [`crate::recovery`]
    /// relies on.
    pub fn update(
        &self,
        id: u64,
        precondition: impl FnOnce(&D) -> bool,
        mutate: impl FnOnce(&mut D),
    ) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let matched = {
            let mut table = write_txn.open_table(D::TABLE)?;
            let current = match table.get(id)? {
                Some(guard) => Some(bincode::deserialize::<D>(&guard.value())?),
                None => None,
            };
            match current {
                Some(mut doc) if precondition(&doc) => {
                    mutate(&mut doc);
                    table.insert(id, bincode::serialize(&doc)?)?;
                    true
                }
                _ => false,
            }
        };
        if matched {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(matched)
    }

    /// Delete every document of this kind.
    pub fn delete_all(&self) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            write_txn.delete_table(D::TABLE)?;
            // Recreate the (now empty) table so subsequent reads don't have
            // to special-case "table never opened" vs. "table empty".
            write_txn.open_table(D::TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Greatest key currently present, used by the sequence allocator.
    /// Equivalent to "sort by id descending, limit 1" (§4.2).
    pub fn max_id(&self) -> Result<Option<u64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(D::TABLE)?;
        Ok(table.last()?.map(|(key, _)| key.value()))
    }
}
