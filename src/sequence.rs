//! C2: sequence allocator.
//!
//! Mints sequential integer ids for a [`Document`] kind by reading the
//! current maximum key and adding one, serialized across callers in this
//! process with a mutex. Cross-process uniqueness is **not** guaranteed —
//! see the open question in §9 of the design doc.

use std::sync::Mutex;

use crate::error::Result;
use crate::store::{Document, Store};

pub struct SequenceAllocator<D: Document> {
    store: Store<D>,
    lock: Mutex<()>,
}

impl<D: Document> SequenceAllocator<D> {
    pub fn new(store: Store<D>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Allocate the next id: `max + 1`, or `1` if the collection is empty.
    pub fn next_id(&self) -> Result<u64> {
        let _guard = self.lock.lock().expect("sequence allocator mutex poisoned");
        Ok(self.store.max_id()?.map(|max| max + 1).unwrap_or(1))
    }
}
