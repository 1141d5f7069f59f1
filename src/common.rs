//! Shared scalar types used across the core.

use std::time::{SystemTime, UNIX_EPOCH};

/// Currency amounts and account balances. Fixed-precision decimal, never
/// binary floating point, so repeated `$inc` applications never accumulate
/// rounding error.
pub type Value = rust_decimal::Decimal;

/// Account identifier. Monotonic, allocated by the sequence allocator.
pub type AccountId = u64;

/// Transaction identifier. Monotonic, allocated by the sequence allocator.
pub type TxId = u64;

/// Milliseconds since the Unix epoch, as stored in `lastModified`.
pub type EpochMillis = u64;

/// Current wall-clock time as stored in documents. Kept as a free function
/// so tests can reason about elapsed time without pulling in a clock
/// abstraction the core doesn't otherwise need.
pub fn now_millis() -> EpochMillis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as EpochMillis
}
