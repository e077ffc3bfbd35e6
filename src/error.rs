//! Error types for the message switch core.
//!
//! Domain outcomes — an unknown queue on `send`, an unknown id on `ack`
//! or `entry`, a `wait` timeout — are never errors; they are represented
//! as `Option`/`()` return values. Only I/O against the journal and
//! corruption discovered during replay surface here.

#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    /// The journal failed to durably append a record. The in-memory
    /// state is guaranteed unchanged: `Queues` only mutates state from
    /// the apply path, which never runs on a failed append.
    #[error("journal append failed: {0}")]
    JournalIo(#[from] std::io::Error),

    /// A replayed or applied op would violate one of the invariants in
    /// `spec.md` §3 (id monotonicity, length bookkeeping, owner index
    /// consistency). This is fatal: the caller should abort startup
    /// rather than serve from a state that may already be corrupt.
    #[error("invariant violated during replay: {0}")]
    InvariantViolation(String),

    /// An encoded `Op` exceeded `SwitchConfig::max_record_bytes`. Raised
    /// on append (the operation never reaches the journal); on replay,
    /// an over-cap record is dropped and logged instead, matching the
    /// codec-decode-error treatment in `spec.md` §7.
    #[error("encoded record is {len} bytes, exceeding the {max}-byte cap")]
    RecordTooLarge { len: usize, max: usize },
}
