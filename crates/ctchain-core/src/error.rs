//! Shared status-code error type (spec §7).
//!
//! Every ctchain crate re-exports [`CtError`] and wraps it where a layer
//! needs its own leaf variants, mirroring the teacher's pattern of a shared
//! base error type wrapped by higher-layer error enums.

/// Synchronous status code returned by non-trivial ctchain operations.
///
/// Distinct from the fault-flag record ([`crate::fault::FaultFlags`]): this
/// type surfaces contract violations (null pointers, shape mismatches,
/// wrong lifecycle state) directly, while arithmetic deviations are only
/// ever reported through the fault record and translated to [`CtError::Fault`]
/// at a boundary that needs to make a commit/reject decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CtError {
    #[error("required pointer or buffer was missing")]
    Null,
    #[error("tensor or buffer shape mismatch")]
    Dimension,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("arithmetic underflow")]
    Underflow,
    #[error("division by zero")]
    DivZero,
    #[error("invalid shift, uninitialized context, or out-of-range index")]
    Domain,
    #[error("bad configuration or unsupported version")]
    Config,
    #[error("operation invalid in the current lifecycle state")]
    State,
    #[error("caller-provided buffer too small")]
    Memory,
    #[error("hash or integrity mismatch")]
    Hash,
    #[error("chain already faulted, or faulted by this input")]
    Fault,
}

/// Convenience alias used throughout the ctchain crates.
pub type CtResult<T> = Result<T, CtError>;
