//! Deterministic fixed-point scalar types, the sticky fault record, and the
//! DVM arithmetic primitives that every other ctchain crate builds on.
//!
//! This crate has no notion of training, hashing, or permutation; it is
//! purely the numeric substrate (spec §4.1/§4.2).

pub mod dvm;
pub mod error;
pub mod fault;
pub mod fixed;
pub mod tensor;

pub use error::{CtError, CtResult};
pub use fault::FaultFlags;
pub use fixed::{Q16_16, Q8_24};
pub use tensor::{DType, Shape, TensorMut, TensorView};
