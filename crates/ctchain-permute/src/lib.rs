//! Dataset permutation and batching on top of [`ctchain_core`]: a
//! cycle-walking balanced Feistel network gives a deterministic bijection on
//! `[0, N)` for arbitrary `N`, and [`BatchContext`] turns that bijection into
//! per-step batch index lists.

pub mod batch;
pub mod feistel;

pub use batch::BatchContext;
pub use feistel::{feistel_hash, Permutation};
