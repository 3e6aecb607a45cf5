//! The auditable record layer: canonical tensor hashing, the in-tree
//! SHA-256 implementation it is built on, the Merkle training chain, and
//! checkpointing.

pub mod canonical;
pub mod checkpoint;
pub mod merkle;
pub mod sha256;

pub use canonical::{hash_tensor, serialize_tensor};
pub use checkpoint::Checkpoint;
pub use merkle::{verify_step, MerkleChain, TrainingStepRecord};
pub use sha256::{sha256, Hash, Sha256};
