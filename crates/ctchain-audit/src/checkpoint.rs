//! Training checkpoints (spec §4.8).
//!
//! A checkpoint is the chain state plus enough to resume training bit for
//! bit: the PRNG's `(seed, op_id, step)`, the epoch, and a hash of the
//! weights it was taken against. The on-disk layout is fixed-width and
//! little-endian; `timestamp` is stored but excluded from
//! [`Checkpoint::compute_hash`] so two checkpoints taken from identical
//! training state hash identically regardless of wall-clock time.

use tracing::debug;

use ctchain_core::{CtError, CtResult, FaultFlags, TensorView};
use ctchain_stochastic::Prng;

use crate::canonical::hash_tensor;
use crate::merkle::MerkleChain;
use crate::sha256::{self, Hash};

/// "CTCK" read as a little-endian u32.
pub const MAGIC: u32 = 0x4B43_5443;
/// Current checkpoint format version.
pub const VERSION: u32 = 2;
/// Exact on-disk size of a serialized checkpoint, in bytes.
pub const SERIAL_SIZE: usize = 4 + 4 + 8 + 4 + 32 + 32 + 32 + 8 + 8 + 8 + 4 + 8;

/// A point-in-time snapshot of training state, serializable to
/// [`SERIAL_SIZE`] bytes (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub version: u32,
    pub step: u64,
    pub epoch: u32,
    pub merkle_hash: Hash,
    pub weights_hash: Hash,
    pub config_hash: Hash,
    pub prng_seed: u64,
    pub prng_op_id: u64,
    pub prng_step: u64,
    pub fault_flags: FaultFlags,
    pub timestamp: u64,
}

impl Checkpoint {
    /// Snapshot `chain`/`prng`/`weights` into a new checkpoint. If the chain
    /// is already faulted, that fact is recorded by setting the sticky
    /// `overflow` bit rather than inventing a separate "chain faulted" flag
    /// (kept for bit compatibility with the reference implementation; see
    /// DESIGN.md).
    pub fn create(
        chain: &MerkleChain,
        prng: &Prng,
        epoch: u32,
        weights: &TensorView<'_>,
        config_hash: Hash,
        timestamp: u64,
    ) -> CtResult<Self> {
        let weights_hash = hash_tensor(weights)?;
        let mut fault_flags = FaultFlags::new();
        if chain.is_faulted() {
            fault_flags.overflow = true;
        }

        debug!(step = chain.step(), epoch, faulted = chain.is_faulted(), "checkpoint created");

        Ok(Self {
            version: VERSION,
            step: chain.step(),
            epoch,
            merkle_hash: chain.current_hash(),
            weights_hash,
            config_hash,
            prng_seed: prng.seed(),
            prng_op_id: prng.op_id(),
            prng_step: prng.step(),
            fault_flags,
            timestamp,
        })
    }

    /// Hash of every field except `timestamp` (spec §4.8).
    pub fn compute_hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(SERIAL_SIZE - 8);
        self.write_committed_fields(&mut buf);
        sha256::sha256(&buf)
    }

    fn write_committed_fields(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.step.to_le_bytes());
        buf.extend_from_slice(&self.epoch.to_le_bytes());
        buf.extend_from_slice(&self.merkle_hash);
        buf.extend_from_slice(&self.weights_hash);
        buf.extend_from_slice(&self.config_hash);
        buf.extend_from_slice(&self.prng_seed.to_le_bytes());
        buf.extend_from_slice(&self.prng_op_id.to_le_bytes());
        buf.extend_from_slice(&self.prng_step.to_le_bytes());
        buf.extend_from_slice(&self.fault_flags.to_bits().to_le_bytes());
    }

    /// Serialize to the canonical [`SERIAL_SIZE`]-byte little-endian layout.
    pub fn serialize(&self, buffer: &mut [u8]) -> CtResult<usize> {
        if buffer.len() < SERIAL_SIZE {
            return Err(CtError::Memory);
        }

        let mut body = Vec::with_capacity(SERIAL_SIZE);
        body.extend_from_slice(&MAGIC.to_le_bytes());
        self.write_committed_fields(&mut body);
        body.extend_from_slice(&self.timestamp.to_le_bytes());

        buffer[..SERIAL_SIZE].copy_from_slice(&body);
        Ok(SERIAL_SIZE)
    }

    /// Parse a checkpoint from its canonical byte layout, rejecting a bad
    /// magic number as [`CtError::Hash`] and an unsupported future version
    /// as [`CtError::Config`] (spec §4.8).
    pub fn deserialize(buffer: &[u8]) -> CtResult<Self> {
        if buffer.len() < SERIAL_SIZE {
            return Err(CtError::Memory);
        }

        let mut p = 0usize;
        let read_u32 = |buf: &[u8], at: usize| u32::from_le_bytes(buf[at..at + 4].try_into().unwrap());
        let read_u64 = |buf: &[u8], at: usize| u64::from_le_bytes(buf[at..at + 8].try_into().unwrap());

        let magic = read_u32(buffer, p);
        p += 4;
        if magic != MAGIC {
            return Err(CtError::Hash);
        }

        let version = read_u32(buffer, p);
        p += 4;
        if version > VERSION {
            return Err(CtError::Config);
        }

        let step = read_u64(buffer, p);
        p += 8;
        let epoch = read_u32(buffer, p);
        p += 4;

        let mut merkle_hash = [0u8; 32];
        merkle_hash.copy_from_slice(&buffer[p..p + 32]);
        p += 32;
        let mut weights_hash = [0u8; 32];
        weights_hash.copy_from_slice(&buffer[p..p + 32]);
        p += 32;
        let mut config_hash = [0u8; 32];
        config_hash.copy_from_slice(&buffer[p..p + 32]);
        p += 32;

        let prng_seed = read_u64(buffer, p);
        p += 8;
        let prng_op_id = read_u64(buffer, p);
        p += 8;
        let prng_step = read_u64(buffer, p);
        p += 8;

        let flags = read_u32(buffer, p);
        p += 4;
        let fault_flags = FaultFlags::from_bits(flags);

        let timestamp = read_u64(buffer, p);

        Ok(Self {
            version,
            step,
            epoch,
            merkle_hash,
            weights_hash,
            config_hash,
            prng_seed,
            prng_op_id,
            prng_step,
            fault_flags,
            timestamp,
        })
    }

    /// True when `a` and `b` commit to identical content (timestamp
    /// excluded).
    pub fn content_equal(&self, other: &Self) -> bool {
        sha256::hash_equal(&self.compute_hash(), &other.compute_hash())
    }

    /// Re-hash `weights` and compare against the checkpoint's recorded
    /// weights hash.
    pub fn verify_weights(&self, weights: &TensorView<'_>) -> CtResult<()> {
        let computed = hash_tensor(weights)?;
        if !sha256::hash_equal(&self.weights_hash, &computed) {
            return Err(CtError::Hash);
        }
        Ok(())
    }

    /// Rebuild a PRNG in the exact state this checkpoint was taken at.
    pub fn resume_prng(&self) -> Prng {
        Prng::resume(self.prng_seed, self.prng_op_id, self.prng_step)
    }

    /// Restore a [`MerkleChain`] to the hash/step/epoch this checkpoint
    /// recorded. The chain comes back `Faulted` if the checkpoint's fault
    /// flags indicate the source chain was faulted when it was taken.
    pub fn restore_into(&self, chain: &mut MerkleChain) {
        chain.restore(self.merkle_hash, self.step, self.epoch, self.fault_flags.has_fault());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctchain_core::{DType, Shape};

    fn sample_checkpoint() -> Checkpoint {
        let shape = Shape::row_major(&[3]).unwrap();
        let data = [1i32, 2, 3];
        let view = TensorView::new(shape, DType::Q16_16, &data).unwrap();

        let mut chain = MerkleChain::new();
        chain.init(&view, b"{}", 1).unwrap();
        let prng = Prng::new(1, 2);

        Checkpoint::create(&chain, &prng, 0, &view, [0u8; 32], 1_700_000_000).unwrap()
    }

    #[test]
    fn serialize_roundtrips_through_deserialize() {
        let checkpoint = sample_checkpoint();
        let mut buf = [0u8; SERIAL_SIZE];
        let written = checkpoint.serialize(&mut buf).unwrap();
        assert_eq!(written, SERIAL_SIZE);

        let restored = Checkpoint::deserialize(&buf).unwrap();
        assert_eq!(restored, checkpoint);
    }

    #[test]
    fn hash_excludes_timestamp() {
        let mut a = sample_checkpoint();
        let mut b = a;
        b.timestamp = a.timestamp + 1000;
        a.timestamp += 1;
        assert_eq!(a.compute_hash(), b.compute_hash());
        assert!(a.content_equal(&b));
    }

    #[test]
    fn bad_magic_rejected() {
        let checkpoint = sample_checkpoint();
        let mut buf = [0u8; SERIAL_SIZE];
        checkpoint.serialize(&mut buf).unwrap();
        buf[0] = 0;
        assert_eq!(Checkpoint::deserialize(&buf).err(), Some(CtError::Hash));
    }

    #[test]
    fn future_version_rejected() {
        let checkpoint = sample_checkpoint();
        let mut buf = [0u8; SERIAL_SIZE];
        checkpoint.serialize(&mut buf).unwrap();
        buf[4..8].copy_from_slice(&(VERSION + 1).to_le_bytes());
        assert_eq!(Checkpoint::deserialize(&buf).err(), Some(CtError::Config));
    }

    #[test]
    fn magic_and_version_occupy_the_first_eight_bytes() {
        let checkpoint = sample_checkpoint();
        let mut buf = [0u8; SERIAL_SIZE];
        checkpoint.serialize(&mut buf).unwrap();
        assert_eq!(&buf[0..4], &MAGIC.to_le_bytes());
        assert_eq!(&buf[4..8], &VERSION.to_le_bytes());
    }

    /// Pins the canonical header byte layout (spec §4.8): `MAGIC` then
    /// `VERSION`, both little-endian, regardless of how the body after them
    /// evolves.
    #[test]
    fn header_byte_layout_is_canonical() {
        let checkpoint = sample_checkpoint();
        let mut buf = [0u8; SERIAL_SIZE];
        checkpoint.serialize(&mut buf).unwrap();
        insta::assert_snapshot!(hex::encode(&buf[0..8]), @"4354434b02000000");
    }

    #[test]
    fn faulted_chain_sets_overflow_bit() {
        let shape = Shape::row_major(&[1]).unwrap();
        let data = [1i32];
        let view = TensorView::new(shape, DType::Q16_16, &data).unwrap();
        let mut chain = MerkleChain::new();
        chain.init(&view, b"{}", 1).unwrap();
        chain.invalidate();

        let prng = Prng::new(0, 0);
        let checkpoint = Checkpoint::create(&chain, &prng, 0, &view, [0u8; 32], 0).unwrap();
        assert!(checkpoint.fault_flags.overflow);
    }
}
