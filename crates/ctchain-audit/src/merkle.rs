//! Merkle training chain (spec §4.8).
//!
//! The chain is a 3-state machine: `Uninit` before [`MerkleChain::init`],
//! `Running` while steps succeed, `Faulted` permanently once any step
//! observes a fault or a hash mismatch. There is no path back to `Running`
//! from `Faulted` — a faulted run must restore from a checkpoint instead.

use tracing::{debug, warn};

use ctchain_core::{CtError, CtResult, FaultFlags, TensorView};

use crate::canonical::hash_tensor;
use crate::sha256::{self, Hash, ZERO_HASH};

/// First 4 bytes of a hash as hex, for log lines that don't need the full 32.
fn hex_prefix(hash: &Hash) -> String {
    hash[..4].iter().map(|b| format!("{b:02x}")).collect()
}

fn batch_hash(indices: &[u32]) -> Hash {
    let mut ctx = sha256::Sha256::new();
    for &idx in indices {
        ctx.update(&idx.to_le_bytes());
    }
    ctx.finalize()
}

/// One committed link in the chain: the inputs hashed into `step_hash` and
/// the hash itself, suitable for out-of-band verification via
/// [`verify_step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingStepRecord {
    pub prev_hash: Hash,
    pub weights_hash: Hash,
    pub batch_hash: Hash,
    pub step: u64,
    pub step_hash: Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainState {
    Uninit,
    Running,
    Faulted,
}

/// Hash-chained record of every training step: `h_t =
/// SHA256(h_{t-1} || H(θ_t) || H(B_t) || t)` (spec §4.8).
#[derive(Debug, Clone)]
pub struct MerkleChain {
    state: ChainState,
    current_hash: Hash,
    initial_hash: Hash,
    step: u64,
    epoch: u32,
}

impl Default for MerkleChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MerkleChain {
    pub fn new() -> Self {
        Self { state: ChainState::Uninit, current_hash: ZERO_HASH, initial_hash: ZERO_HASH, step: 0, epoch: 0 }
    }

    /// Commit the genesis hash: `h_0 = SHA256(H(θ_0) || H(config) || seed)`.
    /// An empty `config_data` hashes to 32 zero bytes rather than being
    /// skipped, so genesis is always a fixed-shape, 3-field commitment
    /// (spec §4.8).
    pub fn init(&mut self, initial_weights: &TensorView<'_>, config_data: &[u8], seed: u64) -> CtResult<()> {
        let weights_hash = hash_tensor(initial_weights)?;

        let config_hash = if config_data.is_empty() { ZERO_HASH } else { sha256::sha256(config_data) };

        let mut ctx = sha256::Sha256::new();
        ctx.update(&weights_hash);
        ctx.update(&config_hash);
        ctx.update(&seed.to_le_bytes());
        let genesis = ctx.finalize();

        self.current_hash = genesis;
        self.initial_hash = genesis;
        self.step = 0;
        self.epoch = 0;
        self.state = ChainState::Running;
        debug!(hash = %hex_prefix(&genesis), "merkle chain initialized");
        Ok(())
    }

    pub fn current_hash(&self) -> Hash {
        self.current_hash
    }

    pub fn initial_hash(&self) -> Hash {
        self.initial_hash
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn set_epoch(&mut self, epoch: u32) {
        self.epoch = epoch;
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.state, ChainState::Running)
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.state, ChainState::Faulted)
    }

    pub fn invalidate(&mut self) {
        self.state = ChainState::Faulted;
        warn!(step = self.step, "chain invalidated externally");
    }

    /// Reset chain state to a previously recorded `(hash, step, epoch)`, as
    /// when resuming from a checkpoint (spec §4.8). `faulted` should come
    /// from the checkpoint's recorded fault flags.
    pub fn restore(&mut self, hash: Hash, step: u64, epoch: u32, faulted: bool) {
        self.current_hash = hash;
        self.step = step;
        self.epoch = epoch;
        self.state = if faulted { ChainState::Faulted } else { ChainState::Running };
    }

    /// Append one step to the chain. Any observed fault, or the chain
    /// already being faulted, permanently moves the chain to `Faulted` and
    /// returns [`CtError::Fault`] without advancing `step` (spec §4.8).
    pub fn step_chain(
        &mut self,
        weights: &TensorView<'_>,
        batch_indices: &[u32],
        faults: &FaultFlags,
    ) -> CtResult<TrainingStepRecord> {
        if self.state == ChainState::Uninit {
            return Err(CtError::State);
        }
        if faults.has_fault() {
            self.state = ChainState::Faulted;
            warn!(step = self.step, "fault observed during step, chain permanently faulted");
            return Err(CtError::Fault);
        }
        if self.state == ChainState::Faulted {
            return Err(CtError::Fault);
        }

        let weights_hash = hash_tensor(weights)?;
        let batch = batch_hash(batch_indices);

        let mut ctx = sha256::Sha256::new();
        ctx.update(&self.current_hash);
        ctx.update(&weights_hash);
        ctx.update(&batch);
        ctx.update(&self.step.to_le_bytes());
        let new_hash = ctx.finalize();

        let record = TrainingStepRecord {
            prev_hash: self.current_hash,
            weights_hash,
            batch_hash: batch,
            step: self.step,
            step_hash: new_hash,
        };

        self.current_hash = new_hash;
        self.step += 1;

        debug!(step = record.step, hash = %hex_prefix(&new_hash), "chain step committed");
        Ok(record)
    }
}

/// Independently recompute and check a [`TrainingStepRecord`] against the
/// claimed previous hash, weights, and batch (spec §4.8's pure "Verify
/// step" operation).
pub fn verify_step(
    record: &TrainingStepRecord,
    prev_hash: &Hash,
    weights: &TensorView<'_>,
    batch_indices: &[u32],
) -> CtResult<()> {
    if !sha256::hash_equal(&record.prev_hash, prev_hash) {
        return Err(CtError::Hash);
    }

    let computed_weights = hash_tensor(weights)?;
    if !sha256::hash_equal(&record.weights_hash, &computed_weights) {
        return Err(CtError::Hash);
    }

    let computed_batch = batch_hash(batch_indices);
    if !sha256::hash_equal(&record.batch_hash, &computed_batch) {
        return Err(CtError::Hash);
    }

    let mut ctx = sha256::Sha256::new();
    ctx.update(&record.prev_hash);
    ctx.update(&record.weights_hash);
    ctx.update(&record.batch_hash);
    ctx.update(&record.step.to_le_bytes());
    let computed_step = ctx.finalize();

    if !sha256::hash_equal(&record.step_hash, &computed_step) {
        return Err(CtError::Hash);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctchain_core::{DType, Shape};

    fn weights(values: &[i32]) -> (Shape, Vec<i32>) {
        (Shape::row_major(&[values.len()]).unwrap(), values.to_vec())
    }

    /// S5 — genesis hash is a pure function of (weights, config, seed).
    #[test]
    fn genesis_is_deterministic_given_same_inputs() {
        let (shape, data) = weights(&[1, 2, 3]);
        let view = TensorView::new(shape, DType::Q16_16, &data).unwrap();

        let mut a = MerkleChain::new();
        a.init(&view, b"{}", 42).unwrap();
        let mut b = MerkleChain::new();
        b.init(&view, b"{}", 42).unwrap();

        assert_eq!(a.current_hash(), b.current_hash());
    }

    #[test]
    fn empty_config_hashes_to_zero_hash_input() {
        let (shape, data) = weights(&[1]);
        let view = TensorView::new(shape, DType::Q16_16, &data).unwrap();

        let mut with_zero_hash_config = MerkleChain::new();
        with_zero_hash_config.init(&view, &[], 7).unwrap();

        let mut ctx = sha256::Sha256::new();
        ctx.update(&hash_tensor(&view).unwrap());
        ctx.update(&ZERO_HASH);
        ctx.update(&7u64.to_le_bytes());
        let expected = ctx.finalize();

        assert_eq!(with_zero_hash_config.current_hash(), expected);
    }

    /// S6 — a single bit-flip in weights changes the resulting step hash.
    #[test]
    fn tampered_weights_change_step_hash() {
        let (shape, data) = weights(&[1, 2, 3]);
        let view = TensorView::new(shape.clone(), DType::Q16_16, &data).unwrap();
        let mut chain = MerkleChain::new();
        chain.init(&view, b"{}", 1).unwrap();

        let faults = FaultFlags::new();
        let honest = chain.clone().step_chain(&view, &[0, 1], &faults).unwrap();

        let (_, tampered_data) = weights(&[1, 2, 4]);
        let tampered_view = TensorView::new(shape, DType::Q16_16, &tampered_data).unwrap();
        let tampered = chain.step_chain(&tampered_view, &[0, 1], &faults).unwrap();

        assert_ne!(honest.step_hash, tampered.step_hash);
    }

    #[test]
    fn fault_during_step_permanently_faults_chain() {
        let (shape, data) = weights(&[1]);
        let view = TensorView::new(shape, DType::Q16_16, &data).unwrap();
        let mut chain = MerkleChain::new();
        chain.init(&view, b"{}", 1).unwrap();

        let mut faulted = FaultFlags::new();
        faulted.overflow = true;
        assert_eq!(chain.step_chain(&view, &[0], &faulted).err(), Some(CtError::Fault));
        assert!(chain.is_faulted());

        let clean = FaultFlags::new();
        assert_eq!(chain.step_chain(&view, &[0], &clean).err(), Some(CtError::Fault));
    }

    #[test]
    fn verify_step_accepts_honest_record_and_rejects_tamper() {
        let (shape, data) = weights(&[5, 6, 7]);
        let view = TensorView::new(shape, DType::Q16_16, &data).unwrap();
        let mut chain = MerkleChain::new();
        chain.init(&view, b"{}", 3).unwrap();
        let prev = chain.current_hash();

        let faults = FaultFlags::new();
        let record = chain.step_chain(&view, &[2, 0, 1], &faults).unwrap();

        assert!(verify_step(&record, &prev, &view, &[2, 0, 1]).is_ok());
        assert_eq!(verify_step(&record, &prev, &view, &[0, 1, 2]).err(), Some(CtError::Hash));
    }
}
