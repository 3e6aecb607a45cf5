//! Deterministic epoch batching on top of [`Permutation`] (spec §4.6).

use ctchain_core::{CtError, CtResult, FaultFlags};

use crate::feistel::Permutation;

/// Binds a [`Permutation`] to a batch size and derives per-step index lists.
#[derive(Debug, Clone, Copy)]
pub struct BatchContext {
    perm: Permutation,
    batch_size: u32,
    steps_per_epoch: u64,
}

impl BatchContext {
    pub fn new(seed: u64, epoch: u32, dataset_size: u32, batch_size: u32) -> CtResult<Self> {
        if batch_size == 0 {
            return Err(CtError::Dimension);
        }
        let perm = Permutation::new(seed, epoch, dataset_size)?;
        let steps_per_epoch = (dataset_size as u64 + batch_size as u64 - 1) / batch_size as u64;
        Ok(Self { perm, batch_size, steps_per_epoch })
    }

    pub fn set_epoch(&mut self, epoch: u32) {
        self.perm.set_epoch(epoch);
    }

    pub fn steps_per_epoch(&self) -> u64 {
        self.steps_per_epoch
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    pub fn step_in_epoch(&self, global_step: u64) -> u64 {
        global_step % self.steps_per_epoch
    }

    pub fn epoch_of(&self, global_step: u64) -> u64 {
        global_step / self.steps_per_epoch
    }

    /// Number of examples in the batch at `step`; less than `batch_size` only
    /// for the final, partial batch of an epoch (spec §4.6).
    pub fn batch_size_at(&self, step: u64) -> u32 {
        let step_in_epoch = self.step_in_epoch(step) as u32;
        let n = self.perm.dataset_size();
        if step_in_epoch as u64 == self.steps_per_epoch - 1 {
            let consumed = step_in_epoch as u64 * self.batch_size as u64;
            let remaining = n as u64 - consumed;
            remaining.min(self.batch_size as u64) as u32
        } else {
            self.batch_size
        }
    }

    /// Fill `out` with the permuted dataset indices for `step`'s batch,
    /// wrapping a partial final batch back into range (spec §4.6).
    ///
    /// `out` must be at least [`BatchContext::batch_size_at`] long for this
    /// step; unused trailing entries beyond that length are not written.
    pub fn indices_for_step(&self, step: u64, out: &mut [u32], faults: &mut FaultFlags) {
        let n = self.perm.dataset_size() as u64;
        let step_in_epoch = self.step_in_epoch(step);
        let base_index = step_in_epoch * self.batch_size as u64;
        let count = self.batch_size_at(step) as usize;

        for (j, slot) in out.iter_mut().take(count).enumerate() {
            let linear_idx = base_index + j as u64;
            let wrapped = if linear_idx >= n { linear_idx % n } else { linear_idx };
            *slot = self.perm.apply(wrapped as u32, faults);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_per_epoch_rounds_up() {
        let ctx = BatchContext::new(1, 0, 10, 3).unwrap();
        assert_eq!(ctx.steps_per_epoch(), 4);
    }

    #[test]
    fn last_batch_is_partial() {
        let ctx = BatchContext::new(1, 0, 10, 3).unwrap();
        assert_eq!(ctx.batch_size_at(0), 3);
        assert_eq!(ctx.batch_size_at(3), 1);
    }

    #[test]
    fn full_epoch_covers_every_index_exactly_once() {
        let mut faults = FaultFlags::new();
        let ctx = BatchContext::new(99, 0, 17, 4).unwrap();
        let mut seen = vec![false; 17];
        for step in 0..ctx.steps_per_epoch() {
            let mut buf = [0u32; 4];
            ctx.indices_for_step(step, &mut buf, &mut faults);
            let count = ctx.batch_size_at(step) as usize;
            for &idx in &buf[..count] {
                assert!(!seen[idx as usize], "index {idx} repeated");
                seen[idx as usize] = true;
            }
        }
        assert!(seen.iter().all(|&b| b));
        assert!(!faults.has_fault());
    }

    #[test]
    fn zero_batch_size_rejected() {
        assert_eq!(BatchContext::new(1, 0, 10, 0).err(), Some(CtError::Dimension));
    }

    #[test]
    fn step_in_epoch_and_epoch_of_agree_with_steps_per_epoch() {
        let ctx = BatchContext::new(1, 0, 10, 3).unwrap();
        assert_eq!(ctx.step_in_epoch(4), 0);
        assert_eq!(ctx.epoch_of(4), 1);
    }
}
