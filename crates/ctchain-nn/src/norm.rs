//! Batch normalization (spec §9 L8 Layers — the fourth layer kind
//! `original_source/src/layers/normalization.c` implements).
//!
//! `original_source` has no batch-norm backward pass (it is forward-only,
//! feeding running statistics back through training-mode updates), so this
//! module mirrors that: training mode computes batch statistics and folds
//! them into the running mean/variance via an exponential moving average;
//! inference mode normalizes against the running statistics alone.

use ctchain_core::dvm;
use ctchain_core::{CtError, CtResult, FaultFlags, Q16_16};
use ctchain_stochastic::CompAccum;

use crate::optim::sqrt_q16_16;

/// ε ≈ 1e-5 in Q16.16 (smallest representable step, per the original's
/// default).
pub const DEFAULT_EPSILON: i32 = 1;
/// Running-statistics EMA momentum, 0.1 in Q16.16.
pub const DEFAULT_MOMENTUM: i32 = 6554;

#[derive(Debug, Clone, Copy)]
pub struct BatchNormConfig {
    pub num_features: usize,
    pub epsilon: Q16_16,
    pub momentum: Q16_16,
    pub track_running_stats: bool,
}

impl BatchNormConfig {
    pub fn new(num_features: usize) -> Self {
        Self {
            num_features,
            epsilon: Q16_16::from_raw(DEFAULT_EPSILON),
            momentum: Q16_16::from_raw(DEFAULT_MOMENTUM),
            track_running_stats: true,
        }
    }
}

/// Per-feature scale/shift plus running statistics, matching
/// `ct_batchnorm_t`.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    config: BatchNormConfig,
    gamma: Vec<i32>,
    beta: Vec<i32>,
    running_mean: Vec<i32>,
    running_var: Vec<i32>,
    training: bool,
    num_batches: u64,
}

impl BatchNorm {
    pub fn new(config: BatchNormConfig) -> CtResult<Self> {
        if config.num_features == 0 {
            return Err(CtError::Config);
        }
        let nf = config.num_features;
        Ok(Self {
            config,
            gamma: vec![Q16_16::ONE.raw(); nf],
            beta: vec![0; nf],
            running_mean: vec![0; nf],
            running_var: vec![Q16_16::ONE.raw(); nf],
            training: true,
            num_batches: 0,
        })
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn gamma_mut(&mut self) -> &mut [i32] {
        &mut self.gamma
    }

    pub fn beta_mut(&mut self) -> &mut [i32] {
        &mut self.beta
    }

    pub fn num_batches(&self) -> u64 {
        self.num_batches
    }

    /// `input`/`output`: `[batch_size, num_features]` row-major.
    pub fn forward(&mut self, input: &[i32], output: &mut [i32], batch_size: usize, faults: &mut FaultFlags) -> CtResult<()> {
        let nf = self.config.num_features;
        if input.len() != batch_size * nf || output.len() != input.len() {
            return Err(CtError::Dimension);
        }

        if self.training {
            for f in 0..nf {
                let mut sum_acc = CompAccum::new();
                for b in 0..batch_size {
                    sum_acc.add((input[b * nf + f] as i64) << 16, faults);
                }
                let mean = dvm::round_shift_rne(sum_acc.finalize(faults) / batch_size as i64, 16, faults);

                let mut var_acc = CompAccum::new();
                for b in 0..batch_size {
                    let centered = dvm::sub(input[b * nf + f], mean, faults);
                    var_acc.add((centered as i64) * (centered as i64), faults);
                }
                let variance = dvm::round_shift_rne(var_acc.finalize(faults) / batch_size as i64, 16, faults);

                let inv_std = self.inv_std(Q16_16::from_raw(variance), faults);
                let gamma = Q16_16::from_raw(self.gamma[f]);
                let beta = Q16_16::from_raw(self.beta[f]);

                for b in 0..batch_size {
                    let x = Q16_16::from_raw(input[b * nf + f]);
                    let centered = x.sub(Q16_16::from_raw(mean), faults);
                    let norm = centered.mul(inv_std, faults);
                    let y = gamma.mul(norm, faults).add(beta, faults);
                    output[b * nf + f] = y.raw();
                }

                if self.config.track_running_stats {
                    let one_minus_mom = Q16_16::ONE.sub(self.config.momentum, faults);
                    let rm = one_minus_mom.mul(Q16_16::from_raw(self.running_mean[f]), faults).add(
                        self.config.momentum.mul(Q16_16::from_raw(mean), faults),
                        faults,
                    );
                    self.running_mean[f] = rm.raw();

                    let rv = one_minus_mom.mul(Q16_16::from_raw(self.running_var[f]), faults).add(
                        self.config.momentum.mul(Q16_16::from_raw(variance), faults),
                        faults,
                    );
                    self.running_var[f] = rv.raw();
                }
            }
            self.num_batches += 1;
        } else {
            for f in 0..nf {
                let mean = Q16_16::from_raw(self.running_mean[f]);
                let variance = Q16_16::from_raw(self.running_var[f]);
                let inv_std = self.inv_std(variance, faults);
                let gamma = Q16_16::from_raw(self.gamma[f]);
                let beta = Q16_16::from_raw(self.beta[f]);

                for b in 0..batch_size {
                    let x = Q16_16::from_raw(input[b * nf + f]);
                    let centered = x.sub(mean, faults);
                    let norm = centered.mul(inv_std, faults);
                    let y = gamma.mul(norm, faults).add(beta, faults);
                    output[b * nf + f] = y.raw();
                }
            }
        }

        Ok(())
    }

    fn inv_std(&self, variance: Q16_16, faults: &mut FaultFlags) -> Q16_16 {
        let var_plus_eps = variance.add(self.config.epsilon, faults);
        let std = sqrt_q16_16(var_plus_eps, faults);
        if std.raw() > 0 {
            Q16_16::ONE.div(std, faults)
        } else {
            Q16_16::ONE
        }
    }
}
