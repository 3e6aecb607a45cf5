//! Dispatches a flat parameter/gradient update to whichever
//! `ctchain_nn::optim` optimizer [`crate::config::OptimizerKind`] selected.

use ctchain_core::{CtResult, FaultFlags};
use ctchain_nn::{Adam, AdamConfig, Sgd, SgdConfig, SgdMomentum, SgdMomentumConfig};

use crate::config::OptimizerKind;

pub enum Optimizer {
    Sgd(Sgd),
    SgdMomentum(SgdMomentum),
    Adam(Adam),
}

impl Optimizer {
    pub fn new(kind: OptimizerKind, learning_rate_raw: i32, num_params: usize) -> CtResult<Self> {
        use ctchain_core::Q16_16;
        let lr = Q16_16::from_raw(learning_rate_raw);
        Ok(match kind {
            OptimizerKind::Sgd => Optimizer::Sgd(Sgd::new(SgdConfig { learning_rate: lr, ..SgdConfig::default() })),
            OptimizerKind::SgdMomentum => Optimizer::SgdMomentum(SgdMomentum::new(
                SgdMomentumConfig { learning_rate: lr, ..SgdMomentumConfig::default() },
                num_params,
            )?),
            OptimizerKind::Adam => {
                Optimizer::Adam(Adam::new(AdamConfig { learning_rate: lr, ..AdamConfig::default() }, num_params)?)
            }
        })
    }

    pub fn step(&mut self, params: &mut [i32], grads: &[i32], faults: &mut FaultFlags) -> CtResult<()> {
        match self {
            Optimizer::Sgd(opt) => opt.step(params, grads, faults),
            Optimizer::SgdMomentum(opt) => opt.step(params, grads, faults),
            Optimizer::Adam(opt) => opt.step(params, grads, faults),
        }
    }
}
