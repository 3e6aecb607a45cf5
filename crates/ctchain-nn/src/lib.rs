//! Layers and optimizers built on `ctchain-core`'s deterministic arithmetic
//! and `ctchain-stochastic`'s compensated summation: the collaborator layer
//! a training driver assembles into a model, analogous to `miden-vm`'s
//! standard-library role atop the core Miden crates.

pub mod activation;
pub mod grad;
pub mod layer;
pub mod loss;
pub mod norm;
pub mod optim;

pub use activation::{Activation, ActivationKind, ActivationLut};
pub use grad::GradHealth;
pub use layer::{Conv2d, Linear, LinearGrad};
pub use norm::{BatchNorm, BatchNormConfig};
pub use optim::{Adam, AdamConfig, Sgd, SgdConfig, SgdMomentum, SgdMomentumConfig};
