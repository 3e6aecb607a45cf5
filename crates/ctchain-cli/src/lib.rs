//! Shared driver code for the `train-xor` and `verify-step` binaries: the
//! XOR network itself, training configuration, and the JSON record format
//! that bridges the two (spec §9 L10 Drivers).

pub mod config;
pub mod error;
pub mod model;
pub mod optimizer;
pub mod record;

pub use config::{OptimizerKind, TrainingConfig};
pub use error::{CliError, CliResult};
pub use model::XorModel;
pub use optimizer::Optimizer;
pub use record::StepRecordFile;
