//! Training configuration: the ambient piece `original_source/examples/train_xor.c`
//! hard-codes as `#define`s, lifted into a `serde`-serializable struct whose
//! canonical JSON bytes become the Merkle genesis's `config_data` (spec §4.8).

use serde::{Deserialize, Serialize};

/// Optimizer selection, tagged in JSON as `"sgd"` / `"sgd_momentum"` / `"adam"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Sgd,
    SgdMomentum,
    Adam,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Learning rate in Q16.16 raw form (`original_source`'s `LEARNING_RATE`
    /// default is `32768` = 0.5).
    pub learning_rate_raw: i32,
    pub batch_size: u32,
    pub epochs: u32,
    pub optimizer: OptimizerKind,
    pub seed: u64,
    pub hidden_width: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate_raw: 32_768,
            batch_size: 4,
            epochs: 5_000,
            optimizer: OptimizerKind::Sgd,
            seed: 0xDEAD_BEEF_CAFE_BABE,
            hidden_width: 8,
        }
    }
}

impl TrainingConfig {
    /// Canonical JSON bytes, hashed into the Merkle genesis as `config_data`
    /// (spec §4.8). `serde_json`'s struct-field order is declaration order,
    /// so two configs with identical field values always hash identically.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_bytes_are_stable_across_calls() {
        let config = TrainingConfig::default();
        assert_eq!(config.canonical_bytes().unwrap(), config.canonical_bytes().unwrap());
    }
}
