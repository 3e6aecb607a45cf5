//! JSON wire format for an emitted training step, the input `verify-step`
//! needs to independently recompute and check
//! [`ctchain_audit::verify_step`] against (spec §4.8's "Verify step").
//!
//! `original_source/examples/verify_step.c` never implemented this (it is a
//! `TODO: Implement` stub); the format here is grounded entirely in
//! `ctchain_audit::merkle::TrainingStepRecord` and `verify_step`'s actual
//! argument list.

use ctchain_audit::TrainingStepRecord;
use ctchain_core::{DType, Shape, TensorView};
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

fn hash_to_hex(hash: &[u8; 32]) -> String {
    hex::encode(hash)
}

fn hex_to_hash(s: &str, field: &'static str) -> CliResult<[u8; 32]> {
    let bytes = hex::decode(s)?;
    bytes.try_into().map_err(|_| CliError::BadHashLength(field))
}

/// Everything an offline verifier needs: the claimed record, plus the raw
/// weights and batch indices the record's hashes are supposed to commit to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecordFile {
    pub prev_hash: String,
    pub weights_hash: String,
    pub batch_hash: String,
    pub step: u64,
    pub step_hash: String,
    pub weights: Vec<i32>,
    pub batch_indices: Vec<u32>,
}

impl StepRecordFile {
    pub fn from_record(record: &TrainingStepRecord, weights: Vec<i32>, batch_indices: Vec<u32>) -> Self {
        Self {
            prev_hash: hash_to_hex(&record.prev_hash),
            weights_hash: hash_to_hex(&record.weights_hash),
            batch_hash: hash_to_hex(&record.batch_hash),
            step: record.step,
            step_hash: hash_to_hex(&record.step_hash),
            weights,
            batch_indices,
        }
    }

    pub fn record(&self) -> CliResult<TrainingStepRecord> {
        Ok(TrainingStepRecord {
            prev_hash: hex_to_hash(&self.prev_hash, "prev_hash")?,
            weights_hash: hex_to_hash(&self.weights_hash, "weights_hash")?,
            batch_hash: hex_to_hash(&self.batch_hash, "batch_hash")?,
            step: self.step,
            step_hash: hex_to_hash(&self.step_hash, "step_hash")?,
        })
    }

    /// Independently re-verify this record's hashes against its own
    /// `prev_hash` field and bundled weights/batch, matching `verify_step`'s
    /// pure-function contract exactly.
    pub fn verify(&self) -> CliResult<()> {
        let record = self.record()?;
        let prev_hash = hex_to_hash(&self.prev_hash, "prev_hash")?;
        let shape = Shape::row_major(&[self.weights.len()]).map_err(CliError::Ct)?;
        let view = TensorView::new(shape, DType::Q16_16, &self.weights).map_err(CliError::Ct)?;

        ctchain_audit::verify_step(&record, &prev_hash, &view, &self.batch_indices)
            .map_err(|_| CliError::VerificationFailed)
    }
}
