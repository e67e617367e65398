//! Anomaly detection -- isolation forest, training, and scoring.

pub mod forest;
pub mod scorer;
pub mod trainer;

pub use self::forest::IsolationForest;
pub use self::scorer::Scorer;
pub use self::trainer::{TrainParams, TrainedModel, Trainer};

use crate::features::{EncodeError, FeatureSchema, Rejected};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] EncodeError),

    #[error("cannot train on an empty batch")]
    EmptyBatch,

    #[error("non-numeric value at row {row}, column {column}")]
    NonNumeric { row: usize, column: usize },

    #[error("feature arity mismatch: model expects {expected} features, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    #[error("invalid training parameters: {0}")]
    InvalidParams(String),

    #[error("model was trained with the {model} schema but the request uses {requested}")]
    SchemaMismatch {
        model: FeatureSchema,
        requested: FeatureSchema,
    },

    #[error("no model artifact at {}", path.display())]
    ArtifactNotFound { path: PathBuf },

    #[error("model artifact at {} is corrupt: {reason}", path.display())]
    ArtifactCorrupt { path: PathBuf, reason: String },

    #[error("failed to write model artifact to {}", path.display())]
    StorageWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DetectError {
    /// True for errors caused by the caller's input rather than the model or storage.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DetectError::InvalidRecord(_)
                | DetectError::EmptyBatch
                | DetectError::NonNumeric { .. }
                | DetectError::ArityMismatch { .. }
                | DetectError::InvalidParams(_)
                | DetectError::SchemaMismatch { .. }
        )
    }
}

/// Binary verdict for one scored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Anomaly,
    Normal,
}

impl Label {
    /// Map the forest's raw prediction: -1 is anomalous, anything else normal.
    pub fn from_raw(raw: i8) -> Self {
        if raw == -1 {
            Label::Anomaly
        } else {
            Label::Normal
        }
    }

    pub fn is_anomaly(self) -> bool {
        self == Label::Anomaly
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Anomaly => f.write_str("Anomaly"),
            Label::Normal => f.write_str("Normal"),
        }
    }
}

/// Per-record scoring outcome. `index` is the record's position in the submitted batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreResult {
    pub index: usize,
    pub id: String,
    pub label: Label,
}

/// Labels for the valid records of a batch plus the records left out.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoredBatch {
    pub results: Vec<ScoreResult>,
    pub rejected: Vec<Rejected>,
}
