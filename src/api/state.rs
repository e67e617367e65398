use crate::config::DataConfig;
use crate::detect::Scorer;
use crate::features::{FeatureSchema, InvalidRecordPolicy};
use std::path::PathBuf;
use std::sync::Arc;

/// Shared handler state. The scorer is loaded once at startup and never mutated.
#[derive(Clone)]
pub struct AppState {
    pub scorer: Arc<Scorer>,
    pub incidents_path: PathBuf,
    pub default_schema: FeatureSchema,
    pub invalid_records: InvalidRecordPolicy,
}

impl AppState {
    pub fn new(scorer: Scorer, data: &DataConfig) -> Self {
        Self {
            scorer: Arc::new(scorer),
            incidents_path: data.incidents_path.clone(),
            default_schema: data.schema,
            invalid_records: data.invalid_records,
        }
    }
}
