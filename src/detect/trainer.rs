//! Model training: encoded batch in, fitted artifact out.

use super::forest::IsolationForest;
use super::scorer::Scorer;
use super::{DetectError, Label};
use crate::features::{self, EncodedBatch, FeatureSchema, FeatureVector, IncidentRecord, InvalidRecordPolicy};
use crate::storage::ModelArtifact;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Hyperparameters for one training run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainParams {
    /// Number of isolation trees.
    pub n_estimators: usize,
    /// Expected share of anomalies in the training population.
    pub contamination: f64,
    pub seed: u64,
    /// Per-tree subsample cap.
    pub max_samples: usize,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            contamination: 0.05,
            seed: 42,
            max_samples: 256,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Trainer {
    params: TrainParams,
}

impl Trainer {
    pub fn new(params: TrainParams) -> Self {
        Self { params }
    }

    /// Fit a forest on already-encoded rows.
    pub fn fit(&self, schema: FeatureSchema, rows: &[FeatureVector]) -> Result<TrainedModel, DetectError> {
        if let Some(row) = rows.iter().find(|r| r.len() != schema.arity()) {
            return Err(DetectError::ArityMismatch {
                expected: schema.arity(),
                got: row.len(),
            });
        }

        let mut forest = IsolationForest::new()
            .with_n_estimators(self.params.n_estimators)
            .with_contamination(self.params.contamination)
            .with_max_samples(self.params.max_samples)
            .with_random_state(self.params.seed);
        forest.fit(rows)?;

        info!(
            %schema,
            rows = rows.len(),
            trees = self.params.n_estimators,
            contamination = self.params.contamination,
            seed = self.params.seed,
            "Model trained"
        );

        Ok(TrainedModel {
            artifact: ModelArtifact {
                schema,
                feature_names: schema.feature_names().iter().map(|s| s.to_string()).collect(),
                params: self.params,
                training_rows: rows.len(),
                trained_at: chrono::Utc::now(),
                forest,
            },
        })
    }

    /// Encode `records` under `schema` and fit on the valid ones.
    ///
    /// The returned batch carries the ids of the rows the model saw, in order,
    /// plus any records rejected under `policy`.
    pub fn fit_records(
        &self,
        schema: FeatureSchema,
        records: &[IncidentRecord],
        policy: InvalidRecordPolicy,
    ) -> Result<(TrainedModel, EncodedBatch), DetectError> {
        let batch = features::encode_batch(records, schema, policy)?;
        if batch.is_empty() {
            return Err(DetectError::EmptyBatch);
        }
        let model = self.fit(schema, &batch.rows)?;
        Ok((model, batch))
    }
}

/// A freshly fitted model, not yet persisted.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    artifact: ModelArtifact,
}

impl TrainedModel {
    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn into_artifact(self) -> ModelArtifact {
        self.artifact
    }

    pub fn schema(&self) -> FeatureSchema {
        self.artifact.schema
    }

    /// Labels from the in-memory model.
    pub fn predict(&self, rows: &[FeatureVector]) -> Result<Vec<Label>, DetectError> {
        Ok(self
            .artifact
            .forest
            .predict(rows)?
            .into_iter()
            .map(Label::from_raw)
            .collect())
    }

    /// Write the artifact to `path`, overwriting any previous model.
    pub fn persist(&self, path: &Path) -> Result<(), DetectError> {
        self.artifact.save(path)
    }

    /// Score with this model without a round trip through storage.
    pub fn into_scorer(self) -> Scorer {
        Scorer::from_artifact(self.artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::IncidentType;

    fn report_batch() -> Vec<IncidentRecord> {
        [
            (21.501, 72.907, 1),
            (21.502, 72.908, 0),
            (21.503, 72.909, 1),
            (21.504, 72.910, 0),
            (21.505, 72.911, 1),
        ]
        .iter()
        .enumerate()
        .map(|(i, &(lat, lng, level))| IncidentRecord::with_damage_level(i.to_string(), lat, lng, level))
        .collect()
    }

    #[test]
    fn test_default_params() {
        let p = TrainParams::default();
        assert_eq!(p.n_estimators, 100);
        assert_eq!(p.contamination, 0.05);
        assert_eq!(p.seed, 42);
    }

    #[test]
    fn test_fit_records_reports_schema_and_rows() {
        let (model, batch) = Trainer::default()
            .fit_records(FeatureSchema::DamageLevel, &report_batch(), InvalidRecordPolicy::Skip)
            .unwrap();

        assert_eq!(model.schema(), FeatureSchema::DamageLevel);
        assert_eq!(model.artifact().training_rows, 5);
        assert_eq!(model.artifact().feature_names, vec!["lat", "lng", "damage_level"]);
        assert_eq!(batch.ids, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(model.predict(&batch.rows).unwrap().len(), 5);
    }

    #[test]
    fn test_empty_batch() {
        let err = Trainer::default()
            .fit(FeatureSchema::IncidentType, &[])
            .unwrap_err();
        assert!(matches!(err, DetectError::EmptyBatch));
    }

    #[test]
    fn test_all_records_rejected_is_empty_batch() {
        // Damage-level records carry no type, so the type schema rejects them all.
        let err = Trainer::default()
            .fit_records(FeatureSchema::IncidentType, &report_batch(), InvalidRecordPolicy::Skip)
            .unwrap_err();
        assert!(matches!(err, DetectError::EmptyBatch));
    }

    #[test]
    fn test_fail_policy_surfaces_invalid_record() {
        let mut records = vec![IncidentRecord::with_type("ok", 19.0, 72.8, IncidentType::Dumping)];
        let mut bad = IncidentRecord::with_type("bad", 19.0, 72.8, IncidentType::Erosion);
        bad.incident_type = Some("Landslide".to_string());
        records.push(bad);

        let err = Trainer::default()
            .fit_records(FeatureSchema::IncidentType, &records, InvalidRecordPolicy::Fail)
            .unwrap_err();
        assert!(matches!(err, DetectError::InvalidRecord(_)));
    }

    #[test]
    fn test_rows_must_match_schema_arity() {
        let rows = vec![FeatureVector::new(vec![1.0, 2.0])];
        let err = Trainer::default().fit(FeatureSchema::DamageLevel, &rows).unwrap_err();
        assert!(matches!(err, DetectError::ArityMismatch { expected: 3, got: 2 }));
    }

    #[test]
    fn test_invalid_contamination() {
        let trainer = Trainer::new(TrainParams {
            contamination: 0.9,
            ..TrainParams::default()
        });
        let rows = vec![FeatureVector::new(vec![1.0, 2.0, 3.0])];
        assert!(matches!(
            trainer.fit(FeatureSchema::DamageLevel, &rows),
            Err(DetectError::InvalidParams(_))
        ));
    }
}
