//! Model scoring against a persisted artifact.

use super::{DetectError, Label, ScoreResult, ScoredBatch};
use crate::features::{self, FeatureSchema, FeatureVector, IncidentRecord, InvalidRecordPolicy};
use crate::storage::ModelArtifact;
use std::path::Path;
use tracing::info;

/// Read-only view of a trained model. Cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Scorer {
    artifact: ModelArtifact,
}

impl Scorer {
    /// Load the artifact at `path`.
    pub fn load(path: &Path) -> Result<Self, DetectError> {
        let artifact = ModelArtifact::load(path)?;
        info!(
            path = %path.display(),
            schema = %artifact.schema,
            trained_at = %artifact.trained_at,
            rows = artifact.training_rows,
            "Model loaded"
        );
        Ok(Self::from_artifact(artifact))
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Self {
        Self { artifact }
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn schema(&self) -> FeatureSchema {
        self.artifact.schema
    }

    fn check_schema(&self, requested: FeatureSchema) -> Result<(), DetectError> {
        if requested != self.artifact.schema {
            return Err(DetectError::SchemaMismatch {
                model: self.artifact.schema,
                requested,
            });
        }
        let expected = self.artifact.n_features();
        if requested.arity() != expected {
            return Err(DetectError::ArityMismatch {
                expected,
                got: requested.arity(),
            });
        }
        Ok(())
    }

    /// One label per row. `schema` is the encoding the caller used for `rows`.
    pub fn score(&self, schema: FeatureSchema, rows: &[FeatureVector]) -> Result<Vec<Label>, DetectError> {
        self.check_schema(schema)?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .artifact
            .forest
            .predict(rows)?
            .into_iter()
            .map(Label::from_raw)
            .collect())
    }

    /// Encode and score a batch of records.
    pub fn score_records(
        &self,
        schema: FeatureSchema,
        records: &[IncidentRecord],
        policy: InvalidRecordPolicy,
    ) -> Result<ScoredBatch, DetectError> {
        self.check_schema(schema)?;
        let batch = features::encode_batch(records, schema, policy)?;
        let labels = self.score(schema, &batch.rows)?;

        let results = batch
            .positions
            .into_iter()
            .zip(batch.ids)
            .zip(labels)
            .map(|((index, id), label)| ScoreResult { index, id, label })
            .collect();

        Ok(ScoredBatch {
            results,
            rejected: batch.rejected,
        })
    }

    /// Score one record; invalid records are an error rather than skipped.
    pub fn score_record(&self, schema: FeatureSchema, record: &IncidentRecord) -> Result<Label, DetectError> {
        let row = features::encode(record, schema)?;
        let labels = self.score(schema, std::slice::from_ref(&row))?;
        labels.into_iter().next().ok_or(DetectError::EmptyBatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Trainer;
    use crate::features::IncidentType;

    fn typed_batch() -> Vec<IncidentRecord> {
        (0..40)
            .map(|i| {
                let kind = IncidentType::ALL[i % 3];
                IncidentRecord::with_type(format!("inc-{i}"), 19.0 + i as f64 * 0.001, 72.8, kind)
            })
            .collect()
    }

    fn typed_scorer() -> Scorer {
        let (model, _) = Trainer::default()
            .fit_records(FeatureSchema::IncidentType, &typed_batch(), InvalidRecordPolicy::Skip)
            .unwrap();
        model.into_scorer()
    }

    #[test]
    fn test_schema_mismatch_is_rejected() {
        let scorer = typed_scorer();
        let record = IncidentRecord::with_damage_level("r", 19.0, 72.8, 1);
        let err = scorer.score_record(FeatureSchema::DamageLevel, &record).unwrap_err();
        assert!(matches!(
            err,
            DetectError::SchemaMismatch {
                model: FeatureSchema::IncidentType,
                requested: FeatureSchema::DamageLevel
            }
        ));
    }

    #[test]
    fn test_score_records_keeps_ids_and_rejects() {
        let scorer = typed_scorer();
        let mut records = typed_batch();
        records[5].incident_type = Some("Landslide".to_string());

        let scored = scorer
            .score_records(FeatureSchema::IncidentType, &records, InvalidRecordPolicy::Skip)
            .unwrap();
        assert_eq!(scored.results.len(), 39);
        assert_eq!(scored.rejected.len(), 1);
        assert_eq!(scored.rejected[0].id, "inc-5");
        assert!(scored.results.iter().all(|r| r.id != "inc-5"));
        assert_eq!(scored.results[0].id, "inc-0");
        assert_eq!(scored.results[5].index, 6);
    }

    #[test]
    fn test_in_memory_scorer_matches_trained_model() {
        let (model, batch) = Trainer::default()
            .fit_records(FeatureSchema::IncidentType, &typed_batch(), InvalidRecordPolicy::Skip)
            .unwrap();
        let expected = model.predict(&batch.rows).unwrap();
        let scorer = model.into_scorer();
        assert_eq!(scorer.score(FeatureSchema::IncidentType, &batch.rows).unwrap(), expected);
    }

    #[test]
    fn test_empty_input_scores_nothing() {
        let scorer = typed_scorer();
        assert!(scorer.score(FeatureSchema::IncidentType, &[]).unwrap().is_empty());
    }
}
