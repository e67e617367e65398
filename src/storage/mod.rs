//! Durable storage -- the model artifact file and the incidents input file.
//!
//! The artifact is a single JSON document. There is no versioning or locking:
//! each training run overwrites the previous artifact wholesale, and a reader
//! racing a writer may observe a partial file (reported as corrupt).

pub mod dataset;

use crate::detect::forest::IsolationForest;
use crate::detect::{DetectError, TrainParams};
use crate::features::FeatureSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::info;

/// Everything the scorer needs to reproduce training-time behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub schema: FeatureSchema,
    pub feature_names: Vec<String>,
    pub params: TrainParams,
    pub training_rows: usize,
    pub trained_at: DateTime<Utc>,
    pub forest: IsolationForest,
}

/// Artifact metadata without the trees.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    pub schema: FeatureSchema,
    pub feature_names: Vec<String>,
    pub params: TrainParams,
    pub training_rows: usize,
    pub trained_at: DateTime<Utc>,
    pub offset: f64,
}

impl ModelArtifact {
    pub fn n_features(&self) -> usize {
        self.forest.n_features()
    }

    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            schema: self.schema,
            feature_names: self.feature_names.clone(),
            params: self.params,
            training_rows: self.training_rows,
            trained_at: self.trained_at,
            offset: self.forest.offset(),
        }
    }

    /// Write the artifact to `path`, replacing whatever was there.
    pub fn save(&self, path: &Path) -> Result<(), DetectError> {
        let write_failure = |source| DetectError::StorageWriteFailure {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_failure)?;
        }

        let bytes = serde_json::to_vec(self)
            .map_err(|e| write_failure(std::io::Error::new(ErrorKind::InvalidData, e)))?;
        fs::write(path, bytes).map_err(write_failure)?;

        info!(path = %path.display(), schema = %self.schema, rows = self.training_rows, "Model artifact written");
        Ok(())
    }

    /// Read the artifact at `path`.
    pub fn load(path: &Path) -> Result<Self, DetectError> {
        let bytes = fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => DetectError::ArtifactNotFound {
                path: path.to_path_buf(),
            },
            _ => DetectError::ArtifactCorrupt {
                path: path.to_path_buf(),
                reason: format!("unreadable: {e}"),
            },
        })?;

        let artifact: Self = serde_json::from_slice(&bytes).map_err(|e| DetectError::ArtifactCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        artifact
            .forest
            .check_structure()
            .map_err(|reason| DetectError::ArtifactCorrupt {
                path: path.to_path_buf(),
                reason,
            })?;

        if artifact.n_features() != artifact.schema.arity() {
            return Err(DetectError::ArtifactCorrupt {
                path: path.to_path_buf(),
                reason: format!(
                    "forest expects {} features but schema {} has {}",
                    artifact.n_features(),
                    artifact.schema,
                    artifact.schema.arity()
                ),
            });
        }

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Trainer;
    use crate::features::FeatureVector;

    fn small_artifact() -> ModelArtifact {
        let rows: Vec<FeatureVector> = (0..20)
            .map(|i| FeatureVector::new(vec![21.5 + i as f64 * 0.001, 72.9, (i % 2) as f64]))
            .collect();
        Trainer::default()
            .fit(FeatureSchema::DamageLevel, &rows)
            .unwrap()
            .into_artifact()
    }

    #[test]
    fn test_save_creates_parent_dirs_and_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("models").join("iforest_model.json");
        let artifact = small_artifact();

        artifact.save(&path).unwrap();
        let loaded = ModelArtifact::load(&path).unwrap();
        assert_eq!(loaded, artifact);
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = ModelArtifact::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, DetectError::ArtifactNotFound { .. }));
    }

    #[test]
    fn test_corrupt_artifact() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, b"{\"schema\": \"damage_level\", \"forest\": ").unwrap();

        let err = ModelArtifact::load(&path).unwrap_err();
        assert!(matches!(err, DetectError::ArtifactCorrupt { .. }));
    }

    #[test]
    fn test_out_of_range_split_feature_is_corrupt() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        small_artifact().save(&path).unwrap();

        let mut doc: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        let root = &mut doc["forest"]["trees"][0]["root"]["Internal"];
        assert!(root.is_object(), "first tree should split at its root");
        root["feature"] = serde_json::json!(7);
        fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        match ModelArtifact::load(&path).unwrap_err() {
            DetectError::ArtifactCorrupt { reason, .. } => assert!(reason.contains("feature 7"), "{}", reason),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_sample_size_is_corrupt() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        small_artifact().save(&path).unwrap();

        let mut doc: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        doc["forest"]["sample_size"] = serde_json::json!(0);
        fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        assert!(matches!(
            ModelArtifact::load(&path),
            Err(DetectError::ArtifactCorrupt { .. })
        ));
    }

    #[test]
    fn test_save_overwrites() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, b"stale").unwrap();

        small_artifact().save(&path).unwrap();
        assert!(ModelArtifact::load(&path).is_ok());
    }

    #[test]
    fn test_unwritable_location() {
        let dir = tempfile::TempDir::new().unwrap();
        // A regular file where a directory is expected.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();

        let err = small_artifact().save(&blocker.join("model.json")).unwrap_err();
        assert!(matches!(err, DetectError::StorageWriteFailure { .. }));
    }
}
