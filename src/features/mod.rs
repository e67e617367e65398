//! Feature encoding -- incident records to fixed-order numeric vectors.
//!
//! Two schemas exist side by side: the incident-type path used by the batch
//! trainer (`lat, lng, type_encoded`) and the damage-level path used for
//! individual report scoring (`lat, lng, damage_level`). Both produce three
//! features, so arity alone cannot tell them apart; the schema travels with the
//! model artifact and every scoring call declares the one it encodes with.

pub mod incident;

pub use self::incident::{IncidentRecord, IncidentType};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Number of features produced by either schema.
pub const FEATURE_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("record {id}: missing required field `{field}`")]
    MissingField { id: String, field: &'static str },

    #[error("record {id}: {field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        id: String,
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("record {id}: unknown incident type {value:?}")]
    UnknownIncidentType { id: String, value: String },
}

impl EncodeError {
    pub fn record_id(&self) -> &str {
        match self {
            EncodeError::MissingField { id, .. }
            | EncodeError::OutOfRange { id, .. }
            | EncodeError::UnknownIncidentType { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("unknown feature schema {0:?} (expected `incident_type` or `damage_level`)")]
pub struct UnknownSchema(pub String);

/// Which feature layout a model was trained with, or a request encodes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSchema {
    /// `lat, lng, type_encoded`
    #[serde(alias = "type")]
    IncidentType,
    /// `lat, lng, damage_level`
    #[serde(alias = "severity")]
    DamageLevel,
}

impl FeatureSchema {
    pub fn feature_names(self) -> [&'static str; FEATURE_COUNT] {
        match self {
            FeatureSchema::IncidentType => ["lat", "lng", "type_encoded"],
            FeatureSchema::DamageLevel => ["lat", "lng", "damage_level"],
        }
    }

    pub fn arity(self) -> usize {
        self.feature_names().len()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FeatureSchema::IncidentType => "incident_type",
            FeatureSchema::DamageLevel => "damage_level",
        }
    }
}

impl fmt::Display for FeatureSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureSchema {
    type Err = UnknownSchema;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().replace('-', "_").as_str() {
            "incident_type" | "type" => Ok(FeatureSchema::IncidentType),
            "damage_level" | "severity" => Ok(FeatureSchema::DamageLevel),
            _ => Err(UnknownSchema(s.to_string())),
        }
    }
}

/// What a batch does with a record that fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidRecordPolicy {
    /// Drop the record, report it in [`EncodedBatch::rejected`], keep going.
    #[default]
    Skip,
    /// Fail the whole batch on the first invalid record.
    Fail,
}

impl FromStr for InvalidRecordPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(InvalidRecordPolicy::Skip),
            "fail" => Ok(InvalidRecordPolicy::Fail),
            other => Err(format!("unknown invalid-record policy: {other}")),
        }
    }
}

/// Ordered numeric features for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }
}

impl AsRef<[f64]> for FeatureVector {
    fn as_ref(&self) -> &[f64] {
        &self.0
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// A record left out of a batch, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejected {
    pub id: String,
    pub reason: String,
}

/// Result of encoding a batch: `ids`, `positions` and `rows` line up index for index.
///
/// `positions` holds each row's index in the input slice. Ids are caller-supplied
/// and may repeat, so positions are what ties a row back to its record.
#[derive(Debug, Clone, Default)]
pub struct EncodedBatch {
    pub ids: Vec<String>,
    pub positions: Vec<usize>,
    pub rows: Vec<FeatureVector>,
    pub rejected: Vec<Rejected>,
}

impl EncodedBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn check_range(id: &str, field: &'static str, value: f64, min: f64, max: f64) -> Result<f64, EncodeError> {
    // NaN fails both comparisons, so it is caught here too.
    if value >= min && value <= max {
        Ok(value)
    } else {
        Err(EncodeError::OutOfRange {
            id: id.to_string(),
            field,
            value,
            min,
            max,
        })
    }
}

/// Encode a single record under `schema`.
pub fn encode(record: &IncidentRecord, schema: FeatureSchema) -> Result<FeatureVector, EncodeError> {
    let lat = check_range(&record.id, "lat", record.lat, -90.0, 90.0)?;
    let lng = check_range(&record.id, "lng", record.lng, -180.0, 180.0)?;

    let third = match schema {
        FeatureSchema::IncidentType => {
            let raw = record
                .incident_type
                .as_deref()
                .ok_or_else(|| EncodeError::MissingField {
                    id: record.id.clone(),
                    field: "type",
                })?;
            let kind: IncidentType = raw.parse().map_err(|_| EncodeError::UnknownIncidentType {
                id: record.id.clone(),
                value: raw.to_string(),
            })?;
            f64::from(kind.code())
        }
        FeatureSchema::DamageLevel => {
            let level = record.damage_level.ok_or_else(|| EncodeError::MissingField {
                id: record.id.clone(),
                field: "damage_level",
            })?;
            level as f64
        }
    };

    Ok(FeatureVector(vec![lat, lng, third]))
}

/// Encode a batch, applying `policy` to invalid records.
pub fn encode_batch(
    records: &[IncidentRecord],
    schema: FeatureSchema,
    policy: InvalidRecordPolicy,
) -> Result<EncodedBatch, EncodeError> {
    let mut batch = EncodedBatch::default();

    for (position, record) in records.iter().enumerate() {
        match encode(record, schema) {
            Ok(row) => {
                batch.ids.push(record.id.clone());
                batch.positions.push(position);
                batch.rows.push(row);
            }
            Err(e) if policy == InvalidRecordPolicy::Skip => {
                warn!(id = %record.id, %schema, error = %e, "Skipping invalid incident record");
                batch.rejected.push(Rejected {
                    id: record.id.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    Ok(batch)
}
