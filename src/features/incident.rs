//! Incident report records as they arrive from the reporting frontend.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A geolocated incident report.
///
/// `incident_type` is kept as the raw string from the report so that values
/// outside the known set survive deserialization and can be rejected per record
/// by the encoder instead of failing a whole file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub incident_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage_level: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl IncidentRecord {
    /// Record for the incident-type path.
    pub fn with_type(id: impl Into<String>, lat: f64, lng: f64, kind: IncidentType) -> Self {
        Self {
            id: id.into(),
            lat,
            lng,
            incident_type: Some(kind.as_str().to_string()),
            damage_level: None,
            timestamp: None,
        }
    }

    /// Record for the damage-level (report scoring) path.
    pub fn with_damage_level(id: impl Into<String>, lat: f64, lng: f64, damage_level: i64) -> Self {
        Self {
            id: id.into(),
            lat,
            lng,
            incident_type: None,
            damage_level: Some(damage_level),
            timestamp: None,
        }
    }
}

/// The closed set of incident categories the model was built around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncidentType {
    IllegalCutting,
    Dumping,
    Erosion,
}

impl IncidentType {
    pub const ALL: [IncidentType; 3] = [
        IncidentType::IllegalCutting,
        IncidentType::Dumping,
        IncidentType::Erosion,
    ];

    /// Categorical code used as the third feature.
    pub fn code(self) -> u8 {
        match self {
            IncidentType::IllegalCutting => 0,
            IncidentType::Dumping => 1,
            IncidentType::Erosion => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IncidentType::IllegalCutting => "Illegal Cutting",
            IncidentType::Dumping => "Dumping",
            IncidentType::Erosion => "Erosion",
        }
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Matching is exact: "dumping" or "Illegal cutting" are not in the set.
impl FromStr for IncidentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IncidentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown incident type: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(IncidentType::IllegalCutting.code(), 0);
        assert_eq!(IncidentType::Dumping.code(), 1);
        assert_eq!(IncidentType::Erosion.code(), 2);
    }

    #[test]
    fn test_parse_display_names() {
        for t in IncidentType::ALL {
            assert_eq!(t.as_str().parse::<IncidentType>().unwrap(), t);
        }
        assert!("Landslide".parse::<IncidentType>().is_err());
        assert!("dumping".parse::<IncidentType>().is_err());
    }

    #[test]
    fn test_record_json_shape() {
        let json = r#"{"id": "1", "lat": 19.0, "lng": 72.8, "type": "Illegal Cutting",
                       "timestamp": "2025-08-31T05:58:00"}"#;
        let record: IncidentRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, "1");
        assert_eq!(record.incident_type.as_deref(), Some("Illegal Cutting"));
        assert_eq!(record.damage_level, None);
        assert_eq!(record.timestamp.as_deref(), Some("2025-08-31T05:58:00"));
    }

    #[test]
    fn test_unknown_type_still_deserializes() {
        let json = r#"{"id": "9", "lat": 1.0, "lng": 2.0, "type": "Landslide"}"#;
        let record: IncidentRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.incident_type.as_deref(), Some("Landslide"));
    }
}
