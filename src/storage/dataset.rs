//! Incidents input file: `{"incidents": [...]}`.

use crate::features::IncidentRecord;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read incidents file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse incidents file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IncidentFile {
    pub incidents: Vec<IncidentRecord>,
}

/// Load the ordered incident list from `path`.
pub fn load_incidents(path: &Path) -> Result<Vec<IncidentRecord>, DatasetError> {
    let content = std::fs::read_to_string(path).map_err(|source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: IncidentFile = serde_json::from_str(&content).map_err(|source| DatasetError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), count = file.incidents.len(), "Loaded incidents");
    Ok(file.incidents)
}
