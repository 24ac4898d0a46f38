//! Calibration file written on commit and loaded at start-up.

use crate::types::PipetteIdentity;
use deckcal_core::Transform;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(thiserror::Error, Debug)]
pub enum DeckIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Committed deck correction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeckCalibrationFile {
    /// Nominal deck → physical gantry transform, row-major.
    pub gantry_calibration: Transform,
    /// Pipette the calibration was taken with.
    #[serde(default)]
    pub pipette: Option<PipetteIdentity>,
    #[serde(default)]
    pub rms_residual: Option<f64>,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub created_at: u64,
}

impl DeckCalibrationFile {
    pub fn new(gantry_calibration: Transform) -> Self {
        Self {
            gantry_calibration,
            pipette: None,
            rms_residual: None,
            created_at: current_timestamp(),
        }
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DeckIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write as pretty JSON. The file is replaced by rename so a failed
    /// write never leaves a truncated calibration behind.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), DeckIoError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

pub(crate) fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
