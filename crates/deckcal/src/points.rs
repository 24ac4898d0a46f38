//! Offline fit input: nominal and measured points in one JSON file.

use deckcal_core::{fit_deck_transform, DeckFit, FitError};
use deckcal_session::DeckIoError;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Three correspondences plus the measured Z offset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitInput {
    pub nominal: [[f64; 2]; 3],
    pub measured: [[f64; 2]; 3],
    #[serde(default)]
    pub z_offset: f64,
}

impl FitInput {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DeckIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn fit(&self) -> Result<DeckFit, FitError> {
        let to_points = |raw: &[[f64; 2]; 3]| raw.map(|[x, y]| Point2::new(x, y));
        fit_deck_transform(&to_points(&self.nominal), &to_points(&self.measured), self.z_offset)
    }
}
