//! JSON configuration of the calibration context.

use crate::persist::DeckIoError;
use crate::pipette::ConfigError;
use crate::types::{Mount, PointLabel};
use deckcal_core::{CriticalPoint, Transform};
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Nominal deck positions of the calibration crosses and the Z reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoints {
    #[serde(rename = "1")]
    pub one: [f64; 2],
    #[serde(rename = "2")]
    pub two: [f64; 2],
    #[serde(rename = "3")]
    pub three: [f64; 2],
    /// Flat deck spot touched by "save z".
    pub z_reference: [f64; 3],
}

impl Default for CalibrationPoints {
    fn default() -> Self {
        Self {
            one: [12.13, 9.0],
            two: [380.87, 9.0],
            three: [12.13, 258.0],
            z_reference: [12.13, 9.0, 0.0],
        }
    }
}

impl CalibrationPoints {
    pub fn nominal(&self, label: PointLabel) -> Point2<f64> {
        let [x, y] = match label {
            PointLabel::One => self.one,
            PointLabel::Two => self.two,
            PointLabel::Three => self.three,
        };
        Point2::new(x, y)
    }

    pub fn nominal_set(&self) -> [Point2<f64>; 3] {
        PointLabel::ALL.map(|l| self.nominal(l))
    }

    pub fn z_reference(&self) -> Point3<f64> {
        let [x, y, z] = self.z_reference;
        Point3::new(x, y, z)
    }
}

/// Mount → gantry carriage offsets, in mm.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountOffsets {
    pub left: [f64; 3],
    pub right: [f64; 3],
}

impl Default for MountOffsets {
    fn default() -> Self {
        Self {
            left: [-34.0, 0.0, 0.0],
            right: [0.0, 0.0, 0.0],
        }
    }
}

impl MountOffsets {
    pub fn transform(&self, mount: Mount) -> Transform {
        let [x, y, z] = match mount {
            Mount::Left => self.left,
            Mount::Right => self.right,
        };
        Transform::from_translation(x, y, z)
    }
}

fn default_safe_height() -> f64 {
    5.0
}

fn default_point_height() -> f64 {
    5.0
}

fn default_critical_point() -> CriticalPoint {
    CriticalPoint::FrontNozzle
}

fn default_residual_warning() -> f64 {
    0.5
}

fn default_session_timeout() -> Option<u64> {
    Some(1800)
}

fn default_home() -> [f64; 3] {
    [418.0, 353.0, 218.0]
}

/// Context configuration. Every field has a default so partial files work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeckCalibrationConfig {
    #[serde(default)]
    pub points: CalibrationPoints,
    /// Height above the Z reference for `move safeZ`, in mm.
    #[serde(default = "default_safe_height")]
    pub safe_height: f64,
    /// Height above the deck for `move 1|2|3`, in mm.
    #[serde(default = "default_point_height")]
    pub point_height: f64,
    #[serde(default)]
    pub mount_offsets: MountOffsets,
    /// Critical point that moves and saves refer to.
    #[serde(default = "default_critical_point")]
    pub critical_point: CriticalPoint,
    /// Per-point residual above which a fit is logged as suspicious, in mm.
    #[serde(default = "default_residual_warning")]
    pub residual_warning_mm: f64,
    /// Idle seconds before an active session is reaped. `None` disables.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: Option<u64>,
    /// Where committed calibrations are stored. `None` keeps them in memory.
    #[serde(default)]
    pub calibration_path: Option<PathBuf>,
    /// Carriage position after homing, used by the simulated gantry.
    #[serde(default = "default_home")]
    pub home: [f64; 3],
}

impl Default for DeckCalibrationConfig {
    fn default() -> Self {
        Self {
            points: CalibrationPoints::default(),
            safe_height: default_safe_height(),
            point_height: default_point_height(),
            mount_offsets: MountOffsets::default(),
            critical_point: default_critical_point(),
            residual_warning_mm: default_residual_warning(),
            session_timeout_secs: default_session_timeout(),
            calibration_path: None,
            home: default_home(),
        }
    }
}

impl DeckCalibrationConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DeckIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), DeckIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn home_transform(&self) -> Transform {
        let [x, y, z] = self.home;
        Transform::from_translation(x, y, z)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.points;
        let finite = p
            .one
            .iter()
            .chain(&p.two)
            .chain(&p.three)
            .chain(&p.z_reference)
            .chain(&self.mount_offsets.left)
            .chain(&self.mount_offsets.right)
            .all(|v| v.is_finite());
        if !finite {
            return Err(ConfigError::Invalid(
                "calibration points and mount offsets must be finite".into(),
            ));
        }
        for (name, value) in [
            ("safe_height", self.safe_height),
            ("point_height", self.point_height),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if !self.residual_warning_mm.is_finite() || self.residual_warning_mm < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "residual_warning_mm must be non-negative, got {}",
                self.residual_warning_mm
            )));
        }
        Ok(())
    }
}
