//! Pipette models, legacy-name resolution and the identity resolver seam.

use crate::types::{Mount, PipetteIdentity};
use deckcal_core::{CriticalPoints, Transform};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Semantic configuration errors (the file parsed but does not make sense).
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown pipette model `{0}`")]
    UnknownPipetteModel(String),
    #[error("pipette model `{0}` is defined twice")]
    DuplicateModel(String),
    #[error("legacy name `{legacy}` maps to unknown model `{target}`")]
    UnknownLegacyTarget { legacy: String, target: String },
    #[error("legacy name `{0}` shadows a canonical model")]
    LegacyShadowsModel(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Immutable description of a pipette model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipetteModel {
    pub name: String,
    pub channels: u32,
    /// Nozzle pitch in mm.
    pub channel_spacing: f64,
    /// Primary nozzle relative to the mount, in mm.
    pub model_offset: [f64; 3],
    pub min_volume: f64,
    pub max_volume: f64,
    pub aspirate_flow_rate: f64,
    pub dispense_flow_rate: f64,
}

/// Per-instrument adjustments layered over a [`PipetteModel`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipetteOverrides {
    pub min_volume: Option<f64>,
    pub max_volume: Option<f64>,
    pub aspirate_flow_rate: Option<f64>,
    pub dispense_flow_rate: Option<f64>,
}

impl PipetteModel {
    fn ot2(name: &str, channels: u32, volume: (f64, f64), flow: (f64, f64)) -> Self {
        let y = if channels > 1 { 31.5 } else { 0.0 };
        Self {
            name: name.to_string(),
            channels,
            channel_spacing: if channels > 1 { 9.0 } else { 0.0 },
            model_offset: [0.0, y, -25.8],
            min_volume: volume.0,
            max_volume: volume.1,
            aspirate_flow_rate: flow.0,
            dispense_flow_rate: flow.1,
        }
    }

    /// Copy of `self` with every set override applied.
    pub fn with_overrides(&self, overrides: &PipetteOverrides) -> PipetteModel {
        PipetteModel {
            min_volume: overrides.min_volume.unwrap_or(self.min_volume),
            max_volume: overrides.max_volume.unwrap_or(self.max_volume),
            aspirate_flow_rate: overrides
                .aspirate_flow_rate
                .unwrap_or(self.aspirate_flow_rate),
            dispense_flow_rate: overrides
                .dispense_flow_rate
                .unwrap_or(self.dispense_flow_rate),
            ..self.clone()
        }
    }

    pub fn critical_points(&self) -> CriticalPoints {
        CriticalPoints::new(self.channels, self.channel_spacing)
    }

    /// Mount → primary nozzle transform.
    pub fn offset_transform(&self) -> Transform {
        let [x, y, z] = self.model_offset;
        Transform::from_translation(x, y, z)
    }
}

/// Known pipette models plus the legacy-name map, validated on construction.
#[derive(Clone, Debug)]
pub struct ModelRegistry {
    models: BTreeMap<String, PipetteModel>,
    legacy: BTreeMap<String, String>,
}

impl ModelRegistry {
    pub fn new(
        models: impl IntoIterator<Item = PipetteModel>,
        legacy: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let mut by_name = BTreeMap::new();
        for model in models {
            if by_name.contains_key(&model.name) {
                return Err(ConfigError::DuplicateModel(model.name));
            }
            by_name.insert(model.name.clone(), model);
        }

        let mut aliases = BTreeMap::new();
        for (old, target) in legacy {
            if by_name.contains_key(&old) {
                return Err(ConfigError::LegacyShadowsModel(old));
            }
            if !by_name.contains_key(&target) {
                return Err(ConfigError::UnknownLegacyTarget {
                    legacy: old,
                    target,
                });
            }
            aliases.insert(old, target);
        }

        Ok(Self {
            models: by_name,
            legacy: aliases,
        })
    }

    /// First-generation OT-2 style models and their pre-versioning names.
    pub fn builtin() -> Self {
        let models = [
            PipetteModel::ot2("p10_single_v1", 1, (1.0, 10.0), (5.0, 10.0)),
            PipetteModel::ot2("p10_multi_v1", 8, (1.0, 10.0), (5.0, 10.0)),
            PipetteModel::ot2("p50_single_v1", 1, (5.0, 50.0), (25.0, 50.0)),
            PipetteModel::ot2("p50_multi_v1", 8, (5.0, 50.0), (25.0, 50.0)),
            PipetteModel::ot2("p300_single_v1", 1, (30.0, 300.0), (150.0, 300.0)),
            PipetteModel::ot2("p300_multi_v1", 8, (30.0, 300.0), (150.0, 300.0)),
            PipetteModel::ot2("p1000_single_v1", 1, (100.0, 1000.0), (500.0, 1000.0)),
        ];
        let legacy = models
            .iter()
            .filter_map(|m| m.name.strip_suffix("_v1"))
            .map(|old| (old.to_string(), format!("{old}_v1")))
            .collect::<Vec<_>>();
        Self {
            models: models.into_iter().map(|m| (m.name.clone(), m)).collect(),
            legacy: legacy.into_iter().collect(),
        }
    }

    /// Resolve a canonical or legacy model name.
    pub fn resolve(&self, name: &str) -> Result<&PipetteModel, ConfigError> {
        let canonical = self.legacy.get(name).map(String::as_str).unwrap_or(name);
        self.models
            .get(canonical)
            .ok_or_else(|| ConfigError::UnknownPipetteModel(name.to_string()))
    }

    pub fn is_legacy_name(&self, name: &str) -> bool {
        self.legacy.contains_key(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &PipetteModel> {
        self.models.values()
    }
}

/// Reports what is physically attached to each mount.
pub trait PipetteIdentityResolver: Send + Sync {
    fn attached_pipette(&self, mount: Mount) -> Option<PipetteIdentity>;
}

/// Resolver backed by an in-memory table; pipettes can be swapped at runtime.
#[derive(Debug, Default)]
pub struct StaticPipettes {
    attached: Mutex<BTreeMap<Mount, PipetteIdentity>>,
}

impl StaticPipettes {
    pub fn new(pipettes: impl IntoIterator<Item = PipetteIdentity>) -> Self {
        Self {
            attached: Mutex::new(pipettes.into_iter().map(|p| (p.mount, p)).collect()),
        }
    }

    pub fn attach(&self, identity: PipetteIdentity) {
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.mount, identity);
    }

    pub fn detach(&self, mount: Mount) -> Option<PipetteIdentity> {
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&mount)
    }
}

impl PipetteIdentityResolver for StaticPipettes {
    fn attached_pipette(&self, mount: Mount) -> Option<PipetteIdentity> {
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&mount)
            .cloned()
    }
}
