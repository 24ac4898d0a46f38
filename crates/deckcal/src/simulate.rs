//! Scripted operator for dry runs against [`SimulatedGantry`].
//!
//! The simulated deck is displaced from its nominal position by a rigid error
//! (rotation about Z, then a shift). The operator jogs the calibration
//! critical point onto each physical cross exactly, so a correct pipeline
//! recovers that error as the committed deck correction.

use deckcal_core::{DeckFit, Transform};
use deckcal_session::{
    Axis, CalibrationError, DeckCalibrationConfig, DeckContext, ModelRegistry, Mount,
    MoveTarget, PipetteIdentity, PointLabel, SessionToken, SimulatedGantry, StaticPipettes,
};
use log::{debug, info};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Jogs shorter than this are skipped, in mm.
const JOG_EPS: f64 = 1e-12;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    pub mount: Mount,
    pub model: String,
    pub tip_length: f64,
    /// Deck rotation about Z, degrees counter-clockwise.
    pub rotation_deg: f64,
    /// Deck shift applied after the rotation, in mm.
    pub shift: [f64; 3],
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            mount: Mount::Left,
            model: "p300_multi_v1".to_string(),
            tip_length: 51.7,
            rotation_deg: 0.0,
            shift: [0.0; 3],
        }
    }
}

impl SimulationParams {
    /// Nominal deck → physical deck.
    pub fn deck_error(&self) -> Transform {
        let [x, y, z] = self.shift;
        Transform::from_translation(x, y, z) * Transform::from_rotation_z(self.rotation_deg.to_radians())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SimulationReport {
    pub deck_error: Transform,
    pub fit: DeckFit,
    /// Largest absolute entry of `fit.transform − deck_error`.
    pub max_deviation: f64,
    pub jogs: usize,
}

/// Run start → attach tip → Z and XY collection → save transform → release.
pub fn simulate_calibration(
    config: DeckCalibrationConfig,
    params: &SimulationParams,
) -> Result<SimulationReport, CalibrationError> {
    let gantry = Arc::new(SimulatedGantry::homed_at(config.home_transform()));
    let pipettes = Arc::new(StaticPipettes::new([PipetteIdentity::new(
        params.mount,
        params.model.clone(),
    )]));
    let ctx = DeckContext::new(config, ModelRegistry::builtin(), gantry, pipettes)?;

    let start = ctx.start(params.mount)?;
    info!(
        "simulating calibration with {} on the {} mount",
        start.pipette.model, params.mount
    );
    let outcome = Operator {
        ctx: &ctx,
        token: start.token,
        mount: params.mount,
        jogs: 0,
    }
    .calibrate(params);
    ctx.release(&start.token);
    outcome
}

struct Operator<'a> {
    ctx: &'a DeckContext,
    token: SessionToken,
    mount: Mount,
    jogs: usize,
}

impl Operator<'_> {
    fn calibrate(mut self, params: &SimulationParams) -> Result<SimulationReport, CalibrationError> {
        let error = params.deck_error();
        let points = self.ctx.config().points.clone();
        let z_ref = points.z_reference();

        self.ctx.attach_tip(&self.token, params.tip_length)?;

        self.ctx.move_to_point(&self.token, MoveTarget::SafeZ)?;
        let deck = error.transform_point(&z_ref);
        self.jog_to(Axis::Z, deck.z)?;
        self.ctx.save_z(&self.token)?;

        for label in PointLabel::ALL {
            self.ctx.move_to_point(&self.token, MoveTarget::Point(label))?;
            let n = points.nominal(label);
            let cross = error.transform_point(&Point3::new(n.x, n.y, z_ref.z));
            self.jog_to(Axis::X, cross.x)?;
            self.jog_to(Axis::Y, cross.y)?;
            self.ctx.save_xy(&self.token, label)?;
        }

        let fit = self.ctx.save_transform(&self.token)?;
        Ok(SimulationReport {
            max_deviation: fit.transform.max_abs_diff(&error),
            deck_error: error,
            fit,
            jogs: self.jogs,
        })
    }

    fn jog_to(&mut self, axis: Axis, target: f64) -> Result<(), CalibrationError> {
        let here = self
            .ctx
            .tool_position(self.mount, self.ctx.config().critical_point)?;
        let delta = target - here[axis.index()];
        if delta.abs() < JOG_EPS {
            return Ok(());
        }
        let direction = if delta < 0.0 { -1 } else { 1 };
        self.ctx.jog(&self.token, axis, direction, delta.abs())?;
        self.jogs += 1;
        debug!("jogged {axis} by {delta:.4} mm");
        Ok(())
    }
}
