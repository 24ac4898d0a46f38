//! Calibration session data and its state transitions.
//!
//! A [`CalibrationSession`] only records what the operator has measured and
//! which step comes next. It never touches the gantry or the pose tree; the
//! context feeds it positions and applies the results.

use crate::error::CalibrationError;
use crate::persist::current_timestamp;
use crate::types::{Axis, MoveTarget, PipetteIdentity, PointLabel, SessionToken};
use nalgebra::{Point2, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Started,
    TipAttached,
    PointCollection,
    TransformComputed,
    Released,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::Started => "started",
            SessionState::TipAttached => "tip_attached",
            SessionState::PointCollection => "point_collection",
            SessionState::TransformComputed => "transform_computed",
            SessionState::Released => "released",
        })
    }
}

/// One audit-trail record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: u64,
    pub operation: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// State of one calibration attempt.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationSession {
    token: SessionToken,
    state: SessionState,
    target: PipetteIdentity,
    tip_length: Option<f64>,
    points: BTreeMap<PointLabel, Point2<f64>>,
    z_offset: Option<f64>,
    pending_jog: Vector3<f64>,
    last_move: Option<MoveTarget>,
    created_at: u64,
    log: Vec<LogEntry>,
}

const MOVE_STATES: &[SessionState] = &[SessionState::TipAttached, SessionState::PointCollection];
const COLLECT_STATES: &[SessionState] = &[SessionState::PointCollection];
const COMMIT_STATES: &[SessionState] = &[
    SessionState::Started,
    SessionState::TipAttached,
    SessionState::PointCollection,
];

impl CalibrationSession {
    pub(crate) fn new(target: PipetteIdentity) -> Self {
        Self {
            token: SessionToken::generate(),
            state: SessionState::Started,
            target,
            tip_length: None,
            points: BTreeMap::new(),
            z_offset: None,
            pending_jog: Vector3::zeros(),
            last_move: None,
            created_at: current_timestamp(),
            log: Vec::new(),
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> &PipetteIdentity {
        &self.target
    }

    pub fn tip_length(&self) -> Option<f64> {
        self.tip_length
    }

    pub fn point(&self, label: PointLabel) -> Option<Point2<f64>> {
        self.points.get(&label).copied()
    }

    pub fn points(&self) -> &BTreeMap<PointLabel, Point2<f64>> {
        &self.points
    }

    pub fn z_offset(&self) -> Option<f64> {
        self.z_offset
    }

    pub fn pending_jog(&self) -> Vector3<f64> {
        self.pending_jog
    }

    pub fn last_move(&self) -> Option<MoveTarget> {
        self.last_move
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    fn require(&self, command: &'static str, allowed: &[SessionState]) -> Result<(), CalibrationError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CalibrationError::StateConflict {
                command,
                state: self.state,
            })
        }
    }

    pub(crate) fn record<T>(&mut self, operation: &str, result: &Result<T, CalibrationError>) {
        self.log.push(LogEntry {
            timestamp: current_timestamp(),
            operation: operation.to_string(),
            success: result.is_ok(),
            notes: result.as_ref().err().map(ToString::to_string),
        });
    }

    pub(crate) fn attach_tip(&mut self, tip_length: f64) -> Result<(), CalibrationError> {
        self.require("attach tip", &[SessionState::Started])?;
        if !tip_length.is_finite() || tip_length <= 0.0 {
            return Err(CalibrationError::InvalidTipLength(tip_length));
        }
        self.tip_length = Some(tip_length);
        self.state = SessionState::TipAttached;
        Ok(())
    }

    pub(crate) fn check_move(&self) -> Result<(), CalibrationError> {
        self.require("move", MOVE_STATES)
    }

    pub(crate) fn complete_move(&mut self, target: MoveTarget) {
        self.last_move = Some(target);
        self.pending_jog = Vector3::zeros();
        self.state = SessionState::PointCollection;
    }

    pub(crate) fn check_jog(&self) -> Result<(), CalibrationError> {
        self.require("jog", COLLECT_STATES)
    }

    pub(crate) fn complete_jog(&mut self, axis: Axis, distance: f64) {
        self.pending_jog[axis.index()] += distance;
    }

    pub(crate) fn check_save_z(&self) -> Result<(), CalibrationError> {
        self.require("save z", COLLECT_STATES)?;
        if self.last_move != Some(MoveTarget::SafeZ) {
            return Err(CalibrationError::NoPriorMove {
                command: "save z",
                expected: MoveTarget::SafeZ,
            });
        }
        Ok(())
    }

    /// `measured_z` minus the nominal reference height becomes the Z offset.
    pub(crate) fn save_z(&mut self, measured_z: f64, reference_z: f64) -> Result<f64, CalibrationError> {
        self.check_save_z()?;
        let offset = measured_z - reference_z;
        self.z_offset = Some(offset);
        self.pending_jog = Vector3::zeros();
        Ok(offset)
    }

    pub(crate) fn check_save_xy(&self, label: PointLabel) -> Result<(), CalibrationError> {
        self.require("save xy", COLLECT_STATES)?;
        let expected = MoveTarget::Point(label);
        if self.last_move != Some(expected) {
            return Err(CalibrationError::NoPriorMove {
                command: "save xy",
                expected,
            });
        }
        Ok(())
    }

    pub(crate) fn save_xy(&mut self, label: PointLabel, measured: Point2<f64>) -> Result<(), CalibrationError> {
        self.check_save_xy(label)?;
        self.points.insert(label, measured);
        self.pending_jog = Vector3::zeros();
        Ok(())
    }

    /// Measured points in label order plus the Z offset, or what is missing.
    pub(crate) fn fit_inputs(&self) -> Result<([Point2<f64>; 3], f64), CalibrationError> {
        self.require("save transform", COMMIT_STATES)?;
        if let ([Some(a), Some(b), Some(c)], Some(z)) =
            (PointLabel::ALL.map(|l| self.point(l)), self.z_offset)
        {
            return Ok(([a, b, c], z));
        }
        Err(CalibrationError::IncompletePoints {
            missing_points: PointLabel::ALL
                .into_iter()
                .filter(|l| !self.points.contains_key(l))
                .collect(),
            z_offset_missing: self.z_offset.is_none(),
        })
    }

    pub(crate) fn mark_transform_computed(&mut self) {
        self.state = SessionState::TransformComputed;
    }

    pub(crate) fn mark_released(&mut self) {
        self.state = SessionState::Released;
    }
}
