use crate::motion::MotionError;
use crate::persist::DeckIoError;
use crate::pipette::ConfigError;
use crate::session::SessionState;
use crate::types::{Mount, MoveTarget, PointLabel};
use deckcal_core::{FitError, PoseTreeError};

/// Every failure a calibration command can report.
#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("a calibration session is already active")]
    SessionConflict,
    #[error("no pipette attached to the {0} mount")]
    NoPipetteAttached(Mount),
    #[error("invalid or expired session token")]
    InvalidToken,
    #[error("`{command}` is not allowed in state {state}")]
    StateConflict {
        command: &'static str,
        state: SessionState,
    },
    #[error("unknown calibration point `{0}`")]
    UnknownPoint(String),
    #[error(transparent)]
    PoseTree(#[from] PoseTreeError),
    #[error("tip length must be positive and finite, got {0}")]
    InvalidTipLength(f64),
    #[error("cannot compute deck transform: missing points {missing_points:?}, z offset missing: {z_offset_missing}")]
    IncompletePoints {
        missing_points: Vec<PointLabel>,
        z_offset_missing: bool,
    },
    #[error("`{command}` requires a preceding move to {expected}")]
    NoPriorMove {
        command: &'static str,
        expected: MoveTarget,
    },
    #[error("ill-conditioned calibration: {0}")]
    IllConditionedCalibration(#[from] FitError),
    #[error(transparent)]
    Motion(#[from] MotionError),
    #[error("malformed command: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] DeckIoError),
}

impl CalibrationError {
    /// Stable snake_case identifier for clients.
    pub fn code(&self) -> &'static str {
        match self {
            CalibrationError::SessionConflict => "session_conflict",
            CalibrationError::NoPipetteAttached(_) => "no_pipette_attached",
            CalibrationError::InvalidToken => "invalid_token",
            CalibrationError::StateConflict { .. } => "state_conflict",
            CalibrationError::UnknownPoint(_) => "unknown_point",
            CalibrationError::PoseTree(e) => match e {
                PoseTreeError::UnknownNode(_) => "unknown_node",
                PoseTreeError::UnknownParent(_) => "unknown_parent",
                PoseTreeError::DuplicateNode(_) => "duplicate_node",
                PoseTreeError::NotAnAncestor { .. } => "not_an_ancestor",
            },
            CalibrationError::InvalidTipLength(_) => "invalid_tip_length",
            CalibrationError::IncompletePoints { .. } => "incomplete_points",
            CalibrationError::NoPriorMove { .. } => "no_prior_move",
            CalibrationError::IllConditionedCalibration(_) => "ill_conditioned_calibration",
            CalibrationError::Motion(e) => match e {
                MotionError::Stall { .. } => "motion_stall",
                MotionError::Timeout => "motion_timeout",
                MotionError::NotHomed => "motion_not_homed",
            },
            CalibrationError::BadRequest(_) => "bad_request",
            CalibrationError::Config(_) => "config_error",
            CalibrationError::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Axis;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CalibrationError::InvalidToken.code(), "invalid_token");
        assert_eq!(
            CalibrationError::from(MotionError::Stall { axis: Axis::Y }).code(),
            "motion_stall"
        );
        assert_eq!(
            CalibrationError::from(PoseTreeError::UnknownNode("x".into())).code(),
            "unknown_node"
        );
        assert_eq!(
            CalibrationError::from(FitError::NonFinite).code(),
            "ill_conditioned_calibration"
        );
    }

    #[test]
    fn messages_name_the_offending_input() {
        let err = CalibrationError::StateConflict {
            command: "jog",
            state: SessionState::Started,
        };
        assert_eq!(err.to_string(), "`jog` is not allowed in state started");
        let err = CalibrationError::NoPriorMove {
            command: "save z",
            expected: MoveTarget::SafeZ,
        };
        assert!(err.to_string().contains("safeZ"));
    }
}
