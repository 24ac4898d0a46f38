//! Interactive deck calibration for gantry liquid handlers.
//!
//! A [`DeckContext`] owns the gantry pose tree, the motion controller and the
//! single calibration session slot. Operators drive a session through
//! `start → attach tip → move/jog/save → save transform → release`; the
//! committed correction becomes the root of the pose tree so every tool
//! position is reported in corrected deck coordinates.
//!
//! ```no_run
//! use deckcal_session::{
//!     DeckCalibrationConfig, DeckContext, ModelRegistry, Mount, MoveTarget, PipetteIdentity,
//!     SimulatedGantry, StaticPipettes,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), deckcal_session::CalibrationError> {
//! let config = DeckCalibrationConfig::default();
//! let gantry = Arc::new(SimulatedGantry::homed_at(config.home_transform()));
//! let pipettes = Arc::new(StaticPipettes::new([PipetteIdentity::new(
//!     Mount::Left,
//!     "p300_multi",
//! )]));
//! let ctx = DeckContext::new(config, ModelRegistry::builtin(), gantry, pipettes)?;
//!
//! let start = ctx.start(Mount::Left)?;
//! ctx.attach_tip(&start.token, 51.7)?;
//! ctx.move_to_point(&start.token, MoveTarget::SafeZ)?;
//! # Ok(())
//! # }
//! ```

mod command;
mod config;
mod context;
mod error;
mod motion;
mod persist;
mod pipette;
mod session;
mod types;

pub use command::{Command, CommandRequest, CommandResponse, ErrorResponse, StartRequest};
pub use config::{CalibrationPoints, DeckCalibrationConfig, MountOffsets};
pub use context::{DeckContext, StartResponse, DECK_NODE, GANTRY_NODE};
pub use error::CalibrationError;
pub use motion::{MotionController, MotionError, MotionGate, SimulatedGantry};
pub use persist::{DeckCalibrationFile, DeckIoError};
pub use pipette::{
    ConfigError, ModelRegistry, PipetteIdentityResolver, PipetteModel, PipetteOverrides,
    StaticPipettes,
};
pub use session::{CalibrationSession, LogEntry, SessionState};
pub use types::{Axis, Mount, MoveTarget, ParseLabelError, PipetteIdentity, PointLabel, SessionToken};
