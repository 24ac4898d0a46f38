//! High-level facade crate for the `deckcal-*` workspace.
//!
//! This crate provides:
//! - re-exports of the geometry core and the session layer
//! - a scripted operator that runs a whole calibration against the simulated
//!   gantry ([`simulate`])
//! - JSON input for fitting a deck transform offline ([`points`])
//!
//! ## Quickstart
//!
//! ```no_run
//! use deckcal::simulate::{simulate_calibration, SimulationParams};
//! use deckcal::session::DeckCalibrationConfig;
//!
//! # fn main() -> Result<(), deckcal::session::CalibrationError> {
//! let params = SimulationParams {
//!     rotation_deg: -5.0,
//!     shift: [0.3, 0.4, 0.5],
//!     ..SimulationParams::default()
//! };
//! let report = simulate_calibration(DeckCalibrationConfig::default(), &params)?;
//! println!("rms residual: {:.2e} mm", report.fit.rms_residual);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `deckcal::core`: transforms, pose tree, critical points, the deck fitter.
//! - `deckcal::session`: calibration sessions, context, motion and pipette seams.

pub use deckcal_core as core;
pub use deckcal_session as session;

pub use deckcal_core::{
    fit_deck_transform, init_with_file, init_with_level, DeckFit, LoggerError, Transform,
};
pub use deckcal_session::{CalibrationError, DeckCalibrationConfig, DeckContext};

#[cfg(feature = "tracing")]
pub use deckcal_core::init_tracing;

pub mod points;
pub mod simulate;
