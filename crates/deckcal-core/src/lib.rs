//! Core geometry for deck calibration of a gantry robot.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! know about sessions, motion controllers or pipette configuration; those
//! live in `deckcal-session`.
//!
//! - [`Transform`]: 4×4 homogeneous rigid/affine transform.
//! - [`PoseTree`]: arena of named nodes holding parent-relative transforms.
//! - [`CriticalPoint`] / [`CriticalPoints`]: per-query end-effector offsets.
//! - [`fit_deck_transform`]: closed-form XY rotation + XYZ translation from
//!   three point correspondences.

mod critical_point;
mod fit;
mod logger;
mod pose_tree;
mod transform;

pub use critical_point::{CriticalPoint, CriticalPoints};
pub use fit::{fit_deck_transform, DeckFit, FitError, PointSet};
pub use pose_tree::{NodeId, PoseTree, PoseTreeError};
pub use transform::{Transform, TransformError};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_file, init_with_level, LoggerError};
