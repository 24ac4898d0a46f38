//! Closed-form deck transform from three point correspondences.
//!
//! The gantry is assumed rigid: only an XY rotation, an XY offset and a Z
//! offset can drift. The XY part is a 2D Procrustes fit solved analytically
//! (no SVD); Z is a pure additive offset with no rotation or scale coupling.

use crate::Transform;
use log::debug;
use nalgebra::{Matrix3, Point2, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Relative area threshold below which a point triple counts as collinear.
const COLLINEAR_REL_TOL: f64 = 1e-6;
/// Shortest admissible longest-edge length, in mm.
const MIN_SPREAD: f64 = 1e-9;
/// Relative threshold for a vanishing rotational cross-covariance.
const COVARIANCE_REL_TOL: f64 = 1e-9;

/// Which side of the correspondence a degeneracy was found on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointSet {
    Nominal,
    Measured,
}

impl fmt::Display for PointSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointSet::Nominal => f.write_str("nominal"),
            PointSet::Measured => f.write_str("measured"),
        }
    }
}

/// Reasons a deck fit is refused. All of them mean the calibration is
/// ill-conditioned; no transform is produced.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("{set} points are collinear or coincident")]
    Collinear { set: PointSet },
    #[error("calibration input contains non-finite values")]
    NonFinite,
    #[error("cross-covariance has no rotational component")]
    DegenerateCovariance,
}

/// Result of [`fit_deck_transform`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeckFit {
    /// Nominal → measured transform.
    pub transform: Transform,
    /// XY rotation angle in radians (counter-clockwise positive).
    pub rotation_rad: f64,
    /// Per-point XY distance `|T·Nᵢ − Mᵢ|` in mm.
    pub residuals: [f64; 3],
    pub rms_residual: f64,
}

impl DeckFit {
    pub fn max_residual(&self) -> f64 {
        self.residuals.iter().copied().fold(0.0, f64::max)
    }
}

fn centroid(pts: &[Point2<f64>; 3]) -> Point2<f64> {
    let sum = pts.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords);
    Point2::from(sum / 3.0)
}

fn check_spread(pts: &[Point2<f64>; 3], set: PointSet) -> Result<(), FitError> {
    let [a, b, c] = pts;
    let ab = b - a;
    let ac = c - a;
    let bc = c - b;
    let longest = ab.norm().max(ac.norm()).max(bc.norm());
    if longest < MIN_SPREAD {
        return Err(FitError::Collinear { set });
    }
    let twice_area = (ab.x * ac.y - ab.y * ac.x).abs();
    if twice_area <= COLLINEAR_REL_TOL * longest * longest {
        return Err(FitError::Collinear { set });
    }
    Ok(())
}

/// Fit `T` such that `T·(Nᵢ, 0) ≈ (Mᵢ, z_offset)` for the three nominal
/// points `Nᵢ` and measured points `Mᵢ`.
///
/// The XY block of `T` is a pure rotation, `T[2][0] = T[2][1] = 0`,
/// `T[2][2] = 1` and `T[2][3] = z_offset`.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
pub fn fit_deck_transform(
    nominal: &[Point2<f64>; 3],
    measured: &[Point2<f64>; 3],
    z_offset: f64,
) -> Result<DeckFit, FitError> {
    let finite = nominal
        .iter()
        .chain(measured.iter())
        .all(|p| p.x.is_finite() && p.y.is_finite());
    if !finite || !z_offset.is_finite() {
        return Err(FitError::NonFinite);
    }

    check_spread(nominal, PointSet::Nominal)?;
    check_spread(measured, PointSet::Measured)?;

    let cn = centroid(nominal);
    let cm = centroid(measured);

    // Cross-covariance terms of the centered sets.
    let (mut sxx, mut sxy, mut syx, mut syy) = (0.0, 0.0, 0.0, 0.0);
    let (mut nn, mut mm) = (0.0, 0.0);
    for (n, m) in nominal.iter().zip(measured.iter()) {
        let a = n - cn;
        let b = m - cm;
        sxx += a.x * b.x;
        sxy += a.x * b.y;
        syx += a.y * b.x;
        syy += a.y * b.y;
        nn += a.norm_squared();
        mm += b.norm_squared();
    }

    let cos_term = sxx + syy;
    let sin_term = sxy - syx;
    if cos_term.hypot(sin_term) <= COVARIANCE_REL_TOL * (nn * mm).sqrt() {
        return Err(FitError::DegenerateCovariance);
    }

    let theta = sin_term.atan2(cos_term);
    let (s, c) = theta.sin_cos();
    let rot = nalgebra::Matrix2::new(c, -s, s, c);
    let t_xy = cm.coords - rot * cn.coords;

    let linear = Matrix3::new(
        c, -s, 0.0, //
        s, c, 0.0, //
        0.0, 0.0, 1.0,
    );
    let transform = Transform::from_parts(linear, Vector3::new(t_xy.x, t_xy.y, z_offset));

    let mut residuals = [0.0; 3];
    for (r, (n, m)) in residuals
        .iter_mut()
        .zip(nominal.iter().zip(measured.iter()))
    {
        let mapped = rot * n.coords + t_xy;
        *r = (mapped - m.coords).norm();
    }
    let rms_residual = (residuals.iter().map(|r| r * r).sum::<f64>() / 3.0).sqrt();

    debug!(
        "deck fit: theta={:.6} deg, t=({:.4}, {:.4}, {:.4}), rms={:.5} mm",
        theta.to_degrees(),
        t_xy.x,
        t_xy.y,
        z_offset,
        rms_residual
    );

    Ok(DeckFit {
        transform,
        rotation_rad: theta,
        residuals,
        rms_residual,
    })
}
