use crate::Transform;
use serde::{Deserialize, Serialize};

/// Addressable reference point on an end-effector.
///
/// The same physical pipette exposes several of these; which one a position
/// query refers to is chosen per query, not stored on the tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalPoint {
    /// End of the attached tip (or the nozzle when no tip is attached).
    /// Multi-channel pipettes report the XY center of the nozzle row.
    #[default]
    Tip,
    /// Primary (back) nozzle, tip length ignored.
    Nozzle,
    /// XY center of the nozzle row.
    XyCenter,
    /// Front-most nozzle of the row.
    FrontNozzle,
}

/// Critical point geometry of one end-effector.
///
/// Nozzles are laid out along −Y starting at the primary nozzle, which sits
/// at the end-effector node's origin.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CriticalPoints {
    pub channels: u32,
    /// Center-to-center nozzle distance in mm.
    pub channel_spacing: f64,
    /// Length of the attached tip, `None` when bare.
    #[serde(default)]
    pub tip_length: Option<f64>,
}

impl CriticalPoints {
    pub fn new(channels: u32, channel_spacing: f64) -> Self {
        Self {
            channels: channels.max(1),
            channel_spacing,
            tip_length: None,
        }
    }

    pub fn single_channel() -> Self {
        Self::new(1, 0.0)
    }

    pub fn with_tip(mut self, tip_length: f64) -> Self {
        self.tip_length = Some(tip_length);
        self
    }

    pub fn without_tip(mut self) -> Self {
        self.tip_length = None;
        self
    }

    fn row_length(&self) -> f64 {
        self.channel_spacing * f64::from(self.channels.saturating_sub(1))
    }

    /// Local offset transform for `cp`, right-multiplied onto the node's
    /// absolute transform.
    pub fn offset(&self, cp: CriticalPoint) -> Transform {
        let tip_z = -self.tip_length.unwrap_or(0.0);
        let (y, z) = match cp {
            CriticalPoint::Nozzle => (0.0, 0.0),
            CriticalPoint::Tip | CriticalPoint::XyCenter => (-0.5 * self.row_length(), tip_z),
            CriticalPoint::FrontNozzle => (-self.row_length(), tip_z),
        };
        Transform::from_translation(0.0, y, z)
    }
}
