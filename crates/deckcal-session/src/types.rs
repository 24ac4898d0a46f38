//! Small value types shared by the session, context and command layers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Failed parse of a mount, axis or point label.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} `{value}`")]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseLabelError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Pipette mount on the gantry carriage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mount {
    Left,
    Right,
}

impl Mount {
    pub const ALL: [Mount; 2] = [Mount::Left, Mount::Right];

    pub fn as_str(self) -> &'static str {
        match self {
            Mount::Left => "left",
            Mount::Right => "right",
        }
    }

    /// Pose-tree node of the mount.
    pub fn mount_node(self) -> &'static str {
        match self {
            Mount::Left => "mount.left",
            Mount::Right => "mount.right",
        }
    }

    /// Pose-tree node of the pipette on this mount.
    pub fn pipette_node(self) -> &'static str {
        match self {
            Mount::Left => "pipette.left",
            Mount::Right => "pipette.right",
        }
    }
}

impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mount {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Mount::Left),
            "right" => Ok(Mount::Right),
            other => Err(ParseLabelError::new("mount", other)),
        }
    }
}

/// Cartesian gantry axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        })
    }
}

impl FromStr for Axis {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x" | "X" => Ok(Axis::X),
            "y" | "Y" => Ok(Axis::Y),
            "z" | "Z" => Ok(Axis::Z),
            other => Err(ParseLabelError::new("axis", other)),
        }
    }
}

/// One of the three XY reference crosses on the deck.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PointLabel {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "3")]
    Three,
}

impl PointLabel {
    pub const ALL: [PointLabel; 3] = [PointLabel::One, PointLabel::Two, PointLabel::Three];

    pub fn as_str(self) -> &'static str {
        match self {
            PointLabel::One => "1",
            PointLabel::Two => "2",
            PointLabel::Three => "3",
        }
    }
}

impl fmt::Display for PointLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PointLabel {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(PointLabel::One),
            "2" => Ok(PointLabel::Two),
            "3" => Ok(PointLabel::Three),
            other => Err(ParseLabelError::new("calibration point", other)),
        }
    }
}

/// Destination of a `move` command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MoveTarget {
    Point(PointLabel),
    /// Above the Z reference, from where the operator jogs down to the deck.
    SafeZ,
}

impl fmt::Display for MoveTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveTarget::Point(p) => p.fmt(f),
            MoveTarget::SafeZ => f.write_str("safeZ"),
        }
    }
}

impl FromStr for MoveTarget {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "safeZ" {
            return Ok(MoveTarget::SafeZ);
        }
        s.parse::<PointLabel>()
            .map(MoveTarget::Point)
            .map_err(|_| ParseLabelError::new("calibration point", s))
    }
}

impl TryFrom<String> for MoveTarget {
    type Error = ParseLabelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MoveTarget> for String {
    fn from(t: MoveTarget) -> Self {
        t.to_string()
    }
}

/// Opaque handle binding commands to one calibration attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(Uuid);

impl SessionToken {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionToken {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Pipette seen on a mount, as reported by the hardware and resolved
/// against the model registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipetteIdentity {
    pub mount: Mount,
    pub model: String,
    /// Serial id, `None` for uncommissioned pipettes.
    #[serde(default)]
    pub id: Option<String>,
}

impl PipetteIdentity {
    pub fn new(mount: Mount, model: impl Into<String>) -> Self {
        Self {
            mount,
            model: model.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}
