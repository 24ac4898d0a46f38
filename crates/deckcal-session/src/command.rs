//! JSON command surface: `{"token": "...", "command": "jog", ...}`.

use crate::context::{DeckContext, StartResponse};
use crate::error::CalibrationError;
use crate::types::{Axis, Mount, MoveTarget, PointLabel, SessionToken};
use deckcal_core::Transform;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Command {
    #[serde(rename = "attach tip", rename_all = "camelCase")]
    AttachTip { tip_length: f64 },
    /// `point` is `"1"`, `"2"`, `"3"` or `"safeZ"`.
    #[serde(rename = "move")]
    Move { point: String },
    #[serde(rename = "jog")]
    Jog { axis: Axis, direction: i8, step: f64 },
    #[serde(rename = "save xy")]
    SaveXy { point: String },
    #[serde(rename = "save z")]
    SaveZ,
    #[serde(rename = "save transform")]
    SaveTransform,
    #[serde(rename = "release")]
    Release,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::AttachTip { .. } => "attach tip",
            Command::Move { .. } => "move",
            Command::Jog { .. } => "jog",
            Command::SaveXy { .. } => "save xy",
            Command::SaveZ => "save z",
            Command::SaveTransform => "save transform",
            Command::Release => "release",
        }
    }
}

/// A command bound to a session token. The token stays a string so that a
/// malformed one is reported as an invalid token rather than a bad request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub token: String,
    #[serde(flatten)]
    pub command: Command,
}

impl CommandRequest {
    pub fn new(token: &SessionToken, command: Command) -> Self {
        Self {
            token: token.to_string(),
            command,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub mount: Option<Mount>,
    /// Release a running session instead of failing.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandResponse {
    TipAttached {
        tip_length: f64,
    },
    Moved {
        point: MoveTarget,
        carriage: [f64; 3],
    },
    Jogged {
        axis: Axis,
        distance: f64,
    },
    SavedZ {
        z_offset: f64,
    },
    SavedXy {
        point: PointLabel,
        position: [f64; 2],
    },
    TransformSaved {
        transform: Transform,
        rotation_deg: f64,
        residuals: [f64; 3],
        rms_residual: f64,
    },
    Released {
        released: bool,
    },
}

/// Error body sent back to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

impl From<&CalibrationError> for ErrorResponse {
    fn from(err: &CalibrationError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

fn parse_target(point: &str) -> Result<MoveTarget, CalibrationError> {
    point
        .parse()
        .map_err(|_| CalibrationError::UnknownPoint(point.to_string()))
}

fn parse_label(point: &str) -> Result<PointLabel, CalibrationError> {
    point
        .parse()
        .map_err(|_| CalibrationError::UnknownPoint(point.to_string()))
}

impl DeckContext {
    pub fn start_request(&self, request: &StartRequest) -> Result<StartResponse, CalibrationError> {
        self.start_any(request.mount, request.force)
    }

    /// Run one command against the active session.
    pub fn dispatch(&self, request: &CommandRequest) -> Result<CommandResponse, CalibrationError> {
        let token = match request.token.parse::<SessionToken>() {
            Ok(token) => token,
            Err(_) if request.command == Command::Release => {
                return Ok(CommandResponse::Released { released: false })
            }
            Err(_) => return Err(CalibrationError::InvalidToken),
        };

        match &request.command {
            Command::AttachTip { tip_length } => {
                self.attach_tip(&token, *tip_length)?;
                Ok(CommandResponse::TipAttached {
                    tip_length: *tip_length,
                })
            }
            Command::Move { point } => {
                let target = parse_target(point)?;
                let carriage = self.move_to_point(&token, target)?.translation();
                Ok(CommandResponse::Moved {
                    point: target,
                    carriage: carriage.into(),
                })
            }
            Command::Jog {
                axis,
                direction,
                step,
            } => {
                let distance = self.jog(&token, *axis, *direction, *step)?;
                Ok(CommandResponse::Jogged {
                    axis: *axis,
                    distance,
                })
            }
            Command::SaveXy { point } => {
                let label = parse_label(point)?;
                let position = self.save_xy(&token, label)?;
                Ok(CommandResponse::SavedXy {
                    point: label,
                    position: [position.x, position.y],
                })
            }
            Command::SaveZ => Ok(CommandResponse::SavedZ {
                z_offset: self.save_z(&token)?,
            }),
            Command::SaveTransform => {
                let fit = self.save_transform(&token)?;
                Ok(CommandResponse::TransformSaved {
                    transform: fit.transform,
                    rotation_deg: fit.rotation_rad.to_degrees(),
                    residuals: fit.residuals,
                    rms_residual: fit.rms_residual,
                })
            }
            Command::Release => Ok(CommandResponse::Released {
                released: self.release(&token),
            }),
        }
    }

    /// Parse and run a JSON command body.
    pub fn dispatch_json(&self, body: &str) -> Result<CommandResponse, CalibrationError> {
        let request: CommandRequest = serde_json::from_str(body)
            .map_err(|e| CalibrationError::BadRequest(e.to_string()))?;
        self.dispatch(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_wire_commands() {
        let req: CommandRequest = serde_json::from_str(
            r#"{"token": "abc", "command": "jog", "axis": "z", "direction": -1, "step": 4.5}"#,
        )
        .expect("jog");
        assert_eq!(
            req.command,
            Command::Jog {
                axis: Axis::Z,
                direction: -1,
                step: 4.5
            }
        );

        let req: CommandRequest =
            serde_json::from_str(r#"{"token": "abc", "command": "attach tip", "tipLength": 51.7}"#)
                .expect("attach tip");
        assert_eq!(req.command, Command::AttachTip { tip_length: 51.7 });

        let req: CommandRequest =
            serde_json::from_str(r#"{"token": "abc", "command": "save transform"}"#)
                .expect("save transform");
        assert_eq!(req.command, Command::SaveTransform);
        assert_eq!(req.command.name(), "save transform");
    }

    #[test]
    fn unknown_commands_are_rejected() {
        assert!(serde_json::from_str::<CommandRequest>(
            r#"{"token": "abc", "command": "dance"}"#
        )
        .is_err());
    }

    #[test]
    fn responses_are_tagged() {
        let json = serde_json::to_value(CommandResponse::SavedZ { z_offset: 0.5 }).expect("json");
        assert_eq!(json["result"], "saved_z");
        assert_eq!(json["z_offset"], 0.5);

        let err = ErrorResponse::from(&CalibrationError::UnknownPoint("4".into()));
        assert_eq!(err.code, "unknown_point");
    }
}
