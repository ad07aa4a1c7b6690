//! Control protocol: newline-delimited JSON requests and responses.
//!
//! Each request line is answered by exactly one response line carrying the
//! same `id`, so an operator learns immediately whether a write was accepted.

use crate::attribute::{Attribute, ValidationError};
use crate::controller::{LineError, LineSnapshot};
use crate::logging::DebugSwitch;
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const MAX_REQUEST_SIZE: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: u32,
    pub command: CommandType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    Ping,
    ListLines,
    ReadLine { line: String },
    ReadAttribute { line: String, attribute: String },
    WriteAttribute { line: String, attribute: String, value: String },
    /// Report whether debug logging is on (`value` 1) or off (0).
    ReadDebug,
    SetDebug { enabled: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    /// The value failed validation; nothing was changed.
    Rejected,
    UnknownLine,
    InvalidCommand,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: u32,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<LineSnapshot>,
}

impl Response {
    pub fn success(id: u32) -> Self {
        Self {
            id,
            status: ResponseStatus::Success,
            message: None,
            value: None,
            lines: Vec::new(),
        }
    }

    pub fn failure(id: u32, status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            status,
            ..Self::success(id)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    fn from_line_error(id: u32, error: &LineError) -> Self {
        let status = match error {
            LineError::Validation(_) => ResponseStatus::Rejected,
            LineError::UnknownLine(_) | LineError::TornDown(_) => ResponseStatus::UnknownLine,
            _ => ResponseStatus::Error,
        };
        Self::failure(id, status, error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("request of {0} bytes exceeds the {max} byte limit", max = MAX_REQUEST_SIZE)]
    TooLarge(usize),
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// # Errors
///
/// Returns [`ProtocolError`] for oversized or unparseable input.
pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    let trimmed = line.trim();
    if trimmed.len() > MAX_REQUEST_SIZE {
        return Err(ProtocolError::TooLarge(trimmed.len()));
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Response for input that could not be parsed into a [`Request`].
pub fn invalid_request(error: &ProtocolError) -> Response {
    Response::failure(0, ResponseStatus::InvalidCommand, error.to_string())
}

/// Execute one request against the registry. Debug logging commands are
/// answered with [`ResponseStatus::Error`].
pub fn handle_request(registry: &Registry, request: Request) -> Response {
    dispatch(registry, None, request)
}

/// Execute one request, with runtime control of debug logging.
pub fn handle_request_with_debug(registry: &Registry, debug: &DebugSwitch, request: Request) -> Response {
    dispatch(registry, Some(debug), request)
}

fn dispatch(registry: &Registry, debug: Option<&DebugSwitch>, request: Request) -> Response {
    let id = request.id;
    debug!("handling request {}: {:?}", id, request.command);

    match request.command {
        CommandType::ReadDebug => match debug {
            Some(switch) => Response {
                value: Some(u32::from(switch.is_debug())),
                ..Response::success(id)
            },
            None => debug_unavailable(id),
        },
        CommandType::SetDebug { enabled } => match debug {
            Some(switch) => match switch.set_debug(enabled) {
                Ok(()) => Response {
                    value: Some(u32::from(enabled)),
                    ..Response::success(id)
                },
                Err(e) => Response::failure(id, ResponseStatus::Error, e.to_string()),
            },
            None => debug_unavailable(id),
        },
        command => match execute(registry, id, command) {
            Ok(response) => response,
            Err(e) => Response::from_line_error(id, &e),
        },
    }
}

fn debug_unavailable(id: u32) -> Response {
    Response::failure(id, ResponseStatus::Error, "runtime log control is not available")
}

fn execute(registry: &Registry, id: u32, command: CommandType) -> Result<Response, LineError> {
    let response = match command {
        CommandType::Ping => Response {
            message: Some("pong".into()),
            ..Response::success(id)
        },

        CommandType::ListLines => Response {
            lines: registry.snapshots(),
            ..Response::success(id)
        },

        CommandType::ReadLine { line } => Response {
            lines: vec![registry.get(&line)?.snapshot()],
            ..Response::success(id)
        },

        CommandType::ReadAttribute { line, attribute } => {
            let attribute = parse_attribute(&attribute)?;
            Response {
                value: Some(registry.get(&line)?.read_attribute(attribute)),
                ..Response::success(id)
            }
        }

        CommandType::WriteAttribute { line, attribute, value } => {
            let attribute = parse_attribute(&attribute)?;
            let controller = registry.get(&line)?;
            controller.write_attribute(attribute, &value)?;
            Response {
                value: Some(controller.read_attribute(attribute)),
                lines: vec![controller.snapshot()],
                ..Response::success(id)
            }
        }

        CommandType::ReadDebug | CommandType::SetDebug { .. } => debug_unavailable(id),
    };
    Ok(response)
}

fn parse_attribute(name: &str) -> Result<Attribute, ValidationError> {
    name.parse()
}
