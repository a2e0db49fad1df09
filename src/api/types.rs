//! API request and response types

use crate::turn::TurnErrorKind;
use serde::Serialize;

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, kind: Option<TurnErrorKind>) -> Self {
        Self {
            error: message.into(),
            kind: kind.map(TurnErrorKind::as_str),
        }
    }
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub name: &'static str,
    pub version: &'static str,
}
