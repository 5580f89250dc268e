//! Request and response bodies.

use serde::{Deserialize, Serialize};

use crate::server::error::ApiError;
use crate::session::{ExitInfo, SessionId, SessionState};

/// Query of `POST /run/{mode}`.
#[derive(Debug, Deserialize)]
pub struct RunQuery {
    pub language: Option<String>,
    /// `gcc` when absent.
    pub compiler_type: Option<String>,
}

/// Body of `POST /run/{mode}`.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub source_code: String,
    #[serde(default)]
    pub compiler_options: String,
    #[serde(default)]
    pub command_line_arguments: String,
    /// Delivered right after the program starts.
    #[serde(default)]
    pub stdin: String,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub pid: SessionId,
}

/// Query shared by the per-session endpoints.
#[derive(Debug, Deserialize)]
pub struct PidQuery {
    pub pid: Option<SessionId>,
    /// Explicit read offset for `GET /program`; the session's own cursor
    /// is used when absent.
    pub offset: Option<usize>,
}

impl PidQuery {
    pub fn pid(&self) -> Result<SessionId, ApiError> {
        self.pid
            .ok_or_else(|| ApiError::BadRequest("missing 'pid' query parameter".to_string()))
    }
}

#[derive(Debug, Serialize)]
pub struct ProgramResponse {
    pub pid: SessionId,
    pub output: String,
    pub offset: usize,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitInfo>,
}

#[derive(Debug, Deserialize)]
pub struct InputRequest {
    pub stdin: String,
}

#[derive(Debug, Serialize)]
pub struct InputResponse {
    pub pid: SessionId,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub pid: SessionId,
    pub state: SessionState,
    pub exit: ExitInfo,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    /// Addressable sessions, finished ones included.
    pub sessions: usize,
    pub running: usize,
}
