use std::fmt;

use reqwest::StatusCode;

use crate::storage::StorageError;

/// Failure of a single pipeline task.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("weather endpoint is not ready: {0}")]
    NotReady(String),

    #[error("weather endpoint unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("weather endpoint answered with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("malformed weather response: {0}")]
    MalformedResponse(#[source] serde_json::Error),

    #[error("weather reading could not be transformed: {0}")]
    Transform(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PipelineError {
    /// Whether the runner's retry policy applies to this failure.
    ///
    /// Only endpoint availability problems are retried. Bad payloads and
    /// storage failures fail the run on the first attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::NotReady(_) | PipelineError::Unreachable(_) => true,
            PipelineError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            PipelineError::MalformedResponse(_)
            | PipelineError::Transform(_)
            | PipelineError::Csv(_)
            | PipelineError::Storage(_) => false,
        }
    }
}

/// The three tasks of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskId {
    IsWeatherApiReady,
    ExtractWeatherData,
    TransformLoadWeatherData,
}

impl TaskId {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskId::IsWeatherApiReady => "is_weather_api_ready",
            TaskId::ExtractWeatherData => "extract_weather_data",
            TaskId::TransformLoadWeatherData => "transform_load_weather_data",
        }
    }

    pub const fn all() -> &'static [TaskId] {
        &[
            TaskId::IsWeatherApiReady,
            TaskId::ExtractWeatherData,
            TaskId::TransformLoadWeatherData,
        ]
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run that stopped at `task` after exhausting its attempts.
#[derive(Debug, thiserror::Error)]
#[error("task `{task}` failed after {attempts} attempt(s): {source}")]
pub struct RunError {
    pub task: TaskId,
    pub attempts: u32,
    #[source]
    pub source: PipelineError,
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Shortens response bodies quoted in errors and logs.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
