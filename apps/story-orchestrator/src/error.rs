//! Error taxonomy for the orchestrator. Mirrors the shape of
//! `file_host::error::FileHostError`: a `thiserror` enum with a
//! `status_code()` helper and a hand-written `IntoResponse`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error("task {0} not found")]
	NotFound(Uuid),

	#[error("task {0} cannot be deleted while processing")]
	Conflict(Uuid),

	#[error("scheduler queue is full")]
	QueueFull,

	#[error("step failed: {0}")]
	StepFailure(String),

	#[error("task was interrupted by a restart")]
	Interrupted,

	#[error("request timed out")]
	RequestTimeout,

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("serialization error: {0}")]
	Serde(#[from] serde_json::Error),

	#[error("internal error: {0}")]
	Internal(String),
}

impl OrchestratorError {
	const fn status_code(&self) -> StatusCode {
		match self {
			Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
			Self::NotFound(_) => StatusCode::NOT_FOUND,
			Self::Conflict(_) => StatusCode::CONFLICT,
			Self::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
			Self::StepFailure(_) | Self::Interrupted => StatusCode::UNPROCESSABLE_ENTITY,
			Self::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
			Self::Io(_) | Self::Serde(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

#[derive(Serialize)]
struct ErrorBody {
	error: String,
}

impl IntoResponse for OrchestratorError {
	fn into_response(self) -> Response {
		if matches!(self, Self::QueueFull) {
			tracing::warn!("rejecting submission: queue full");
			return (self.status_code(), [("retry-after", "5")], Json(ErrorBody { error: self.to_string() })).into_response();
		}

		if let Self::Internal(ref msg) = self {
			tracing::error!(error = %msg, "internal error");
		}

		(self.status_code(), Json(ErrorBody { error: self.to_string() })).into_response()
	}
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
