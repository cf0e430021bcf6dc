//! The task HTTP surface, mirroring `file_host::routes`' shape of
//! thin handlers that extract state, call into a domain module, and map
//! the result through `IntoResponse`.

use crate::error::{OrchestratorError, Result};
use crate::model::{TaskInputs, TaskStatus, TaskView};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

pub fn router() -> Router<Arc<AppState>> {
	Router::new()
		.route("/api/generate", post(create_task))
		.route("/api/task/:id", get(get_task).delete(delete_task))
		.route("/api/tasks", get(list_tasks))
		.route("/metrics", get(crate::metrics::metrics_handler))
		.route("/healthz", get(healthz))
}

async fn healthz() -> &'static str {
	"ok"
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
	pub name: Option<String>,
	pub speaker_wav: PathBuf,
	pub dialogue_json: PathBuf,
	pub emotion_folder: PathBuf,
	pub source_audio: PathBuf,
	pub script_json: PathBuf,
	pub bgm_path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
	pub task_id: Uuid,
	pub status: TaskStatus,
	pub created_at: DateTime<Utc>,
}

/// `POST /api/generate`: validate the six inputs exist, register a
/// `pending` task, and hand it to the scheduler. Never blocks on pipeline
/// work — `Scheduler::submit` only touches a bounded channel.
#[instrument(name = "create_task", skip(state, req))]
async fn create_task(State(state): State<Arc<AppState>>, Json(req): Json<GenerateRequest>) -> Result<(StatusCode, Json<CreateTaskResponse>)> {
	let name = req.name.clone();
	let inputs = validate_inputs(req).await?;

	let task_id = state.registry.create(inputs, name).await?;
	state.scheduler.submit(task_id, &state.metrics)?;

	let task = state.registry.get(task_id).await?;
	Ok((
		StatusCode::ACCEPTED,
		Json(CreateTaskResponse {
			task_id: task.task_id,
			status: task.status,
			created_at: task.created_at,
		}),
	))
}

async fn validate_inputs(req: GenerateRequest) -> Result<TaskInputs> {
	let GenerateRequest {
		speaker_wav,
		dialogue_json,
		emotion_folder,
		source_audio,
		script_json,
		bgm_path,
		..
	} = req;

	for (field, path) in [
		("speaker_wav", &speaker_wav),
		("dialogue_json", &dialogue_json),
		("emotion_folder", &emotion_folder),
		("source_audio", &source_audio),
		("script_json", &script_json),
		("bgm_path", &bgm_path),
	] {
		if path.as_os_str().is_empty() {
			return Err(OrchestratorError::InvalidInput(format!("{field} must not be empty")));
		}
		if !tokio::fs::try_exists(path).await.unwrap_or(false) {
			return Err(OrchestratorError::InvalidInput(format!("{field} does not exist: {}", path.display())));
		}
	}

	Ok(TaskInputs {
		speaker_wav,
		dialogue_json,
		emotion_folder,
		source_audio,
		script_json,
		bgm_path,
	})
}

/// `GET /api/task/{id}`.
#[instrument(name = "get_task", skip(state))]
async fn get_task(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<TaskView>> {
	let task = state.registry.get(id).await?;
	Ok(Json(TaskView::from(task)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
	pub status: Option<TaskStatus>,
	pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ListTasksResponse {
	pub tasks: Vec<TaskView>,
	pub total: usize,
}

/// `GET /api/tasks`.
#[instrument(name = "list_tasks", skip(state))]
async fn list_tasks(State(state): State<Arc<AppState>>, Query(query): Query<ListQuery>) -> Json<ListTasksResponse> {
	let tasks = state.registry.list(query.status, query.limit).await;
	let total = tasks.len();
	Json(ListTasksResponse {
		tasks: tasks.into_iter().map(TaskView::from).collect(),
		total,
	})
}

/// `DELETE /api/task/{id}`: 204 on success, 409 if the task is
/// still `processing`.
#[instrument(name = "delete_task", skip(state))]
async fn delete_task(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<StatusCode> {
	state.registry.delete(id).await?;
	Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_request(dir: &std::path::Path) -> GenerateRequest {
		GenerateRequest {
			name: Some("story".to_string()),
			speaker_wav: dir.join("speaker.wav"),
			dialogue_json: dir.join("dialogue.json"),
			emotion_folder: dir.join("emotions"),
			source_audio: dir.join("source.wav"),
			script_json: dir.join("script.json"),
			bgm_path: dir.join("bgm.wav"),
		}
	}

	#[tokio::test]
	async fn validate_inputs_rejects_missing_files() {
		let dir = tempfile::tempdir().unwrap();
		let err = validate_inputs(sample_request(dir.path())).await.unwrap_err();
		assert!(matches!(err, OrchestratorError::InvalidInput(_)));
	}

	#[tokio::test]
	async fn validate_inputs_accepts_existing_files() {
		let dir = tempfile::tempdir().unwrap();
		let req = sample_request(dir.path());
		for path in [&req.speaker_wav, &req.dialogue_json, &req.source_audio, &req.script_json, &req.bgm_path] {
			std::fs::write(path, b"x").unwrap();
		}
		std::fs::create_dir_all(&req.emotion_folder).unwrap();

		let inputs = validate_inputs(req).await.unwrap();
		assert_eq!(inputs.bgm_path.file_name().unwrap(), "bgm.wav");
	}
}
