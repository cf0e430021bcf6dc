//! `TaskRegistry`: the in-memory authoritative task state, fronting the
//! durable journal.

mod store;

pub use store::TaskStore;

use crate::error::{OrchestratorError, Result};
use crate::model::{StepStatus, Task, TaskInputs, TaskStatus};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub struct TaskRegistry {
	tasks: RwLock<HashMap<Uuid, Task>>,
	store: TaskStore,
	data_root: PathBuf,
}

impl TaskRegistry {
	/// Load the journal and apply startup recovery: any task left
	/// `pending` or `processing` by a previous process is reclassified to
	/// `failed` with `error = "interrupted"`, and any `running` step is
	/// marked `failed` too.
	pub async fn load(data_root: PathBuf) -> Result<Arc<Self>> {
		let store = TaskStore::new(&data_root);
		let mut tasks = store.load()?;

		let mut recovered = 0usize;
		for task in tasks.values_mut() {
			if matches!(task.status, TaskStatus::Pending | TaskStatus::Processing) {
				task.status = TaskStatus::Failed;
				task.error = Some("interrupted".to_string());
				task.finished_at = Some(chrono::Utc::now());
				for step in &mut task.steps {
					if step.status == StepStatus::Running {
						step.status = StepStatus::Failed;
						step.error = Some("interrupted".to_string());
					}
				}
				task.touch();
				recovered += 1;
			}
		}

		if recovered > 0 {
			tracing::warn!(recovered, "recovered interrupted tasks on startup");
			store.flush(&tasks)?;
		}

		Ok(Arc::new(Self {
			tasks: RwLock::new(tasks),
			store,
			data_root,
		}))
	}

	#[must_use]
	pub fn task_dir(&self, task_id: Uuid) -> PathBuf {
		self.data_root.join(task_id.to_string())
	}

	pub async fn create(&self, inputs: TaskInputs, name: Option<String>) -> Result<Uuid> {
		let task_id = Uuid::new_v4();
		let task = Task::new(task_id, name, inputs);

		let mut tasks = self.tasks.write().await;
		tasks.insert(task_id, task);
		self.store.flush(&tasks)?;

		Ok(task_id)
	}

	pub async fn get(&self, task_id: Uuid) -> Result<Task> {
		let tasks = self.tasks.read().await;
		tasks.get(&task_id).cloned().ok_or(OrchestratorError::NotFound(task_id))
	}

	pub async fn list(&self, status: Option<TaskStatus>, limit: Option<usize>) -> Vec<Task> {
		let tasks = self.tasks.read().await;
		let mut out: Vec<Task> = tasks
			.values()
			.filter(|t| status.map_or(true, |s| t.status == s))
			.cloned()
			.collect();
		out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
		if let Some(limit) = limit {
			out.truncate(limit);
		}
		out
	}

	/// Apply `mutator` to the task under an exclusive write lock, then flush.
	pub async fn update<F>(&self, task_id: Uuid, mutator: F) -> Result<Task>
	where
		F: FnOnce(&mut Task),
	{
		let mut tasks = self.tasks.write().await;
		let task = tasks.get_mut(&task_id).ok_or(OrchestratorError::NotFound(task_id))?;
		mutator(task);
		task.touch();
		let updated = task.clone();
		self.store.flush(&tasks)?;
		Ok(updated)
	}

	/// Delete a task and its working directory. Forbidden while processing.
	pub async fn delete(&self, task_id: Uuid) -> Result<()> {
		let mut tasks = self.tasks.write().await;
		let task = tasks.get(&task_id).ok_or(OrchestratorError::NotFound(task_id))?;
		if task.status == TaskStatus::Processing {
			return Err(OrchestratorError::Conflict(task_id));
		}

		tasks.remove(&task_id);
		self.store.flush(&tasks)?;
		drop(tasks);

		let dir = self.task_dir(task_id);
		if dir.exists() {
			tokio::fs::remove_dir_all(&dir).await?;
		}

		Ok(())
	}

	#[must_use]
	pub fn data_root(&self) -> &Path {
		&self.data_root
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::StepKind;

	fn sample_inputs() -> TaskInputs {
		TaskInputs {
			speaker_wav: "speaker.wav".into(),
			dialogue_json: "dialogue.json".into(),
			emotion_folder: "emotions".into(),
			source_audio: "source.wav".into(),
			script_json: "script.json".into(),
			bgm_path: "bgm.wav".into(),
		}
	}

	#[tokio::test]
	async fn create_then_get_returns_pending_with_four_steps() {
		let dir = tempfile::tempdir().unwrap();
		let registry = TaskRegistry::load(dir.path().to_path_buf()).await.unwrap();

		let task_id = registry.create(sample_inputs(), Some("story-1".to_string())).await.unwrap();
		let task = registry.get(task_id).await.unwrap();

		assert_eq!(task.status, TaskStatus::Pending);
		assert_eq!(task.steps.len(), 4);
		assert!(task.steps.iter().all(|s| s.status == StepStatus::Pending));
	}

	#[tokio::test]
	async fn get_unknown_task_is_not_found() {
		let dir = tempfile::tempdir().unwrap();
		let registry = TaskRegistry::load(dir.path().to_path_buf()).await.unwrap();
		let err = registry.get(Uuid::new_v4()).await.unwrap_err();
		assert!(matches!(err, OrchestratorError::NotFound(_)));
	}

	#[tokio::test]
	async fn delete_while_processing_is_conflict() {
		let dir = tempfile::tempdir().unwrap();
		let registry = TaskRegistry::load(dir.path().to_path_buf()).await.unwrap();
		let task_id = registry.create(sample_inputs(), None).await.unwrap();

		registry.update(task_id, |t| t.status = TaskStatus::Processing).await.unwrap();

		let err = registry.delete(task_id).await.unwrap_err();
		assert!(matches!(err, OrchestratorError::Conflict(_)));
	}

	#[tokio::test]
	async fn delete_completed_task_removes_directory() {
		let dir = tempfile::tempdir().unwrap();
		let registry = TaskRegistry::load(dir.path().to_path_buf()).await.unwrap();
		let task_id = registry.create(sample_inputs(), None).await.unwrap();

		let task_dir = registry.task_dir(task_id);
		tokio::fs::create_dir_all(&task_dir).await.unwrap();
		registry.update(task_id, |t| t.status = TaskStatus::Completed).await.unwrap();

		registry.delete(task_id).await.unwrap();
		assert!(!task_dir.exists());
		assert!(matches!(registry.get(task_id).await.unwrap_err(), OrchestratorError::NotFound(_)));
	}

	#[tokio::test]
	async fn list_is_newest_first_and_respects_status_filter() {
		let dir = tempfile::tempdir().unwrap();
		let registry = TaskRegistry::load(dir.path().to_path_buf()).await.unwrap();

		let first = registry.create(sample_inputs(), None).await.unwrap();
		tokio::time::sleep(std::time::Duration::from_millis(2)).await;
		let second = registry.create(sample_inputs(), None).await.unwrap();
		registry.update(second, |t| t.status = TaskStatus::Completed).await.unwrap();

		let all = registry.list(None, None).await;
		assert_eq!(all[0].task_id, second);
		assert_eq!(all[1].task_id, first);

		let completed = registry.list(Some(TaskStatus::Completed), None).await;
		assert_eq!(completed.len(), 1);
		assert_eq!(completed[0].task_id, second);
	}

	#[tokio::test]
	async fn startup_recovery_fails_interrupted_tasks() {
		let dir = tempfile::tempdir().unwrap();

		{
			let registry = TaskRegistry::load(dir.path().to_path_buf()).await.unwrap();
			let task_id = registry.create(sample_inputs(), None).await.unwrap();
			registry
				.update(task_id, |t| {
					t.status = TaskStatus::Processing;
					t.step_mut(StepKind::Clone).status = StepStatus::Running;
				})
				.await
				.unwrap();
		}

		let recovered_registry = TaskRegistry::load(dir.path().to_path_buf()).await.unwrap();
		let tasks = recovered_registry.list(None, None).await;
		assert_eq!(tasks.len(), 1);
		assert_eq!(tasks[0].status, TaskStatus::Failed);
		assert_eq!(tasks[0].error.as_deref(), Some("interrupted"));
		assert_eq!(tasks[0].step(StepKind::Clone).status, StepStatus::Failed);
	}
}
