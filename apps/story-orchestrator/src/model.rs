//! Domain types for the story pipeline: tasks, steps, and the on-disk
//! formats the pipeline steps read and write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub const TOTAL_STEPS: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
	Pending,
	Processing,
	Completed,
	Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
	Pending,
	Running,
	Completed,
	Failed,
	Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
	Clone,
	Trim,
	Sequence,
	Align,
}

impl StepKind {
	pub const ORDER: [Self; 4] = [Self::Clone, Self::Trim, Self::Sequence, Self::Align];

	#[must_use]
	pub const fn number(self) -> u8 {
		match self {
			Self::Clone => 1,
			Self::Trim => 2,
			Self::Sequence => 3,
			Self::Align => 4,
		}
	}

	#[must_use]
	pub const fn name(self) -> &'static str {
		match self {
			Self::Clone => "Voice Cloning",
			Self::Trim => "Trim Silence",
			Self::Sequence => "Build Sequence",
			Self::Align => "Alignment",
		}
	}

	#[must_use]
	pub const fn needs_gpu(self) -> bool {
		matches!(self, Self::Clone)
	}
}

/// Frozen snapshot of the six inputs a task was submitted with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInputs {
	pub speaker_wav: PathBuf,
	pub dialogue_json: PathBuf,
	pub emotion_folder: PathBuf,
	pub source_audio: PathBuf,
	pub script_json: PathBuf,
	pub bgm_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
	pub step_number: u8,
	pub step_name: String,
	pub status: StepStatus,
	pub result: Option<serde_json::Value>,
	pub error: Option<String>,
	pub started_at: Option<DateTime<Utc>>,
	pub finished_at: Option<DateTime<Utc>>,
}

impl StepRecord {
	#[must_use]
	pub fn pending(kind: StepKind) -> Self {
		Self {
			step_number: kind.number(),
			step_name: kind.name().to_string(),
			status: StepStatus::Pending,
			result: None,
			error: None,
			started_at: None,
			finished_at: None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
	pub task_id: Uuid,
	pub name: Option<String>,
	pub inputs: TaskInputs,
	pub status: TaskStatus,
	pub current_step: u8,
	pub total_steps: u8,
	pub progress_message: String,
	pub steps: Vec<StepRecord>,
	pub output_path: Option<PathBuf>,
	pub error: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub started_at: Option<DateTime<Utc>>,
	pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
	#[must_use]
	pub fn new(task_id: Uuid, name: Option<String>, inputs: TaskInputs) -> Self {
		let now = Utc::now();
		Self {
			task_id,
			name,
			inputs,
			status: TaskStatus::Pending,
			current_step: 0,
			total_steps: TOTAL_STEPS,
			progress_message: "queued".to_string(),
			steps: StepKind::ORDER.iter().map(|k| StepRecord::pending(*k)).collect(),
			output_path: None,
			error: None,
			created_at: now,
			updated_at: now,
			started_at: None,
			finished_at: None,
		}
	}

	pub fn step_mut(&mut self, kind: StepKind) -> &mut StepRecord {
		&mut self.steps[(kind.number() - 1) as usize]
	}

	#[must_use]
	pub fn step(&self, kind: StepKind) -> &StepRecord {
		&self.steps[(kind.number() - 1) as usize]
	}

	pub fn touch(&mut self) {
		self.updated_at = Utc::now();
	}
}

// --- on-disk formats consumed/produced by the pipeline steps -----------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueRecord {
	pub sort: i64,
	pub text: String,
	pub emo_audio: String,
	#[serde(default)]
	pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotSpec {
	pub expected_text: String,
	pub expected_duration_ms: u64,
	pub expected_role: String,
	pub start_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceEntryKind {
	Cloned,
	Anchor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceEntry {
	pub start_ms: u64,
	pub end_ms: u64,
	pub kind: SequenceEntryKind,
	pub source_path: PathBuf,
	pub gain_db: f32,
	pub fade_in_ms: u32,
	pub fade_out_ms: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mode: Option<String>,
}

/// The task API's read model: excludes the frozen `inputs`
/// snapshot, which is owner-only state, never returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
	pub task_id: Uuid,
	pub name: Option<String>,
	pub status: TaskStatus,
	pub progress: String,
	pub current_step: u8,
	pub total_steps: u8,
	pub steps: Vec<StepRecord>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub output_wav: Option<PathBuf>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl From<Task> for TaskView {
	fn from(task: Task) -> Self {
		Self {
			task_id: task.task_id,
			name: task.name,
			status: task.status,
			progress: task.progress_message,
			current_step: task.current_step,
			total_steps: task.total_steps,
			steps: task.steps,
			output_wav: task.output_path,
			error: task.error,
			created_at: task.created_at,
			updated_at: task.updated_at,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn new_task_has_four_pending_steps() {
		let task = Task::new(Uuid::new_v4(), None, sample_inputs());
		assert_eq!(task.status, TaskStatus::Pending);
		assert_eq!(task.current_step, 0);
		assert_eq!(task.steps.len(), 4);
		assert!(task.steps.iter().all(|s| s.status == StepStatus::Pending));
	}

	#[test]
	fn step_kind_numbers_are_1_indexed_and_ordered() {
		let numbers: Vec<u8> = StepKind::ORDER.iter().map(|k| k.number()).collect();
		assert_eq!(numbers, vec![1, 2, 3, 4]);
	}

	#[test]
	fn only_clone_needs_gpu() {
		assert!(StepKind::Clone.needs_gpu());
		assert!(!StepKind::Trim.needs_gpu());
		assert!(!StepKind::Sequence.needs_gpu());
		assert!(!StepKind::Align.needs_gpu());
	}

	#[test]
	fn task_view_omits_frozen_inputs_and_keeps_progress_fields() {
		let mut task = Task::new(Uuid::new_v4(), Some("story".to_string()), sample_inputs());
		task.output_path = Some("/tmp/out.wav".into());
		let view = TaskView::from(task.clone());

		assert_eq!(view.task_id, task.task_id);
		assert_eq!(view.progress, task.progress_message);
		assert_eq!(view.output_wav, task.output_path);

		let serialized = serde_json::to_value(&view).unwrap();
		assert!(serialized.get("inputs").is_none());
	}

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
}
