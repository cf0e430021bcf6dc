//! `StepContext`: what the pipeline hands each `StepExecutor`.

use crate::model::TaskInputs;
use std::path::{Path, PathBuf};

pub struct StepContext<'a> {
	pub task_dir: PathBuf,
	pub inputs: &'a TaskInputs,
	/// The `result` value of the step that just completed, if any. Steps
	/// in this pipeline locate their real inputs by directory convention
	/// (`1_cloned/`, `2_trimmed/`, `3_sequence.json`) rather than by
	/// threading data through this field, but it is kept on the context
	/// so an executor can inspect upstream counts
	/// without re-reading the registry.
	pub previous_output: Option<serde_json::Value>,
}

impl<'a> StepContext<'a> {
	#[must_use]
	pub fn new(task_dir: PathBuf, inputs: &'a TaskInputs, previous_output: Option<serde_json::Value>) -> Self {
		Self { task_dir, inputs, previous_output }
	}

	#[must_use]
	pub fn subdir(&self, name: &str) -> PathBuf {
		self.task_dir.join(name)
	}

	#[must_use]
	pub fn cloned_dir(&self) -> PathBuf {
		self.subdir("1_cloned")
	}

	#[must_use]
	pub fn trimmed_dir(&self) -> PathBuf {
		self.subdir("2_trimmed")
	}

	#[must_use]
	pub fn sequence_path(&self) -> PathBuf {
		self.task_dir.join("3_sequence.json")
	}

	#[must_use]
	pub fn final_output_path(&self) -> PathBuf {
		self.task_dir.join("4_final_output.wav")
	}

	#[must_use]
	pub fn emotion_folder(&self) -> &Path {
		&self.inputs.emotion_folder
	}
}
