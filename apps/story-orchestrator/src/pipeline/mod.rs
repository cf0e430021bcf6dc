//! `Pipeline::run`: drives the four ordered steps against a task's
//! working directory, updating the registry at each boundary.

pub mod align;
pub mod audio_io;
pub mod clone;
pub mod collaborators;
pub mod context;
pub mod scoring;
pub mod sequence;
pub mod trim;

pub use context::StepContext;

use crate::error::{OrchestratorError, Result};
use crate::gpu_gate::GpuGate;
use crate::metrics::Metrics;
use crate::model::{StepKind, StepStatus, Task, TaskStatus};
use crate::registry::TaskRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A step's own account of why it failed; carries through to both the
/// step record's `error` and the task record's `error`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct StepError {
	pub reason: String,
}

impl StepError {
	pub fn new(reason: impl Into<String>) -> Self {
		Self { reason: reason.into() }
	}
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
	async fn execute(&self, ctx: &StepContext<'_>) -> std::result::Result<serde_json::Value, StepError>;
}

pub struct StepTimeouts {
	pub clone: Duration,
	pub trim: Duration,
	pub sequence: Duration,
	pub align: Duration,
}

impl StepTimeouts {
	#[must_use]
	pub const fn for_kind(&self, kind: StepKind) -> Duration {
		match kind {
			StepKind::Clone => self.clone,
			StepKind::Trim => self.trim,
			StepKind::Sequence => self.sequence,
			StepKind::Align => self.align,
		}
	}
}

pub struct Pipeline {
	pub registry: Arc<TaskRegistry>,
	pub gpu_gate: Arc<GpuGate>,
	pub metrics: Arc<Metrics>,
	pub timeouts: StepTimeouts,
	pub executors: [Box<dyn StepExecutor>; 4],
}

impl Pipeline {
	/// Execute all four steps in order for `task_id`. Never panics
	/// across the pipeline boundary — every failure path ends in a
	/// `registry.update` recording the failure, never a propagated panic.
	pub async fn run(&self, task_id: uuid::Uuid) -> Result<()> {
		let task_dir = self.registry.task_dir(task_id);
		tokio::fs::create_dir_all(&task_dir).await?;

		self.registry
			.update(task_id, |t| {
				t.status = TaskStatus::Processing;
				t.started_at = Some(chrono::Utc::now());
				t.progress_message = "starting".to_string();
			})
			.await?;

		let mut previous_output: Option<serde_json::Value> = None;

		for kind in StepKind::ORDER {
			let inputs = self.registry.get(task_id).await?.inputs;
			let ctx = StepContext::new(task_dir.clone(), &inputs, previous_output.clone());

			self.registry
				.update(task_id, |t| {
					t.current_step = kind.number();
					t.progress_message = format!("running {}", kind.name());
					t.step_mut(kind).status = StepStatus::Running;
					t.step_mut(kind).started_at = Some(chrono::Utc::now());
				})
				.await?;

			let _gpu_permit = if kind.needs_gpu() {
				let permit = self.gpu_gate.acquire().await;
				self.metrics.gpu_gate_holders.inc();
				Some(permit)
			} else {
				None
			};

			let executor = &self.executors[(kind.number() - 1) as usize];
			let timeout = self.timeouts.for_kind(kind);
			let outcome = tokio::time::timeout(timeout, executor.execute(&ctx)).await;

			let result = match outcome {
				Ok(Ok(value)) => Ok(value),
				Ok(Err(step_err)) => Err(step_err.reason),
				Err(_) => Err(format!("step timed out after {timeout:?}")),
			};

			if _gpu_permit.is_some() {
				self.metrics.gpu_gate_holders.dec();
			}
			drop(_gpu_permit);

			match result {
				Ok(value) => {
					previous_output = Some(value.clone());
					self.registry
						.update(task_id, |t| {
							let step = t.step_mut(kind);
							step.status = StepStatus::Completed;
							step.result = Some(value);
							step.finished_at = Some(chrono::Utc::now());
						})
						.await?;
				}
				Err(reason) => {
					tracing::warn!(%task_id, step = kind.name(), %reason, "pipeline step failed");
					self.registry
						.update(task_id, |t| {
							let step = t.step_mut(kind);
							step.status = StepStatus::Failed;
							step.error = Some(reason.clone());
							step.finished_at = Some(chrono::Utc::now());
							t.status = TaskStatus::Failed;
							t.error = Some(reason);
							t.finished_at = Some(chrono::Utc::now());
						})
						.await?;
					return Err(OrchestratorError::StepFailure(kind.name().to_string()));
				}
			}
		}

		self.registry
			.update(task_id, |t| {
				t.output_path = Some(task_dir.join("4_final_output.wav"));
				t.status = TaskStatus::Completed;
				t.progress_message = "completed".to_string();
				t.finished_at = Some(chrono::Utc::now());
			})
			.await?;

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::TaskInputs;
	use crate::pipeline::collaborators::{FakeTtsCloner, HashedBagOfWordsEmbedding};
	use crate::pipeline::scoring::ScoringWeights;
	use crate::pipeline::{align::AlignStep, clone::CloneStep, sequence::SequenceStep, trim::TrimStep};
	use crate::registry::TaskRegistry;

	fn sample_inputs(dir: &std::path::Path) -> TaskInputs {
		TaskInputs {
			speaker_wav: dir.join("speaker.wav"),
			dialogue_json: dir.join("dialogue.json"),
			emotion_folder: dir.join("emotions"),
			source_audio: dir.join("source.wav"),
			script_json: dir.join("script.json"),
			bgm_path: dir.join("bgm.wav"),
		}
	}

	fn write_sine(path: &std::path::Path, duration_ms: u64, sample_rate: u32) {
		use crate::pipeline::audio_io::{write_wav, WavBuffer};
		let samples = (0..(u64::from(sample_rate) * duration_ms / 1000) as usize)
			.map(|i| (i as f32 / sample_rate as f32 * 440.0 * std::f32::consts::TAU).sin() * 0.1)
			.collect();
		write_wav(
			path,
			&WavBuffer {
				samples,
				sample_rate,
				channels: 1,
			},
		)
		.unwrap();
	}

	#[tokio::test]
	async fn gpu_gate_holders_gauge_returns_to_zero_after_clone_step() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::create_dir_all(dir.path().join("emotions")).unwrap();
		std::fs::write(dir.path().join("emotions/a.wav"), b"fake").unwrap();

		let registry = TaskRegistry::load(dir.path().join("registry")).await.unwrap();
		let inputs = sample_inputs(dir.path());
		write_sine(&inputs.bgm_path, 200, 16_000);
		std::fs::write(
			&inputs.dialogue_json,
			serde_json::to_vec(&serde_json::json!([{"sort": 1, "text": "hi", "emo_audio": "a.wav", "role": "narrator"}])).unwrap(),
		)
		.unwrap();
		std::fs::write(
			&inputs.script_json,
			serde_json::to_vec(&serde_json::json!([{"expected_text": "hi", "expected_duration_ms": 300, "expected_role": "narrator", "start_ms": 0}])).unwrap(),
		)
		.unwrap();

		let metrics = Arc::new(Metrics::new().unwrap());
		let pipeline = Pipeline {
			registry: registry.clone(),
			gpu_gate: GpuGate::new(1),
			metrics: metrics.clone(),
			timeouts: StepTimeouts {
				clone: Duration::from_secs(5),
				trim: Duration::from_secs(5),
				sequence: Duration::from_secs(5),
				align: Duration::from_secs(5),
			},
			executors: [
				Box::new(CloneStep {
					cloner: Arc::new(FakeTtsCloner { fail_if_emotion_missing: false }),
				}),
				Box::new(TrimStep),
				Box::new(SequenceStep {
					weights: ScoringWeights::default(),
					embedder: Box::new(HashedBagOfWordsEmbedding::default()),
				}),
				Box::new(AlignStep),
			],
		};

		let task_id = registry.create(inputs, None).await.unwrap();
		pipeline.run(task_id).await.unwrap();

		assert!((metrics.gpu_gate_holders.get() - 0.0).abs() < f64::EPSILON);
	}
}
