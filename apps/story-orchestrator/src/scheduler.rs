//! `Scheduler`: a bounded submission queue fanning out to a fixed
//! worker pool, grounded in `task_queue::pool::WorkerPool` /
//! `task_queue::worker::Worker`'s mpsc-plus-worker-loop shape.

use crate::error::{OrchestratorError, Result};
use crate::metrics::Metrics;
use crate::pipeline::Pipeline;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

pub struct Scheduler {
	sender: mpsc::Sender<Uuid>,
}

impl Scheduler {
	/// Spawn `worker_count` fungible workers sharing one bounded queue of
	/// capacity `queue_capacity`. Workers run until the sender side is
	/// dropped (process shutdown).
	#[must_use]
	pub fn start(queue_capacity: usize, worker_count: usize, pipeline: Arc<Pipeline>, metrics: Arc<Metrics>) -> Arc<Self> {
		let (tx, rx) = mpsc::channel(queue_capacity);
		let rx = Arc::new(Mutex::new(rx));

		for worker_id in 0..worker_count {
			let rx = rx.clone();
			let pipeline = pipeline.clone();
			let metrics = metrics.clone();

			tokio::spawn(async move {
				loop {
					let task_id = {
						let mut guard = rx.lock().await;
						guard.recv().await
					};

					let Some(task_id) = task_id else {
						tracing::debug!(worker_id, "scheduler queue closed, worker exiting");
						break;
					};

					metrics.queue_depth.dec();
					tracing::info!(worker_id, %task_id, "worker picked up task");

					match pipeline.run(task_id).await {
						Ok(()) => {
							metrics.tasks_completed.inc();
						}
						Err(OrchestratorError::StepFailure(step_name)) => {
							metrics.tasks_failed.inc();
							metrics.record_step_failure(&step_name);
						}
						Err(e) => {
							metrics.tasks_failed.inc();
							tracing::error!(worker_id, %task_id, error = %e, "pipeline run ended in an unexpected error");
						}
					}
				}
			});
		}

		Arc::new(Self { sender: tx })
	}

	/// Enqueue a task id, returning `QueueFull` immediately if the bounded
	/// channel has no free slot — never blocks the HTTP boundary.
	pub fn submit(&self, task_id: Uuid, metrics: &Metrics) -> Result<()> {
		self.sender.try_send(task_id).map_err(|e| match e {
			mpsc::error::TrySendError::Full(_) => OrchestratorError::QueueFull,
			mpsc::error::TrySendError::Closed(_) => OrchestratorError::Internal("scheduler has shut down".to_string()),
		})?;
		metrics.queue_depth.inc();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::gpu_gate::GpuGate;
	use crate::model::TaskInputs;
	use crate::pipeline::collaborators::{FakeTtsCloner, HashedBagOfWordsEmbedding};
	use crate::pipeline::scoring::ScoringWeights;
	use crate::pipeline::{align::AlignStep, clone::CloneStep, sequence::SequenceStep, trim::TrimStep, StepTimeouts};
	use crate::registry::TaskRegistry;
	use std::time::Duration;

	fn test_pipeline(registry: Arc<TaskRegistry>, metrics: Arc<Metrics>) -> Arc<Pipeline> {
		Arc::new(Pipeline {
			registry,
			gpu_gate: GpuGate::new(1),
			metrics,
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
		})
	}

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

	#[tokio::test]
	async fn submit_beyond_capacity_returns_queue_full() {
		let dir = tempfile::tempdir().unwrap();
		let registry = TaskRegistry::load(dir.path().to_path_buf()).await.unwrap();
		let metrics = Arc::new(Metrics::new().unwrap());

		// Zero workers draining means the one queued slot stays occupied.
		let scheduler = Scheduler::start(1, 0, test_pipeline(registry.clone(), metrics.clone()), metrics.clone());

		let first = uuid::Uuid::new_v4();
		let second = uuid::Uuid::new_v4();
		scheduler.submit(first, &metrics).unwrap();
		let err = scheduler.submit(second, &metrics).unwrap_err();
		assert!(matches!(err, OrchestratorError::QueueFull));
	}

	#[tokio::test]
	async fn submitted_task_eventually_completes() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::create_dir_all(dir.path().join("emotions")).unwrap();
		std::fs::write(dir.path().join("emotions/a.wav"), b"fake").unwrap();
		write_sine(&dir.path().join("bgm.wav"), 200, 16_000);

		let registry = TaskRegistry::load(dir.path().join("registry")).await.unwrap();
		let inputs = sample_inputs(dir.path());
		std::fs::write(
			&inputs.dialogue_json,
			serde_json::to_vec(&serde_json::json!([{"sort": 1, "text": "hello", "emo_audio": "a.wav", "role": "narrator"}])).unwrap(),
		)
		.unwrap();
		std::fs::write(
			&inputs.script_json,
			serde_json::to_vec(&serde_json::json!([{"expected_text": "hello", "expected_duration_ms": 300, "expected_role": "narrator", "start_ms": 0}])).unwrap(),
		)
		.unwrap();

		let task_id = registry.create(inputs, None).await.unwrap();
		let metrics = Arc::new(Metrics::new().unwrap());
		let scheduler = Scheduler::start(4, 2, test_pipeline(registry.clone(), metrics.clone()), metrics.clone());
		scheduler.submit(task_id, &metrics).unwrap();

		for _ in 0..100 {
			let task = registry.get(task_id).await.unwrap();
			if task.status != crate::model::TaskStatus::Pending && task.status != crate::model::TaskStatus::Processing {
				break;
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}

		let task = registry.get(task_id).await.unwrap();
		assert_eq!(task.status, crate::model::TaskStatus::Completed);
	}

	fn write_sine(path: &std::path::Path, duration_ms: u64, sample_rate: u32) {
		use crate::pipeline::audio_io::{write_wav, WavBuffer};
		let samples = (0..(sample_rate as u64 * duration_ms / 1000) as usize)
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
}
