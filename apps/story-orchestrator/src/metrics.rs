//! Prometheus metrics (queue depth, GPU gate holders, task outcomes),
//! wired into `AppState` and exposed at `/metrics`, mirroring
//! `task_queue::pool::WorkerPool`'s explicit-`Registry` style and
//! `file_host`'s `/metrics` route.

use axum::http::StatusCode;
use prometheus::{Counter, Gauge, IntCounterVec, Opts, Registry, TextEncoder};

pub struct Metrics {
	pub registry: Registry,
	pub queue_depth: Gauge,
	pub gpu_gate_holders: Gauge,
	pub tasks_completed: Counter,
	pub tasks_failed: Counter,
	pub step_failures: IntCounterVec,
}

impl Metrics {
	pub fn new() -> Result<Self, prometheus::Error> {
		let registry = Registry::new();

		let queue_depth = Gauge::new("story_orchestrator_queue_depth", "Number of tasks waiting in the scheduler queue")?;
		let gpu_gate_holders = Gauge::new("story_orchestrator_gpu_gate_holders", "Number of workers currently holding a GPU gate permit")?;
		let tasks_completed = Counter::new("story_orchestrator_tasks_completed_total", "Total tasks that completed successfully")?;
		let tasks_failed = Counter::new("story_orchestrator_tasks_failed_total", "Total tasks that ended in failed status")?;
		let step_failures = IntCounterVec::new(Opts::new("story_orchestrator_step_failures_total", "Per-step failure counts"), &["step"])?;

		registry.register(Box::new(queue_depth.clone()))?;
		registry.register(Box::new(gpu_gate_holders.clone()))?;
		registry.register(Box::new(tasks_completed.clone()))?;
		registry.register(Box::new(tasks_failed.clone()))?;
		registry.register(Box::new(step_failures.clone()))?;

		Ok(Self {
			registry,
			queue_depth,
			gpu_gate_holders,
			tasks_completed,
			tasks_failed,
			step_failures,
		})
	}

	pub fn record_step_failure(&self, step_name: &str) {
		self.step_failures.with_label_values(&[step_name]).inc();
	}
}

pub async fn metrics_handler(state: axum::extract::State<std::sync::Arc<crate::state::AppState>>) -> Result<String, StatusCode> {
	let encoder = TextEncoder::new();
	let metric_families = state.metrics.registry.gather();
	let mut buffer = Vec::new();

	if encoder.encode(&metric_families, &mut buffer).is_err() {
		return Err(StatusCode::INTERNAL_SERVER_ERROR);
	}

	String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
