use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Clone, Debug)]
#[command(name = "story-orchestrator")]
#[command(about = "Asynchronous task orchestrator for the four-stage audio story pipeline", long_about = None)]
pub struct Config {
	/// Address the HTTP API listens on.
	#[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3100")]
	pub bind_addr: String,

	/// Root directory for per-task working directories and the registry journal.
	#[arg(long, env = "DATA_ROOT", default_value = "./data")]
	pub data_root: PathBuf,

	/// Number of fixed worker slots in the scheduler's pool.
	#[arg(long, env = "WORKER_COUNT", default_value = "5")]
	pub worker_count: usize,

	/// Bounded submission queue capacity.
	#[arg(long, env = "QUEUE_CAPACITY", default_value = "64")]
	pub queue_capacity: usize,

	/// GPU gate permit count. Keep at 1 unless the host genuinely has
	/// multiple GPUs available to the cloning step.
	#[arg(long, env = "GPU_PERMITS", default_value = "1")]
	pub gpu_permits: usize,

	#[arg(long, env = "STEP1_TIMEOUT_SECS", default_value = "1800", value_parser = parse_duration)]
	pub step_clone_timeout: Duration,

	#[arg(long, env = "STEP2_TIMEOUT_SECS", default_value = "300", value_parser = parse_duration)]
	pub step_trim_timeout: Duration,

	#[arg(long, env = "STEP3_TIMEOUT_SECS", default_value = "120", value_parser = parse_duration)]
	pub step_sequence_timeout: Duration,

	#[arg(long, env = "STEP4_TIMEOUT_SECS", default_value = "600", value_parser = parse_duration)]
	pub step_align_timeout: Duration,

	/// Default timeout for an individual subprocess invocation.
	#[arg(long, env = "SUBPROCESS_TIMEOUT_SECS", default_value = "300", value_parser = parse_duration)]
	pub subprocess_timeout: Duration,

	/// Wall-clock timeout applied to every inbound HTTP request by the
	/// tower middleware stack, independent of the per-step pipeline
	/// timeouts above.
	#[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30", value_parser = parse_duration)]
	pub request_timeout: Duration,

	/// Helper binary invoked for the voice-cloning subprocess boundary.
	/// Unused when `--fake-cloner` stands in for a real TTS model.
	#[arg(long, env = "CLONE_HELPER_BIN", default_value = "tts-clone-helper")]
	pub clone_helper_bin: PathBuf,

	/// Use the deterministic in-process cloner instead of shelling out to
	/// `clone_helper_bin`. Useful for demos and CI where no model is present.
	#[arg(long, env = "FAKE_CLONER", default_value = "false")]
	pub fake_cloner: bool,

	/// Emit logs as JSON instead of pretty-printed text.
	#[arg(long, env = "LOG_JSON", default_value = "false")]
	pub log_json: bool,

	#[arg(long, env = "RUST_LOG")]
	pub rust_log: Option<String>,
}

impl Config {
	pub fn load() -> Self {
		Self::parse()
	}

	#[cfg(test)]
	pub fn test(data_root: PathBuf) -> Self {
		Self {
			bind_addr: "127.0.0.1:0".to_string(),
			data_root,
			worker_count: 2,
			queue_capacity: 8,
			gpu_permits: 1,
			step_clone_timeout: Duration::from_secs(5),
			step_trim_timeout: Duration::from_secs(5),
			step_sequence_timeout: Duration::from_secs(5),
			step_align_timeout: Duration::from_secs(5),
			subprocess_timeout: Duration::from_secs(5),
			request_timeout: Duration::from_secs(5),
			clone_helper_bin: PathBuf::from("tts-clone-helper"),
			fake_cloner: true,
			log_json: false,
			rust_log: None,
		}
	}

	pub fn validate(&self) -> Result<(), String> {
		if self.worker_count == 0 {
			return Err("WORKER_COUNT must be at least 1".to_string());
		}
		if self.queue_capacity == 0 {
			return Err("QUEUE_CAPACITY must be at least 1".to_string());
		}
		if self.gpu_permits == 0 {
			return Err("GPU_PERMITS must be at least 1".to_string());
		}
		Ok(())
	}
}

fn parse_duration(s: &str) -> Result<Duration, std::num::ParseIntError> {
	s.parse::<u64>().map(Duration::from_secs)
}
