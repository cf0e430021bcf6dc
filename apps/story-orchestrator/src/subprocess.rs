//! The out-of-process invocation boundary.
//!
//! Keeps step executors composable and mockable in tests: a
//! `SubprocessSpec` describes a helper binary invocation, and
//! `SubprocessOutcome` captures its parsed result. Used by the production
//! `TtsCloner` to isolate the actual model inference in a child process.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct SubprocessSpec {
	pub argv: Vec<String>,
	pub env: HashMap<String, String>,
	pub stdin_json: Option<serde_json::Value>,
	pub timeout: Duration,
}

impl SubprocessSpec {
	#[must_use]
	pub fn new(argv: Vec<String>, default_timeout: Duration) -> Self {
		Self {
			argv,
			env: HashMap::new(),
			stdin_json: None,
			timeout: default_timeout,
		}
	}
}

#[derive(Debug)]
pub struct SubprocessOutcome {
	pub stdout_json: Option<serde_json::Value>,
	pub exit_code: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum SubprocessError {
	#[error("subprocess timed out after {0:?}")]
	Timeout(Duration),

	#[error("subprocess exited with code {0}")]
	NonZeroExit(i32),

	#[error("failed to spawn subprocess: {0}")]
	Spawn(#[from] std::io::Error),

	#[error("subprocess stdout was not valid JSON: {0}")]
	InvalidJson(#[from] serde_json::Error),
}

/// Run `spec` to completion, enforcing its timeout, and parse stdout as
/// JSON. A non-zero exit code is always treated as a failure.
pub async fn run(spec: &SubprocessSpec) -> Result<SubprocessOutcome, SubprocessError> {
	let Some((program, args)) = spec.argv.split_first() else {
		return Err(SubprocessError::Spawn(std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv")));
	};

	let mut cmd = Command::new(program);
	cmd.args(args).envs(&spec.env).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

	let mut child = cmd.spawn()?;

	if let Some(payload) = &spec.stdin_json {
		let bytes = serde_json::to_vec(payload)?;
		if let Some(mut stdin) = child.stdin.take() {
			let _ = stdin.write_all(&bytes).await;
		}
	}
	drop(child.stdin.take());

	let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
		Ok(result) => result?,
		Err(_) => return Err(SubprocessError::Timeout(spec.timeout)),
	};

	let exit_code = output.status.code().unwrap_or(-1);
	if exit_code != 0 {
		tracing::warn!(exit_code, stderr = %String::from_utf8_lossy(&output.stderr), argv = ?spec.argv, "subprocess exited non-zero");
		return Err(SubprocessError::NonZeroExit(exit_code));
	}

	let stdout_json = if output.stdout.is_empty() {
		None
	} else {
		Some(serde_json::from_slice(&output.stdout)?)
	};

	Ok(SubprocessOutcome { stdout_json, exit_code })
}
