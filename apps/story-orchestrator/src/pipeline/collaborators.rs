//! Collaborator contracts. `TtsCloner` is the one genuine ML/DSP
//! boundary in this pipeline — it is modeled as
//! a trait so the production subprocess-backed implementation and the
//! deterministic test fake share one seam.

use crate::subprocess::{self, SubprocessSpec};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CloneOutcome {
	pub success: bool,
	pub error: Option<String>,
	pub duration_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
	#[error("subprocess failed: {0}")]
	Subprocess(#[from] subprocess::SubprocessError),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

#[async_trait]
pub trait TtsCloner: Send + Sync {
	async fn clone_with_emotion_audio(&self, text: &str, speaker_wav: &Path, emotion_wav: &Path, output_path: &Path) -> Result<CloneOutcome, CollaboratorError>;
}

/// Production path: shells out to a helper binary that performs the
/// actual voice-cloning inference. The model itself is out of scope here —
/// the orchestrator only owns the invocation contract.
pub struct SubprocessTtsCloner {
	pub binary: PathBuf,
	pub timeout: Duration,
}

#[async_trait]
impl TtsCloner for SubprocessTtsCloner {
	async fn clone_with_emotion_audio(&self, text: &str, speaker_wav: &Path, emotion_wav: &Path, output_path: &Path) -> Result<CloneOutcome, CollaboratorError> {
		let start = std::time::Instant::now();

		let spec = SubprocessSpec {
			argv: vec![
				self.binary.display().to_string(),
				"--speaker".to_string(),
				speaker_wav.display().to_string(),
				"--emotion".to_string(),
				emotion_wav.display().to_string(),
				"--output".to_string(),
				output_path.display().to_string(),
			],
			env: std::collections::HashMap::new(),
			stdin_json: Some(serde_json::json!({ "text": text })),
			timeout: self.timeout,
		};

		match subprocess::run(&spec).await {
			Ok(_) => Ok(CloneOutcome {
				success: true,
				error: None,
				duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
			}),
			Err(e) => Ok(CloneOutcome {
				success: false,
				error: Some(e.to_string()),
				duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
			}),
		}
	}
}

/// Deterministic stand-in used in tests and in demos without a real model:
/// synthesizes a short sine-wave WAV instead of performing real cloning, so
/// the rest of the pipeline (trim/sequence/align) can be exercised end to
/// end without a real model.
pub struct FakeTtsCloner {
	pub fail_if_emotion_missing: bool,
}

impl Default for FakeTtsCloner {
	fn default() -> Self {
		Self { fail_if_emotion_missing: true }
	}
}

#[async_trait]
impl TtsCloner for FakeTtsCloner {
	async fn clone_with_emotion_audio(&self, text: &str, _speaker_wav: &Path, emotion_wav: &Path, output_path: &Path) -> Result<CloneOutcome, CollaboratorError> {
		let start = std::time::Instant::now();

		if text.trim().is_empty() {
			return Ok(CloneOutcome {
				success: false,
				error: Some("empty text".to_string()),
				duration_ms: 0,
			});
		}

		if self.fail_if_emotion_missing && !emotion_wav.exists() {
			return Ok(CloneOutcome {
				success: false,
				error: Some(format!("emotion audio not found: {}", emotion_wav.display())),
				duration_ms: 0,
			});
		}

		let duration_secs = (text.len().max(1) as f32 / 15.0).clamp(0.3, 6.0);
		write_tone_wav(output_path, duration_secs)?;

		Ok(CloneOutcome {
			success: true,
			error: None,
			duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
		})
	}
}

/// Writes a short 16-bit PCM sine tone, used as a stand-in "cloned line".
pub(crate) fn write_tone_wav(path: &Path, duration_secs: f32) -> Result<(), CollaboratorError> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}

	let spec = hound::WavSpec {
		channels: 1,
		sample_rate: 16_000,
		bits_per_sample: 16,
		sample_format: hound::SampleFormat::Int,
	};

	let mut writer = hound::WavWriter::create(path, spec).map_err(|e| CollaboratorError::Io(std::io::Error::other(e)))?;
	let total_samples = (duration_secs * spec.sample_rate as f32) as u32;
	for i in 0..total_samples {
		let t = i as f32 / spec.sample_rate as f32;
		let sample = (t * 220.0 * std::f32::consts::TAU).sin() * 0.2;
		writer
			.write_sample((sample * f32::from(i16::MAX)) as i16)
			.map_err(|e| CollaboratorError::Io(std::io::Error::other(e)))?;
	}
	writer.finalize().map_err(|e| CollaboratorError::Io(std::io::Error::other(e)))?;

	Ok(())
}

/// Declared-dimensionality embedding seam. The default
/// implementation is a deterministic bag-of-hashed-tokens vector — a
/// placeholder documented as such, not a real sentence-embedding model.
pub trait EmbeddingProvider: Send + Sync {
	fn dimensionality(&self) -> usize;
	fn embed(&self, text: &str) -> Vec<f32>;
}

pub struct HashedBagOfWordsEmbedding {
	dims: usize,
}

impl HashedBagOfWordsEmbedding {
	#[must_use]
	pub const fn new(dims: usize) -> Self {
		Self { dims }
	}
}

impl Default for HashedBagOfWordsEmbedding {
	fn default() -> Self {
		Self::new(64)
	}
}

impl EmbeddingProvider for HashedBagOfWordsEmbedding {
	fn dimensionality(&self) -> usize {
		self.dims
	}

	fn embed(&self, text: &str) -> Vec<f32> {
		let mut vec = vec![0.0f32; self.dims];
		for token in text.split_whitespace() {
			let hash = simple_hash(token);
			let idx = (hash as usize) % self.dims;
			vec[idx] += 1.0;
		}

		let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
		if norm > 0.0 {
			for v in &mut vec {
				*v /= norm;
			}
		}
		vec
	}
}

fn simple_hash(token: &str) -> u64 {
	let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
	for byte in token.bytes() {
		hash ^= u64::from(byte);
		hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
	}
	hash
}

/// Cosine similarity between two embeddings, used by the sequence step's
/// L2 "semantic vector similarity" term.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
	let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
	let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
	let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
	if norm_a == 0.0 || norm_b == 0.0 {
		0.0
	} else {
		(dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
	}
}
