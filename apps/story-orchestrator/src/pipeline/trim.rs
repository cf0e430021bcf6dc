//! Step 2 — Trim Silence.

use super::audio_io::{self, rms_dbfs, WavBuffer};
use super::context::StepContext;
use super::{StepError, StepExecutor};
use async_trait::async_trait;

const FRAME_MS: u64 = 20;
const GUARD_MS: u64 = 50;
const SILENCE_THRESHOLD_DBFS: f32 = -40.0;
const MAX_TRIM_FRACTION: f32 = 0.5;

pub struct TrimStep;

#[async_trait]
impl StepExecutor for TrimStep {
	async fn execute(&self, ctx: &StepContext<'_>) -> Result<serde_json::Value, StepError> {
		let in_dir = ctx.cloned_dir();
		let out_dir = ctx.trimmed_dir();
		tokio::fs::create_dir_all(&out_dir)
			.await
			.map_err(|e| StepError::new(format!("failed to create trimmed dir: {e}")))?;

		let mut entries = tokio::fs::read_dir(&in_dir).await.map_err(|e| StepError::new(format!("failed to read cloned dir: {e}")))?;

		let mut paths = Vec::new();
		while let Some(entry) = entries.next_entry().await.map_err(|e| StepError::new(e.to_string()))? {
			if entry.path().extension().is_some_and(|ext| ext.eq_ignore_ascii_case("wav")) {
				paths.push(entry.path());
			}
		}
		paths.sort();

		let mut processed = 0u32;
		let mut shortened_frames = 0u64;
		let mut untouched = 0u32;
		let mut skipped = 0u32;

		for path in &paths {
			let Some(file_name) = path.file_name() else { continue };
			let out_path = out_dir.join(file_name);

			match trim_one(path, &out_path) {
				Ok(TrimOutcome::Shortened { removed_frames }) => {
					processed += 1;
					shortened_frames += removed_frames;
				}
				Ok(TrimOutcome::Unchanged) => {
					processed += 1;
					untouched += 1;
				}
				Err(e) => {
					tracing::warn!(path = %path.display(), error = %e, "failed to trim file, skipping");
					skipped += 1;
				}
			}
		}

		if processed == 0 {
			return Err(StepError::new("no files could be trimmed"));
		}

		Ok(serde_json::json!({
			"processed": processed,
			"shortened_frames": shortened_frames,
			"untouched": untouched,
			"skipped": skipped,
		}))
	}
}

enum TrimOutcome {
	/// Carries the number of 20ms frames actually removed, so the
	/// step's `shortened_frames` summary field matches its name rather
	/// than just counting shortened files.
	Shortened { removed_frames: u64 },
	Unchanged,
}

fn trim_one(input: &std::path::Path, output: &std::path::Path) -> Result<TrimOutcome, audio_io::AudioIoError> {
	let buf = audio_io::read_wav(input)?;
	let channels = usize::from(buf.channels.max(1));
	let frame_samples = (buf.sample_rate as u64 * FRAME_MS / 1000) as usize * channels;
	let guard_samples = (buf.sample_rate as u64 * GUARD_MS / 1000) as usize * channels;

	if frame_samples == 0 || buf.samples.is_empty() {
		audio_io::write_wav(output, &buf)?;
		return Ok(TrimOutcome::Unchanged);
	}

	let total_frames = buf.samples.len() / frame_samples.max(1);
	let mut first_loud = None;
	let mut last_loud = None;

	for i in 0..total_frames.max(1) {
		let start = i * frame_samples;
		let end = (start + frame_samples).min(buf.samples.len());
		if start >= end {
			break;
		}
		if rms_dbfs(&buf.samples[start..end]) >= SILENCE_THRESHOLD_DBFS {
			first_loud.get_or_insert(start);
			last_loud = Some(end);
		}
	}

	let (Some(first_loud), Some(last_loud)) = (first_loud, last_loud) else {
		// Entirely silent: leave it untouched rather than emit an empty file.
		audio_io::write_wav(output, &buf)?;
		return Ok(TrimOutcome::Unchanged);
	};

	let trim_start = first_loud.saturating_sub(guard_samples);
	let trim_end = (last_loud + guard_samples).min(buf.samples.len());

	let original_len = buf.samples.len();
	let trimmed_len = trim_end.saturating_sub(trim_start);
	let removed = original_len.saturating_sub(trimmed_len);

	if removed as f32 > original_len as f32 * MAX_TRIM_FRACTION {
		audio_io::write_wav(output, &buf)?;
		return Ok(TrimOutcome::Unchanged);
	}

	if trim_start == 0 && trim_end == original_len {
		audio_io::write_wav(output, &buf)?;
		return Ok(TrimOutcome::Unchanged);
	}

	let trimmed = WavBuffer {
		samples: buf.samples[trim_start..trim_end].to_vec(),
		sample_rate: buf.sample_rate,
		channels: buf.channels,
	};
	audio_io::write_wav(output, &trimmed)?;
	let removed_frames = removed as u64 / frame_samples as u64;
	Ok(TrimOutcome::Shortened { removed_frames })
}
