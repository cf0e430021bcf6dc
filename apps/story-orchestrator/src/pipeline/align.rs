//! Step 4 — Alignment & Mix.

use super::audio_io::{self, WavBuffer};
use super::context::StepContext;
use super::{StepError, StepExecutor};
use crate::model::SequenceEntry;
use async_trait::async_trait;

const BGM_ATTENUATION_DB: f32 = -12.0;
const PEAK_TARGET_DBFS: f32 = -1.0;
const TAIL_MS: u64 = 500;

pub struct AlignStep;

#[async_trait]
impl StepExecutor for AlignStep {
	async fn execute(&self, ctx: &StepContext<'_>) -> Result<serde_json::Value, StepError> {
		let sequence_raw = tokio::fs::read(ctx.sequence_path())
			.await
			.map_err(|e| StepError::new(format!("failed to read sequence json: {e}")))?;
		let entries: Vec<SequenceEntry> = serde_json::from_slice(&sequence_raw).map_err(|e| StepError::new(format!("invalid sequence json: {e}")))?;

		if entries.is_empty() {
			return Err(StepError::new("no_entries"));
		}

		let bgm = audio_io::read_wav(&ctx.inputs.bgm_path).map_err(|e| StepError::new(format!("failed to read bgm: {e}")))?;
		let sample_rate = bgm.sample_rate;
		let channels = usize::from(bgm.channels.max(1));

		let canvas_ms = entries.iter().map(|e| e.end_ms).max().unwrap_or(0) + TAIL_MS;
		let canvas_frames = (canvas_ms * u64::from(sample_rate) / 1000) as usize;
		let mut canvas = vec![0.0f32; canvas_frames * channels];

		let mut mixed_entries = 0u32;
		for entry in &entries {
			match mix_entry(&mut canvas, entry, sample_rate, channels) {
				Ok(()) => mixed_entries += 1,
				Err(e) => tracing::warn!(path = %entry.source_path.display(), error = %e, "skipping entry during alignment"),
			}
		}

		if mixed_entries == 0 {
			return Err(StepError::new("no_entries"));
		}

		mix_bgm(&mut canvas, &bgm, sample_rate, channels);

		let peak = audio_io::peak_dbfs(&canvas);
		if peak > PEAK_TARGET_DBFS && peak.is_finite() {
			let gain = PEAK_TARGET_DBFS - peak;
			audio_io::apply_gain_db(&mut canvas, gain);
		}

		let output = WavBuffer {
			samples: canvas,
			sample_rate,
			channels: bgm.channels,
		};
		let out_path = ctx.final_output_path();
		audio_io::write_wav(&out_path, &output).map_err(|e| StepError::new(format!("failed to write final mix: {e}")))?;

		Ok(serde_json::json!({
			"mixed_entries": mixed_entries,
			"peak_dbfs": audio_io::peak_dbfs(&output.samples),
		}))
	}
}

fn mix_entry(canvas: &mut [f32], entry: &SequenceEntry, canvas_rate: u32, channels: usize) -> Result<(), audio_io::AudioIoError> {
	let mut buf = audio_io::read_wav(&entry.source_path)?;
	if buf.sample_rate != canvas_rate {
		buf.samples = audio_io::resample_nearest(&buf.samples, buf.sample_rate, canvas_rate);
	}

	audio_io::apply_gain_db(&mut buf.samples, entry.gain_db);

	let fade_in_samples = (canvas_rate as u64 * u64::from(entry.fade_in_ms) / 1000) as usize * channels;
	let fade_out_samples = (canvas_rate as u64 * u64::from(entry.fade_out_ms) / 1000) as usize * channels;
	audio_io::apply_fades(&mut buf.samples, fade_in_samples, fade_out_samples);

	let start_sample = (entry.start_ms * u64::from(canvas_rate) / 1000) as usize * channels;
	mix_into(canvas, &buf.samples, start_sample);
	Ok(())
}

fn mix_bgm(canvas: &mut [f32], bgm: &WavBuffer, canvas_rate: u32, channels: usize) {
	let mut samples = bgm.samples.clone();
	if bgm.sample_rate != canvas_rate {
		samples = audio_io::resample_nearest(&samples, bgm.sample_rate, canvas_rate);
	}
	audio_io::apply_gain_db(&mut samples, BGM_ATTENUATION_DB);

	if samples.is_empty() {
		return;
	}

	// Loop or trim the BGM to the canvas length.
	let frame_stride = channels.max(1);
	let mut looped = Vec::with_capacity(canvas.len());
	while looped.len() < canvas.len() {
		let remaining = canvas.len() - looped.len();
		let take = remaining.min(samples.len());
		looped.extend_from_slice(&samples[..take]);
		if take < frame_stride {
			break;
		}
	}

	mix_into(canvas, &looped, 0);
}

fn mix_into(canvas: &mut [f32], source: &[f32], start_sample: usize) {
	for (i, sample) in source.iter().enumerate() {
		let idx = start_sample + i;
		if idx >= canvas.len() {
			break;
		}
		canvas[idx] += sample;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{SequenceEntryKind, TaskInputs};

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

	fn write_tone(path: &std::path::Path, duration_ms: u64, sample_rate: u32, amplitude: f32) {
		let samples = (0..(sample_rate as u64 * duration_ms / 1000) as usize)
			.map(|i| (i as f32 / sample_rate as f32 * 440.0 * std::f32::consts::TAU).sin() * amplitude)
			.collect();
		audio_io::write_wav(
			path,
			&audio_io::WavBuffer {
				samples,
				sample_rate,
				channels: 1,
			},
		)
		.unwrap();
	}

	#[tokio::test]
	async fn mixes_one_entry_and_normalizes_peak() {
		let dir = tempfile::tempdir().unwrap();
		let task_dir = dir.path().join("task");
		std::fs::create_dir_all(&task_dir).unwrap();

		let line_path = task_dir.join("line.wav");
		write_tone(&line_path, 500, 16_000, 0.9);

		let inputs = sample_inputs(dir.path());
		write_tone(&inputs.bgm_path, 500, 16_000, 0.05);

		let entries = vec![SequenceEntry {
			start_ms: 0,
			end_ms: 500,
			kind: SequenceEntryKind::Cloned,
			source_path: line_path,
			gain_db: 0.0,
			fade_in_ms: 10,
			fade_out_ms: 10,
			mode: None,
		}];
		std::fs::write(task_dir.join("3_sequence.json"), serde_json::to_vec(&entries).unwrap()).unwrap();

		let ctx = StepContext::new(task_dir.clone(), &inputs, None);
		let step = AlignStep;
		let result = step.execute(&ctx).await.unwrap();
		assert_eq!(result["mixed_entries"], 1);

		let out = audio_io::read_wav(&task_dir.join("4_final_output.wav")).unwrap();
		assert!(!out.samples.is_empty());
		assert!(audio_io::peak_dbfs(&out.samples) <= PEAK_TARGET_DBFS + 0.1);
	}

	#[tokio::test]
	async fn empty_sequence_fails_with_no_entries() {
		let dir = tempfile::tempdir().unwrap();
		let task_dir = dir.path().join("task");
		std::fs::create_dir_all(&task_dir).unwrap();
		std::fs::write(task_dir.join("3_sequence.json"), serde_json::to_vec::<Vec<SequenceEntry>>(&vec![]).unwrap()).unwrap();

		let inputs = sample_inputs(dir.path());
		write_tone(&inputs.bgm_path, 100, 16_000, 0.05);

		let ctx = StepContext::new(task_dir, &inputs, None);
		let err = AlignStep.execute(&ctx).await.unwrap_err();
		assert_eq!(err.reason, "no_entries");
	}

	#[tokio::test]
	async fn missing_source_is_skipped_not_fatal() {
		let dir = tempfile::tempdir().unwrap();
		let task_dir = dir.path().join("task");
		std::fs::create_dir_all(&task_dir).unwrap();

		let line_path = task_dir.join("line.wav");
		write_tone(&line_path, 300, 16_000, 0.5);

		let inputs = sample_inputs(dir.path());
		write_tone(&inputs.bgm_path, 300, 16_000, 0.05);

		let entries = vec![
			SequenceEntry {
				start_ms: 0,
				end_ms: 300,
				kind: SequenceEntryKind::Cloned,
				source_path: task_dir.join("missing.wav"),
				gain_db: 0.0,
				fade_in_ms: 10,
				fade_out_ms: 10,
				mode: None,
			},
			SequenceEntry {
				start_ms: 300,
				end_ms: 600,
				kind: SequenceEntryKind::Cloned,
				source_path: line_path,
				gain_db: 0.0,
				fade_in_ms: 10,
				fade_out_ms: 10,
				mode: None,
			},
		];
		std::fs::write(task_dir.join("3_sequence.json"), serde_json::to_vec(&entries).unwrap()).unwrap();

		let ctx = StepContext::new(task_dir, &inputs, None);
		let result = AlignStep.execute(&ctx).await.unwrap();
		assert_eq!(result["mixed_entries"], 1);
	}
}
