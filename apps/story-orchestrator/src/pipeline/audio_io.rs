//! Shared WAV I/O and small DSP helpers used by the trim, sequence and
//! align steps. Raw `f32` PCM buffers are read via `hound`, the same way
//! `audio-transcriber` works with raw samples internally.

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum AudioIoError {
	#[error("WAV I/O error: {0}")]
	Hound(#[from] hound::Error),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

pub struct WavBuffer {
	pub samples: Vec<f32>,
	pub sample_rate: u32,
	pub channels: u16,
}

impl WavBuffer {
	#[must_use]
	pub fn duration_ms(&self) -> u64 {
		if self.sample_rate == 0 || self.channels == 0 {
			return 0;
		}
		let frames = self.samples.len() as u64 / u64::from(self.channels);
		frames * 1000 / u64::from(self.sample_rate)
	}
}

pub fn read_wav(path: &Path) -> Result<WavBuffer, AudioIoError> {
	let mut reader = hound::WavReader::open(path)?;
	let spec = reader.spec();

	let samples: Vec<f32> = match spec.sample_format {
		hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
		hound::SampleFormat::Int => {
			let max_value = f32::from(i16::MAX).max(1.0).max(2f32.powi(i32::from(spec.bits_per_sample) - 1));
			reader
				.samples::<i32>()
				.map(|s| s.map(|v| v as f32 / max_value))
				.collect::<Result<_, _>>()?
		}
	};

	Ok(WavBuffer {
		samples,
		sample_rate: spec.sample_rate,
		channels: spec.channels,
	})
}

pub fn write_wav(path: &Path, buf: &WavBuffer) -> Result<(), AudioIoError> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}

	let spec = hound::WavSpec {
		channels: buf.channels,
		sample_rate: buf.sample_rate,
		bits_per_sample: 16,
		sample_format: hound::SampleFormat::Int,
	};

	let mut writer = hound::WavWriter::create(path, spec)?;
	for sample in &buf.samples {
		let clamped = sample.clamp(-1.0, 1.0);
		writer.write_sample((clamped * f32::from(i16::MAX)) as i16)?;
	}
	writer.finalize()?;

	Ok(())
}

/// RMS of a frame expressed in dBFS (full scale = 1.0 peak amplitude).
/// Silence (all-zero frames) maps to `f32::NEG_INFINITY`.
#[must_use]
pub fn rms_dbfs(frame: &[f32]) -> f32 {
	if frame.is_empty() {
		return f32::NEG_INFINITY;
	}
	let mean_sq = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;
	if mean_sq <= 0.0 {
		f32::NEG_INFINITY
	} else {
		10.0 * mean_sq.log10()
	}
}

pub fn apply_gain_db(samples: &mut [f32], gain_db: f32) {
	if gain_db == 0.0 {
		return;
	}
	let factor = 10f32.powf(gain_db / 20.0);
	for s in samples {
		*s *= factor;
	}
}

/// Linear in/out fades over the given sample counts (per-channel frame
/// counts are pre-multiplied by the caller where interleaved).
pub fn apply_fades(samples: &mut [f32], fade_in_samples: usize, fade_out_samples: usize) {
	let len = samples.len();
	let fade_in = fade_in_samples.min(len);
	for (i, s) in samples.iter_mut().take(fade_in).enumerate() {
		*s *= i as f32 / fade_in.max(1) as f32;
	}

	let fade_out = fade_out_samples.min(len);
	for (i, s) in samples.iter_mut().rev().take(fade_out).enumerate() {
		*s *= i as f32 / fade_out.max(1) as f32;
	}
}

/// Nearest-neighbor resample, adequate for the short reference clips this
/// pipeline mixes; mirrors the same approach `audio-transcriber::audio`
/// uses for its own live resampling.
#[must_use]
pub fn resample_nearest(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
	if from_rate == to_rate || samples.is_empty() {
		return samples.to_vec();
	}

	let ratio = from_rate as f32 / to_rate as f32;
	let output_len = (samples.len() as f32 / ratio) as usize;

	(0..output_len)
		.map(|i| {
			let src_idx = (i as f32 * ratio) as usize;
			samples.get(src_idx).copied().unwrap_or(0.0)
		})
		.collect()
}

#[must_use]
pub fn peak_dbfs(samples: &[f32]) -> f32 {
	let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
	if peak <= 0.0 {
		f32::NEG_INFINITY
	} else {
		20.0 * peak.log10()
	}
}
