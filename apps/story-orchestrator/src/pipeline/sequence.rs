//! Step 3 — Build Sequence: the timeline assembler. Ranks the
//! trimmed candidate lines against each scripted slot and emits either a
//! cloned match or an anchor fallback.

use super::audio_io;
use super::clone::sanitize_filename;
use super::collaborators::{cosine_similarity, EmbeddingProvider, HashedBagOfWordsEmbedding};
use super::context::StepContext;
use super::scoring::ScoringWeights;
use super::{StepError, StepExecutor};
use crate::model::{DialogueRecord, SequenceEntry, SequenceEntryKind, SlotSpec};
use async_trait::async_trait;
use std::path::PathBuf;

const DEFAULT_FADE_MS: u32 = 10;

pub struct SequenceStep {
	pub weights: ScoringWeights,
	pub embedder: Box<dyn EmbeddingProvider>,
}

impl Default for SequenceStep {
	fn default() -> Self {
		Self {
			weights: ScoringWeights::default(),
			embedder: Box::new(HashedBagOfWordsEmbedding::default()),
		}
	}
}

struct Candidate {
	path: PathBuf,
	role: Option<String>,
	text: String,
	duration_ms: u64,
}

#[async_trait]
impl StepExecutor for SequenceStep {
	async fn execute(&self, ctx: &StepContext<'_>) -> Result<serde_json::Value, StepError> {
		let dialogue_raw = tokio::fs::read(&ctx.inputs.dialogue_json)
			.await
			.map_err(|e| StepError::new(format!("failed to read dialogue json: {e}")))?;
		let dialogue: Vec<DialogueRecord> = serde_json::from_slice(&dialogue_raw).map_err(|e| StepError::new(format!("invalid dialogue json: {e}")))?;

		let script_raw = tokio::fs::read(&ctx.inputs.script_json)
			.await
			.map_err(|e| StepError::new(format!("failed to read script json: {e}")))?;
		let slots: Vec<SlotSpec> = serde_json::from_slice(&script_raw).map_err(|e| StepError::new(format!("invalid script json: {e}")))?;

		let candidates = self.load_candidates(ctx, &dialogue);

		let mut entries = Vec::with_capacity(slots.len());
		for slot in &slots {
			entries.push(self.resolve_slot(slot, &candidates, ctx));
		}

		let out_path = ctx.sequence_path();
		let serialized = serde_json::to_vec_pretty(&entries).map_err(|e| StepError::new(format!("failed to serialize sequence: {e}")))?;
		tokio::fs::write(&out_path, serialized).await.map_err(|e| StepError::new(format!("failed to write sequence json: {e}")))?;

		let cloned_count = entries.iter().filter(|e| e.kind == SequenceEntryKind::Cloned).count();
		let anchor_count = entries.len() - cloned_count;

		Ok(serde_json::json!({
			"slots": slots.len(),
			"cloned": cloned_count,
			"anchor": anchor_count,
		}))
	}
}

impl SequenceStep {
	fn load_candidates(&self, ctx: &StepContext<'_>, dialogue: &[DialogueRecord]) -> Vec<Candidate> {
		let trimmed_dir = ctx.trimmed_dir();
		let sort_counts = {
			let mut counts = std::collections::HashMap::new();
			for rec in dialogue {
				*counts.entry(rec.sort).or_insert(0usize) += 1;
			}
			counts
		};

		let mut candidates = Vec::new();
		for (index, record) in dialogue.iter().enumerate() {
			let ambiguous = sort_counts.get(&record.sort).copied().unwrap_or(0) > 1;
			let sanitized = sanitize_filename(&record.text);
			let filename = if ambiguous {
				format!("{}_{}_{}.wav", record.sort, sanitized, index)
			} else {
				format!("{}_{}.wav", record.sort, sanitized)
			};
			let path = trimmed_dir.join(&filename);
			let Ok(buf) = audio_io::read_wav(&path) else { continue };

			candidates.push(Candidate {
				path,
				role: record.role.clone(),
				text: record.text.clone(),
				duration_ms: buf.duration_ms(),
			});
		}
		candidates
	}

	fn resolve_slot(&self, slot: &SlotSpec, candidates: &[Candidate], ctx: &StepContext<'_>) -> SequenceEntry {
		let expected_embedding = self.embedder.embed(&slot.expected_text);

		let mut best: Option<(f32, &Candidate)> = None;
		for candidate in candidates {
			// L1 identity gate: role must agree (case/whitespace-insensitive).
			let role_agrees = candidate.role.as_deref().map(str::trim).map(str::to_lowercase) == Some(slot.expected_role.trim().to_lowercase());
			if !role_agrees {
				continue;
			}

			if candidate.duration_ms == 0 {
				continue;
			}
			let ratio = slot.expected_duration_ms as f32 / candidate.duration_ms as f32;
			if !(0.2..=4.0).contains(&ratio) {
				continue;
			}
			let ratio_penalty = if (0.4..=2.5).contains(&ratio) { 0.0 } else { self.weights.ratio_penalty };

			let vocal_mode_score = if candidate.role.as_deref() == Some(slot.expected_role.as_str()) {
				self.weights.vocal_mode_exact
			} else {
				self.weights.vocal_mode_degraded
			};

			let duration_agreement = (candidate.duration_ms as f32 - slot.expected_duration_ms as f32).abs() / slot.expected_duration_ms.max(1) as f32;
			let prosody_score = if duration_agreement <= 0.2 { self.weights.prosody_consistent } else { 0.0 };

			let candidate_embedding = self.embedder.embed(&candidate.text);
			let similarity = cosine_similarity(&expected_embedding, &candidate_embedding);
			let semantic_score = similarity.max(0.0) * self.weights.semantic_max;

			// No noise-tag metadata is carried by the dialogue record format
			// so the noise-cleanliness penalty never fires; the
			// weight is still externalized for when that data exists.
			let noise_penalty = 0.0;

			let score = vocal_mode_score + prosody_score + semantic_score + noise_penalty + ratio_penalty;

			// Candidates are visited in ascending `index` order, so a
			// strict `>` here keeps the lower-index candidate on a tied score.
			let replace = best.as_ref().map_or(true, |(best_score, _)| score > *best_score);
			if replace {
				best = Some((score, candidate));
			}
		}

		match best {
			Some((score, candidate)) if score >= self.weights.cloned_threshold => SequenceEntry {
				start_ms: slot.start_ms,
				end_ms: slot.start_ms + candidate.duration_ms,
				kind: SequenceEntryKind::Cloned,
				source_path: candidate.path.clone(),
				gain_db: 0.0,
				fade_in_ms: DEFAULT_FADE_MS,
				fade_out_ms: DEFAULT_FADE_MS,
				mode: None,
			},
			Some((score, candidate)) if score >= self.weights.compensated_threshold => SequenceEntry {
				start_ms: slot.start_ms,
				end_ms: slot.start_ms + candidate.duration_ms,
				kind: SequenceEntryKind::Cloned,
				source_path: candidate.path.clone(),
				gain_db: 0.0,
				fade_in_ms: DEFAULT_FADE_MS,
				fade_out_ms: DEFAULT_FADE_MS,
				mode: Some("compensated".to_string()),
			},
			_ => SequenceEntry {
				start_ms: slot.start_ms,
				end_ms: slot.start_ms + slot.expected_duration_ms,
				kind: SequenceEntryKind::Anchor,
				source_path: ctx.inputs.source_audio.clone(),
				gain_db: 0.0,
				fade_in_ms: DEFAULT_FADE_MS,
				fade_out_ms: DEFAULT_FADE_MS,
				mode: None,
			},
		}
	}
}
