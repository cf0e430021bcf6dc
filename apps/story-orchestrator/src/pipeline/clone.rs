//! Step 1 — Voice Cloning.

use super::collaborators::TtsCloner;
use super::context::StepContext;
use super::{StepError, StepExecutor};
use crate::model::DialogueRecord;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

static LLM_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^llm_\d+_\d+s_").expect("static pattern is valid"));
const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const MAX_SANITIZED_LEN: usize = 50;

pub struct CloneStep {
	pub cloner: Arc<dyn TtsCloner>,
}

#[async_trait]
impl StepExecutor for CloneStep {
	async fn execute(&self, ctx: &StepContext<'_>) -> Result<serde_json::Value, StepError> {
		let raw = tokio::fs::read(&ctx.inputs.dialogue_json)
			.await
			.map_err(|e| StepError::new(format!("failed to read dialogue json: {e}")))?;
		let mut records: Vec<DialogueRecord> = serde_json::from_slice(&raw).map_err(|e| StepError::new(format!("invalid dialogue json: {e}")))?;

		if records.is_empty() {
			return Err(StepError::new("empty_dialogue"));
		}

		// Stable sort by `sort`, preserving original order on ties;
		// on a `sort` collision, records keep their original relative order.
		let original_order: Vec<usize> = (0..records.len()).collect();
		let mut indexed: Vec<(usize, DialogueRecord)> = original_order.into_iter().zip(records.drain(..)).collect();
		indexed.sort_by_key(|(idx, rec)| (rec.sort, *idx));

		let sort_counts = {
			let mut counts = std::collections::HashMap::new();
			for (_, rec) in &indexed {
				*counts.entry(rec.sort).or_insert(0usize) += 1;
			}
			counts
		};

		let out_dir = ctx.cloned_dir();
		tokio::fs::create_dir_all(&out_dir)
			.await
			.map_err(|e| StepError::new(format!("failed to create cloned dir: {e}")))?;

		let mut success = 0u32;
		let mut failed = 0u32;
		let mut failures: Vec<serde_json::Value> = Vec::new();

		for (record_index, record) in &indexed {
			let ambiguous = sort_counts.get(&record.sort).copied().unwrap_or(0) > 1;
			let filename = output_filename(record, *record_index, ambiguous);
			let output_path = out_dir.join(&filename);
			let emotion_path = ctx.emotion_folder().join(&record.emo_audio);

			if record.text.trim().is_empty() {
				failed += 1;
				failures.push(serde_json::json!({"sort": record.sort, "reason": "empty_text"}));
				continue;
			}

			if !emotion_path.exists() {
				failed += 1;
				failures.push(serde_json::json!({"sort": record.sort, "reason": "missing_emotion_file"}));
				continue;
			}

			let outcome = self
				.cloner
				.clone_with_emotion_audio(&record.text, &ctx.inputs.speaker_wav, &emotion_path, &output_path)
				.await;

			match outcome {
				Ok(outcome) if outcome.success => success += 1,
				Ok(outcome) => {
					failed += 1;
					failures.push(serde_json::json!({"sort": record.sort, "reason": outcome.error.unwrap_or_default()}));
				}
				Err(e) => {
					failed += 1;
					failures.push(serde_json::json!({"sort": record.sort, "reason": e.to_string()}));
				}
			}
		}

		if success == 0 {
			return Err(StepError::new("all dialogue lines failed to clone"));
		}

		Ok(serde_json::json!({
			"total": indexed.len(),
			"success": success,
			"failed": failed,
			"failures": failures,
		}))
	}
}

fn output_filename(record: &DialogueRecord, record_index: usize, ambiguous: bool) -> String {
	let sanitized = sanitize_filename(&record.text);
	if ambiguous {
		format!("{}_{}_{}.wav", record.sort, sanitized, record_index)
	} else {
		format!("{}_{}.wav", record.sort, sanitized)
	}
}

/// Strip forbidden characters, strip a leading `llm_<digits>_<n>s_`
/// marker, truncate to 50 code points.
#[must_use]
pub fn sanitize_filename(text: &str) -> String {
	let stripped = LLM_MARKER.replace(text, "");
	let cleaned: String = stripped.chars().map(|c| if FORBIDDEN_CHARS.contains(&c) { '_' } else { c }).collect();
	cleaned.chars().take(MAX_SANITIZED_LEN).collect()
}
