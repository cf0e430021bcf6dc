//! `TaskStore`: atomic JSON persistence for the registry.
//!
//! The whole registry is a single JSON document. Every mutation flushes it:
//! serialize, write to a temp file in the same directory, `fsync`, then
//! rename over the canonical path. A corrupt document on load is backed up
//! rather than discarded outright, and the registry starts empty.

use crate::error::{OrchestratorError, Result};
use crate::model::Task;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const JOURNAL_FILE: &str = "tasks.json";

pub struct TaskStore {
	path: PathBuf,
}

impl TaskStore {
	#[must_use]
	pub fn new(data_root: &Path) -> Self {
		Self { path: data_root.join(JOURNAL_FILE) }
	}

	/// Load the journal, or start empty if it is missing. A document that
	/// fails to parse is moved aside as `tasks.json.bad-<unix_secs>` and the
	/// incident is logged.
	pub fn load(&self) -> Result<HashMap<Uuid, Task>> {
		let raw = match std::fs::read_to_string(&self.path) {
			Ok(raw) => raw,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
			Err(e) => return Err(e.into()),
		};

		match serde_json::from_str::<HashMap<Uuid, Task>>(&raw) {
			Ok(tasks) => Ok(tasks),
			Err(parse_err) => {
				let secs = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
				let backup = self.path.with_file_name(format!("{JOURNAL_FILE}.bad-{secs}"));
				tracing::error!(error = %parse_err, backup = %backup.display(), "registry journal failed to parse, backing up and starting empty");
				let _ = std::fs::rename(&self.path, &backup);
				Ok(HashMap::new())
			}
		}
	}

	/// Atomically persist the full registry: write-temp, fsync, rename.
	pub fn flush(&self, tasks: &HashMap<Uuid, Task>) -> Result<()> {
		let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
		std::fs::create_dir_all(dir)?;

		let serialized = serde_json::to_vec_pretty(tasks)?;

		let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(OrchestratorError::Io)?;
		tmp.write_all(&serialized).map_err(OrchestratorError::Io)?;
		tmp.as_file().sync_all().map_err(OrchestratorError::Io)?;
		tmp.persist(&self.path).map_err(|e| OrchestratorError::Io(e.error))?;

		Ok(())
	}
}
