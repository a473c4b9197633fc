use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// One audit record: what happened, when, and the payload involved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
	#[serde(rename = "type")]
	pub kind: String,
	pub timestamp: i64,
	pub data: Value,
}

impl JournalEntry {
	pub fn now(kind: &str, data: Value) -> Self {
		Self {
			kind: kind.to_owned(),
			timestamp: chrono::Utc::now().timestamp(),
			data,
		}
	}
}

/// Append-only sink for audit records.
pub trait AuditSink: Send + Sync {
	fn record(&self, entry: JournalEntry) -> Result<()>;
}

/// Discards every record. Used when journaling is switched off.
pub struct NoopJournal;

impl AuditSink for NoopJournal {
	fn record(&self, _entry: JournalEntry) -> Result<()> {
		Ok(())
	}
}

/// Writes records as JSON Lines, one entry per line.
pub struct FileJournal {
	path: PathBuf,
	lock: Mutex<()>,
}

impl FileJournal {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			lock: Mutex::new(()),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Read back every entry in the journal, oldest first.
	pub fn entries(&self) -> Result<Vec<JournalEntry>> {
		if !self.path.exists() {
			return Ok(Vec::new());
		}
		let content = std::fs::read_to_string(&self.path)
			.map_err(|e| Error::Configuration(format!("journal read failed: {e}")))?;
		content
			.lines()
			.filter(|l| !l.trim().is_empty())
			.map(|l| serde_json::from_str(l).map_err(|e| Error::Codec(e.to_string())))
			.collect()
	}
}

impl AuditSink for FileJournal {
	fn record(&self, entry: JournalEntry) -> Result<()> {
		let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
		let mut line =
			serde_json::to_string(&entry).map_err(|e| Error::Codec(e.to_string()))?;
		line.push('\n');

		let mut file = std::fs::OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.path)
			.map_err(|e| Error::Configuration(format!("journal open failed: {e}")))?;
		file.write_all(line.as_bytes())
			.map_err(|e| Error::Configuration(format!("journal write failed: {e}")))?;

		tracing::debug!(target: "journal", kind = %entry.kind, path = %self.path.display(), "entry appended");
		Ok(())
	}
}

/// Build the sink for a run: a file journal when enabled, otherwise a no-op.
pub fn open(enabled: bool, path: &Path) -> Box<dyn AuditSink> {
	if enabled {
		Box::new(FileJournal::new(path))
	} else {
		Box::new(NoopJournal)
	}
}

/// Run `op` and, once it succeeds, record `view(&result)` under `kind`.
/// Failed operations are not journaled.
pub async fn journaled<T, F, V>(sink: &dyn AuditSink, kind: &str, op: F, view: V) -> Result<T>
where
	F: Future<Output = Result<T>>,
	V: FnOnce(&T) -> Value,
{
	let result = op.await?;
	sink.record(JournalEntry::now(kind, view(&result)))?;
	Ok(result)
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use serde_json::json;

	/// In-memory sink for assertions.
	#[derive(Default)]
	pub struct MemoryJournal {
		pub entries: Mutex<Vec<JournalEntry>>,
	}

	impl MemoryJournal {
		pub fn kinds(&self) -> Vec<String> {
			self.entries
				.lock()
				.unwrap()
				.iter()
				.map(|e| e.kind.clone())
				.collect()
		}
	}

	impl AuditSink for MemoryJournal {
		fn record(&self, entry: JournalEntry) -> Result<()> {
			self.entries.lock().unwrap().push(entry);
			Ok(())
		}
	}

	#[test]
	fn file_journal_appends_lines() {
		let dir = tempfile::tempdir().unwrap();
		let journal = FileJournal::new(dir.path().join("journal.log"));

		journal
			.record(JournalEntry::now("unsignedTx", json!({"memo": "a"})))
			.unwrap();
		journal
			.record(JournalEntry::now("signedTx", json!("0xdead")))
			.unwrap();

		let entries = journal.entries().unwrap();
		assert_eq!(entries.len(), 2);
		assert_eq!(entries[0].kind, "unsignedTx");
		assert_eq!(entries[1].data, json!("0xdead"));
		assert!(entries[0].timestamp > 0);

		let raw = std::fs::read_to_string(journal.path()).unwrap();
		assert_eq!(raw.lines().count(), 2);
		assert!(raw.lines().next().unwrap().contains("\"type\":\"unsignedTx\""));
	}

	#[test]
	fn empty_journal_has_no_entries() {
		let dir = tempfile::tempdir().unwrap();
		let journal = FileJournal::new(dir.path().join("missing.log"));
		assert!(journal.entries().unwrap().is_empty());
	}

	#[tokio::test]
	async fn journaled_records_only_success() {
		let sink = MemoryJournal::default();

		let ok = journaled(&sink, "txBroadcast", async { Ok(7u32) }, |v| json!(v)).await;
		assert_eq!(ok.unwrap(), 7);

		let failed: Result<u32> = journaled(
			&sink,
			"txBroadcast",
			async { Err(Error::ChainRpc("down".into())) },
			|v| json!(v),
		)
		.await;
		assert!(failed.is_err());

		assert_eq!(sink.kinds(), vec!["txBroadcast"]);
	}

	#[test]
	fn disabled_journal_writes_nothing() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("journal.log");
		let sink = open(false, &path);
		sink.record(JournalEntry::now("signedTx", json!({}))).unwrap();
		assert!(!path.exists());
	}
}
