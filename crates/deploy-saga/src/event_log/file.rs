//! Event log stored as a JSON Lines file, one event per line.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs_err::tokio as fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{AppendError, Event, EventLog, ReadError};
use crate::saga::SagaId;

/// File-backed event log shared by all sagas of a process.
///
/// Every append is flushed with `sync_data` before it returns. A crash in the
/// middle of a write can leave a torn last line; it is cut off when the log
/// is reopened and skipped by [`read_all`](EventLog::read_all). A write or
/// sync that fails while the process keeps running is rolled back before the
/// next append, so later events never land on a partial line.
pub struct FileEventLog {
	path: PathBuf,
	writer: Mutex<Writer>,
}

struct Writer {
	file: fs::File,
	/// Length of the file up to the last fully appended event.
	committed: u64,
}

impl Writer {
	async fn append_line(&mut self, line: &[u8]) -> io::Result<()> {
		let len = self.file.metadata().await?.len();
		if len != self.committed {
			warn!(
				dropped_bytes = len.saturating_sub(self.committed),
				"discarding bytes of a failed append"
			);
			self.file.set_len(self.committed).await?;
		}
		let written = match self.file.write_all(line).await {
			Ok(()) => self.file.sync_data().await,
			Err(e) => Err(e),
		};
		match written {
			Ok(()) => {
				self.committed += line.len() as u64;
				Ok(())
			},
			Err(e) => {
				// Best effort; the next append retries the truncation.
				if let Err(rollback) = self.file.set_len(self.committed).await {
					warn!(error = %rollback, "failed to roll back partial append");
				}
				Err(e)
			},
		}
	}
}

impl FileEventLog {
	/// Open (or create) the log at `path`.
	pub async fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
		let path = path.into();
		truncate_torn_tail(&path).await?;
		let file = fs::OpenOptions::new()
			.create(true)
			.append(true)
			.open(&path)
			.await?;
		let committed = file.metadata().await?.len();
		debug!(path = %path.display(), bytes = committed, "opened event log");
		Ok(Self {
			path,
			writer: Mutex::new(Writer { file, committed }),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

/// Drop a partially written final line so new appends start on a fresh line.
async fn truncate_torn_tail(path: &Path) -> io::Result<()> {
	let contents = match fs::read(path).await {
		Ok(contents) => contents,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
		Err(e) => return Err(e),
	};
	if contents.is_empty() || contents.ends_with(b"\n") {
		return Ok(());
	}
	let keep = contents
		.iter()
		.rposition(|b| *b == b'\n')
		.map_or(0, |pos| pos + 1);
	warn!(
		path = %path.display(),
		dropped_bytes = contents.len() - keep,
		"truncating torn event log tail"
	);
	let file = fs::OpenOptions::new().write(true).open(path).await?;
	file.set_len(keep as u64).await?;
	file.sync_data().await
}

#[async_trait]
impl EventLog for FileEventLog {
	async fn append(&self, event: Event) -> Result<(), AppendError> {
		let mut line = serde_json::to_vec(&event)?;
		line.push(b'\n');
		self.writer.lock().await.append_line(&line).await?;
		Ok(())
	}

	async fn read_all(&self, saga_id: &SagaId) -> Result<Vec<Event>, ReadError> {
		// Hold the writer lock so a concurrent append is never seen half written.
		let _guard = self.writer.lock().await;
		let contents = match fs::read_to_string(&self.path).await {
			Ok(contents) => contents,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		};

		let lines: Vec<&str> = contents.lines().collect();
		let mut events = Vec::new();
		for (i, line) in lines.iter().enumerate() {
			if line.trim().is_empty() {
				continue;
			}
			match serde_json::from_str::<Event>(line) {
				Ok(event) if &event.saga_id == saga_id => events.push(event),
				Ok(_) => {},
				Err(e) if i + 1 == lines.len() && !contents.ends_with('\n') => {
					warn!(path = %self.path.display(), error = %e, "ignoring torn last event");
				},
				Err(source) => return Err(ReadError::Serialization { line: i + 1, source }),
			}
		}
		Ok(events)
	}
}
