//! Redo-log journal (`spec.md` §4.E): every mutation is appended here
//! before it is allowed to change the in-memory state.
//!
//! `spec.md` leaves block-ring management to "the journal layer
//! (outside this spec)"; what the core cares about is the contract —
//! total append ordering, durable-before-return, and a replay that
//! hands ops to the reducer in order. `FileJournal` realizes that
//! contract as a single append-only, length-prefixed file; `MemoryJournal`
//! realizes it in-process for tests and for callers who have accepted
//! losing the log across a crash.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::config::SwitchConfig;
use crate::entry::{decode, encode, Op};
use crate::error::SwitchError;

/// A durable, totally-ordered append log of `Op` records.
#[async_trait]
pub trait Journal: Send + Sync {
    /// Appends `op`, returning only once it is durable. Failure leaves
    /// the journal (and therefore the in-memory state, which is only
    /// ever mutated from the apply path) unchanged.
    async fn append(&self, op: &Op) -> Result<(), SwitchError>;

    /// Replays every record written so far, in append order. Malformed
    /// records are dropped (and logged by the caller); this never
    /// fails on corruption, only on I/O.
    async fn replay(&self) -> Result<Vec<Op>, SwitchError>;
}

/// In-process, non-durable journal. Used by tests and by embedders that
/// have explicitly decided they do not need crash recovery.
pub struct MemoryJournal {
    records: Mutex<Vec<String>>,
    max_record_bytes: usize,
}

impl Default for MemoryJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::with_config(&SwitchConfig::default())
    }

    /// Caps appended records at `config.max_record_bytes`, per
    /// `spec.md` §4.A's size-limiting being "the journal caller"'s job.
    pub fn with_config(config: &SwitchConfig) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            max_record_bytes: config.max_record_bytes,
        }
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn append(&self, op: &Op) -> Result<(), SwitchError> {
        let record = encode(op);
        if record.len() > self.max_record_bytes {
            return Err(SwitchError::RecordTooLarge {
                len: record.len(),
                max: self.max_record_bytes,
            });
        }
        self.records.lock().await.push(record);
        Ok(())
    }

    async fn replay(&self) -> Result<Vec<Op>, SwitchError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter_map(|text| match decode(text) {
                Some(op) => Some(op),
                None => {
                    tracing::warn!(record = %text, "dropping undecodable journal record");
                    None
                }
            })
            .collect())
    }
}

/// Append-only file journal. Each record is one encoded `Op` line,
/// length-prefixed with a `u32` so a torn trailing write at crash time
/// is detected and dropped rather than mis-parsed as the next record.
pub struct FileJournal {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
    max_record_bytes: usize,
}

impl FileJournal {
    /// Opens (creating if necessary) the journal file at `path` in
    /// append mode, with the default `SwitchConfig::max_record_bytes` cap.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SwitchError> {
        Self::open_at(path.into(), SwitchConfig::default().max_record_bytes).await
    }

    /// Opens the journal named by `config.journal_path`, capping records
    /// at `config.max_record_bytes`. This is the constructor that wires
    /// `SwitchConfig` into the durable journal path end to end.
    pub async fn open_with_config(config: &SwitchConfig) -> Result<Self, SwitchError> {
        Self::open_at(config.journal_path.clone(), config.max_record_bytes).await
    }

    async fn open_at(path: PathBuf, max_record_bytes: usize) -> Result<Self, SwitchError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            max_record_bytes,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl Journal for FileJournal {
    async fn append(&self, op: &Op) -> Result<(), SwitchError> {
        let record = encode(op);
        if record.len() > self.max_record_bytes {
            return Err(SwitchError::RecordTooLarge {
                len: record.len(),
                max: self.max_record_bytes,
            });
        }
        let len = record.len() as u32;
        let mut file = self.file.lock().await;
        file.write_all(&len.to_le_bytes()).await?;
        file.write_all(record.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn replay(&self) -> Result<Vec<Op>, SwitchError> {
        let mut file = self.file.lock().await;
        file.flush().await?;
        let mut contents = Vec::new();
        let mut reader = tokio::fs::File::open(&self.path).await?;
        reader.read_to_end(&mut contents).await?;
        drop(file);

        let mut ops = Vec::new();
        let mut cursor = 0usize;
        while cursor + 4 <= contents.len() {
            let len = u32::from_le_bytes(contents[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            if cursor + len > contents.len() {
                // Torn trailing write from a crash mid-append; stop here.
                tracing::warn!(
                    path = %self.path.display(),
                    "journal ends with a truncated record, stopping replay"
                );
                break;
            }
            let record = &contents[cursor..cursor + len];
            cursor += len;
            if len > self.max_record_bytes {
                tracing::warn!(
                    path = %self.path.display(),
                    len,
                    max = self.max_record_bytes,
                    "dropping over-cap journal record during replay"
                );
                continue;
            }
            match std::str::from_utf8(record).ok().and_then(decode) {
                Some(op) => ops.push(op),
                None => {
                    tracing::warn!("dropping undecodable journal record during replay");
                }
            }
        }
        Ok(ops)
    }
}

/// Convenience alias used by `Queues` so callers can plug in either
/// journal implementation behind a trait object.
pub type SharedJournal = Arc<dyn Journal>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{ConnectionId, QueueName};

    fn sample_ops() -> Vec<Op> {
        vec![
            Op::Add {
                owner: None,
                name: QueueName::new("q"),
            },
            Op::Add {
                owner: Some(ConnectionId::new("c1")),
                name: QueueName::new("t1"),
            },
            Op::Remove {
                name: QueueName::new("t1"),
            },
        ]
    }

    #[tokio::test]
    async fn memory_journal_replays_in_order() {
        let journal = MemoryJournal::new();
        for op in sample_ops() {
            journal.append(&op).await.unwrap();
        }
        assert_eq!(journal.replay().await.unwrap(), sample_ops());
    }

    #[tokio::test]
    async fn file_journal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.log");

        {
            let journal = FileJournal::open(&path).await.unwrap();
            for op in sample_ops() {
                journal.append(&op).await.unwrap();
            }
        }

        let reopened = FileJournal::open(&path).await.unwrap();
        assert_eq!(reopened.replay().await.unwrap(), sample_ops());
    }

    #[tokio::test]
    async fn memory_journal_rejects_oversized_append() {
        let journal = MemoryJournal::with_config(&SwitchConfig {
            max_record_bytes: 8,
            ..SwitchConfig::default()
        });
        let err = journal.append(&sample_ops()[1]).await.unwrap_err();
        assert!(matches!(err, SwitchError::RecordTooLarge { .. }));
    }

    #[tokio::test]
    async fn file_journal_drops_over_cap_record_during_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.log");

        {
            // Write with a generous cap so both records land on disk...
            let journal = FileJournal::open(&path).await.unwrap();
            journal.append(&sample_ops()[0]).await.unwrap();
            journal.append(&sample_ops()[1]).await.unwrap();
        }

        // ...then reopen with a cap too small for the second record and
        // confirm replay drops it but keeps the first.
        let small_cap = FileJournal::open_with_config(&SwitchConfig {
            journal_path: path,
            max_record_bytes: encode(&sample_ops()[0]).len() + 1,
        })
        .await
        .unwrap();
        assert_eq!(small_cap.replay().await.unwrap(), vec![sample_ops()[0].clone()]);
    }

    #[tokio::test]
    async fn file_journal_drops_truncated_trailing_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.log");

        let journal = FileJournal::open(&path).await.unwrap();
        journal.append(&sample_ops()[0]).await.unwrap();
        drop(journal);

        // Simulate a crash mid-write: a length prefix with no matching body.
        use tokio::io::AsyncWriteExt as _;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        file.write_all(&100u32.to_le_bytes()).await.unwrap();
        file.write_all(b"short").await.unwrap();
        file.flush().await.unwrap();

        let reopened = FileJournal::open(&path).await.unwrap();
        assert_eq!(reopened.replay().await.unwrap(), vec![sample_ops()[0].clone()]);
    }
}
