//! Append-only row log
//!
//! On-disk layout of one durable channel directory:
//!
//! ```text
//! <dir>/queue.jsonl   {"seq":N,"event":{...}}  one row per line, seq ascending
//! <dir>/ack.json      {"acked":M}              every row with seq <= M is gone
//! ```
//!
//! Acknowledging rows only moves the `acked` mark; the rows are removed
//! physically when the log is compacted (rewritten without them through a
//! temp file and an atomic rename). An in-memory index maps each live row
//! to its byte range so reads never rescan the file.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelError, ChannelResult};
use crate::types::Event;
use crate::utils::{atomic_write, atomic_write_with, cleanup_temp_files};

/// Acknowledged rows tolerated on disk before the log is rewritten
pub const DEFAULT_COMPACT_THRESHOLD: usize = 1000;

/// Location and maintenance options of a durable channel
#[derive(Debug, Clone)]
pub struct DurableConfig {
    /// Directory holding the log and the acknowledgment mark
    pub dir: PathBuf,
    /// Compact once this many acknowledged rows have accumulated
    pub compact_threshold: usize,
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/queue"),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }
}

impl DurableConfig {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_compact_threshold(mut self, threshold: usize) -> Self {
        self.compact_threshold = threshold.max(1);
        self
    }

    /// Path to queue.jsonl
    pub fn log_path(&self) -> PathBuf {
        self.dir.join("queue.jsonl")
    }

    /// Path to ack.json
    pub fn ack_path(&self) -> PathBuf {
        self.dir.join("ack.json")
    }
}

#[derive(Serialize)]
struct RowRef<'a> {
    seq: u64,
    event: &'a Event,
}

#[derive(Deserialize)]
struct Row {
    seq: u64,
    event: Event,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AckMark {
    acked: u64,
}

/// Byte range of one live row; `len` includes the newline
#[derive(Debug, Clone, Copy)]
struct RowPos {
    seq: u64,
    offset: u64,
    len: u64,
}

struct Replay {
    index: VecDeque<RowPos>,
    end: u64,
    max_seq: u64,
    stale: usize,
}

pub(super) struct QueueLog {
    config: DurableConfig,
    /// Append handle; `None` after a compaction failed to reopen it
    file: Option<File>,
    index: VecDeque<RowPos>,
    /// Offset just past the last complete row
    end: u64,
    next_seq: u64,
    acked: u64,
    /// Acknowledged rows still physically present in the log
    acked_on_disk: usize,
}

impl QueueLog {
    /// Open (or create) the log and rebuild the index from disk
    pub fn open(config: DurableConfig) -> ChannelResult<Self> {
        fs::create_dir_all(&config.dir)?;

        let cleaned = cleanup_temp_files(&config.dir)?;
        if cleaned > 0 {
            tracing::warn!(dir = %config.dir.display(), cleaned, "removed leftover temp files");
        }

        let acked = read_ack_mark(&config.ack_path())?;
        let log_path = config.log_path();
        let file = open_append(&log_path)?;

        let replay = replay(&log_path, acked)?;
        if replay.end < file.metadata()?.len() {
            tracing::warn!(
                path = %log_path.display(),
                offset = replay.end,
                "truncating incomplete trailing row"
            );
            file.set_len(replay.end)?;
            file.sync_all()?;
        }

        Ok(Self {
            next_seq: replay.max_seq.max(acked) + 1,
            config,
            file: Some(file),
            index: replay.index,
            end: replay.end,
            acked,
            acked_on_disk: replay.stale,
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn needs_compaction(&self) -> bool {
        self.acked_on_disk >= self.config.compact_threshold
    }

    /// Append rows for `events` and sync once at the end
    ///
    /// A failed write is rolled back by truncating to the previous end, so
    /// nothing of a failed batch becomes visible.
    pub fn append(&mut self, events: &[Event]) -> ChannelResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        let mut positions = Vec::with_capacity(events.len());
        let mut seq = self.next_seq;
        let mut offset = self.end;
        for event in events {
            let start = buf.len();
            serde_json::to_writer(&mut buf, &RowRef { seq, event })?;
            buf.push(b'\n');
            let len = (buf.len() - start) as u64;
            positions.push(RowPos { seq, offset, len });
            offset += len;
            seq += 1;
        }

        let end = self.end;
        let file = self.writer()?;
        if let Err(e) = file.write_all(&buf).and_then(|()| file.sync_all()) {
            if let Err(truncate) = file.set_len(end) {
                tracing::error!(error = %truncate, "failed to roll back partial append");
            }
            return Err(e.into());
        }

        self.end = offset;
        self.next_seq = seq;
        self.index.extend(positions);
        Ok(())
    }

    /// Read up to `limit` oldest live rows as `(seq, event)`
    pub fn read(&self, limit: Option<usize>) -> ChannelResult<Vec<(u64, Event)>> {
        let take = limit.map_or(self.index.len(), |n| n.min(self.index.len()));
        if take == 0 {
            return Ok(Vec::new());
        }

        let first = self.index[0];
        let last = self.index[take - 1];
        let span = usize::try_from(last.offset + last.len - first.offset)
            .map_err(|_| ChannelError::Corrupted("row range exceeds address space".to_string()))?;

        let mut file = File::open(self.config.log_path())?;
        file.seek(SeekFrom::Start(first.offset))?;
        let mut buf = vec![0u8; span];
        file.read_exact(&mut buf)?;

        let mut rows = Vec::with_capacity(take);
        for pos in self.index.iter().take(take) {
            let start = (pos.offset - first.offset) as usize;
            let line = &buf[start..start + pos.len as usize];
            let row: Row = serde_json::from_slice(line)
                .map_err(|e| ChannelError::Corrupted(format!("seq {}: {}", pos.seq, e)))?;
            rows.push((row.seq, row.event));
        }
        Ok(rows)
    }

    /// Acknowledge every row with `seq <= mark`; returns how many left
    ///
    /// The mark is persisted before the index changes, so a failure leaves
    /// the rows in place for redelivery.
    pub fn ack_through(&mut self, mark: u64) -> ChannelResult<usize> {
        if mark <= self.acked {
            return Ok(0);
        }

        let body = serde_json::to_vec(&AckMark { acked: mark })?;
        atomic_write(self.config.ack_path(), &body)?;
        self.acked = mark;

        let mut removed = 0;
        while self.index.front().is_some_and(|pos| pos.seq <= mark) {
            self.index.pop_front();
            removed += 1;
        }
        self.acked_on_disk += removed;
        Ok(removed)
    }

    /// Rewrite the log without acknowledged rows
    pub fn compact(&mut self) -> ChannelResult<()> {
        self.compact_with(|path, rows| atomic_write_with(path, rows))
    }

    /// Compaction with the file replacement step supplied by the caller
    ///
    /// If `replace` fails the rename may or may not have happened, so the
    /// append handle and the index are rebuilt from whatever file is now
    /// at the log path.
    fn compact_with<R>(&mut self, replace: R) -> ChannelResult<()>
    where
        R: FnOnce(&Path, &mut dyn FnMut(&mut BufWriter<File>) -> io::Result<()>) -> io::Result<()>,
    {
        if self.acked_on_disk == 0 {
            return Ok(());
        }

        let log_path = self.config.log_path();
        let mut source = File::open(&log_path)?;
        let mut new_index = VecDeque::with_capacity(self.index.len());
        let mut offset = 0u64;
        let mut row = Vec::new();

        let live = &self.index;
        let mut write_rows = |w: &mut BufWriter<File>| -> io::Result<()> {
            new_index.clear();
            offset = 0;
            for pos in live {
                row.resize(pos.len as usize, 0);
                source.seek(SeekFrom::Start(pos.offset))?;
                source.read_exact(&mut row)?;
                w.write_all(&row)?;
                new_index.push_back(RowPos { offset, ..*pos });
                offset += pos.len;
            }
            Ok(())
        };

        if let Err(e) = replace(&log_path, &mut write_rows) {
            if let Err(resync) = self.resync_from_disk() {
                tracing::error!(
                    path = %log_path.display(),
                    error = %resync,
                    "failed to rebuild index after compaction error"
                );
            }
            return Err(e.into());
        }

        // The old handle points at the replaced file.
        self.file = None;
        let dropped = self.acked_on_disk;
        self.index = new_index;
        self.end = offset;
        self.acked_on_disk = 0;
        self.writer()?;

        tracing::debug!(
            path = %log_path.display(),
            dropped,
            live = self.index.len(),
            "compacted queue log"
        );
        Ok(())
    }

    /// Reopen the log by path and rebuild the index from its contents
    fn resync_from_disk(&mut self) -> ChannelResult<()> {
        self.file = None;
        let log_path = self.config.log_path();
        let replay = replay(&log_path, self.acked)?;

        self.next_seq = self.next_seq.max(replay.max_seq + 1);
        self.index = replay.index;
        self.end = replay.end;
        self.acked_on_disk = replay.stale;

        let end = self.end;
        let file = self.writer()?;
        if end < file.metadata()?.len() {
            file.set_len(end)?;
        }
        Ok(())
    }

    fn writer(&mut self) -> io::Result<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => open_append(&self.config.log_path())?,
        };
        Ok(self.file.insert(file))
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn read_ack_mark(path: &Path) -> ChannelResult<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let content = fs::read(path)?;
    let mark: AckMark = serde_json::from_slice(&content)
        .map_err(|e| ChannelError::Corrupted(format!("{}: {}", path.display(), e)))?;
    Ok(mark.acked)
}

/// Scan the log, skipping acknowledged and unreadable rows
fn replay(path: &Path, acked: u64) -> ChannelResult<Replay> {
    let mut replay = Replay {
        index: VecDeque::new(),
        end: 0,
        max_seq: 0,
        stale: 0,
    };

    let mut reader = BufReader::new(File::open(path)?);
    let mut line = Vec::new();
    let mut line_num = 0usize;

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        line_num += 1;
        let offset = replay.end;

        if line.last() != Some(&b'\n') {
            // Crash mid-append: leave `end` before the fragment.
            tracing::warn!(line = line_num, "ignoring incomplete trailing row");
            break;
        }
        replay.end += n as u64;

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let row: Row = match serde_json::from_slice(&line) {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(line = line_num, error = %e, "skipping unreadable row");
                continue;
            }
        };

        replay.max_seq = replay.max_seq.max(row.seq);
        if row.seq <= acked {
            replay.stale += 1;
            continue;
        }
        if replay.index.back().is_some_and(|last| row.seq <= last.seq) {
            tracing::warn!(line = line_num, seq = row.seq, "skipping out-of-order row");
            continue;
        }
        replay.index.push_back(RowPos {
            seq: row.seq,
            offset,
            len: n as u64,
        });
    }

    Ok(replay)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn events(bodies: &[&str]) -> Vec<Event> {
        bodies.iter().map(|b| Event::new(*b)).collect()
    }

    fn bodies(log: &QueueLog) -> Vec<String> {
        log.read(None)
            .unwrap()
            .into_iter()
            .map(|(_, e)| e.body_lossy().into_owned())
            .collect()
    }

    fn log_with_acked_prefix(dir: &TempDir) -> QueueLog {
        let mut log = QueueLog::open(DurableConfig::new(dir.path())).unwrap();
        log.append(&events(&["a", "b", "c", "d"])).unwrap();
        assert_eq!(log.ack_through(2).unwrap(), 2);
        log
    }

    #[test]
    fn test_error_after_rename_resyncs_with_new_file() {
        let dir = TempDir::new().unwrap();
        let mut log = log_with_acked_prefix(&dir);

        // The rewritten log lands on disk, then the directory sync fails.
        let result = log.compact_with(|path, rows| {
            atomic_write_with(path, rows)?;
            Err(io::Error::new(io::ErrorKind::Other, "directory sync failed"))
        });
        assert!(result.is_err());
        assert_eq!(bodies(&log), vec!["c", "d"]);
        assert!(!log.needs_compaction());

        log.append(&events(&["e"])).unwrap();
        assert_eq!(bodies(&log), vec!["c", "d", "e"]);

        drop(log);
        let reopened = QueueLog::open(DurableConfig::new(dir.path())).unwrap();
        assert_eq!(bodies(&reopened), vec!["c", "d", "e"]);
    }

    #[test]
    fn test_error_before_rename_keeps_old_file() {
        let dir = TempDir::new().unwrap();
        let mut log = log_with_acked_prefix(&dir);

        let result = log.compact_with(|_, _| {
            Err(io::Error::new(io::ErrorKind::Other, "no space left"))
        });
        assert!(result.is_err());
        assert_eq!(bodies(&log), vec!["c", "d"]);

        log.append(&events(&["e"])).unwrap();
        log.compact().unwrap();
        assert_eq!(bodies(&log), vec!["c", "d", "e"]);

        drop(log);
        let reopened = QueueLog::open(DurableConfig::new(dir.path())).unwrap();
        assert_eq!(bodies(&reopened), vec!["c", "d", "e"]);
    }
}
