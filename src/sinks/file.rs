//! Rolling line-oriented file sink
//!
//! Each event becomes one tab-separated line:
//!
//! ```text
//! Timestamp \t RemoteAddr \t body \t UserAgent \t Referrer
//! ```
//!
//! Lines go to `<incomplete>/<millis>-<n>.txt.inc`. A file is rolled into
//! `<complete>/<millis>-<n>.txt` once it holds `lines_per_file` lines and
//! on every `roll_period` tick. Downstream consumers only ever see whole
//! files in the complete directory.
//!
//! Delivery polling and rotation run on separate timers.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{ChannelBinding, Sink, DEFAULT_POLL_INTERVAL};
use crate::channel::{Channel, ChannelError};
use crate::types::{ComponentResult, ComponentSettings, Event};
use crate::utils::atomic::sync_parent_dir;
use crate::utils::unix_millis;

const DEFAULT_LINES_PER_FILE: usize = 100;
const DEFAULT_ROLL_PERIOD: Duration = Duration::from_secs(10);
const INCOMPLETE_SUFFIX: &str = ".inc";

/// Headers written as columns, in order; the body sits between the
/// second and third.
const LEADING_COLUMNS: [&str; 2] = ["Timestamp", "RemoteAddr"];
const TRAILING_COLUMNS: [&str; 2] = ["UserAgent", "Referrer"];

#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Directory for files still being written
    pub incomplete_dir: PathBuf,
    /// Directory receiving finished files
    pub complete_dir: PathBuf,
    pub lines_per_file: usize,
    pub roll_period: Duration,
    pub poll_interval: Duration,
}

impl FileSinkConfig {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(incomplete: P, complete: Q) -> Self {
        Self {
            incomplete_dir: incomplete.as_ref().to_path_buf(),
            complete_dir: complete.as_ref().to_path_buf(),
            lines_per_file: DEFAULT_LINES_PER_FILE,
            roll_period: DEFAULT_ROLL_PERIOD,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Settings: `incomplete`, `complete` required; `lines_per_file`,
    /// `roll_period_secs`, `poll_interval_ms` optional.
    pub fn from_settings(settings: &ComponentSettings) -> ComponentResult<Self> {
        let mut config = Self::new(settings.require("incomplete")?, settings.require("complete")?);
        config.lines_per_file = settings
            .parse_or("lines_per_file", DEFAULT_LINES_PER_FILE)?
            .max(1);
        config.roll_period = settings.secs_or("roll_period_secs", DEFAULT_ROLL_PERIOD)?;
        config.poll_interval = settings.millis_or("poll_interval_ms", DEFAULT_POLL_INTERVAL)?;
        Ok(config)
    }

    #[must_use]
    pub fn with_lines_per_file(mut self, lines: usize) -> Self {
        self.lines_per_file = lines.max(1);
        self
    }

    #[must_use]
    pub fn with_roll_period(mut self, period: Duration) -> Self {
        self.roll_period = period;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[derive(Debug, Error)]
enum FileSinkError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
}

pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    binding: ChannelBinding,
}

impl FileSink {
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> Self {
        Self {
            name: name.into(),
            config,
            binding: ChannelBinding::default(),
        }
    }

    pub fn from_settings(settings: &ComponentSettings) -> ComponentResult<Self> {
        Ok(Self::new(settings.name(), FileSinkConfig::from_settings(settings)?))
    }
}

impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_channel(&mut self, channel: Arc<dyn Channel>) {
        self.binding.bind(channel);
    }

    fn start(&mut self, shutdown: CancellationToken) -> ComponentResult<JoinHandle<()>> {
        fs::create_dir_all(&self.config.incomplete_dir)?;
        fs::create_dir_all(&self.config.complete_dir)?;

        let name = self.name.clone();
        let binding = self.binding.clone();
        let config = self.config.clone();

        tracing::info!(
            sink = %name,
            complete = %config.complete_dir.display(),
            "file sink starting"
        );

        Ok(tokio::spawn(async move {
            let mut poll = tokio::time::interval(config.poll_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut roll =
                tokio::time::interval_at(Instant::now() + config.roll_period, config.roll_period);
            roll.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut files = RollingFile::new(config);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = poll.tick() => {
                        let Some(channel) = binding.get() else { continue };
                        match drain(channel.as_ref(), &mut files) {
                            Ok(0) => {}
                            Ok(written) => tracing::debug!(sink = %name, lines = written, "batch written"),
                            Err(e) => tracing::warn!(sink = %name, error = %e, "batch write failed"),
                        }
                    }
                    _ = roll.tick() => {
                        if let Err(e) = files.roll() {
                            tracing::warn!(sink = %name, error = %e, "timed roll failed");
                        }
                    }
                }
            }

            if let Err(e) = files.roll() {
                tracing::warn!(sink = %name, error = %e, "failed to finish file on shutdown");
            }
            tracing::debug!(sink = %name, "file sink stopped");
        }))
    }
}

/// Peek, write and flush everything buffered; confirm only on success
fn drain(channel: &dyn Channel, files: &mut RollingFile) -> Result<usize, FileSinkError> {
    let batch = channel.get_all()?;
    if batch.is_empty() {
        return Ok(0);
    }

    let written = batch
        .iter()
        .try_for_each(|event| files.write_event(event))
        .and_then(|()| files.flush());

    if let Err(e) = written {
        if let Err(abort) = channel.confirm_get(0) {
            tracing::warn!(channel = %channel.name(), error = %abort, "failed to abort batch");
        }
        if let Some(path) = files.abandon() {
            tracing::warn!(path = %path.display(), "left partial file in incomplete directory");
        }
        return Err(e.into());
    }

    channel.confirm_get(batch.len())?;
    Ok(batch.len())
}

struct OpenFile {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: usize,
}

/// The file currently being written plus the naming counter
struct RollingFile {
    config: FileSinkConfig,
    current: Option<OpenFile>,
    counter: u64,
}

impl RollingFile {
    fn new(config: FileSinkConfig) -> Self {
        Self {
            config,
            current: None,
            counter: 0,
        }
    }

    fn write_event(&mut self, event: &Event) -> io::Result<()> {
        let limit = self.config.lines_per_file;
        let file = self.current_file()?;
        file.writer.write_all(format_line(event).as_bytes())?;
        file.lines += 1;

        if file.lines >= limit {
            self.roll()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.current.as_mut() {
            file.writer.flush()?;
            file.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Move the current file to the complete directory
    ///
    /// An empty file is deleted instead. Returns the finished path.
    fn roll(&mut self) -> io::Result<Option<PathBuf>> {
        let Some(mut file) = self.current.take() else {
            return Ok(None);
        };
        file.writer.flush()?;
        file.writer.get_ref().sync_all()?;
        drop(file.writer);

        if file.lines == 0 {
            fs::remove_file(&file.path)?;
            return Ok(None);
        }

        let name = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let finished = name.strip_suffix(INCOMPLETE_SUFFIX).unwrap_or(&name);
        let dest = self.config.complete_dir.join(finished);

        fs::rename(&file.path, &dest)?;
        sync_parent_dir(&dest)?;
        tracing::debug!(path = %dest.display(), lines = file.lines, "rolled file");
        Ok(Some(dest))
    }

    /// Stop writing to the current file without finishing it
    fn abandon(&mut self) -> Option<PathBuf> {
        self.current.take().map(|file| file.path)
    }

    fn current_file(&mut self) -> io::Result<&mut OpenFile> {
        let file = match self.current.take() {
            Some(file) => file,
            None => self.open_next()?,
        };
        Ok(self.current.insert(file))
    }

    fn open_next(&mut self) -> io::Result<OpenFile> {
        self.counter += 1;
        let path = self.config.incomplete_dir.join(format!(
            "{}-{}.txt{}",
            unix_millis(),
            self.counter,
            INCOMPLETE_SUFFIX
        ));
        let file = File::create(&path)?;
        Ok(OpenFile {
            path,
            writer: BufWriter::new(file),
            lines: 0,
        })
    }
}

/// One output line; tabs and line breaks inside fields are escaped
fn format_line(event: &Event) -> String {
    let body = event.body_lossy();
    let columns: Vec<String> = LEADING_COLUMNS
        .iter()
        .map(|key| event.header(key).unwrap_or(""))
        .chain(std::iter::once(&*body))
        .chain(TRAILING_COLUMNS.iter().map(|key| event.header(key).unwrap_or("")))
        .map(escape_field)
        .collect();

    let mut line = columns.join("\t");
    line.push('\n');
    line
}

fn escape_field(field: &str) -> String {
    field
        .replace('\\', "\\\\")
        .replace('\t', "\\t")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}
