// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Output multiplexer shared by every supervised process.
//!
//! A [`LogSink`] owns one destination behind one mutex. Each process gets
//! [`LogView`]s of the sinks: the same buffer with its own label and
//! separator. Each record is a single formatted write while the lock is held:
//!
//! ```text
//! [<timestamp> ]<label padded to width+1><sep> <message>
//! ```
//!
//! Label widths are tracked by a [`LabelWidth`] shared between sinks, so
//! columns line up across stdout and stderr.

use log::{LevelFilter, Metadata, Record, SetLoggerError};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::OwnedFormatItem;
use tokio_util::sync::CancellationToken;

pub const SEP_STDOUT: char = '›';
pub const SEP_STDERR: char = '»';
pub const SEP_SYS: char = '~';

/// Label used for records about the supervisor itself.
pub const SYSTEM_LABEL: &str = "pmux";

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(250);

/// Anything that accepts complete lines of output.
pub trait LineSink: Send + Sync {
    fn println(&self, line: &str);
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LineSink for NullSink {
    fn println(&self, _line: &str) {}
}

/// Widest label registered so far. Only ever grows.
#[derive(Debug, Default)]
pub struct LabelWidth(AtomicUsize);

impl LabelWidth {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, label: &str) {
        self.0.fetch_max(label.chars().count(), Ordering::AcqRel);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

/// Parsed `timeFormat`; disabled when the configured string is empty.
#[derive(Debug, Clone, Default)]
pub struct TimeFormat(Option<OwnedFormatItem>);

impl TimeFormat {
    /// `format` uses the `time` crate's format description syntax, e.g.
    /// `[hour]:[minute]:[second].[subsecond digits:3]`.
    pub fn parse(format: &str) -> Result<Self, time::error::InvalidFormatDescription> {
        if format.is_empty() {
            return Ok(Self::disabled());
        }
        time::format_description::parse_owned::<2>(format).map(|item| Self(Some(item)))
    }

    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }
}

/// Where a sink's bytes end up.
pub enum Destination {
    Stdout,
    Stderr,
    File(File),
    Writer(Box<dyn Write + Send>),
    Discard,
}

impl Destination {
    /// Flush, and for files also push the data to disk.
    fn sync(&mut self) -> io::Result<()> {
        match self {
            Destination::File(file) => {
                file.flush()?;
                file.sync_all()
            }
            other => other.flush(),
        }
    }
}

impl Write for Destination {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Destination::Stdout => io::stdout().write(buf),
            Destination::Stderr => io::stderr().write(buf),
            Destination::File(file) => file.write(buf),
            Destination::Writer(w) => w.write(buf),
            Destination::Discard => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Destination::Stdout => io::stdout().flush(),
            Destination::Stderr => io::stderr().flush(),
            Destination::File(file) => file.flush(),
            Destination::Writer(w) => w.flush(),
            Destination::Discard => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Flush synchronously after every record.
    EveryLine,
    /// Buffer and flush from a background task on this period, plus on close.
    Interval(Duration),
}

pub struct SinkOptions {
    pub time_format: TimeFormat,
    pub flush: FlushMode,
    pub width: Arc<LabelWidth>,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            time_format: TimeFormat::disabled(),
            flush: FlushMode::EveryLine,
            width: LabelWidth::new(),
        }
    }
}

struct SinkState {
    out: BufWriter<Destination>,
    closed: bool,
}

struct SinkInner {
    state: Mutex<SinkState>,
    time_format: TimeFormat,
    width: Arc<LabelWidth>,
    flush_every_line: bool,
    flusher: CancellationToken,
}

impl SinkInner {
    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SinkInner {
    fn drop(&mut self) {
        self.flusher.cancel();
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.closed {
            let _ = state.out.flush();
        }
    }
}

/// Root of one output channel. Cloning shares the buffer, lock and width.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<SinkInner>,
    sep: char,
}

impl LogSink {
    /// With [`FlushMode::Interval`] the flusher is spawned on the current
    /// Tokio runtime; outside of one the sink falls back to flushing every line.
    pub fn new(dest: Destination, sep: char, opts: SinkOptions) -> Self {
        let runtime = tokio::runtime::Handle::try_current().ok();
        let interval = match (opts.flush, &runtime) {
            (FlushMode::Interval(period), Some(_)) => Some(period),
            _ => None,
        };

        let inner = Arc::new(SinkInner {
            state: Mutex::new(SinkState {
                out: BufWriter::new(dest),
                closed: false,
            }),
            time_format: opts.time_format,
            width: opts.width,
            flush_every_line: interval.is_none(),
            flusher: CancellationToken::new(),
        });

        if let (Some(period), Some(runtime)) = (interval, runtime) {
            runtime.spawn(flush_periodically(
                Arc::downgrade(&inner),
                inner.flusher.clone(),
                period,
            ));
        }

        Self { inner, sep }
    }

    /// Same destination and lock, different separator.
    pub fn with_sep(&self, sep: char) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            sep,
        }
    }

    pub fn width(&self) -> &Arc<LabelWidth> {
        &self.inner.width
    }

    /// Labeled projection of this sink. Widens the shared column if needed.
    pub fn view(&self, label: &str) -> LogView {
        self.inner.width.register(label);
        LogView {
            sink: self.clone(),
            label: Arc::from(label),
        }
    }

    pub fn write(&self, label: &str, sep: char, line: &str) {
        let mut state = self.inner.lock();
        if state.closed {
            return;
        }

        if let TimeFormat(Some(ref format)) = self.inner.time_format {
            if OffsetDateTime::now_utc().format_into(&mut state.out, format).is_ok() {
                let _ = state.out.write_all(b" ");
            }
        }

        let pad = (self.inner.width.get() + 1).saturating_sub(label.chars().count());
        let _ = writeln!(state.out, "{label}{:pad$}{sep} {line}", "");

        if self.inner.flush_every_line {
            let _ = state.out.flush();
        }
    }

    pub fn flush(&self) {
        let mut state = self.inner.lock();
        if !state.closed {
            let _ = state.out.flush();
        }
    }

    /// Flush, sync the destination and fence off further writes. Safe to
    /// call more than once; later writes are dropped.
    pub fn close(&self) {
        let mut state = self.inner.lock();
        if state.closed {
            return;
        }
        self.inner.flusher.cancel();

        let _ = state.out.flush();
        let _ = state.out.get_mut().sync();
        state.out = BufWriter::new(Destination::Discard);
        state.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

async fn flush_periodically(inner: Weak<SinkInner>, stop: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { return };
                let mut state = inner.lock();
                if !state.closed {
                    let _ = state.out.flush();
                }
            }
        }
    }
}

/// A sink seen through one label and separator.
#[derive(Clone)]
pub struct LogView {
    sink: LogSink,
    label: Arc<str>,
}

impl LogView {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn with_sep(&self, sep: char) -> Self {
        Self {
            sink: self.sink.with_sep(sep),
            label: Arc::clone(&self.label),
        }
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }
}

impl LineSink for LogView {
    fn println(&self, line: &str) {
        self.sink.write(&self.label, self.sink.sep, line);
    }
}

/// `log` backend writing the supervisor's own records into a system view.
pub struct SinkLogger {
    view: LogView,
    level: LevelFilter,
}

impl SinkLogger {
    pub fn new(view: LogView, level: LevelFilter) -> Self {
        Self { view, level }
    }

    /// Install as the global `log` logger.
    pub fn install(view: LogView, level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(Self::new(view, level)))?;
        log::set_max_level(level);
        Ok(())
    }
}

impl log::Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        match record.level() {
            log::Level::Info => self.view.println(&record.args().to_string()),
            level => self
                .view
                .println(&format!("{}: {}", level.as_str().to_lowercase(), record.args())),
        }
    }

    fn flush(&self) {
        self.view.sink().flush();
    }
}
