//! Purpose: The generic time-series core: append, indexed reads, blocking
//! waits, tagging and occupancy queries over any `SeriesBackend`.
//! Exports: `Series`, `SeriesOptions`, `TimeSeries`, `MultiprocessTimeSeries`.
//! Role: Single home of the index-protocol algorithms; both flavors are type
//! aliases over it.
//! Invariants: Every index observation refreshes from the canonical source
//! under the lock; every mutation publishes before the lock is released.
//! Invariants: Blocked operations re-check the terminate flag after every
//! wake and surface `Interrupted`.
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock;
use crate::element::Element;
use crate::error::{Error, ErrorKind};
use crate::index::{slot_of, TimeIndex, Timestamp, EMPTY};
use crate::process::ProcessBackend;
use crate::shm::backend::{Role, SharedBackend};
use crate::sync::{SeriesBackend, WaitOutcome};
use crate::watch::{self, TerminateMonitor};

/// Construction knobs shared by both flavors.
#[derive(Clone, Debug)]
pub struct SeriesOptions {
    pub(crate) start_timeindex: TimeIndex,
    pub(crate) monitor_signal: bool,
    pub(crate) dir: Option<PathBuf>,
}

impl SeriesOptions {
    pub fn new() -> Self {
        Self {
            start_timeindex: 0,
            monitor_signal: true,
            dir: None,
        }
    }

    /// Time index the first append will produce (default 0).
    pub fn with_start_timeindex(mut self, start_timeindex: TimeIndex) -> Self {
        self.start_timeindex = start_timeindex;
        self
    }

    /// Whether blocked operations watch for terminate signals (default true).
    pub fn with_signal_monitor(mut self, enabled: bool) -> Self {
        self.monitor_signal = enabled;
        self
    }

    /// Segment directory override; shared-memory flavor only.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }
}

impl Default for SeriesOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A bounded, timestamped ring buffer addressed by monotone time indices.
///
/// Instances are movable and non-copyable; dropping a cross-process leader
/// wipes the segment.
pub struct Series<B: SeriesBackend> {
    monitor: Option<TerminateMonitor>,
    backend: Arc<B>,
    empty: AtomicBool,
    monitor_signal: bool,
}

impl<B: SeriesBackend> std::fmt::Debug for Series<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Series")
            .field("empty", &self.empty.load(Ordering::Relaxed))
            .field("monitor_signal", &self.monitor_signal)
            .field("has_monitor", &self.monitor.is_some())
            .finish()
    }
}

/// In-process flavor: one address space, any number of threads.
pub type TimeSeries<T> = Series<ProcessBackend<T>>;

/// Cross-process flavor over a named shared-memory segment.
pub type MultiprocessTimeSeries<T> = Series<SharedBackend<T>>;

impl<T: Clone + Send + 'static> Series<ProcessBackend<T>> {
    pub fn new(max_length: usize) -> Result<Self, Error> {
        Self::with_options(max_length, SeriesOptions::new())
    }

    pub fn with_options(max_length: usize, options: SeriesOptions) -> Result<Self, Error> {
        if options.dir.is_some() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("segment directory applies to multiprocess series only"));
        }
        let backend = Arc::new(ProcessBackend::new(max_length, options.start_timeindex)?);
        Series::from_backend(backend, options.monitor_signal)
    }
}

impl<B> Series<B>
where
    B: SeriesBackend + Send + Sync + 'static,
{
    pub(crate) fn from_backend(backend: Arc<B>, monitor_signal: bool) -> Result<Self, Error> {
        let monitor = if monitor_signal {
            watch::install()?;
            let waker = Arc::clone(&backend);
            Some(TerminateMonitor::spawn(move || {
                let _ = waker.notify_all();
            }))
        } else {
            None
        };
        Ok(Self {
            monitor,
            backend,
            empty: AtomicBool::new(true),
            monitor_signal,
        })
    }
}

impl<B: SeriesBackend> Series<B> {
    /// Appends an element tagged with the next time index and the current
    /// wall clock, dropping the stalest element once full.
    pub fn append(&self, element: &B::Elem) -> Result<(), Error> {
        {
            let mut guard = self.backend.lock()?;
            let mut indexes = self.backend.read_indexes(&guard)?;
            indexes.newest += 1;
            if indexes.newest - indexes.oldest + 1 > self.backend.max_length() as i64 {
                indexes.oldest += 1;
            }
            let slot = slot_of(indexes.newest, self.backend.max_length());
            self.backend.put_element(&mut guard, slot, element)?;
            self.backend
                .put_timestamp(&mut guard, slot, clock::wall_clock_ms())?;
            self.backend.write_indexes(&mut guard, &indexes)?;
        }
        self.backend.notify_all()
    }

    /// Element at `timeindex`. Blocks while the writer has not reached it;
    /// fails with `TooOld` when it has already been dropped.
    pub fn get(&self, timeindex: TimeIndex) -> Result<B::Elem, Error> {
        let mut guard = self.backend.lock()?;
        let mut indexes = self.backend.read_indexes(&guard)?;
        if timeindex < indexes.oldest {
            return Err(too_old(timeindex, indexes.oldest));
        }
        while indexes.newest < timeindex {
            self.check_terminate()?;
            guard = self.backend.wait(guard)?;
            indexes = self.backend.read_indexes(&guard)?;
        }
        self.backend
            .element(&guard, slot_of(timeindex, self.backend.max_length()))
    }

    /// Wall-clock milliseconds at which `timeindex` was appended; blocks
    /// like `get`.
    pub fn timestamp_ms(&self, timeindex: TimeIndex) -> Result<Timestamp, Error> {
        let mut guard = self.backend.lock()?;
        let mut indexes = self.backend.read_indexes(&guard)?;
        if timeindex < indexes.oldest {
            return Err(too_old(timeindex, indexes.oldest));
        }
        while indexes.newest < timeindex {
            self.check_terminate()?;
            guard = self.backend.wait(guard)?;
            indexes = self.backend.read_indexes(&guard)?;
        }
        self.backend
            .timestamp(&guard, slot_of(timeindex, self.backend.max_length()))
    }

    /// Like `timestamp_ms`, in seconds.
    pub fn timestamp_s(&self, timeindex: TimeIndex) -> Result<Timestamp, Error> {
        Ok(self.timestamp_ms(timeindex)? / 1_000.0)
    }

    /// Newest produced time index. On an empty series, waits when `wait` is
    /// true and returns `EMPTY` otherwise.
    pub fn newest_timeindex(&self, wait: bool) -> Result<TimeIndex, Error> {
        let mut guard = self.backend.lock()?;
        let mut indexes = self.backend.read_indexes(&guard)?;
        if indexes.is_empty() && !wait {
            return Ok(EMPTY);
        }
        while indexes.is_empty() {
            self.check_terminate()?;
            guard = self.backend.wait(guard)?;
            indexes = self.backend.read_indexes(&guard)?;
        }
        Ok(indexes.newest)
    }

    /// Oldest retained time index; empty-series behavior mirrors
    /// `newest_timeindex`.
    pub fn oldest_timeindex(&self, wait: bool) -> Result<TimeIndex, Error> {
        let mut guard = self.backend.lock()?;
        let mut indexes = self.backend.read_indexes(&guard)?;
        if indexes.is_empty() && !wait {
            return Ok(EMPTY);
        }
        while indexes.is_empty() {
            self.check_terminate()?;
            guard = self.backend.wait(guard)?;
            indexes = self.backend.read_indexes(&guard)?;
        }
        Ok(indexes.oldest)
    }

    /// Newest element; waits while the series is empty.
    pub fn newest_element(&self) -> Result<B::Elem, Error> {
        let timeindex = self.newest_timeindex(true)?;
        self.get(timeindex)
    }

    /// Waits until `timeindex` is produced. `None` waits indefinitely; a
    /// duration bounds each wait and yields `Ok(false)` on expiry. Interrupts
    /// also yield `Ok(false)`.
    pub fn wait_for_timeindex(
        &self,
        timeindex: TimeIndex,
        max_duration: Option<Duration>,
    ) -> Result<bool, Error> {
        let mut guard = self.backend.lock()?;
        let mut indexes = self.backend.read_indexes(&guard)?;
        if timeindex < indexes.oldest {
            return Err(too_old(timeindex, indexes.oldest));
        }
        while indexes.newest < timeindex {
            if self.monitor_signal && watch::terminate_requested() {
                return Ok(false);
            }
            match max_duration {
                Some(duration) => {
                    let (next, outcome) = self.backend.wait_for(guard, duration)?;
                    guard = next;
                    if outcome == WaitOutcome::TimedOut {
                        return Ok(false);
                    }
                }
                None => guard = self.backend.wait(guard)?,
            }
            indexes = self.backend.read_indexes(&guard)?;
        }
        Ok(true)
    }

    /// Current occupancy, `0` when empty.
    pub fn length(&self) -> Result<usize, Error> {
        let guard = self.backend.lock()?;
        let indexes = self.backend.read_indexes(&guard)?;
        Ok(indexes.length())
    }

    /// Ring capacity, fixed at creation.
    pub fn max_length(&self) -> usize {
        self.backend.max_length()
    }

    /// Total number of appends since creation.
    pub fn count_appended_elements(&self) -> Result<TimeIndex, Error> {
        let guard = self.backend.lock()?;
        let indexes = self.backend.read_indexes(&guard)?;
        Ok(indexes.newest - indexes.start + 1)
    }

    /// Bookmarks `timeindex` for change detection.
    pub fn tag(&self, timeindex: TimeIndex) -> Result<(), Error> {
        let mut guard = self.backend.lock()?;
        let mut indexes = self.backend.read_indexes(&guard)?;
        indexes.tagged = timeindex;
        self.backend.write_indexes(&mut guard, &indexes)
    }

    pub fn tagged_timeindex(&self) -> Result<TimeIndex, Error> {
        let guard = self.backend.lock()?;
        let indexes = self.backend.read_indexes(&guard)?;
        Ok(indexes.tagged)
    }

    /// Whether any append happened after the last `tag`.
    pub fn has_changed_since_tag(&self) -> Result<bool, Error> {
        let guard = self.backend.lock()?;
        let indexes = self.backend.read_indexes(&guard)?;
        Ok(indexes.tagged != indexes.newest)
    }

    /// True while no element has ever been observed. Once non-empty is seen
    /// the answer is latched and no lock is taken.
    pub fn is_empty(&self) -> Result<bool, Error> {
        if !self.empty.load(Ordering::Acquire) {
            return Ok(false);
        }
        let guard = self.backend.lock()?;
        let indexes = self.backend.read_indexes(&guard)?;
        if indexes.is_empty() {
            return Ok(true);
        }
        self.empty.store(false, Ordering::Release);
        Ok(false)
    }

    /// Raw serialized cell bytes at `timeindex`; blocks like `get`. Refused
    /// for fundamental element types and for the in-process flavor.
    pub fn get_raw(&self, timeindex: TimeIndex) -> Result<Vec<u8>, Error> {
        let mut guard = self.backend.lock()?;
        let mut indexes = self.backend.read_indexes(&guard)?;
        if timeindex < indexes.oldest {
            return Err(too_old(timeindex, indexes.oldest));
        }
        while indexes.newest < timeindex {
            self.check_terminate()?;
            guard = self.backend.wait(guard)?;
            indexes = self.backend.read_indexes(&guard)?;
        }
        self.backend
            .element_raw(&guard, slot_of(timeindex, self.backend.max_length()))
    }

    fn check_terminate(&self) -> Result<(), Error> {
        if self.monitor_signal && watch::terminate_requested() {
            return Err(Error::new(ErrorKind::Interrupted)
                .with_message("terminate signal received while waiting"));
        }
        Ok(())
    }
}

impl<B: SeriesBackend> Drop for Series<B> {
    fn drop(&mut self) {
        // Join the watchdog before the backend can tear down its segment.
        self.monitor.take();
    }
}

fn too_old(timeindex: TimeIndex, oldest: TimeIndex) -> Error {
    Error::new(ErrorKind::TooOld)
        .with_message(format!(
            "timeindex {timeindex} is older than the oldest retained index {oldest}"
        ))
        .with_timeindex(timeindex)
        .with_oldest(oldest)
}

impl<T: Element + 'static> Series<SharedBackend<T>> {
    /// Leader or follower, as chosen at construction.
    pub fn role(&self) -> Role {
        self.backend.role()
    }
}
