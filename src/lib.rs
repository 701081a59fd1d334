//! Purpose: Bounded, timestamped, single-writer/multi-reader ring buffer
//! ("time series") with in-process and shared-memory flavors sharing one API.
//! Exports: `TimeSeries`, `MultiprocessTimeSeries`, the `Series` core and its
//! `SeriesBackend` capability seam, `Element`, segment lifecycle functions,
//! and the `watch` terminate hooks.
//! Role: Communication medium between a sensor/controller producer and one
//! or more real-time consumers.
//! Invariants: Time indices are monotone and contiguous; reads of
//! not-yet-produced indices block until the writer catches up or the wait is
//! interrupted.
mod clock;
mod element;
mod error;
mod index;
mod process;
mod series;
mod shm;
mod sync;
pub mod watch;

pub use element::Element;
pub use error::{Error, ErrorKind};
pub use index::{IndexBlock, TimeIndex, Timestamp, EMPTY};
pub use process::ProcessBackend;
pub use series::{MultiprocessTimeSeries, Series, SeriesOptions, TimeSeries};
pub use shm::backend::{Role, SharedBackend};
pub use shm::{
    clear_memory, clear_memory_in, get_max_length, get_max_length_in, get_start_timeindex,
    get_start_timeindex_in,
};
pub use sync::{SeriesBackend, WaitOutcome};
