//! Purpose: Capability interface bundling the lock, condition variable, slot
//! arrays and index materialization behind one backend seam.
//! Exports: `SeriesBackend`, `WaitOutcome`.
//! Role: The generic series core is written once against this trait; the two
//! flavors differ only in which backend they construct.
//! Invariants: Index reads/writes and slot access happen under the guard;
//! `wait` releases the guard while suspended and hands back a fresh one.
use std::time::Duration;

use crate::error::Error;
use crate::index::{IndexBlock, Timestamp};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    Notified,
    TimedOut,
}

/// Storage and synchronization capabilities of one time-series instance.
///
/// Waits may return spuriously; callers re-check their predicate after every
/// wake, so a delivered notification is an accelerator, never a correctness
/// dependency.
pub trait SeriesBackend {
    type Elem;
    type Guard<'a>
    where
        Self: 'a;

    fn lock(&self) -> Result<Self::Guard<'_>, Error>;

    /// Atomically releases the guard and suspends until woken, then
    /// reacquires.
    fn wait<'a>(&'a self, guard: Self::Guard<'a>) -> Result<Self::Guard<'a>, Error>;

    fn wait_for<'a>(
        &'a self,
        guard: Self::Guard<'a>,
        timeout: Duration,
    ) -> Result<(Self::Guard<'a>, WaitOutcome), Error>;

    fn notify_all(&self) -> Result<(), Error>;

    /// Refresh the index tuple from its canonical source.
    fn read_indexes<'a>(&self, guard: &Self::Guard<'a>) -> Result<IndexBlock, Error>
    where
        Self::Elem: 'a;

    /// Publish the index tuple to its canonical source.
    fn write_indexes<'a>(
        &self,
        guard: &mut Self::Guard<'a>,
        indexes: &IndexBlock,
    ) -> Result<(), Error>
    where
        Self::Elem: 'a;

    fn max_length(&self) -> usize;

    fn element<'a>(&self, guard: &Self::Guard<'a>, slot: usize) -> Result<Self::Elem, Error>
    where
        Self::Elem: 'a;

    fn put_element<'a>(
        &self,
        guard: &mut Self::Guard<'a>,
        slot: usize,
        element: &Self::Elem,
    ) -> Result<(), Error>
    where
        Self::Elem: 'a;

    fn timestamp<'a>(&self, guard: &Self::Guard<'a>, slot: usize) -> Result<Timestamp, Error>
    where
        Self::Elem: 'a;

    fn put_timestamp<'a>(
        &self,
        guard: &mut Self::Guard<'a>,
        slot: usize,
        stamp: Timestamp,
    ) -> Result<(), Error>
    where
        Self::Elem: 'a;

    /// Raw cell bytes of a codec-encoded element; refused for fundamentals
    /// and for backends that never encode.
    fn element_raw<'a>(&self, guard: &Self::Guard<'a>, slot: usize) -> Result<Vec<u8>, Error>
    where
        Self::Elem: 'a;
}
