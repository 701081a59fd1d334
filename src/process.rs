// In-process backend: heap slot arrays behind one mutex plus a condvar.
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Error, ErrorKind};
use crate::index::{IndexBlock, TimeIndex, Timestamp};
use crate::sync::{SeriesBackend, WaitOutcome};

#[derive(Debug)]
pub struct ProcessBackend<T> {
    state: Mutex<SeriesState<T>>,
    ready: Condvar,
    max_length: usize,
}

#[derive(Debug)]
pub struct SeriesState<T> {
    indexes: IndexBlock,
    elements: Vec<Option<T>>,
    timestamps: Vec<Timestamp>,
}

impl<T: Clone> ProcessBackend<T> {
    pub fn new(max_length: usize, start_timeindex: TimeIndex) -> Result<Self, Error> {
        if max_length == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("max_length must be positive"));
        }
        Ok(Self {
            state: Mutex::new(SeriesState {
                indexes: IndexBlock::new(start_timeindex),
                elements: vec![None; max_length],
                timestamps: vec![0.0; max_length],
            }),
            ready: Condvar::new(),
            max_length,
        })
    }
}

fn poisoned() -> Error {
    Error::new(ErrorKind::Internal).with_message("series lock poisoned")
}

impl<T: Clone> SeriesBackend for ProcessBackend<T> {
    type Elem = T;
    type Guard<'a> = MutexGuard<'a, SeriesState<T>>
    where
        Self: 'a;

    fn lock(&self) -> Result<Self::Guard<'_>, Error> {
        self.state.lock().map_err(|_| poisoned())
    }

    fn wait<'a>(&'a self, guard: Self::Guard<'a>) -> Result<Self::Guard<'a>, Error> {
        self.ready.wait(guard).map_err(|_| poisoned())
    }

    fn wait_for<'a>(
        &'a self,
        guard: Self::Guard<'a>,
        timeout: Duration,
    ) -> Result<(Self::Guard<'a>, WaitOutcome), Error> {
        let (guard, status) = self
            .ready
            .wait_timeout(guard, timeout)
            .map_err(|_| poisoned())?;
        let outcome = if status.timed_out() {
            WaitOutcome::TimedOut
        } else {
            WaitOutcome::Notified
        };
        Ok((guard, outcome))
    }

    fn notify_all(&self) -> Result<(), Error> {
        self.ready.notify_all();
        Ok(())
    }

    fn read_indexes<'a>(&self, guard: &Self::Guard<'a>) -> Result<IndexBlock, Error>
    where
        T: 'a,
    {
        Ok(guard.indexes)
    }

    fn write_indexes<'a>(
        &self,
        guard: &mut Self::Guard<'a>,
        indexes: &IndexBlock,
    ) -> Result<(), Error>
    where
        T: 'a,
    {
        guard.indexes = *indexes;
        Ok(())
    }

    fn max_length(&self) -> usize {
        self.max_length
    }

    fn element<'a>(&self, guard: &Self::Guard<'a>, slot: usize) -> Result<T, Error>
    where
        T: 'a,
    {
        guard
            .elements
            .get(slot)
            .and_then(|cell| cell.clone())
            .ok_or_else(|| {
                Error::new(ErrorKind::Internal).with_message("slot read outside retained range")
            })
    }

    fn put_element<'a>(
        &self,
        guard: &mut Self::Guard<'a>,
        slot: usize,
        element: &T,
    ) -> Result<(), Error>
    where
        T: 'a,
    {
        let cell = guard
            .elements
            .get_mut(slot)
            .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("slot out of range"))?;
        *cell = Some(element.clone());
        Ok(())
    }

    fn timestamp<'a>(&self, guard: &Self::Guard<'a>, slot: usize) -> Result<Timestamp, Error>
    where
        T: 'a,
    {
        guard
            .timestamps
            .get(slot)
            .copied()
            .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("slot out of range"))
    }

    fn put_timestamp<'a>(
        &self,
        guard: &mut Self::Guard<'a>,
        slot: usize,
        stamp: Timestamp,
    ) -> Result<(), Error>
    where
        T: 'a,
    {
        let cell = guard
            .timestamps
            .get_mut(slot)
            .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("slot out of range"))?;
        *cell = stamp;
        Ok(())
    }

    fn element_raw<'a>(&self, _guard: &Self::Guard<'a>, _slot: usize) -> Result<Vec<u8>, Error>
    where
        T: 'a,
    {
        Err(Error::new(ErrorKind::NotSupported)
            .with_message("raw access requires a shared-memory series"))
    }
}
