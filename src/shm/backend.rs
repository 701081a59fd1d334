//! Purpose: Cross-process backend: mapped slot arrays, a two-level segment
//! lock, and a named-semaphore condition variable.
//! Exports: `SharedBackend`, `SharedGuard`, `Role`.
//! Role: The shared-memory capability set consumed by the generic series
//! core; one instance per process per segment.
//! Invariants: The index block in the mapping is canonical; every access
//! happens while holding both the local mutex and the segment file lock.
//! Invariants: Only the leader wipes the segment on drop.
use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use fs2::FileExt;
use tracing::debug;

use crate::element::Element;
use crate::error::{Error, ErrorKind};
use crate::index::{IndexBlock, Timestamp};
use crate::series::SeriesOptions;
use crate::shm::region::{IndexFile, SharedArray};
use crate::shm::semaphore::{self, SegmentSemaphore, WAIT_SLICE};
use crate::shm::SegmentPaths;
use crate::sync::{SeriesBackend, WaitOutcome};

/// Whether this instance owns the segment lifetime.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Leader,
    Follower,
}

const TIMESTAMP_CELL_LEN: usize = 8;

pub(crate) struct Views {
    indexes: IndexFile,
    elements: SharedArray,
    timestamps: SharedArray,
}

pub struct SharedBackend<T: Element> {
    paths: SegmentPaths,
    role: Role,
    views: Mutex<Views>,
    lock_file: File,
    semaphore: SegmentSemaphore,
    semaphore_name: String,
    max_length: usize,
    _elem: PhantomData<fn() -> T>,
}

pub struct SharedGuard<'a> {
    // Field order is drop order: the segment lock releases before the local
    // mutex.
    _flock: FlockGuard<'a>,
    views: MutexGuard<'a, Views>,
}

struct FlockGuard<'a> {
    file: &'a File,
}

impl Drop for FlockGuard<'_> {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl<T: Element> SharedBackend<T> {
    pub(crate) fn create_leader(
        segment_id: &str,
        max_length: usize,
        options: &SeriesOptions,
    ) -> Result<Self, Error> {
        if max_length == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("max_length must be positive"));
        }
        let paths = SegmentPaths::resolve(segment_id, options.dir.as_deref())?;
        paths.ensure_dir()?;

        let indexes = IndexFile::create(&paths.indexes, max_length, options.start_timeindex)?;
        let elements = SharedArray::create(&paths.elements, T::WIRE_LEN, max_length)?;
        let timestamps = SharedArray::create(&paths.timestamps, TIMESTAMP_CELL_LEN, max_length)?;
        let lock_file = open_lock_file(&paths.mutex)?;
        touch(&paths.condition_variable)?;

        let semaphore_name = semaphore::semaphore_name(&paths.condition_variable);
        // Drop any count left behind by an unclean previous run.
        SegmentSemaphore::unlink(&semaphore_name);
        let semaphore = SegmentSemaphore::open(&semaphore_name)?;

        debug!(segment = segment_id, max_length, "leader initialized segment");
        Ok(Self {
            paths,
            role: Role::Leader,
            views: Mutex::new(Views {
                indexes,
                elements,
                timestamps,
            }),
            lock_file,
            semaphore,
            semaphore_name,
            max_length,
            _elem: PhantomData,
        })
    }

    /// Attaches to an existing segment. A follower that outlives its leader
    /// is undefined behavior (the leader wipes the backing files).
    pub(crate) fn create_follower(
        segment_id: &str,
        options: &SeriesOptions,
    ) -> Result<Self, Error> {
        let paths = SegmentPaths::resolve(segment_id, options.dir.as_deref())?;
        let indexes = match IndexFile::open(&paths.indexes) {
            Ok(indexes) => indexes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(Error::new(ErrorKind::FollowerWithoutLeader)
                    .with_message(format!(
                        "no leader has published metadata for segment '{segment_id}'"
                    ))
                    .with_segment(segment_id));
            }
            Err(err) => return Err(err),
        };
        let max_length = indexes.max_length();
        let elements = SharedArray::open(&paths.elements, T::WIRE_LEN)?;
        let timestamps = SharedArray::open(&paths.timestamps, TIMESTAMP_CELL_LEN)?;
        if elements.capacity() != max_length || timestamps.capacity() != max_length {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("segment capacity disagrees with metadata")
                .with_segment(segment_id));
        }
        let lock_file = open_lock_file(&paths.mutex)?;

        let semaphore_name = semaphore::semaphore_name(&paths.condition_variable);
        let semaphore = SegmentSemaphore::open(&semaphore_name)?;

        debug!(segment = segment_id, "follower attached to segment");
        Ok(Self {
            paths,
            role: Role::Follower,
            views: Mutex::new(Views {
                indexes,
                elements,
                timestamps,
            }),
            lock_file,
            semaphore,
            semaphore_name,
            max_length,
            _elem: PhantomData,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

impl<T: Element> Drop for SharedBackend<T> {
    fn drop(&mut self) {
        if self.role == Role::Leader {
            // Release any parked reader before the backing files disappear.
            let _ = self.semaphore.post();
            self.paths.remove_all();
            SegmentSemaphore::unlink(&self.semaphore_name);
            debug!(segment = %self.paths.segment_id, "leader wiped segment");
        }
    }
}

impl<T: Element> SeriesBackend for SharedBackend<T> {
    type Elem = T;
    type Guard<'a> = SharedGuard<'a>
    where
        Self: 'a;

    fn lock(&self) -> Result<Self::Guard<'_>, Error> {
        let views = self
            .views
            .lock()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("series lock poisoned"))?;
        self.lock_file.lock_exclusive().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to lock segment mutex")
                .with_path(&self.paths.mutex)
                .with_source(err)
        })?;
        Ok(SharedGuard {
            _flock: FlockGuard {
                file: &self.lock_file,
            },
            views,
        })
    }

    fn wait<'a>(&'a self, guard: Self::Guard<'a>) -> Result<Self::Guard<'a>, Error> {
        drop(guard);
        let _ = self.semaphore.wait(WAIT_SLICE);
        self.lock()
    }

    fn wait_for<'a>(
        &'a self,
        guard: Self::Guard<'a>,
        timeout: Duration,
    ) -> Result<(Self::Guard<'a>, WaitOutcome), Error> {
        drop(guard);
        let outcome = self.semaphore.wait(timeout);
        Ok((self.lock()?, outcome))
    }

    fn notify_all(&self) -> Result<(), Error> {
        if self.semaphore.post().is_err() {
            // Sleepers fall back to the poll slice.
            debug!(segment = %self.paths.segment_id, "semaphore post failed");
        }
        Ok(())
    }

    fn read_indexes<'a>(&self, guard: &Self::Guard<'a>) -> Result<IndexBlock, Error>
    where
        T: 'a,
    {
        guard.views.indexes.read_block()
    }

    fn write_indexes<'a>(
        &self,
        guard: &mut Self::Guard<'a>,
        indexes: &IndexBlock,
    ) -> Result<(), Error>
    where
        T: 'a,
    {
        guard.views.indexes.write_block(indexes);
        Ok(())
    }

    fn max_length(&self) -> usize {
        self.max_length
    }

    fn element<'a>(&self, guard: &Self::Guard<'a>, slot: usize) -> Result<T, Error>
    where
        T: 'a,
    {
        T::decode(guard.views.elements.cell(slot)?)
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
        element.encode(guard.views.elements.cell_mut(slot)?);
        Ok(())
    }

    fn timestamp<'a>(&self, guard: &Self::Guard<'a>, slot: usize) -> Result<Timestamp, Error>
    where
        T: 'a,
    {
        let cell = guard.views.timestamps.cell(slot)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&cell[..8]);
        Ok(f64::from_le_bytes(bytes))
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
        guard
            .views
            .timestamps
            .cell_mut(slot)?
            .copy_from_slice(&stamp.to_le_bytes());
        Ok(())
    }

    fn element_raw<'a>(&self, guard: &Self::Guard<'a>, slot: usize) -> Result<Vec<u8>, Error>
    where
        T: 'a,
    {
        if T::IS_FUNDAMENTAL {
            return Err(Error::new(ErrorKind::NotSupported)
                .with_message("raw access is not available for fundamental element types"));
        }
        Ok(guard.views.elements.cell(slot)?.to_vec())
    }
}

fn open_lock_file(path: &std::path::Path) -> Result<File, Error> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))
}

fn touch(path: &std::path::Path) -> Result<(), Error> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .map(|_| ())
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))
}
