//! Purpose: Segment naming and layout, directory resolution, and the
//! cross-process lifecycle surface.
//! Exports: `clear_memory`, `get_max_length`, `get_start_timeindex` (and
//! their `*_in` directory variants), `Role`, the follower/leader factories.
//! Invariants: One segment id maps to five fixed-suffix files plus one named
//! semaphore; wiping is idempotent.
pub(crate) mod backend;
pub(crate) mod region;
pub(crate) mod semaphore;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::element::Element;
use crate::error::{Error, ErrorKind};
use crate::index::TimeIndex;
use crate::series::{Series, SeriesOptions};
use crate::shm::backend::SharedBackend;

const SUFFIX_INDEXES: &str = "_indexes";
const SUFFIX_ELEMENTS: &str = "_elements";
const SUFFIX_TIMESTAMPS: &str = "_timestamps";
const SUFFIX_MUTEX: &str = "_mutex";
const SUFFIX_CONDITION_VARIABLE: &str = "_condition_variable";

pub(crate) struct SegmentPaths {
    pub(crate) segment_id: String,
    pub(crate) dir: PathBuf,
    pub(crate) indexes: PathBuf,
    pub(crate) elements: PathBuf,
    pub(crate) timestamps: PathBuf,
    pub(crate) mutex: PathBuf,
    pub(crate) condition_variable: PathBuf,
}

impl SegmentPaths {
    pub(crate) fn resolve(segment_id: &str, dir: Option<&Path>) -> Result<Self, Error> {
        validate_segment_id(segment_id)?;
        let dir = dir.map(Path::to_path_buf).unwrap_or_else(default_segment_dir);
        Ok(Self {
            segment_id: segment_id.to_string(),
            indexes: dir.join(format!("{segment_id}{SUFFIX_INDEXES}")),
            elements: dir.join(format!("{segment_id}{SUFFIX_ELEMENTS}")),
            timestamps: dir.join(format!("{segment_id}{SUFFIX_TIMESTAMPS}")),
            mutex: dir.join(format!("{segment_id}{SUFFIX_MUTEX}")),
            condition_variable: dir.join(format!("{segment_id}{SUFFIX_CONDITION_VARIABLE}")),
            dir,
        })
    }

    pub(crate) fn ensure_dir(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&self.dir).with_source(err))
    }

    pub(crate) fn remove_all(&self) {
        for path in [
            &self.indexes,
            &self.elements,
            &self.timestamps,
            &self.mutex,
            &self.condition_variable,
        ] {
            let _ = fs::remove_file(path);
        }
    }
}

fn validate_segment_id(segment_id: &str) -> Result<(), Error> {
    if segment_id.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("segment id is empty"));
    }
    if segment_id == "." || segment_id == ".." {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("segment id must not be a path component")
            .with_segment(segment_id));
    }
    if segment_id.contains('/') || segment_id.contains('\\') || segment_id.contains('\0') {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("segment id must not contain path separators")
            .with_segment(segment_id));
    }
    Ok(())
}

/// Default home of segment files: `/dev/shm` where available, else the
/// system temp directory.
pub(crate) fn default_segment_dir() -> PathBuf {
    let shm = PathBuf::from("/dev/shm");
    if shm.is_dir() {
        return shm;
    }
    std::env::temp_dir()
}

impl<T: Element + 'static> Series<SharedBackend<T>> {
    /// Creates the segment, publishes its metadata and owns its lifetime:
    /// the backing memory is wiped when this instance drops.
    pub fn create_leader(segment_id: &str, max_length: usize) -> Result<Self, Error> {
        Self::create_leader_with(segment_id, max_length, SeriesOptions::new())
    }

    pub fn create_leader_with(
        segment_id: &str,
        max_length: usize,
        options: SeriesOptions,
    ) -> Result<Self, Error> {
        let backend = Arc::new(SharedBackend::create_leader(segment_id, max_length, &options)?);
        Series::from_backend(backend, options.monitor_signal)
    }

    /// Attaches to a segment some leader already initialized; fails with
    /// `FollowerWithoutLeader` when none has. A follower must not outlive
    /// its leader (undefined behavior, not guarded).
    pub fn create_follower(segment_id: &str) -> Result<Self, Error> {
        Self::create_follower_with(segment_id, SeriesOptions::new())
    }

    pub fn create_follower_with(segment_id: &str, options: SeriesOptions) -> Result<Self, Error> {
        let backend = Arc::new(SharedBackend::create_follower(segment_id, &options)?);
        Series::from_backend(backend, options.monitor_signal)
    }

    /// Factory variant for callers that hand the series to several owners.
    pub fn create_leader_arc(segment_id: &str, max_length: usize) -> Result<Arc<Self>, Error> {
        Ok(Arc::new(Self::create_leader(segment_id, max_length)?))
    }

    pub fn create_follower_arc(segment_id: &str) -> Result<Arc<Self>, Error> {
        Ok(Arc::new(Self::create_follower(segment_id)?))
    }
}

/// Unconditionally wipes every resource associated with `segment_id` in the
/// default directory. Recovery hatch for unclean previous runs.
pub fn clear_memory(segment_id: &str) -> Result<(), Error> {
    let paths = SegmentPaths::resolve(segment_id, None)?;
    wipe(&paths);
    Ok(())
}

/// `clear_memory` against an explicit segment directory.
pub fn clear_memory_in(segment_id: &str, dir: impl AsRef<Path>) -> Result<(), Error> {
    let paths = SegmentPaths::resolve(segment_id, Some(dir.as_ref()))?;
    wipe(&paths);
    Ok(())
}

fn wipe(paths: &SegmentPaths) {
    // Derive the semaphore name while the marker file still exists.
    let name = semaphore::semaphore_name(&paths.condition_variable);
    semaphore::SegmentSemaphore::unlink(&name);
    paths.remove_all();
    debug!(segment = %paths.segment_id, "segment wiped");
}

/// Capacity a leader published for `segment_id`, without attaching.
pub fn get_max_length(segment_id: &str) -> Result<usize, Error> {
    Ok(segment_metadata(segment_id, None)?.0)
}

pub fn get_max_length_in(segment_id: &str, dir: impl AsRef<Path>) -> Result<usize, Error> {
    Ok(segment_metadata(segment_id, Some(dir.as_ref()))?.0)
}

/// Start time index a leader published for `segment_id`, without attaching.
pub fn get_start_timeindex(segment_id: &str) -> Result<TimeIndex, Error> {
    Ok(segment_metadata(segment_id, None)?.1)
}

pub fn get_start_timeindex_in(
    segment_id: &str,
    dir: impl AsRef<Path>,
) -> Result<TimeIndex, Error> {
    Ok(segment_metadata(segment_id, Some(dir.as_ref()))?.1)
}

fn segment_metadata(segment_id: &str, dir: Option<&Path>) -> Result<(usize, TimeIndex), Error> {
    let paths = SegmentPaths::resolve(segment_id, dir)?;
    match region::read_metadata(&paths.indexes)? {
        Some(meta) => Ok(meta),
        None => Err(Error::new(ErrorKind::NotFound)
            .with_message(format!("no metadata published for segment '{segment_id}'"))
            .with_segment(segment_id)),
    }
}
