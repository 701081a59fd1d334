//! Purpose: Best-effort cross-process wake-ups via named POSIX semaphores.
//! Exports: `SegmentSemaphore`, `semaphore_name`, `WAIT_SLICE`.
//! Role: Condition-variable transport for shared series; sleepers re-poll on
//! a bounded slice, so correctness never depends on a delivered post.
//! Invariants: Name derivation is deterministic; failures degrade to plain
//! sleeps instead of blocking progress.
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;

/// Upper bound on one park interval; every sleeper re-checks its predicate
/// at least this often.
pub(crate) const WAIT_SLICE: Duration = Duration::from_millis(5);

/// Semaphore name for a segment's condition-variable marker file.
pub(crate) fn semaphore_name(path: &Path) -> String {
    let bytes = canonical_path_bytes(path);
    let digest = Sha256::digest(&bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    format!("timering-{hex}")
}

fn canonical_path_bytes(path: &Path) -> Vec<u8> {
    let resolved = std::fs::canonicalize(path);
    let path = resolved.as_ref().map_or(path, |value| value.as_path());
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().to_vec()
    }
    #[cfg(not(unix))]
    {
        path.to_string_lossy().as_bytes().to_vec()
    }
}

#[cfg(unix)]
mod platform {
    use std::ffi::CString;
    use std::io;
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::error::{Error, ErrorKind};
    use crate::sync::WaitOutcome;

    use super::WAIT_SLICE;

    pub(crate) struct SegmentSemaphore {
        handle: *mut libc::sem_t,
    }

    // POSIX allows concurrent sem_post/sem_trywait on one handle.
    unsafe impl Send for SegmentSemaphore {}
    unsafe impl Sync for SegmentSemaphore {}

    impl SegmentSemaphore {
        pub(crate) fn open(name: &str) -> Result<Self, Error> {
            let full = format!("/{name}");
            let c_name = CString::new(full).map_err(|_| {
                Error::new(ErrorKind::Usage).with_message("semaphore name contains NUL")
            })?;
            let mode = (libc::S_IRUSR | libc::S_IWUSR) as libc::mode_t;
            let handle = unsafe {
                libc::sem_open(c_name.as_ptr(), libc::O_CREAT, mode as libc::c_uint, 0)
            };
            if handle == libc::SEM_FAILED {
                return Err(Error::new(ErrorKind::Io)
                    .with_message("sem_open failed")
                    .with_source(io::Error::last_os_error()));
            }
            Ok(Self { handle })
        }

        pub(crate) fn post(&self) -> Result<(), Error> {
            let rc = unsafe { libc::sem_post(self.handle) };
            if rc != 0 {
                return Err(Error::new(ErrorKind::Io)
                    .with_message("sem_post failed")
                    .with_source(io::Error::last_os_error()));
            }
            Ok(())
        }

        /// Parks for at most `timeout`, probing the semaphore on a bounded
        /// slice.
        pub(crate) fn wait(&self, timeout: Duration) -> WaitOutcome {
            let start = Instant::now();
            let poll = WAIT_SLICE.min(timeout.max(Duration::from_millis(1)));

            loop {
                let rc = unsafe { libc::sem_trywait(self.handle) };
                if rc == 0 {
                    return WaitOutcome::Notified;
                }
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(code) if code == libc::EINTR => continue,
                    Some(code) if code == libc::EAGAIN => {
                        if start.elapsed() >= timeout {
                            return WaitOutcome::TimedOut;
                        }
                        thread::sleep(poll);
                    }
                    _ => {
                        // Unusable semaphore: fall back to sleeping out the
                        // timeout so the caller still re-checks its predicate.
                        if start.elapsed() >= timeout {
                            return WaitOutcome::TimedOut;
                        }
                        thread::sleep(poll);
                    }
                }
            }
        }

        pub(crate) fn unlink(name: &str) {
            if let Ok(c_name) = CString::new(format!("/{name}")) {
                unsafe {
                    libc::sem_unlink(c_name.as_ptr());
                }
            }
        }
    }

    impl Drop for SegmentSemaphore {
        fn drop(&mut self) {
            unsafe {
                libc::sem_close(self.handle);
            }
        }
    }
}

#[cfg(not(unix))]
mod platform {
    use std::thread;
    use std::time::Duration;

    use crate::error::Error;
    use crate::sync::WaitOutcome;

    pub(crate) struct SegmentSemaphore;

    impl SegmentSemaphore {
        pub(crate) fn open(_name: &str) -> Result<Self, Error> {
            Ok(Self)
        }

        pub(crate) fn post(&self) -> Result<(), Error> {
            Ok(())
        }

        pub(crate) fn wait(&self, timeout: Duration) -> WaitOutcome {
            thread::sleep(timeout);
            WaitOutcome::TimedOut
        }

        pub(crate) fn unlink(_name: &str) {}
    }
}

pub(crate) use platform::SegmentSemaphore;
