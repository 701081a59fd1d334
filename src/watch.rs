//! Purpose: Process-wide terminate flag plus the per-series monitor thread
//! that wakes sleepers when the flag trips.
//! Exports: `install`, `terminate_requested`, `request_terminate`, `reset`.
//! Role: Lets blocked readers unblock promptly on SIGINT/SIGTERM instead of
//! pinning a shutting-down process.
//! Invariants: The handler only stores an atomic flag; all reactions happen
//! on ordinary threads.
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, ErrorKind};

static TERMINATE: AtomicBool = AtomicBool::new(false);
static INSTALLED: AtomicBool = AtomicBool::new(false);

const MONITOR_POLL: Duration = Duration::from_millis(10);

extern "C" fn mark_terminate(_signum: libc::c_int) {
    TERMINATE.store(true, Ordering::SeqCst);
}

/// Installs the SIGINT/SIGTERM handler once per process.
pub fn install() -> Result<(), Error> {
    if INSTALLED.load(Ordering::Acquire) {
        return Ok(());
    }
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = mark_terminate as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        for signum in [libc::SIGINT, libc::SIGTERM] {
            if libc::sigaction(signum, &action, std::ptr::null_mut()) != 0 {
                return Err(Error::new(ErrorKind::Io)
                    .with_message("failed to install terminate handler")
                    .with_source(io::Error::last_os_error()));
            }
        }
    }
    INSTALLED.store(true, Ordering::Release);
    Ok(())
}

pub fn terminate_requested() -> bool {
    TERMINATE.load(Ordering::SeqCst)
}

/// Raises the flag without a signal; what the handler itself does.
pub fn request_terminate() {
    TERMINATE.store(true, Ordering::SeqCst);
}

pub fn reset() {
    TERMINATE.store(false, Ordering::SeqCst);
}

/// Watches the terminate flag on behalf of one series instance and fires its
/// wake-up callback once when the flag trips. Stopped and joined on drop.
pub(crate) struct TerminateMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TerminateMonitor {
    pub(crate) fn spawn<F>(notify: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || loop {
            if thread_stop.load(Ordering::Acquire) {
                break;
            }
            if terminate_requested() {
                debug!("terminate flag observed; waking series sleepers");
                notify();
                break;
            }
            thread::sleep(MONITOR_POLL);
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for TerminateMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
