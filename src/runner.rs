//! Background worker lifecycle.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use crate::error::RtpError;

/// Cancellation flag shared with a worker thread.
///
/// The flag is cleared by [`Runner::stop`] and observed cooperatively by the
/// worker between units of work. A worker exiting on its own (e.g. on a
/// permanently broken socket) clears the flag itself.
#[derive(Clone)]
pub struct ActiveFlag {
    inner: Arc<AtomicBool>,
}

impl ActiveFlag {
    /// Check if the worker should keep running.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }

    /// Clear the flag.
    #[inline]
    pub fn deactivate(&self) {
        self.inner.store(false, Ordering::Release);
    }
}

/// Lifecycle of a background worker thread.
///
/// `start` spawns the thread and raises the active flag; `stop` clears the
/// flag and joins the thread, returning only after the worker has fully
/// exited.
pub struct Runner {
    active: ActiveFlag,
    worker: Option<JoinHandle<()>>,
}

impl Runner {
    /// Create a new runner with no worker.
    pub fn new() -> Self {
        Self {
            active: ActiveFlag {
                inner: Arc::new(AtomicBool::new(false)),
            },
            worker: None,
        }
    }

    /// Spawn the worker thread.
    ///
    /// The body receives the shared active flag and is expected to observe it
    /// between units of work and to clear it when exiting on its own.
    pub fn start<F>(&mut self, name: &str, body: F) -> Result<(), RtpError>
    where
        F: FnOnce(ActiveFlag) + Send + 'static,
    {
        if self.worker.is_some() {
            return Err(RtpError::InvalidValue);
        }

        self.active.inner.store(true, Ordering::Release);

        let active = self.active.clone();

        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(active))
            .map_err(|_| RtpError::Memory)?;

        self.worker = Some(worker);

        Ok(())
    }

    /// Stop the worker thread.
    ///
    /// The method returns only after the worker has exited. Stopping a runner
    /// that was never started (or has been stopped already) is a no-op.
    pub fn stop(&mut self) -> Result<(), RtpError> {
        self.active.deactivate();

        if let Some(worker) = self.worker.take() {
            worker.join().map_err(|_| RtpError::Generic)?;
        }

        Ok(())
    }

    /// Check if the worker is running.
    pub fn active(&self) -> bool {
        self.active.is_active()
    }

    /// Get the shared active flag.
    pub fn active_flag(&self) -> ActiveFlag {
        self.active.clone()
    }
}

impl Default for Runner {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.stop().unwrap_or_default();
    }
}
