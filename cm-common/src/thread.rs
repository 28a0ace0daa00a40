// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thread management utilities for consistent lifecycle handling.

use crate::lock;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{Builder, JoinHandle},
};

/// Status of a managed child thread.
#[derive(Debug, Default)]
pub enum ThreadState {
    /// Thread has not been started yet, or has been joined.
    #[default]
    Ready,
    /// Thread is running with the given handle and stop flag.
    Running {
        handle: JoinHandle<()>,
        stop: Arc<AtomicBool>,
    },
}

impl ThreadState {
    /// Check if the thread is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, ThreadState::Running { .. })
    }
}

/// A managed thread that bundles a thread's JoinHandle with its stop flag.
/// The thread body is handed the stop flag and is expected to check it each
/// time around its loop.
///
/// Dropping a ManagedThread signals the thread to stop and joins it, so the
/// owner must make sure whatever the thread blocks on is also unblocked.
#[derive(Debug, Default)]
pub struct ManagedThread {
    state: Mutex<ThreadState>,
}

impl ManagedThread {
    /// Create a new managed thread in the Ready state
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the thread body `f` under the given thread name. Has no effect
    /// and returns Ok if the thread is already running.
    pub fn spawn<F>(&self, name: String, f: F) -> std::io::Result<()>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let mut state = lock!(self.state);
        if state.is_running() {
            return Ok(());
        }
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = Builder::new().name(name).spawn(move || f(flag))?;
        *state = ThreadState::Running { handle, stop };
        Ok(())
    }

    /// Check if the thread is currently running
    pub fn is_running(&self) -> bool {
        lock!(self.state).is_running()
    }

    /// Raise the stop flag without waiting for the thread to exit.
    pub fn signal_stop(&self) {
        if let ThreadState::Running { stop, .. } = &*lock!(self.state) {
            stop.store(true, Ordering::Relaxed);
        }
    }

    /// Raise the stop flag and wait for the thread to exit. Returns true if a
    /// running thread was joined. Called from the managed thread itself, the
    /// flag is raised but the thread is detached rather than joined.
    pub fn join(&self) -> bool {
        let state = std::mem::take(&mut *lock!(self.state));
        match state {
            ThreadState::Running { handle, stop } => {
                stop.store(true, Ordering::Relaxed);
                if handle.thread().id() == std::thread::current().id() {
                    return false;
                }
                let _ = handle.join();
                true
            }
            ThreadState::Ready => false,
        }
    }
}

impl Drop for ManagedThread {
    fn drop(&mut self) {
        self.join();
    }
}
