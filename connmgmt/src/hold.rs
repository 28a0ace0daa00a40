// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::clock::{Scheduler, TimerHandle};
use crate::error::Error;
use std::sync::Arc;
use std::time::Duration;

/// What a hold timer runs when it expires.
pub type ExpiryHandler = Arc<dyn Fn(TimerHandle) + Send + Sync>;

/// A session's hold timer. Holds at most one live registration with the
/// scheduler at any time.
pub struct HoldTimer {
    scheduler: Arc<dyn Scheduler>,
    on_expire: ExpiryHandler,
    handle: Option<TimerHandle>,
}

impl HoldTimer {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        on_expire: ExpiryHandler,
    ) -> Self {
        Self {
            scheduler,
            on_expire,
            handle: None,
        }
    }

    /// Arm the timer to fire after `delay`. A pending registration is moved
    /// rather than duplicated. If the current registration has already fired
    /// but its expiry has not been handled yet, it is replaced and the
    /// earlier firing becomes stale (see [`HoldTimer::is_current`]). On error
    /// the timer is left disarmed.
    pub fn arm(&mut self, delay: Duration) -> Result<TimerHandle, Error> {
        if let Some(h) = self.handle.take() {
            if self.scheduler.reschedule(h, delay) {
                self.handle = Some(h);
                return Ok(h);
            }
        }
        let on_expire = self.on_expire.clone();
        let h = self
            .scheduler
            .register(delay, Box::new(move |h| on_expire(h)))?;
        self.handle = Some(h);
        Ok(h)
    }

    /// Deregister the timer, if armed.
    pub fn cancel(&mut self) {
        if let Some(h) = self.handle.take() {
            self.scheduler.cancel(h);
        }
    }

    /// Returns true if `handle` is this timer's current registration. An
    /// expiry for any other handle is stale and must be ignored.
    pub fn is_current(&self, handle: TimerHandle) -> bool {
        self.handle == Some(handle)
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Time left before the timer fires, if it is pending.
    pub fn remaining(&self) -> Option<Duration> {
        self.handle.and_then(|h| self.scheduler.remaining(h))
    }
}

impl Drop for HoldTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
