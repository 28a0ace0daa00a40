// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One-shot timer scheduling.
//!
//! [`Timers`] is a table of pending one-shot timers that is moved forward by
//! calling [`Timers::advance`]. [`Clock`] drives a `Timers` table from a
//! background thread at a fixed resolution. Both implement [`Scheduler`],
//! which is all the rest of the crate depends on.

use crate::error::Error;
use crate::MOD_CLOCK;
use cm_common::lock;
use cm_common::thread::ManagedThread;
use slog::Logger;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::{Duration, Instant};

const UNIT_TICKER: &str = "ticker";

/// Identifies a timer registration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

impl Display for TimerHandle {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Callback run when a timer fires. The callback is handed the handle of the
/// registration that fired.
pub type TimerCallback = Box<dyn FnOnce(TimerHandle) + Send>;

/// A one-shot timer service.
///
/// Callbacks run on the scheduler's own execution context and never while the
/// scheduler holds its internal lock, so a callback may call back into the
/// scheduler.
pub trait Scheduler: Send + Sync {
    /// Register `callback` to fire once after `delay`.
    fn register(
        &self,
        delay: Duration,
        callback: TimerCallback,
    ) -> Result<TimerHandle, Error>;

    /// Move a pending timer so that it fires `delay` from now. Returns false
    /// if the handle is not pending, either because it already fired or
    /// because it was cancelled.
    fn reschedule(&self, handle: TimerHandle, delay: Duration) -> bool;

    /// Remove a pending timer. Returns false if the handle was not pending.
    fn cancel(&self, handle: TimerHandle) -> bool;

    /// Time left before a pending timer fires.
    fn remaining(&self, handle: TimerHandle) -> Option<Duration>;
}

struct Entry {
    remaining: Duration,
    callback: TimerCallback,
}

#[derive(Default)]
struct Table {
    next: u64,
    entries: BTreeMap<TimerHandle, Entry>,
    stopped: bool,
    /// When the table was last moved forward by [`Timers::tick`]. Unset for
    /// tables driven only by [`Timers::advance`].
    last_tick: Option<Instant>,
}

impl Table {
    /// Wall time since the last tick. A timer registered between ticks is
    /// credited this much, since the next tick subtracts the whole interval.
    fn lag(&self) -> Duration {
        self.last_tick
            .map(|t| Instant::now().saturating_duration_since(t))
            .unwrap_or_default()
    }
}

/// A table of pending one-shot timers advanced by the caller.
#[derive(Default)]
pub struct Timers {
    table: Mutex<Table>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `elapsed`, firing every timer whose remaining
    /// time reaches zero. Timers fire in registration order. Returns the
    /// number of timers fired.
    pub fn advance(&self, elapsed: Duration) -> usize {
        self.advance_with(|_| elapsed)
    }

    /// Move time forward to the wall clock instant `now`, measured from the
    /// previous tick. The first tick only sets the starting point.
    pub fn tick(&self, now: Instant) -> usize {
        self.advance_with(|table| {
            let elapsed = table
                .last_tick
                .map(|t| now.saturating_duration_since(t))
                .unwrap_or_default();
            table.last_tick = Some(now);
            elapsed
        })
    }

    fn advance_with<F>(&self, elapsed: F) -> usize
    where
        F: FnOnce(&mut Table) -> Duration,
    {
        let expired: Vec<(TimerHandle, TimerCallback)> = {
            let mut table = lock!(self.table);
            let elapsed = elapsed(&mut *table);
            for entry in table.entries.values_mut() {
                entry.remaining = entry.remaining.saturating_sub(elapsed);
            }
            let handles: Vec<TimerHandle> = table
                .entries
                .iter()
                .filter(|(_, e)| e.remaining.is_zero())
                .map(|(h, _)| *h)
                .collect();
            handles
                .into_iter()
                .filter_map(|h| {
                    table.entries.remove(&h).map(|e| (h, e.callback))
                })
                .collect()
        };

        let count = expired.len();
        for (handle, callback) in expired {
            callback(handle);
        }
        count
    }

    /// Number of pending timers.
    pub fn pending(&self) -> usize {
        lock!(self.table).entries.len()
    }

    /// Drop every pending timer and refuse further registrations.
    pub fn stop(&self) {
        let mut table = lock!(self.table);
        table.stopped = true;
        table.entries.clear();
    }
}

impl Scheduler for Timers {
    fn register(
        &self,
        delay: Duration,
        callback: TimerCallback,
    ) -> Result<TimerHandle, Error> {
        let mut table = lock!(self.table);
        if table.stopped {
            return Err(Error::SchedulerStopped);
        }
        table.next += 1;
        let handle = TimerHandle(table.next);
        let remaining = delay + table.lag();
        table.entries.insert(
            handle,
            Entry {
                remaining,
                callback,
            },
        );
        Ok(handle)
    }

    fn reschedule(&self, handle: TimerHandle, delay: Duration) -> bool {
        let mut table = lock!(self.table);
        let lag = table.lag();
        match table.entries.get_mut(&handle) {
            Some(entry) => {
                entry.remaining = delay + lag;
                true
            }
            None => false,
        }
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        lock!(self.table).entries.remove(&handle).is_some()
    }

    fn remaining(&self, handle: TimerHandle) -> Option<Duration> {
        let table = lock!(self.table);
        let lag = table.lag();
        table
            .entries
            .get(&handle)
            .map(|e| e.remaining.saturating_sub(lag))
    }
}

/// A [`Timers`] table driven by a background thread.
pub struct Clock {
    pub resolution: Duration,
    timers: Arc<Timers>,
    ticker: ManagedThread,
}

impl Clock {
    /// Create a clock and start its ticker thread. The ticker advances the
    /// timer table by the wall time actually elapsed, checking every
    /// `resolution`.
    pub fn new(resolution: Duration, log: Logger) -> Result<Self, Error> {
        let timers = Arc::new(Timers::new());
        timers.tick(Instant::now());
        let ticker = ManagedThread::new();
        let t = timers.clone();
        ticker
            .spawn("connmgmt-clock".into(), move |stop| {
                slog::debug!(log, "clock started";
                    "component" => crate::COMPONENT_CONNMGMT,
                    "module" => MOD_CLOCK,
                    "unit" => UNIT_TICKER,
                    "resolution" => format!("{resolution:?}"),
                );
                while !stop.load(Ordering::Relaxed) {
                    sleep(resolution);
                    t.tick(Instant::now());
                }
            })
            .map_err(|e| Error::TaskStart(format!("clock ticker: {e}")))?;
        Ok(Self {
            resolution,
            timers,
            ticker,
        })
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.timers.stop();
        self.ticker.join();
    }
}

impl Scheduler for Clock {
    fn register(
        &self,
        delay: Duration,
        callback: TimerCallback,
    ) -> Result<TimerHandle, Error> {
        self.timers.register(delay, callback)
    }

    fn reschedule(&self, handle: TimerHandle, delay: Duration) -> bool {
        self.timers.reschedule(handle, delay)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        self.timers.cancel(handle)
    }

    fn remaining(&self, handle: TimerHandle) -> Option<Duration> {
        self.timers.remaining(handle)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc::channel;

    fn recorder() -> (
        impl Fn() -> TimerCallback,
        std::sync::mpsc::Receiver<TimerHandle>,
    ) {
        let (tx, rx) = channel();
        let make = move || -> TimerCallback {
            let tx = tx.clone();
            Box::new(move |h| {
                let _ = tx.send(h);
            })
        };
        (make, rx)
    }

    #[test]
    fn fires_once_at_delay() {
        let timers = Timers::new();
        let (cb, rx) = recorder();
        let h = timers.register(Duration::from_millis(4000), cb()).unwrap();

        assert_eq!(timers.advance(Duration::from_millis(3999)), 0);
        assert_eq!(timers.remaining(h), Some(Duration::from_millis(1)));
        assert_eq!(timers.advance(Duration::from_millis(1)), 1);
        assert_eq!(rx.try_recv().unwrap(), h);

        assert_eq!(timers.advance(Duration::from_secs(10)), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(timers.remaining(h), None);
        assert_eq!(timers.pending(), 0);
    }

    #[test]
    fn reschedule_extends_and_shrinks() {
        let timers = Timers::new();
        let (cb, rx) = recorder();
        let h = timers.register(Duration::from_millis(100), cb()).unwrap();

        timers.advance(Duration::from_millis(90));
        assert!(timers.reschedule(h, Duration::from_millis(100)));
        timers.advance(Duration::from_millis(90));
        assert!(rx.try_recv().is_err());

        assert!(timers.reschedule(h, Duration::from_millis(5)));
        timers.advance(Duration::from_millis(5));
        assert_eq!(rx.try_recv().unwrap(), h);

        // fired handles can no longer be rescheduled
        assert!(!timers.reschedule(h, Duration::from_millis(5)));
    }

    #[test]
    fn cancel_prevents_firing() {
        let timers = Timers::new();
        let (cb, rx) = recorder();
        let h = timers.register(Duration::from_millis(10), cb()).unwrap();
        assert!(timers.cancel(h));
        assert!(!timers.cancel(h));
        timers.advance(Duration::from_millis(20));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn callback_may_reenter_scheduler() {
        let timers = Arc::new(Timers::new());
        let t = timers.clone();
        let (tx, rx) = channel();
        timers
            .register(
                Duration::from_millis(1),
                Box::new(move |h| {
                    // The firing registration is already gone.
                    assert!(!t.cancel(h));
                    let next = t
                        .register(Duration::from_millis(1), Box::new(|_| {}))
                        .unwrap();
                    tx.send(next).unwrap();
                }),
            )
            .unwrap();
        timers.advance(Duration::from_millis(1));
        let next = rx.try_recv().unwrap();
        assert_eq!(timers.remaining(next), Some(Duration::from_millis(1)));
    }

    #[test]
    fn stopped_refuses_registration() {
        let timers = Timers::new();
        timers.register(Duration::from_secs(1), Box::new(|_| {})).unwrap();
        timers.stop();
        assert_eq!(timers.pending(), 0);
        assert!(matches!(
            timers.register(Duration::from_secs(1), Box::new(|_| {})),
            Err(Error::SchedulerStopped)
        ));
    }

    #[test]
    fn registration_between_ticks_is_credited() {
        let timers = Timers::new();
        let (cb, rx) = recorder();
        let start = Instant::now();
        timers.tick(start);

        sleep(Duration::from_millis(20));
        let h = timers.register(Duration::from_millis(100), cb()).unwrap();
        assert!(timers.remaining(h).unwrap() <= Duration::from_millis(100));

        // a tick 100ms past the starting point does not cover the 20ms the
        // timer was registered late
        assert_eq!(timers.tick(start + Duration::from_millis(100)), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(timers.pending(), 1);

        assert_eq!(timers.tick(start + Duration::from_secs(5)), 1);
        assert_eq!(rx.try_recv().unwrap(), h);
    }

    #[test]
    fn clock_fires_in_background() {
        let log = cm_common::log::discard_logger();
        let clock = Clock::new(Duration::from_millis(5), log).unwrap();
        let (cb, rx) = recorder();
        let h = clock.register(Duration::from_millis(20), cb()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), h);
    }
}
