// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::clock::{Scheduler, TimerHandle};
use crate::error::Error;
use crate::hold::HoldTimer;
use crate::io;
use crate::log::session_log;
use crate::observer::{Notification, SubscriberId};
use crate::packet::KeepaliveMessage;
use crate::sm::StateMachine;
use crate::transport::Transport;
use crate::{
    validate_keepalive_interval, ConnectionKey, MastershipRole, SessionStatus,
};
use cm_common::lock;
use cm_common::thread::ManagedThread;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

const UNIT: &str = "session";

#[derive(
    Debug,
    Default,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub struct Counters {
    pub keepalives_sent: u64,
    pub keepalives_received: u64,
    pub malformed_received: u64,
    /// Number of times the hold timer took the session from up to down.
    pub down_transitions: u64,
}

/// A point in time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionInfo {
    pub name: String,
    pub key: ConnectionKey,
    pub role: MastershipRole,
    pub status: SessionStatus,
    /// Keepalive interval in seconds.
    pub keepalive_interval: u16,
    pub hold_time_ms: u64,
    /// Time left on the hold timer, if it is armed.
    pub hold_timer_remaining_ms: Option<u64>,
    pub counters: Counters,
    pub paused: bool,
    /// Whether the session's sender and receiver are running.
    pub started: bool,
}

/// A keepalive session with one peer.
///
/// The state machine lives behind `state`. The sender thread waits on `wake`
/// between keepalives and while paused, so anything that changes the pause
/// flag or asks the threads to stop must notify it.
pub struct Session<T: Transport> {
    pub name: String,
    pub key: ConnectionKey,
    pub(crate) state: Mutex<StateMachine>,
    pub(crate) wake: Condvar,
    transport: Mutex<Option<Arc<T>>>,
    sender: ManagedThread,
    receiver: ManagedThread,
    pub(crate) log: Logger,
}

impl<T: Transport> Session<T> {
    pub(crate) fn new(
        name: String,
        key: ConnectionKey,
        role: MastershipRole,
        keepalive_interval: u16,
        scheduler: Arc<dyn Scheduler>,
        log: Logger,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let session = weak.clone();
            let hold_timer = HoldTimer::new(
                scheduler,
                Arc::new(move |h: TimerHandle| {
                    if let Some(s) = session.upgrade() {
                        s.hold_timer_expired(h);
                    }
                }),
            );
            Self {
                state: Mutex::new(StateMachine::new(
                    name.clone(),
                    key,
                    role,
                    keepalive_interval,
                    hold_timer,
                    log.clone(),
                )),
                name,
                key,
                wake: Condvar::new(),
                transport: Mutex::new(None),
                sender: ManagedThread::new(),
                receiver: ManagedThread::new(),
                log,
            }
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StateMachine> {
        lock!(self.state)
    }

    /// Open the transport and start the sender and receiver. Starting a
    /// session that is already started does nothing. A session that was Up
    /// when it was stopped gets its hold timer back, so a peer that stays
    /// silent still takes it down.
    pub fn start(self: &Arc<Self>) -> Result<(), Error> {
        let mut transport = lock!(self.transport);
        if transport.is_some() {
            return Ok(());
        }
        let t = Arc::new(T::open(&self.key, &self.log)?);

        let (s, tt) = (self.clone(), t.clone());
        self.sender
            .spawn(format!("keepalive-tx-{}", self.name), move |stop| {
                io::egress(s, tt, stop)
            })
            .map_err(|e| Error::TaskStart(format!("sender: {e}")))?;

        let (s, tt) = (self.clone(), t.clone());
        if let Err(e) = self
            .receiver
            .spawn(format!("keepalive-rx-{}", self.name), move |stop| {
                io::ingress(s, tt, stop)
            })
        {
            self.abort_start(&t);
            return Err(Error::TaskStart(format!("receiver: {e}")));
        }

        let rearmed = self.lock().rearm_hold_timer();
        if let Err(e) = rearmed {
            self.abort_start(&t);
            return Err(e);
        }

        *transport = Some(t);
        session_log!(self, info, "session started");
        Ok(())
    }

    fn signal_stop(&self) {
        let _guard = self.lock();
        self.sender.signal_stop();
        self.receiver.signal_stop();
        self.wake.notify_all();
    }

    /// Undo a partial start.
    fn abort_start(&self, t: &T) {
        self.signal_stop();
        t.close();
        self.sender.join();
        self.receiver.join();
    }

    /// Stop the sender and receiver, close the transport and cancel the hold
    /// timer. The session keeps its status, role and counters.
    pub fn stop(&self) {
        let transport = lock!(self.transport).take();
        self.signal_stop();
        if let Some(t) = &transport {
            t.close();
        }
        self.sender.join();
        self.receiver.join();
        self.lock().cancel_hold_timer();
        if transport.is_some() {
            session_log!(self, info, "session stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        lock!(self.transport).is_some()
    }

    /// Stop sending keepalives. Receiving continues.
    pub fn pause(&self) {
        let mut sm = self.lock();
        if !sm.paused {
            sm.paused = true;
            session_log!(self, info, "keepalives paused");
        }
    }

    pub fn resume(&self) {
        let mut sm = self.lock();
        if sm.paused {
            sm.paused = false;
            self.wake.notify_all();
            session_log!(self, info, "keepalives resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Change the keepalive interval. Sending is paused around the change,
    /// all under the session lock, so the sender picks up the new interval
    /// and encoding together and a concurrent pause is never undone. A
    /// session that was already paused stays paused.
    pub fn set_keepalive_interval(&self, seconds: u64) -> Result<(), Error> {
        let seconds = validate_keepalive_interval(seconds)?;
        let mut sm = self.lock();
        let was_paused = sm.paused;
        sm.paused = true;
        sm.set_keepalive_interval(seconds);
        sm.paused = was_paused;
        if !was_paused {
            self.wake.notify_all();
        }
        Ok(())
    }

    /// Operator requested switchover. Returns the new role.
    pub fn switchover(&self) -> MastershipRole {
        self.lock().force_switchover()
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    pub fn role(&self) -> MastershipRole {
        self.lock().role
    }

    pub fn counters(&self) -> Counters {
        self.lock().counters
    }

    /// The keepalive currently being sent.
    pub fn local_message(&self) -> KeepaliveMessage {
        self.lock().local().clone()
    }

    pub fn subscribe(&self) -> (SubscriberId, Receiver<Notification>) {
        self.lock().subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.lock().unsubscribe(id)
    }

    pub fn info(&self) -> SessionInfo {
        let started = self.is_started();
        self.lock().info(started)
    }

    /// Handle a datagram from the peer.
    pub(crate) fn receive(&self, d: &[u8]) -> Result<bool, Error> {
        self.lock().on_peer_message(d)
    }

    fn hold_timer_expired(&self, handle: TimerHandle) {
        self.lock().hold_timer_expired(handle);
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
