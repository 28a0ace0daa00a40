// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::clock::TimerHandle;
use crate::error::Error;
use crate::hold::HoldTimer;
use crate::log::sm_log;
use crate::observer::{
    Notification, SessionEvent, SubscriberId, Subscribers,
};
use crate::packet::{Keepalive, KeepaliveMessage};
use crate::session::{Counters, SessionInfo};
use crate::{hold_time, ConnectionKey, MastershipRole, SessionStatus};
use slog::Logger;
use std::sync::mpsc::Receiver;
use std::time::Duration;

const UNIT: &str = "state_machine";

/// The connection session state machine.
///
/// ```text
///                 signal                 signal
///      +------+ ----------> +------+ ----------> +------+ --+
///      | DOWN |             | INIT |             |  UP  |   | signal
///      +------+             +------+             +------+ <-+ (refresh)
///          ^                                        |
///          |               hold timer expires       |
///          +----------------------------------------+
/// ```
///
/// A signal is any received keepalive whose bytes differ from the previous
/// one received. Entering Up arms the hold timer; every further signal in Up
/// re-arms it. Expiry takes the session Down and, for a backup, promotes it
/// to master.
///
/// Everything here is guarded by the owning session's mutex, including the
/// paths entered from the hold timer.
pub(crate) struct StateMachine {
    pub(crate) name: String,
    pub(crate) key: ConnectionKey,
    pub(crate) role: MastershipRole,
    pub(crate) status: SessionStatus,

    keepalive_interval: u16,
    hold_time: Duration,

    pub(crate) counters: Counters,

    /// Whether the sender is paused.
    pub(crate) paused: bool,

    /// What we are currently sending.
    local: KeepaliveMessage,

    /// What we last received from the peer.
    peer: KeepaliveMessage,

    hold_timer: HoldTimer,
    subscribers: Subscribers,
    pub(crate) log: Logger,
}

impl StateMachine {
    pub(crate) fn new(
        name: String,
        key: ConnectionKey,
        role: MastershipRole,
        keepalive_interval: u16,
        hold_timer: HoldTimer,
        log: Logger,
    ) -> Self {
        let mut sm = Self {
            name,
            key,
            role,
            status: SessionStatus::Down,
            keepalive_interval,
            hold_time: hold_time(keepalive_interval),
            counters: Counters::default(),
            paused: false,
            local: KeepaliveMessage::default(),
            peer: KeepaliveMessage::default(),
            hold_timer,
            subscribers: Subscribers::default(),
            log,
        };
        sm.encode();
        sm
    }

    pub(crate) fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval.into())
    }

    pub(crate) fn hold_time(&self) -> Duration {
        self.hold_time
    }

    /// The encoded keepalive to send.
    pub(crate) fn local(&self) -> &KeepaliveMessage {
        &self.local
    }

    /// The last keepalive received from the peer.
    pub(crate) fn peer(&self) -> &KeepaliveMessage {
        &self.peer
    }

    /// Regenerate the local keepalive from the current role, status and hold
    /// time.
    fn encode(&mut self) {
        let ka =
            Keepalive::new(&self.key, self.role, self.status, self.hold_time);
        self.local = KeepaliveMessage::from(&ka);
    }

    /// Set the keepalive interval and the hold time derived from it. The
    /// caller is responsible for validating the interval.
    pub(crate) fn set_keepalive_interval(&mut self, seconds: u16) {
        self.keepalive_interval = seconds;
        self.hold_time = hold_time(seconds);
        self.encode();
        sm_log!(self, info, "keepalive interval set";
            "interval" => seconds,
            "hold_time_ms" => self.hold_time.as_millis() as u64
        );
    }

    /// Handle a datagram from the peer. Returns true if it was a signal, i.e.
    /// it differed from the last one received. If the signal cannot be acted
    /// on the datagram is not cached, so the next copy of it signals again.
    pub(crate) fn on_peer_message(&mut self, d: &[u8]) -> Result<bool, Error> {
        if let Err(e) = Keepalive::from_bytes(d) {
            self.counters.malformed_received += 1;
            return Err(e);
        }
        self.counters.keepalives_received += 1;

        if self.peer.matches(d) {
            sm_log!(self, trace, "peer keepalive unchanged");
            return Ok(false);
        }
        self.signal()?;
        self.peer = KeepaliveMessage::from_bytes(d);
        Ok(true)
    }

    /// The peer's advertisement changed. The hold timer is armed before
    /// entering Up, so a session is never Up without one.
    pub(crate) fn signal(&mut self) -> Result<(), Error> {
        match self.status {
            SessionStatus::Down => self.transition(SessionStatus::Init),
            SessionStatus::Init => {
                self.arm_hold_timer()?;
                self.transition(SessionStatus::Up);
            }
            SessionStatus::Up => {
                sm_log!(self, trace, "peer alive, refreshing hold timer");
                self.arm_hold_timer()?;
            }
        }
        Ok(())
    }

    fn arm_hold_timer(&mut self) -> Result<(), Error> {
        self.hold_timer.arm(self.hold_time).map(|_| ())
    }

    /// Arm the hold timer afresh if the session is Up without one, as it is
    /// after a stop. The peer gets a full hold time from now.
    pub(crate) fn rearm_hold_timer(&mut self) -> Result<(), Error> {
        if self.status == SessionStatus::Up && !self.hold_timer.is_armed() {
            sm_log!(self, debug, "re-arming hold timer");
            self.arm_hold_timer()?;
        }
        Ok(())
    }

    /// The hold timer fired. Returns true if this took the session down.
    pub(crate) fn hold_timer_expired(&mut self, handle: TimerHandle) -> bool {
        if !self.hold_timer.is_current(handle) {
            sm_log!(self, debug, "ignoring stale hold timer {}", handle);
            return false;
        }
        self.hold_timer.cancel();

        if self.status != SessionStatus::Up {
            sm_log!(self, warn, "hold timer fired outside of up");
            return false;
        }

        sm_log!(self, warn, "hold timer expired";
            "hold_time_ms" => self.hold_time.as_millis() as u64
        );
        self.transition(SessionStatus::Down);
        self.try_switchover();
        true
    }

    fn transition(&mut self, to: SessionStatus) {
        let from = self.status;
        self.status = to;
        if from == SessionStatus::Up && to == SessionStatus::Down {
            self.counters.down_transitions += 1;
        }
        self.encode();
        sm_log!(self, info, "transition {} -> {}", from, to);
        self.notify(SessionEvent::StatusChanged { from, to });
    }

    /// Promote a backup to master after its peer has been lost. Masters are
    /// left as they are. Returns true if the role changed.
    pub(crate) fn try_switchover(&mut self) -> bool {
        if self.role != MastershipRole::Backup {
            return false;
        }
        self.switch_role(MastershipRole::Master);
        true
    }

    /// Operator requested switchover: flip the role whatever it is.
    pub(crate) fn force_switchover(&mut self) -> MastershipRole {
        self.switch_role(self.role.flipped());
        self.role
    }

    fn switch_role(&mut self, to: MastershipRole) {
        let from = self.role;
        self.notify(SessionEvent::PreSwitchover { role: from });
        self.role = to;
        self.encode();
        sm_log!(self, info, "switchover {} -> {}", from, to);
        self.notify(SessionEvent::PostSwitchover { from, to });
    }

    fn notify(&mut self, event: SessionEvent) {
        let n = Notification {
            name: self.name.clone(),
            key: self.key,
            event,
            status: self.status,
            role: self.role,
            message: self.local.clone(),
        };
        self.subscribers.notify(&n);
    }

    pub(crate) fn subscribe(
        &mut self,
    ) -> (SubscriberId, Receiver<Notification>) {
        self.subscribers.subscribe()
    }

    pub(crate) fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Drop the hold timer registration, if any.
    pub(crate) fn cancel_hold_timer(&mut self) {
        self.hold_timer.cancel();
    }

    pub(crate) fn hold_timer_armed(&self) -> bool {
        self.hold_timer.is_armed()
    }

    pub(crate) fn info(&self, started: bool) -> SessionInfo {
        SessionInfo {
            name: self.name.clone(),
            key: self.key,
            role: self.role,
            status: self.status,
            keepalive_interval: self.keepalive_interval,
            hold_time_ms: self.hold_time.as_millis() as u64,
            hold_timer_remaining_ms: self
                .hold_timer
                .remaining()
                .map(|d| d.as_millis() as u64),
            counters: self.counters,
            paused: self.paused,
            started,
        }
    }
}
