// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-session sender and receiver loops.

use crate::error::Error;
use crate::log::session_log;
use crate::session::Session;
use crate::transport::{Transport, MAX_DATAGRAM, RECV_POLL_INTERVAL};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Instant;

const UNIT: &str = "io";

/// Send the session's current keepalive once per keepalive interval until
/// stopped. While paused nothing is sent.
pub(crate) fn egress<T: Transport>(
    session: Arc<Session<T>>,
    transport: Arc<T>,
    stop: Arc<AtomicBool>,
) {
    session_log!(session, debug, "sender started");
    while !stop.load(Ordering::Relaxed) {
        let (pkt, interval) = {
            let sm = session.lock();
            (sm.local().clone(), sm.keepalive_interval())
        };

        match transport.send(pkt.as_bytes()) {
            Ok(()) => session.lock().counters.keepalives_sent += 1,
            Err(Error::Closed) => break,
            Err(e) => session_log!(session, warn, "keepalive send: {}", e),
        }

        let deadline = Instant::now() + interval;
        let mut sm = session.lock();
        loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sm = session
                .wake
                .wait_timeout(sm, deadline - now)
                .expect("sender wait")
                .0;
        }
        while sm.paused && !stop.load(Ordering::Relaxed) {
            sm = session.wake.wait(sm).expect("sender pause wait");
        }
    }
    session_log!(session, debug, "sender exited");
}

/// Receive datagrams from the peer and feed them to the state machine until
/// stopped or the transport is closed.
pub(crate) fn ingress<T: Transport>(
    session: Arc<Session<T>>,
    transport: Arc<T>,
    stop: Arc<AtomicBool>,
) {
    session_log!(session, debug, "receiver started");
    let mut buf = [0u8; MAX_DATAGRAM];
    while !stop.load(Ordering::Relaxed) {
        let n = match transport.recv(&mut buf) {
            Ok(Some(n)) => n,
            Ok(None) => continue,
            Err(Error::Closed) => break,
            Err(e) => {
                session_log!(session, error, "keepalive recv: {}", e);
                sleep(RECV_POLL_INTERVAL);
                continue;
            }
        };
        match session.receive(&buf[..n]) {
            Ok(_) => {}
            Err(e @ Error::SchedulerStopped) => {
                session_log!(session, error, "arm hold timer: {}", e);
            }
            Err(e) => {
                session_log!(session, warn,
                    "dropping malformed keepalive: {}", e;
                    "size" => n
                );
            }
        }
    }
    session_log!(session, debug, "receiver exited");
}
