// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// This file contains code for testing purposes only. It is only included in
/// `lib.rs` behind a `#[cfg(test)]` guard. It implements `Transport` over a
/// simulated datagram network so sessions can be exercised without sockets.
use crate::error::Error;
use crate::transport::{Transport, RECV_POLL_INTERVAL};
use crate::ConnectionKey;
use cm_common::lock;
use slog::Logger;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

type Datagram = (SocketAddr, Vec<u8>);

lazy_static! {
    static ref NET: Network = Network::default();
}

/// A simulated network mapping bound addresses to their inboxes. Delivery to
/// an unbound address silently drops the datagram, as UDP would.
#[derive(Default)]
pub struct Network {
    endpoints: Mutex<HashMap<SocketAddr, Sender<Datagram>>>,
}

impl Network {
    fn bind(&self, sa: SocketAddr) -> Result<Receiver<Datagram>, Error> {
        let mut endpoints = lock!(self.endpoints);
        if endpoints.contains_key(&sa) {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::AddrInUse,
                format!("{sa} already bound"),
            )));
        }
        let (tx, rx) = channel();
        endpoints.insert(sa, tx);
        Ok(rx)
    }

    fn unbind(&self, sa: SocketAddr) {
        lock!(self.endpoints).remove(&sa);
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, d: &[u8]) {
        if let Some(tx) = lock!(self.endpoints).get(&to) {
            let _ = tx.send((from, d.to_vec()));
        }
    }
}

/// A session transport on the simulated network.
pub struct ChannelTransport {
    addr: SocketAddr,
    peer: SocketAddr,
    rx: Mutex<Receiver<Datagram>>,
    closed: AtomicBool,
}

impl Transport for ChannelTransport {
    fn open(key: &ConnectionKey, _log: &Logger) -> Result<Self, Error> {
        let addr = key.source();
        let rx = NET.bind(addr)?;
        Ok(Self {
            addr,
            peer: key.destination(),
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
        })
    }

    fn send(&self, d: &[u8]) -> Result<(), Error> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::Closed);
        }
        NET.deliver(self.addr, self.peer, d);
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::Closed);
        }
        let poll = RECV_POLL_INTERVAL.min(Duration::from_millis(20));
        match lock!(self.rx).recv_timeout(poll) {
            Ok((from, d)) => {
                if from != self.peer {
                    return Ok(None);
                }
                let n = d.len().min(buf.len());
                buf[..n].copy_from_slice(&d[..n]);
                Ok(Some(n))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Closed),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::Relaxed) {
            NET.unbind(self.addr);
        }
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// A bare endpoint on the simulated network, standing in for a remote peer
/// in tests.
pub struct Peer {
    pub addr: SocketAddr,
    rx: Receiver<Datagram>,
}

impl Peer {
    pub fn bind(addr: SocketAddr) -> Self {
        let rx = NET.bind(addr).expect("bind test peer");
        Self { addr, rx }
    }

    pub fn send_to(&self, to: SocketAddr, d: &[u8]) {
        NET.deliver(self.addr, to, d);
    }

    /// Wait up to `timeout` for a datagram.
    pub fn recv(&self, timeout: Duration) -> Option<Datagram> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Discard everything received so far, returning how many datagrams
    /// there were.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        NET.unbind(self.addr);
    }
}
