// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use crate::{ConnectionKey, COMPONENT_CONNMGMT, MOD_SESSION};
use slog::{warn, Logger};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// How long a receive blocks before giving the caller a chance to check
/// whether it should stop.
pub const RECV_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Largest datagram a session will read. Anything longer is truncated, which
/// is harmless since only the first `KEEPALIVE_SIZE` bytes are significant.
pub const MAX_DATAGRAM: usize = 1024;

/// The datagram transport underneath a session.
pub trait Transport: Send + Sync + Sized + 'static {
    /// Open a transport bound to the key's source address that sends to the
    /// key's destination address.
    fn open(key: &ConnectionKey, log: &Logger) -> Result<Self, Error>;

    /// Send one datagram to the peer.
    fn send(&self, d: &[u8]) -> Result<(), Error>;

    /// Wait for one datagram from the peer. Returns `Ok(None)` if nothing
    /// arrived within the transport's poll interval, and `Error::Closed` once
    /// the transport has been closed.
    fn recv(&self, buf: &mut [u8]) -> Result<Option<usize>, Error>;

    /// Close the transport, unblocking any pending receive.
    fn close(&self);
}

/// A UDP socket transport.
pub struct UdpTransport {
    sk: UdpSocket,
    peer: SocketAddr,
    closed: AtomicBool,
    log: Logger,
}

impl Transport for UdpTransport {
    fn open(key: &ConnectionKey, log: &Logger) -> Result<Self, Error> {
        let src = key.source();
        let peer = key.destination();
        if src.is_ipv4() != peer.is_ipv4() {
            return Err(Error::InvalidAddress(format!(
                "{src} and {peer} are different address families"
            )));
        }

        let domain = if src.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let sk = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        sk.bind(&src.into())?;
        sk.set_read_timeout(Some(RECV_POLL_INTERVAL))?;

        Ok(Self {
            sk: sk.into(),
            peer,
            closed: AtomicBool::new(false),
            log: log.clone(),
        })
    }

    fn send(&self, d: &[u8]) -> Result<(), Error> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::Closed);
        }
        self.sk.send_to(d, self.peer)?;
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::Closed);
        }
        match self.sk.recv_from(buf) {
            Ok((n, sa)) => {
                if self.closed.load(Ordering::Relaxed) {
                    return Err(Error::Closed);
                }
                if sa.ip().to_canonical() != self.peer.ip() {
                    warn!(
                        self.log,
                        "udp message not from peer {} != {}, dropping",
                        sa.ip(),
                        self.peer.ip();
                        "component" => COMPONENT_CONNMGMT,
                        "module" => MOD_SESSION,
                        "unit" => "udp",
                    );
                    return Ok(None);
                }
                Ok(Some(n))
            }
            Err(e)
                if e.kind() == ErrorKind::WouldBlock
                    || e.kind() == ErrorKind::TimedOut =>
            {
                if self.closed.load(Ordering::Relaxed) {
                    Err(Error::Closed)
                } else {
                    Ok(None)
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        // Shutting down a UDP socket wakes a blocked receive on most
        // platforms. Where it does not, the read timeout bounds the wait.
        let _ = SockRef::from(&self.sk).shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::{Keepalive, KEEPALIVE_SIZE};
    use crate::{MastershipRole, SessionStatus};
    use cm_common::ip;
    use pretty_assertions::assert_eq;

    #[test]
    fn udp_exchange() -> anyhow::Result<()> {
        let log = cm_common::log::discard_logger();

        // Grab two free ports, then release them for the transports.
        let a_port = UdpSocket::bind("127.0.0.1:0")?.local_addr()?.port();
        let b_port = UdpSocket::bind("127.0.0.1:0")?.local_addr()?.port();

        let lo = ip!("127.0.0.1");
        let a_key = ConnectionKey::new(lo, a_port, lo, b_port);
        let b_key = ConnectionKey::new(lo, b_port, lo, a_port);

        let a = UdpTransport::open(&a_key, &log)?;
        let b = UdpTransport::open(&b_key, &log)?;

        // binding the same source again fails
        assert!(matches!(UdpTransport::open(&a_key, &log), Err(Error::Io(_))));

        let ka = Keepalive::new(
            &a_key,
            MastershipRole::Master,
            SessionStatus::Down,
            Duration::from_secs(10),
        );
        a.send(&ka.to_bytes())?;

        let mut buf = [0u8; MAX_DATAGRAM];
        let mut got = None;
        for _ in 0..20 {
            if let Some(n) = b.recv(&mut buf)? {
                got = Some(n);
                break;
            }
        }
        let n = got.expect("datagram");
        assert_eq!(n, KEEPALIVE_SIZE);
        assert_eq!(Keepalive::from_bytes(&buf[..n])?, ka);

        b.close();
        assert!(matches!(b.recv(&mut buf), Err(Error::Closed)));
        assert!(matches!(b.send(&[0]), Err(Error::Closed)));
        Ok(())
    }

    #[test]
    fn mixed_families_rejected() {
        let key = ConnectionKey::new(ip!("127.0.0.1"), 1, ip!("::1"), 2);
        assert!(matches!(
            UdpTransport::open(&key, &cm_common::log::discard_logger()),
            Err(Error::InvalidAddress(_))
        ));
    }
}
