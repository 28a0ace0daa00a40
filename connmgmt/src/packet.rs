// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use crate::{ConnectionKey, MastershipRole, SessionStatus};
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

/// Size of an encoded keepalive packet.
pub const KEEPALIVE_SIZE: usize = 56;

/// Value the MAC address placeholders are always filled with.
pub const MAC_PLACEHOLDER: [u8; 8] = [0xff; 8];

/// The keepalive packet. All multi-byte fields are in network byte order.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                                                               +
/// |                       Source Address                          |
/// +                        (16 octets)                            +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Source Port          |                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               +
/// |                    Destination Address                        |
/// +                        (16 octets)                            +
/// |                                                               |
/// +                               +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                               |       Destination Port        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Role      |    Status     |                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               +
/// |                      Local MAC (8 octets)                     |
/// +                               +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                               |                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               +
/// |                      Peer MAC (8 octets)                      |
/// +                               +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                               |        Hold Time (ms)         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// IPv4 addresses are carried as IPv4-mapped IPv6 addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keepalive {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,

    /// Mastership role of the sender.
    pub role: MastershipRole,

    /// Session status as seen by the sender.
    pub status: SessionStatus,

    /// Placeholder for the sender's MAC address. No MAC discovery is done, so
    /// this is always [`MAC_PLACEHOLDER`] on transmit.
    pub local_mac: [u8; 8],

    /// Placeholder for the MAC address the peer reported. Always
    /// [`MAC_PLACEHOLDER`] on transmit.
    pub peer_mac: [u8; 8],

    /// The hold time the sender has armed, in milliseconds.
    pub hold_time_ms: u16,
}

impl Keepalive {
    pub fn new(
        key: &ConnectionKey,
        role: MastershipRole,
        status: SessionStatus,
        hold_time: Duration,
    ) -> Self {
        Self {
            src_ip: key.src_ip,
            src_port: key.src_port,
            dst_ip: key.dst_ip,
            dst_port: key.dst_port,
            role,
            status,
            local_mac: MAC_PLACEHOLDER,
            peer_mac: MAC_PLACEHOLDER,
            hold_time_ms: u16::try_from(hold_time.as_millis())
                .unwrap_or(u16::MAX),
        }
    }

    /// The connection key the sender claims for itself.
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::new(
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port,
        )
    }

    pub fn hold_time(&self) -> Duration {
        Duration::from_millis(self.hold_time_ms.into())
    }

    /// Serialize a `Keepalive` as a vector of bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(KEEPALIVE_SIZE);
        v.extend_from_slice(&ip_octets(self.src_ip));
        v.extend_from_slice(&self.src_port.to_be_bytes());
        v.extend_from_slice(&ip_octets(self.dst_ip));
        v.extend_from_slice(&self.dst_port.to_be_bytes());
        v.push(self.role as u8);
        v.push(self.status as u8);
        v.extend_from_slice(&self.local_mac);
        v.extend_from_slice(&self.peer_mac);
        v.extend_from_slice(&self.hold_time_ms.to_be_bytes());
        v
    }

    /// Deserialize an array of bytes as a `Keepalive`. Bytes beyond
    /// [`KEEPALIVE_SIZE`] are ignored.
    pub fn from_bytes(d: &[u8]) -> Result<Self, Error> {
        if d.len() < KEEPALIVE_SIZE {
            return Err(Error::TooSmall {
                expected: KEEPALIVE_SIZE,
                found: d.len(),
            });
        }
        Ok(Self {
            src_ip: ip_from_octets(&d[0..16]),
            src_port: u16::from_be_bytes([d[16], d[17]]),
            dst_ip: ip_from_octets(&d[18..34]),
            dst_port: u16::from_be_bytes([d[34], d[35]]),
            role: MastershipRole::try_from(d[36])?,
            status: SessionStatus::try_from(d[37])?,
            local_mac: mac(&d[38..46]),
            peer_mac: mac(&d[46..54]),
            hold_time_ms: u16::from_be_bytes([d[54], d[55]]),
        })
    }
}

fn ip_octets(addr: IpAddr) -> [u8; 16] {
    match addr {
        IpAddr::V4(a) => a.to_ipv6_mapped().octets(),
        IpAddr::V6(a) => a.octets(),
    }
}

fn ip_from_octets(d: &[u8]) -> IpAddr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(d);
    IpAddr::V6(Ipv6Addr::from(octets)).to_canonical()
}

fn mac(d: &[u8]) -> [u8; 8] {
    let mut m = [0u8; 8];
    m.copy_from_slice(d);
    m
}

/// An immutable snapshot of an encoded keepalive, either the last one this
/// side produced or the last one received from the peer. Clones share the
/// underlying buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeepaliveMessage {
    bytes: Arc<Vec<u8>>,
}

impl KeepaliveMessage {
    /// Wrap raw bytes, as received off the wire.
    pub fn from_bytes(d: &[u8]) -> Self {
        Self {
            bytes: Arc::new(d.to_vec()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The declared size of the message.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns true if `d` is byte-for-byte the same message.
    pub fn matches(&self, d: &[u8]) -> bool {
        self.bytes.as_slice() == d
    }

    pub fn decode(&self) -> Result<Keepalive, Error> {
        Keepalive::from_bytes(&self.bytes)
    }
}

impl From<&Keepalive> for KeepaliveMessage {
    fn from(ka: &Keepalive) -> Self {
        Self {
            bytes: Arc::new(ka.to_bytes()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use cm_common::ip;
    use pretty_assertions::assert_eq;

    fn key() -> ConnectionKey {
        ConnectionKey::new(ip!("10.0.0.1"), 5000, ip!("10.0.0.2"), 6000)
    }

    #[test]
    fn encode_layout() {
        let ka = Keepalive::new(
            &key(),
            MastershipRole::Backup,
            SessionStatus::Init,
            Duration::from_secs(4),
        );
        let b = ka.to_bytes();
        assert_eq!(b.len(), KEEPALIVE_SIZE);

        // 10.0.0.1 as an IPv4-mapped address
        assert_eq!(&b[0..10], &[0u8; 10]);
        assert_eq!(&b[10..16], &[0xff, 0xff, 10, 0, 0, 1]);
        assert_eq!(&b[16..18], &5000u16.to_be_bytes());
        assert_eq!(&b[28..34], &[0xff, 0xff, 10, 0, 0, 2]);
        assert_eq!(&b[34..36], &6000u16.to_be_bytes());
        assert_eq!(b[36], 1);
        assert_eq!(b[37], 1);
        assert_eq!(&b[38..54], &[0xff; 16]);
        assert_eq!(&b[54..56], &4000u16.to_be_bytes());
    }

    #[test]
    fn decode_encoded() {
        let v4 = Keepalive::new(
            &key(),
            MastershipRole::Master,
            SessionStatus::Up,
            Duration::from_millis(64000),
        );
        assert_eq!(Keepalive::from_bytes(&v4.to_bytes()).unwrap(), v4);

        let v6 = Keepalive::new(
            &ConnectionKey::new(ip!("fd00::1"), 1, ip!("2001:db8::"), 2),
            MastershipRole::Backup,
            SessionStatus::Down,
            Duration::from_secs(2),
        );
        let decoded = Keepalive::from_bytes(&v6.to_bytes()).unwrap();
        assert_eq!(decoded, v6);
        assert_eq!(decoded.key(), v6.key());
        assert_eq!(decoded.hold_time(), Duration::from_secs(2));
    }

    #[test]
    fn decode_too_small() {
        let ka = Keepalive::new(
            &key(),
            MastershipRole::Master,
            SessionStatus::Down,
            Duration::from_secs(10),
        );
        let b = ka.to_bytes();
        match Keepalive::from_bytes(&b[..KEEPALIVE_SIZE - 1]) {
            Err(Error::TooSmall { expected, found }) => {
                assert_eq!(expected, KEEPALIVE_SIZE);
                assert_eq!(found, KEEPALIVE_SIZE - 1);
            }
            other => panic!("expected too small error, got {other:?}"),
        }
        assert!(matches!(
            Keepalive::from_bytes(&[]),
            Err(Error::TooSmall { .. })
        ));
    }

    #[test]
    fn decode_trailing_bytes_ignored() {
        let ka = Keepalive::new(
            &key(),
            MastershipRole::Master,
            SessionStatus::Up,
            Duration::from_secs(10),
        );
        let mut b = ka.to_bytes();
        b.extend_from_slice(&[1, 2, 3]);
        assert_eq!(Keepalive::from_bytes(&b).unwrap(), ka);
    }

    #[test]
    fn decode_bad_enums() {
        let ka = Keepalive::new(
            &key(),
            MastershipRole::Master,
            SessionStatus::Up,
            Duration::from_secs(10),
        );
        let mut b = ka.to_bytes();
        b[36] = 7;
        assert!(matches!(
            Keepalive::from_bytes(&b),
            Err(Error::InvalidRole(_))
        ));

        let mut b = ka.to_bytes();
        b[37] = 3;
        assert!(matches!(
            Keepalive::from_bytes(&b),
            Err(Error::InvalidStatus(_))
        ));
    }

    #[test]
    fn message_snapshot() {
        let empty = KeepaliveMessage::default();
        assert!(empty.is_empty());
        assert_eq!(empty.size(), 0);

        let ka = Keepalive::new(
            &key(),
            MastershipRole::Backup,
            SessionStatus::Down,
            Duration::from_secs(10),
        );
        let msg = KeepaliveMessage::from(&ka);
        assert_eq!(msg.size(), KEEPALIVE_SIZE);
        assert!(msg.matches(&ka.to_bytes()));
        assert!(!msg.matches(&ka.to_bytes()[..10]));
        assert!(!empty.matches(&ka.to_bytes()));
        assert_eq!(msg.decode().unwrap(), ka);
        assert_eq!(msg.clone(), msg);
    }
}
