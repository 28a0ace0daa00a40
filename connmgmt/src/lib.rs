// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Keepalive based connection management with master/backup failover.
//!
//! Each configured connection runs a [`session::Session`] that periodically
//! sends a fixed-format keepalive datagram to its peer and watches for the
//! peer's keepalives. Sessions progress Down -> Init -> Up as the peer's
//! advertisement changes, and fall back to Down when the hold timer expires
//! without a fresh advertisement. A backup session that loses its peer
//! promotes itself to master.

use num_enum::TryFromPrimitive;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

pub mod clock;
pub mod error;
pub mod hold;
mod io;
mod log;
pub mod manager;
pub mod observer;
pub mod packet;
pub mod session;
mod sm;
pub mod transport;

#[cfg(test)]
#[macro_use]
extern crate lazy_static;


#[cfg(test)]
mod transport_channel;

pub use error::Error;
pub use manager::SessionManager;

pub const COMPONENT_CONNMGMT: &str = "connmgmt";
pub const MOD_SESSION: &str = "session";
pub const MOD_MANAGER: &str = "manager";
pub const MOD_CLOCK: &str = "clock";

/// Keepalive interval assigned to newly configured sessions, in seconds.
pub const DEFAULT_KEEPALIVE_INTERVAL: u16 = 5;

/// Largest keepalive interval, in seconds, whose hold time still fits in the
/// two byte millisecond field of a keepalive packet.
pub const MAX_KEEPALIVE_INTERVAL: u16 = 32;

/// The hold time for a given keepalive interval.
pub fn hold_time(keepalive_interval: u16) -> Duration {
    Duration::from_secs(u64::from(keepalive_interval) * 2)
}

/// Check that a keepalive interval is within the supported range.
pub fn validate_keepalive_interval(seconds: u64) -> Result<u16, Error> {
    match u16::try_from(seconds) {
        Ok(s) if (1..=MAX_KEEPALIVE_INTERVAL).contains(&s) => Ok(s),
        _ => Err(Error::Validation(format!(
            "keepalive interval must be between 1 and {} seconds, got {}",
            MAX_KEEPALIVE_INTERVAL, seconds,
        ))),
    }
}

/// Which side of a master/backup pair a session is on.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    TryFromPrimitive,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[repr(u8)]
#[serde(rename_all = "lowercase")]
pub enum MastershipRole {
    Master = 0,
    Backup = 1,
}

impl MastershipRole {
    /// The opposite role.
    pub fn flipped(self) -> Self {
        match self {
            Self::Master => Self::Backup,
            Self::Backup => Self::Master,
        }
    }
}

impl Display for MastershipRole {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Backup => write!(f, "backup"),
        }
    }
}

impl FromStr for MastershipRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "master" => Ok(Self::Master),
            "backup" => Ok(Self::Backup),
            _ => Err(Error::Validation(format!(
                "mastership must be master or backup, got {s:?}"
            ))),
        }
    }
}

/// The liveness status of a session.
#[derive(
    Default,
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    TryFromPrimitive,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[repr(u8)]
pub enum SessionStatus {
    /// The initial state, and the state after the hold timer expires.
    #[default]
    Down = 0,

    /// The peer's advertisement has changed once since the session went down.
    Init = 1,

    /// The peer's advertisement has changed again while in init. The hold
    /// timer is armed in this state.
    Up = 2,
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Down => write!(f, "down"),
            Self::Init => write!(f, "init"),
            Self::Up => write!(f, "up"),
        }
    }
}

/// The 4-tuple identifying a connection. No two sessions may share a key.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub struct ConnectionKey {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
}

impl ConnectionKey {
    /// Create a key, folding IPv4-mapped IPv6 addresses down to IPv4 so that
    /// keys compare the same way they are carried on the wire.
    pub fn new(
        src_ip: IpAddr,
        src_port: u16,
        dst_ip: IpAddr,
        dst_port: u16,
    ) -> Self {
        Self {
            src_ip: src_ip.to_canonical(),
            src_port,
            dst_ip: dst_ip.to_canonical(),
            dst_port,
        }
    }

    pub fn source(&self) -> SocketAddr {
        SocketAddr::new(self.src_ip, self.src_port)
    }

    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(self.dst_ip, self.dst_port)
    }
}

impl Display for ConnectionKey {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{} -> {}", self.source(), self.destination())
    }
}

/// A request to configure a new session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SessionConfig {
    /// Unique name of the session.
    pub name: String,
    /// Local address the session's socket binds to.
    pub src_ip: IpAddr,
    /// Local port the session's socket binds to.
    pub src_port: u16,
    /// Address of the peer.
    pub dst_ip: IpAddr,
    /// Port of the peer.
    pub dst_port: u16,
    /// Initial mastership role.
    pub role: MastershipRole,
    /// Keepalive interval in seconds. Defaults to
    /// [`DEFAULT_KEEPALIVE_INTERVAL`].
    #[serde(default)]
    pub keepalive_interval: Option<u64>,
}

impl SessionConfig {
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::new(
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port,
        )
    }

    /// Validate the request, returning the keepalive interval to use.
    pub fn validate(&self) -> Result<u16, Error> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("session name is empty".into()));
        }
        if self.name.chars().any(char::is_whitespace) {
            return Err(Error::Validation(format!(
                "session name {:?} contains whitespace",
                self.name
            )));
        }
        if self.src_port == 0 || self.dst_port == 0 {
            return Err(Error::Validation(
                "source and destination ports must be non-zero".into(),
            ));
        }
        if !self.src_ip.is_unspecified()
            && self.key().source() == self.key().destination()
        {
            return Err(Error::Validation(
                "source and destination are the same address".into(),
            ));
        }
        if self.dst_ip.is_unspecified() {
            return Err(Error::Validation(
                "destination address is unspecified".into(),
            ));
        }
        match self.keepalive_interval {
            Some(secs) => validate_keepalive_interval(secs),
            None => Ok(DEFAULT_KEEPALIVE_INTERVAL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_common::ip;
    use pretty_assertions::assert_eq;

    fn config() -> SessionConfig {
        SessionConfig {
            name: "a".into(),
            src_ip: ip!("10.0.0.1"),
            src_port: 5000,
            dst_ip: ip!("10.0.0.2"),
            dst_port: 6000,
            role: MastershipRole::Backup,
            keepalive_interval: None,
        }
    }

    #[test]
    fn role_from_str() {
        assert_eq!(
            "master".parse::<MastershipRole>().unwrap(),
            MastershipRole::Master
        );
        assert_eq!(
            "Backup".parse::<MastershipRole>().unwrap(),
            MastershipRole::Backup
        );
        assert!(matches!(
            "primary".parse::<MastershipRole>(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn hold_time_is_twice_interval() {
        for secs in 1..=MAX_KEEPALIVE_INTERVAL {
            assert_eq!(hold_time(secs), Duration::from_secs(2) * secs.into());
        }
    }

    #[test]
    fn interval_range() {
        assert!(validate_keepalive_interval(0).is_err());
        assert_eq!(validate_keepalive_interval(1).unwrap(), 1);
        assert_eq!(
            validate_keepalive_interval(MAX_KEEPALIVE_INTERVAL.into())
                .unwrap(),
            MAX_KEEPALIVE_INTERVAL
        );
        assert!(validate_keepalive_interval(33).is_err());
        assert!(validate_keepalive_interval(u64::MAX).is_err());
    }

    #[test]
    fn config_validation() {
        assert_eq!(config().validate().unwrap(), DEFAULT_KEEPALIVE_INTERVAL);

        let cfg = SessionConfig {
            keepalive_interval: Some(2),
            ..config()
        };
        assert_eq!(cfg.validate().unwrap(), 2);

        let cfg = SessionConfig {
            name: " ".into(),
            ..config()
        };
        assert!(cfg.validate().is_err());

        let cfg = SessionConfig {
            dst_port: 0,
            ..config()
        };
        assert!(cfg.validate().is_err());

        let cfg = SessionConfig {
            dst_ip: ip!("10.0.0.1"),
            dst_port: 5000,
            ..config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn mapped_addresses_are_canonical() {
        let key = ConnectionKey::new(
            ip!("::ffff:10.0.0.1"),
            5000,
            ip!("10.0.0.2"),
            6000,
        );
        let expected: IpAddr = ip!("10.0.0.1");
        assert_eq!(key.src_ip, expected);
        assert_eq!(key.to_string(), "10.0.0.1:5000 -> 10.0.0.2:6000");
    }
}
