// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::clock::Scheduler;
use crate::error::Error;
use crate::log::manager_log;
use crate::observer::{Notification, SubscriberId};
use crate::session::{Session, SessionInfo};
use crate::transport::{Transport, UdpTransport};
use crate::{ConnectionKey, MastershipRole, SessionConfig};
use cm_common::{read_lock, write_lock};
use slog::Logger;
use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, RwLock};

const UNIT: &str = "manager";

/// Sessions indexed both by name and by connection key. The two maps always
/// hold the same set of sessions.
struct Registry<T: Transport> {
    by_name: BTreeMap<String, Arc<Session<T>>>,
    by_key: BTreeMap<ConnectionKey, Arc<Session<T>>>,
}

impl<T: Transport> Default for Registry<T> {
    fn default() -> Self {
        Self {
            by_name: BTreeMap::new(),
            by_key: BTreeMap::new(),
        }
    }
}

/// Owns every configured session and the scheduler their hold timers run
/// on.
pub struct SessionManager<T: Transport = UdpTransport> {
    registry: RwLock<Registry<T>>,
    scheduler: Arc<dyn Scheduler>,
    log: Logger,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(scheduler: Arc<dyn Scheduler>, log: Logger) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            scheduler,
            log,
        }
    }

    /// Create a session and start it. A session whose start fails stays
    /// configured, and the start error is returned; `start` may be retried.
    pub fn configure(
        &self,
        cfg: SessionConfig,
    ) -> Result<Arc<Session<T>>, Error> {
        let interval = cfg.validate()?;
        let key = cfg.key();

        let session = {
            let mut reg = write_lock!(self.registry);
            if reg.by_name.contains_key(&cfg.name) {
                return Err(Error::SessionExists(cfg.name));
            }
            if reg.by_key.contains_key(&key) {
                return Err(Error::KeyExists(key));
            }
            let session = Session::new(
                cfg.name.clone(),
                key,
                cfg.role,
                interval,
                self.scheduler.clone(),
                self.log.clone(),
            );
            reg.by_name.insert(cfg.name.clone(), session.clone());
            reg.by_key.insert(key, session.clone());
            session
        };

        manager_log!(self, info, "configured session {}", cfg.name;
            "conn" => format_args!("{}", key),
            "role" => format_args!("{}", cfg.role),
            "interval" => interval
        );

        if let Err(e) = session.start() {
            manager_log!(self, error,
                "failed to start session {}: {}", cfg.name, e
            );
            return Err(e);
        }
        Ok(session)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Session<T>>, Error> {
        read_lock!(self.registry)
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn get_by_key(&self, key: &ConnectionKey) -> Option<Arc<Session<T>>> {
        read_lock!(self.registry).by_key.get(key).cloned()
    }

    fn sessions(&self) -> Vec<Arc<Session<T>>> {
        read_lock!(self.registry).by_name.values().cloned().collect()
    }

    /// Start a configured session that is not running.
    pub fn start(&self, name: &str) -> Result<(), Error> {
        self.get(name)?.start()
    }

    pub fn set_keepalive_interval(
        &self,
        name: &str,
        seconds: u64,
    ) -> Result<(), Error> {
        self.get(name)?.set_keepalive_interval(seconds)
    }

    pub fn pause(&self, name: &str) -> Result<(), Error> {
        self.get(name)?.pause();
        Ok(())
    }

    pub fn resume(&self, name: &str) -> Result<(), Error> {
        self.get(name)?.resume();
        Ok(())
    }

    /// Describe one session, or all of them sorted by name.
    pub fn show(&self, name: Option<&str>) -> Result<Vec<SessionInfo>, Error> {
        match name {
            Some(name) => Ok(vec![self.get(name)?.info()]),
            None => Ok(self.sessions().iter().map(|s| s.info()).collect()),
        }
    }

    /// Flip the mastership role of every session. Returns each session's
    /// name and new role.
    pub fn switchover(&self) -> Vec<(String, MastershipRole)> {
        let result: Vec<(String, MastershipRole)> = self
            .sessions()
            .iter()
            .map(|s| (s.name.clone(), s.switchover()))
            .collect();
        manager_log!(self, info, "manual switchover";
            "sessions" => result.len()
        );
        result
    }

    /// Remove a session from the registry and tear it down.
    pub fn remove(&self, name: &str) -> Result<(), Error> {
        let session = {
            let mut reg = write_lock!(self.registry);
            let session = reg
                .by_name
                .remove(name)
                .ok_or_else(|| Error::NotFound(name.to_string()))?;
            reg.by_key.remove(&session.key);
            session
        };
        session.stop();
        manager_log!(self, info, "removed session {}", name);
        Ok(())
    }

    pub fn subscribe(
        &self,
        name: &str,
    ) -> Result<(SubscriberId, Receiver<Notification>), Error> {
        Ok(self.get(name)?.subscribe())
    }

    pub fn unsubscribe(
        &self,
        name: &str,
        id: SubscriberId,
    ) -> Result<bool, Error> {
        Ok(self.get(name)?.unsubscribe(id))
    }

    pub fn len(&self) -> usize {
        read_lock!(self.registry).by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every session. Sessions remain configured.
    pub fn shutdown(&self) {
        for s in self.sessions() {
            s.stop();
        }
        manager_log!(self, info, "all sessions stopped");
    }
}

impl<T: Transport> Drop for SessionManager<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
