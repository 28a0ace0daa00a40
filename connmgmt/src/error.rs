// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::ConnectionKey;
use num_enum::TryFromPrimitiveError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("too small: expected at least {expected} bytes, found {found}")]
    TooSmall { expected: usize, found: usize },

    #[error("invalid mastership role: {0}")]
    InvalidRole(#[from] TryFromPrimitiveError<crate::MastershipRole>),

    #[error("invalid session status: {0}")]
    InvalidStatus(#[from] TryFromPrimitiveError<crate::SessionStatus>),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport closed")]
    Closed,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("session {0} already exists")]
    SessionExists(String),

    #[error("a session for {0} already exists")]
    KeyExists(ConnectionKey),

    #[error("session {0} not found")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("failed to start task: {0}")]
    TaskStart(String),

    #[error("timer scheduler stopped")]
    SchedulerStopped,
}
