// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Each logging site must have a `UNIT` constant in scope naming the unit of
// code that is logging.

macro_rules! sm_log {
    ($self:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_CONNMGMT,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT,
            "session" => $self.name.as_str(),
            "status" => format_args!("{}", $self.status),
            "role" => format_args!("{}", $self.role),
            "conn" => format_args!("{}", $self.key),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_CONNMGMT,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT,
            "session" => $self.name.as_str(),
            "status" => format_args!("{}", $self.status),
            "role" => format_args!("{}", $self.role),
            "conn" => format_args!("{}", $self.key),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_CONNMGMT,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT,
            "session" => $self.name.as_str(),
            "status" => format_args!("{}", $self.status),
            "role" => format_args!("{}", $self.role),
            "conn" => format_args!("{}", $self.key),
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_CONNMGMT,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT,
            "session" => $self.name.as_str(),
            "status" => format_args!("{}", $self.status),
            "role" => format_args!("{}", $self.role),
            "conn" => format_args!("{}", $self.key),
        )
    };
}

macro_rules! session_log {
    ($self:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_CONNMGMT,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT,
            "session" => $self.name.as_str(),
            "conn" => format_args!("{}", $self.key),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_CONNMGMT,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT,
            "session" => $self.name.as_str(),
            "conn" => format_args!("{}", $self.key),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_CONNMGMT,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT,
            "session" => $self.name.as_str(),
            "conn" => format_args!("{}", $self.key),
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_CONNMGMT,
            "module" => crate::MOD_SESSION,
            "unit" => UNIT,
            "session" => $self.name.as_str(),
            "conn" => format_args!("{}", $self.key),
        )
    };
}

macro_rules! manager_log {
    ($self:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_CONNMGMT,
            "module" => crate::MOD_MANAGER,
            "unit" => UNIT,
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_CONNMGMT,
            "module" => crate::MOD_MANAGER,
            "unit" => UNIT,
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_CONNMGMT,
            "module" => crate::MOD_MANAGER,
            "unit" => UNIT,
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_CONNMGMT,
            "module" => crate::MOD_MANAGER,
            "unit" => UNIT,
        )
    };
}

pub(crate) use {manager_log, session_log, sm_log};
