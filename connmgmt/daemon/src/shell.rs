// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The line oriented operator shell read from stdin.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use connmgmt::session::SessionInfo;
use connmgmt::transport::Transport;
use connmgmt::{MastershipRole, SessionConfig, SessionManager, SessionStatus};
use std::io::{BufRead, Write};
use std::net::IpAddr;
use tabwriter::TabWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    Master,
    Backup,
}

impl From<Role> for MastershipRole {
    fn from(r: Role) -> Self {
        match r {
            Role::Master => MastershipRole::Master,
            Role::Backup => MastershipRole::Backup,
        }
    }
}

#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_version_flag = true)]
pub struct Line {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Configure and start a session.
    Configure {
        name: String,
        src_ip: IpAddr,
        src_port: u16,
        dst_ip: IpAddr,
        dst_port: u16,
        role: Role,
    },

    /// Set a session's keepalive interval in seconds.
    Interval { name: String, seconds: u64 },

    /// Show one session or all of them.
    Show {
        name: Option<String>,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Flip the mastership role of every session.
    Switchover,

    /// Start a configured session that is not running.
    Start { name: String },

    /// Stop sending keepalives on a session.
    Pause { name: String },

    /// Resume sending keepalives on a session.
    Resume { name: String },

    /// Stop and delete a session.
    Remove { name: String },

    /// Leave the shell.
    Exit,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Parse one input line. Blank lines and comments yield `None`.
pub fn parse(line: &str) -> Option<Result<Command, clap::Error>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(Line::try_parse_from(line.split_whitespace()).map(|l| l.command))
}

/// Read commands from `input` until it ends or an `exit` command.
pub fn run<T: Transport, R: BufRead, W: Write>(
    mgr: &SessionManager<T>,
    input: R,
    out: &mut W,
) -> Result<()> {
    prompt(out)?;
    for line in input.lines() {
        let line = line?;
        match parse(&line) {
            None => {}
            Some(Err(e)) => write!(out, "{}", e.render())?,
            Some(Ok(cmd)) => match execute(mgr, cmd, out) {
                Ok(Flow::Exit) => return Ok(()),
                Ok(Flow::Continue) => {}
                Err(e) => writeln!(out, "{} {}", "error:".red().bold(), e)?,
            },
        }
        prompt(out)?;
    }
    Ok(())
}

fn prompt<W: Write>(out: &mut W) -> Result<()> {
    write!(out, "connmgmt> ")?;
    out.flush()?;
    Ok(())
}

pub fn execute<T: Transport, W: Write>(
    mgr: &SessionManager<T>,
    cmd: Command,
    out: &mut W,
) -> Result<Flow> {
    match cmd {
        Command::Configure {
            name,
            src_ip,
            src_port,
            dst_ip,
            dst_port,
            role,
        } => {
            mgr.configure(SessionConfig {
                name,
                src_ip,
                src_port,
                dst_ip,
                dst_port,
                role: role.into(),
                keepalive_interval: None,
            })?;
        }
        Command::Interval { name, seconds } => {
            mgr.set_keepalive_interval(&name, seconds)?;
        }
        Command::Show { name, json } => {
            let info = mgr.show(name.as_deref())?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&info)?)?;
            } else {
                write_table(out, &info)?;
            }
        }
        Command::Switchover => {
            for (name, role) in mgr.switchover() {
                writeln!(out, "{name}: {role}")?;
            }
        }
        Command::Start { name } => mgr.start(&name)?,
        Command::Pause { name } => mgr.pause(&name)?,
        Command::Resume { name } => mgr.resume(&name)?,
        Command::Remove { name } => mgr.remove(&name)?,
        Command::Exit => return Ok(Flow::Exit),
    }
    Ok(Flow::Continue)
}

fn status_colored(s: SessionStatus) -> colored::ColoredString {
    match s {
        SessionStatus::Up => s.to_string().green(),
        SessionStatus::Init => s.to_string().yellow(),
        SessionStatus::Down => s.to_string().red(),
    }
}

pub fn write_table<W: Write>(out: &mut W, info: &[SessionInfo]) -> Result<()> {
    let mut tw = TabWriter::new(out);
    writeln!(
        &mut tw,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        "Name".dimmed(),
        "Connection".dimmed(),
        "Role".dimmed(),
        "Status".dimmed(),
        "Interval".dimmed(),
        "Hold".dimmed(),
        "Sent".dimmed(),
        "Received".dimmed(),
        "Malformed".dimmed(),
        "Flags".dimmed(),
    )?;
    for i in info {
        let hold = match i.hold_timer_remaining_ms {
            Some(remaining) => format!("{}/{}ms", remaining, i.hold_time_ms),
            None => format!("{}ms", i.hold_time_ms),
        };
        let mut flags = Vec::new();
        if !i.started {
            flags.push("stopped");
        }
        if i.paused {
            flags.push("paused");
        }
        writeln!(
            &mut tw,
            "{}\t{}\t{}\t{}\t{}s\t{}\t{}\t{}\t{}\t{}",
            i.name,
            i.key,
            i.role,
            status_colored(i.status),
            i.keepalive_interval,
            hold,
            i.counters.keepalives_sent,
            i.counters.keepalives_received,
            i.counters.malformed_received,
            flags.join(","),
        )?;
    }
    tw.flush()?;
    Ok(())
}
