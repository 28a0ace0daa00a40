// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{Context, Result};
use clap::Parser;
use connmgmt::clock::Clock;
use connmgmt::transport::UdpTransport;
use connmgmt::SessionManager;
use slog::{error, info, Logger};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod config;
mod shell;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None, styles = get_styles())]
pub struct Cli {
    /// JSON file holding an array of sessions to configure at startup.
    #[arg(long)]
    config: Option<PathBuf>,

    /// How often the timer clock ticks, in milliseconds.
    #[arg(long, default_value_t = 10)]
    timer_resolution_ms: u64,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log = match &cli.log_file {
        Some(path) => cm_common::log::init_file_logger(path)
            .with_context(|| format!("open log file {path}"))?,
        None => cm_common::log::build_logger(std::io::stderr()),
    };

    let clock = Clock::new(
        Duration::from_millis(cli.timer_resolution_ms.max(1)),
        log.clone(),
    )?;
    let manager = Arc::new(SessionManager::<UdpTransport>::new(
        Arc::new(clock),
        log.clone(),
    ));

    if let Some(path) = &cli.config {
        for cfg in config::load(path)? {
            let name = cfg.name.clone();
            if let Err(e) = manager.configure(cfg) {
                error!(log, "configure session {}: {}", name, e);
            }
        }
    }

    termination_handler(manager.clone(), log.clone());
    info!(log, "connmgmtd ready"; "sessions" => manager.len());

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    shell::run(manager.as_ref(), stdin.lock(), &mut stdout)?;

    manager.shutdown();
    Ok(())
}

fn termination_handler(manager: Arc<SessionManager>, log: Logger) {
    ctrlc::set_handler(move || {
        const SIGTERM_EXIT: i32 = 130;
        info!(log, "terminating, stopping sessions");
        manager.shutdown();
        std::process::exit(SIGTERM_EXIT);
    })
    .expect("error setting termination handler");
}

/// Oxide themed CLI ;)
pub fn get_styles() -> clap::builder::Styles {
    clap::builder::Styles::styled()
        .header(anstyle::Style::new().bold().underline().fg_color(Some(
            anstyle::Color::Rgb(anstyle::RgbColor(245, 207, 101)),
        )))
        .literal(anstyle::Style::new().bold().fg_color(Some(
            anstyle::Color::Rgb(anstyle::RgbColor(72, 213, 151)),
        )))
        .invalid(anstyle::Style::new().bold().fg_color(Some(
            anstyle::Color::Rgb(anstyle::RgbColor(72, 213, 151)),
        )))
        .valid(anstyle::Style::new().bold().fg_color(Some(
            anstyle::Color::Rgb(anstyle::RgbColor(72, 213, 151)),
        )))
        .usage(anstyle::Style::new().bold().fg_color(Some(
            anstyle::Color::Rgb(anstyle::RgbColor(245, 207, 101)),
        )))
        .error(anstyle::Style::new().bold().fg_color(Some(
            anstyle::Color::Rgb(anstyle::RgbColor(232, 104, 134)),
        )))
}
