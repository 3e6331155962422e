// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Software-synthesized, multi-channel PWM generator with a line-oriented
//! TCP control protocol.
//!
//! At startup: tune the host for real-time operation, map the GPIO
//! peripheral (or fall back to a no-op window on an unrecognized board),
//! bind the control port, then hand off to the [`supervisor`] accept loop,
//! which serves exactly one control session at a time for the life of the
//! process.

mod error;
mod exchange;
mod generator;
mod gpio;
mod host;
mod protocol;
mod session;
mod supervisor;
mod waveform;

use clap::Parser;
use gpio::GpioWindow;
use std::net::TcpListener;
use std::process::ExitCode;
use std::sync::Arc;

/// Port used when none is given, or the given one is out of range.
const DEFAULT_PORT: u16 = 1234;
/// Ports at or below this are rejected in favor of [`DEFAULT_PORT`].
const MIN_PORT: u16 = 1024;

#[derive(Parser, Debug)]
#[command(
    name = "pwmgen",
    version,
    about = "Software-synthesized multi-channel PWM generator"
)]
struct Args {
    /// TCP control port. Values <= 1024, or not a valid port, fall back to
    /// the default.
    port: Option<String>,
}

fn resolve_port(args: &Args) -> u16 {
    args.port
        .as_deref()
        .and_then(|raw| raw.parse::<u16>().ok())
        .filter(|&port| port > MIN_PORT)
        .unwrap_or(DEFAULT_PORT)
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    let port = resolve_port(&args);

    if let Err(e) = host::tune_host() {
        log::error!("host tuning failed, refusing to start: {e}");
        return ExitCode::FAILURE;
    }
    log::info!("host tuned for real-time operation");

    let gpio = match GpioWindow::init() {
        Ok(gpio) => Arc::new(gpio),
        Err(e) => {
            log::error!("gpio init failed: {e}");
            return ExitCode::from(2);
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", port)) {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind port {port}: {e}");
            return ExitCode::FAILURE;
        }
    };
    log::info!("pwmgen v{} listening on port {port}", env!("CARGO_PKG_VERSION"));

    match supervisor::run(listener, gpio) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("serve loop error: {e}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_ports_and_garbage_fall_back_to_default() {
        let args = Args { port: Some("80".into()) };
        assert_eq!(resolve_port(&args), DEFAULT_PORT);

        let args = Args { port: Some("not-a-port".into()) };
        assert_eq!(resolve_port(&args), DEFAULT_PORT);

        let args = Args { port: None };
        assert_eq!(resolve_port(&args), DEFAULT_PORT);
    }

    #[test]
    fn valid_high_port_is_kept() {
        let args = Args { port: Some("5000".into()) };
        assert_eq!(resolve_port(&args), 5000);
    }
}
