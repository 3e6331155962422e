// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session supervisor: accept connections one at a time, perform the
//! handshake, and either promote a connection to the active session or
//! reject it. Pure connection arbitration — never touches the exchange or
//! the generator directly.

use crate::gpio::GpioWindow;
use crate::protocol;
use crate::session::{serve, Session, SessionToken};
use std::io;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Accept loop. Runs until the listener itself errors out; individual
/// connection failures are logged and the loop continues.
pub fn run(listener: TcpListener, gpio: Arc<GpioWindow>) -> io::Result<()> {
    let token = Arc::new(SessionToken::new());

    loop {
        let (stream, addr) = listener.accept()?;
        let addr = addr.to_string();
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("{addr}: failed to set TCP_NODELAY: {e}");
        }
        let mut session = Session::new(stream, addr.clone());

        match session.read_line_with_timeout(Some(HANDSHAKE_TIMEOUT)) {
            Ok(Some(line)) if line.trim_end_matches(['\r', '\n']) == "PWM0" => {
                handle_handshake(session, addr.clone(), gpio.clone(), token.clone());
            }
            Ok(Some(_)) => {
                log::debug!("{addr}: discarded non-handshake first line");
            }
            Ok(None) => {
                log::debug!("{addr}: closed before sending a handshake");
            }
            Err(e) => {
                log::warn!("{addr}: handshake read failed: {e}");
            }
        }
    }
}

fn handle_handshake(mut session: Session, addr: String, gpio: Arc<GpioWindow>, token: Arc<SessionToken>) {
    match token.try_acquire(&addr) {
        Err(busy_addr) => {
            let _ = session.write_response(&protocol::format_busy(&busy_addr));
            log::info!("{addr}: rejected, {busy_addr} already has the session");
        }
        Ok(()) => {
            if let Err(e) = session.write_response(&protocol::format_helo()) {
                log::warn!("{addr}: failed to send HELO: {e}");
                token.release();
                return;
            }
            log::info!("{addr}: session started");
            std::thread::spawn(move || {
                if let Err(e) = serve(&mut session, gpio) {
                    log::warn!("{addr}: session ended with error: {e}");
                } else {
                    log::info!("{addr}: session ended");
                }
                token.release();
            });
        }
    }
}
