// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The active control session: buffered line I/O over one TCP connection,
//! the per-channel user-spec store, and the request loop that drives the
//! generator thread through the [`Exchange`].

use crate::error::{ProtocolError, ValidationError};
use crate::exchange::Exchange;
use crate::generator::{self, Telemetry};
use crate::gpio::{GpioWindow, NCHAN};
use crate::protocol::{self, Request, BUF_SIZE};
use crate::waveform::{GeneratorState, UserSpec, DEFAULT_TICK_RATE};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Short read timeout applied once a request's first byte has arrived, so a
/// peer that stalls mid-request doesn't pin the session indefinitely.
const REQUEST_CONTINUATION_TIMEOUT: Duration = Duration::from_millis(500);

/// How long `FREQ` waits, in one-second increments, for a first measurement.
const FREQ_WAIT_TOTAL: Duration = Duration::from_secs(4);
const FREQ_WAIT_STEP: Duration = Duration::from_secs(1);

/// Single process-wide "one session at a time" owner token.
///
/// Holds the address of whoever currently owns it; `None` means free. The
/// supervisor acquires it on a successful handshake and the control handler
/// releases it when the session tears down (see the design note on
/// process-wide session arbitration).
#[derive(Default)]
pub struct SessionToken {
    holder: Mutex<Option<String>>,
}

impl SessionToken {
    pub fn new() -> Self {
        SessionToken {
            holder: Mutex::new(None),
        }
    }

    /// Attempt to claim the token for `addr`. On failure, returns the
    /// address of the session that already holds it.
    pub fn try_acquire(&self, addr: &str) -> Result<(), String> {
        let mut holder = self.holder.lock();
        match holder.as_ref() {
            Some(existing) => Err(existing.clone()),
            None => {
                *holder = Some(addr.to_string());
                Ok(())
            }
        }
    }

    pub fn release(&self) {
        *self.holder.lock() = None;
    }
}

/// Buffered line reader/writer over one TCP connection.
///
/// The receive buffer is a fixed `BUF_SIZE`-byte array with head/tail
/// cursors; a request that never terminates in a newline before the buffer
/// fills is a protocol error, not a silent truncation.
pub struct Session {
    stream: TcpStream,
    peer_addr: String,
    recv: Box<[u8; BUF_SIZE]>,
    head: usize,
    tail: usize,
}

impl Session {
    pub fn new(stream: TcpStream, peer_addr: String) -> Self {
        Session {
            stream,
            peer_addr,
            recv: Box::new([0u8; BUF_SIZE]),
            head: 0,
            tail: 0,
        }
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Pull a complete line out of the buffer, if one is already there.
    fn try_take_line(&mut self) -> Option<String> {
        let pos = self.recv[self.head..self.tail]
            .iter()
            .position(|&b| b == b'\n')?;
        let line_end = self.head + pos;
        let line = String::from_utf8_lossy(&self.recv[self.head..line_end]).into_owned();
        self.head = line_end + 1;
        if self.head == self.tail {
            self.head = 0;
            self.tail = 0;
        }
        Some(line)
    }

    /// Compact the buffer toward the front, or fail if it's genuinely full.
    fn make_room(&mut self) -> io::Result<()> {
        if self.tail < self.recv.len() {
            return Ok(());
        }
        if self.head == 0 {
            return Err(io::Error::other(ProtocolError::BufferOverflow.to_string()));
        }
        self.recv.copy_within(self.head..self.tail, 0);
        self.tail -= self.head;
        self.head = 0;
        Ok(())
    }

    /// Read one line with a single read timeout applied to every underlying
    /// socket read. Used for the handshake, which has its own flat deadline.
    pub fn read_line_with_timeout(&mut self, timeout: Option<Duration>) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.try_take_line() {
                return Ok(Some(line));
            }
            self.make_room()?;
            self.stream.set_read_timeout(timeout)?;
            let read = self.stream.read(&mut self.recv[self.tail..])?;
            if read == 0 {
                return Ok(None);
            }
            self.tail += read;
        }
    }

    /// Read one request line: no timeout while waiting for its first byte
    /// (an idle-but-healthy client blocks forever), a short timeout once the
    /// first byte has arrived (a stalled mid-request client gets cut off).
    pub fn read_request_line(&mut self) -> io::Result<Option<String>> {
        let mut seen_first_byte = self.head < self.tail;
        loop {
            if let Some(line) = self.try_take_line() {
                return Ok(Some(line));
            }
            self.make_room()?;
            let timeout = seen_first_byte.then_some(REQUEST_CONTINUATION_TIMEOUT);
            self.stream.set_read_timeout(timeout)?;
            let read = self.stream.read(&mut self.recv[self.tail..])?;
            if read == 0 {
                return Ok(None);
            }
            self.tail += read;
            seen_first_byte = true;
        }
    }

    pub fn write_response(&mut self, response: &str) -> io::Result<()> {
        if response.len() > BUF_SIZE {
            return Err(io::Error::other(ProtocolError::BufferOverflow.to_string()));
        }
        self.stream.write_all(response.as_bytes())
    }
}

/// Run the active-session request loop to completion.
///
/// Spawns its own generator thread (fresh [`Exchange`] and [`Telemetry`] for
/// the life of this session) and tears it down via the stop bit no matter
/// how the loop ends.
pub fn serve(session: &mut Session, gpio: Arc<GpioWindow>) -> io::Result<()> {
    let exchange = Arc::new(Exchange::new());
    let telemetry = Arc::new(Telemetry::new());
    let generator_handle = generator::spawn(gpio, exchange.clone(), telemetry.clone())?;

    let mut specs = [UserSpec::silent(); NCHAN];
    let result = request_loop(session, &mut specs, &exchange, &telemetry);

    exchange.publish_stop();
    if let Err(panic) = generator_handle.join() {
        log::error!("generator thread panicked: {panic:?}");
    }
    result
}

fn request_loop(
    session: &mut Session,
    specs: &mut [UserSpec; NCHAN],
    exchange: &Exchange,
    telemetry: &Telemetry,
) -> io::Result<()> {
    loop {
        let line = match session.read_request_line() {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let response = handle_request(&line, specs, exchange, telemetry);
        session.write_response(&response)?;
    }
}

fn handle_request(
    line: &str,
    specs: &mut [UserSpec; NCHAN],
    exchange: &Exchange,
    telemetry: &Telemetry,
) -> String {
    match protocol::parse(line) {
        Ok(Request::Handshake) => {
            protocol::format_error(&ProtocolError::Undefined(line.to_string()).to_string())
        }
        Ok(Request::GetParams) => protocol::format_gprm(specs),
        Ok(Request::SetParams(updates)) => handle_sprm(updates, specs, exchange, telemetry),
        Ok(Request::GetFrequency) => {
            let mut waited = Duration::ZERO;
            while !telemetry.has_measurement() && waited < FREQ_WAIT_TOTAL {
                thread::sleep(FREQ_WAIT_STEP);
                waited += FREQ_WAIT_STEP;
            }
            protocol::format_freq(telemetry.mean(), telemetry.variance().max(0.0).sqrt())
        }
        Err(e) => protocol::format_error(&e.to_string()),
    }
}

/// All-or-nothing: validate every tuple before touching `specs` or
/// publishing anything to the exchange.
fn handle_sprm(
    updates: Vec<(usize, UserSpec)>,
    specs: &mut [UserSpec; NCHAN],
    exchange: &Exchange,
    telemetry: &Telemetry,
) -> String {
    for &(channel, spec) in &updates {
        if let Err(message) = spec.validate() {
            return protocol::format_error(&ValidationError { channel, message }.to_string());
        }
    }

    let tick_rate = if telemetry.has_measurement() {
        telemetry.mean()
    } else {
        DEFAULT_TICK_RATE
    };

    let mut staged = Vec::with_capacity(updates.len());
    for (channel, spec) in updates {
        specs[channel] = spec;
        staged.push((channel, GeneratorState::from_spec(&spec, tick_rate)));
    }
    exchange.publish(&staged);
    protocol::format_done()
}
