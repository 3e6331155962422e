// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed error domains for configuration, peripheral access, transport,
//! protocol framing and waveform validation.
//!
//! Each enum owns the `Display` phrasing its call sites rely on; none of
//! these pull in `thiserror` — hand-written impls match the rest of this
//! codebase's error types.

use std::fmt;
use std::io;

/// Startup-time configuration failure. Always fatal.
#[derive(Debug)]
pub enum ConfigError {
    /// Writing the RT runtime limit or CPU governor file failed.
    HostTuning { path: String, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HostTuning { path, source } => {
                write!(f, "failed tuning host via {path}: {source}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Peripheral bring-up failure (GPIO mapping, board revision).
#[derive(Debug)]
pub enum PeripheralError {
    /// `/dev/mem` could not be opened. Only raised on a recognized board.
    OpenMem(io::Error),
    /// `mmap` of the GPIO peripheral region failed.
    Mmap(io::Error),
    /// `gpio_init` was called a second time with mismatched state.
    AlreadyInitialized,
}

impl fmt::Display for PeripheralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenMem(e) => write!(f, "can't open /dev/mem: must run as root: {e}"),
            Self::Mmap(e) => write!(f, "mmap error: {e}"),
            Self::AlreadyInitialized => write!(f, "gpio already initialized"),
        }
    }
}

impl std::error::Error for PeripheralError {}

/// A waveform spec violates one of its family's invariants (§3 of the spec).
///
/// The `Display` impl produces the exact diagnostic phrasing forwarded
/// verbatim to clients over the control protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub channel: usize,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel[{}]: {}", self.channel, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Malformed request or unrecoverable session buffer state.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Fewer than 5 bytes were received before the terminating newline.
    TooShort(String),
    /// The verb isn't one of `GPRM`/`SPRM`/`FREQ`.
    Undefined(String),
    /// `SPRM` arguments failed to parse (wrong shape, not a validation failure).
    Malformed(String),
    /// The receive or send buffer would overflow (1 KiB). Fatal to the session.
    BufferOverflow,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort(echo) => write!(f, "invalid request \"{echo}\""),
            Self::Undefined(echo) => write!(f, "undefined request \"{echo}\""),
            Self::Malformed(reason) => write!(f, "invalid arguments: {reason}"),
            Self::BufferOverflow => write!(f, "request or response exceeds buffer size"),
        }
    }
}

impl std::error::Error for ProtocolError {}
