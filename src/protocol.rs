// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Line-framed control protocol: request parsing and response formatting.
//!
//! This module is pure logic — no sockets, no buffers, no threads. [`Session`]
//! in `session.rs` owns the I/O and calls into here for each line it reads.

use crate::error::ProtocolError;
use crate::gpio::NCHAN;
use crate::waveform::{Kind, UserSpec};

/// Protocol version reported in the `HELO` greeting.
pub const VERSION: &str = "v0.1.1";

/// PWM resolution advertised in the `HELO` greeting (2^12 sub-ticks/frame).
pub const BITS_RESOLUTION: u32 = 12;

/// Receive and send buffer size; oversize requests/responses are errors.
pub const BUF_SIZE: usize = 1024;

/// A parsed, well-formed request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Handshake,
    GetParams,
    SetParams(Vec<(usize, UserSpec)>),
    GetFrequency,
}

/// Parse one request line (without its trailing newline).
pub fn parse(line: &str) -> Result<Request, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.len() < 4 {
        return Err(ProtocolError::TooShort(line.to_string()));
    }
    if let Some(rest) = line.strip_prefix("SPRM ") {
        let specs = parse_sprm(rest).map_err(ProtocolError::Malformed)?;
        return Ok(Request::SetParams(specs));
    }
    match line {
        "PWM0" => Ok(Request::Handshake),
        "GPRM" => Ok(Request::GetParams),
        "FREQ" => Ok(Request::GetFrequency),
        _ => Err(ProtocolError::Undefined(line.to_string())),
    }
}

/// Parse the `<K>, <ch> <TYPE> <avg> <amp> <per> <start>, …` tail of an
/// `SPRM` request. Does not validate family invariants — only shape.
fn parse_sprm(rest: &str) -> Result<Vec<(usize, UserSpec)>, String> {
    let mut segments = rest.split(',');
    let count_str = segments
        .next()
        .ok_or_else(|| "missing channel count".to_string())?
        .trim();
    let count: usize = count_str
        .parse()
        .map_err(|_| format!("invalid channel count \"{count_str}\""))?;

    let mut specs = Vec::with_capacity(count);
    for _ in 0..count {
        let segment = segments
            .next()
            .ok_or_else(|| "fewer tuples than the declared count".to_string())?;
        let tokens: Vec<&str> = segment.split_whitespace().collect();
        let [ch, kind, average, amplitude, period, start] = tokens.as_slice() else {
            return Err(format!("malformed tuple \"{}\"", segment.trim()));
        };

        let channel: usize = ch
            .parse()
            .map_err(|_| format!("invalid channel index \"{ch}\""))?;
        if channel >= NCHAN {
            return Err(format!("channel index {channel} out of range [0, {NCHAN})"));
        }
        let kind = Kind::parse(kind).ok_or_else(|| format!("unknown waveform type \"{kind}\""))?;
        let average: f64 = average
            .parse()
            .map_err(|_| format!("invalid average \"{average}\""))?;
        let amplitude: f64 = amplitude
            .parse()
            .map_err(|_| format!("invalid amplitude \"{amplitude}\""))?;
        let period: f64 = period
            .parse()
            .map_err(|_| format!("invalid period \"{period}\""))?;
        let start: f64 = start
            .parse()
            .map_err(|_| format!("invalid start \"{start}\""))?;

        specs.push((
            channel,
            UserSpec {
                kind,
                average,
                amplitude,
                period,
                start,
            },
        ));
    }

    if segments.next().is_some() {
        return Err("more tuples than the declared count".to_string());
    }

    Ok(specs)
}

pub fn format_helo() -> String {
    format!(">HELO {VERSION} {BITS_RESOLUTION}bits\n")
}

pub fn format_busy(addr: &str) -> String {
    format!("!busy with {addr}\n")
}

pub fn format_done() -> String {
    ">DONE\n".to_string()
}

pub fn format_gprm(specs: &[UserSpec; NCHAN]) -> String {
    let mut out = format!(">{NCHAN}");
    for (channel, spec) in specs.iter().enumerate() {
        out.push_str(&format!(", {channel} {spec}"));
    }
    out.push('\n');
    out
}

pub fn format_freq(mean: f64, std_dev: f64) -> String {
    format!(">{mean} {std_dev}\n")
}

pub fn format_error(message: &str) -> String {
    format!("!{message}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_handshake_and_bare_verbs() {
        assert_eq!(parse("PWM0").unwrap(), Request::Handshake);
        assert_eq!(parse("GPRM").unwrap(), Request::GetParams);
        assert_eq!(parse("FREQ").unwrap(), Request::GetFrequency);
    }

    #[test]
    fn rejects_short_lines_as_invalid() {
        assert!(matches!(parse("XY"), Err(ProtocolError::TooShort(_))));
    }

    #[test]
    fn rejects_unknown_verbs_as_undefined() {
        assert!(matches!(parse("XXXX"), Err(ProtocolError::Undefined(_))));
    }

    #[test]
    fn parses_sprm_with_multiple_tuples() {
        let req = parse("SPRM 2, 0 CST 0.5 0 0 0, 3 SIN 0.2 0.1 0.5 0.25").unwrap();
        match req {
            Request::SetParams(specs) => {
                assert_eq!(specs.len(), 2);
                assert_eq!(specs[0].0, 0);
                assert_eq!(specs[0].1.kind, Kind::Cst);
                assert_eq!(specs[1].0, 3);
                assert_eq!(specs[1].1.kind, Kind::Sin);
            }
            other => panic!("expected SetParams, got {other:?}"),
        }
    }

    #[test]
    fn sprm_rejects_out_of_range_channel() {
        let err = parse("SPRM 1, 8 CST 0.5 0 0 0").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn sprm_rejects_mismatched_tuple_count() {
        assert!(parse("SPRM 2, 0 CST 0.5 0 0 0").is_err());
    }

    #[test]
    fn gprm_formats_one_tuple_per_channel() {
        let specs: [UserSpec; NCHAN] = std::array::from_fn(|_| UserSpec::silent());
        let mut specs = specs;
        specs[0].average = 0.5;
        let line = format_gprm(&specs);
        assert!(line.starts_with(">8, 0 CST 0.5 0 0 0, 1 CST 0 0 0 0"));
        assert!(line.ends_with("7 CST 0 0 0 0\n"));
    }
}
