// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! User-facing waveform specs and the generator-internal recurrence state
//! they convert into.
//!
//! The conversion happens once, at `SPRM` time, so that the generator's hot
//! path never calls a transcendental function: [`Kind::Sin`] advances by one
//! complex multiplication per frame and [`Kind::Tri`] by one bounded add and
//! an occasional reflection.

use std::f64::consts::PI;
use std::fmt;

/// Number of sub-ticks per PWM frame (2^12).
pub const PULSES_PER_FRAME: u32 = 4096;

/// Tick rate assumed before the generator has measured its own frame rate.
///
/// Matches what was measured on the reference board; see DESIGN.md.
pub const DEFAULT_TICK_RATE: f64 = 10156.78;

/// Waveform family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Cst,
    Sin,
    Tri,
}

impl Kind {
    /// Long-form name used inside validation diagnostics.
    fn family_name(self) -> &'static str {
        match self {
            Kind::Cst => "constant",
            Kind::Sin => "sinusoidal",
            Kind::Tri => "triangular",
        }
    }

    pub fn parse(s: &str) -> Option<Kind> {
        match s {
            "CST" => Some(Kind::Cst),
            "SIN" => Some(Kind::Sin),
            "TRI" => Some(Kind::Tri),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Kind::Cst => "CST",
            Kind::Sin => "SIN",
            Kind::Tri => "TRI",
        };
        write!(f, "{tag}")
    }
}

/// A waveform as submitted by a client over the control protocol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UserSpec {
    pub kind: Kind,
    pub average: f64,
    pub amplitude: f64,
    pub period: f64,
    pub start: f64,
}

impl UserSpec {
    /// The spec every channel starts with: flat low.
    pub const fn silent() -> Self {
        UserSpec {
            kind: Kind::Cst,
            average: 0.0,
            amplitude: 0.0,
            period: 0.0,
            start: 0.0,
        }
    }

    /// Check this spec against its family's invariants (§3).
    ///
    /// Returns the diagnostic the control protocol forwards verbatim to the
    /// client on rejection.
    pub fn validate(&self) -> Result<(), String> {
        match self.kind {
            Kind::Cst => {
                if !(0.0..=1.0).contains(&self.average) {
                    return Err(format!(
                        "expect average of cst function to be in the range [0,1], got {}",
                        self.average
                    ));
                }
                if self.amplitude != 0.0 {
                    return Err("expect amplitude of constant function to be 0".to_string());
                }
                if self.period != 0.0 {
                    return Err("expect period of constant function to be 0".to_string());
                }
                if self.start != 0.0 {
                    return Err("expect start of constant function to be 0".to_string());
                }
            }
            Kind::Sin | Kind::Tri => {
                let family = self.kind.family_name();
                if !(0.0..=1.0).contains(&self.average) {
                    return Err(format!(
                        "expect average of {family} function to be in the range [0,1], got {}",
                        self.average
                    ));
                }
                if self.amplitude == 0.0 {
                    return Err(format!(
                        "expect amplitude of {family} function to be != 0, got {}",
                        self.amplitude
                    ));
                }
                let upper = self.average + self.amplitude;
                if upper > 1.0 {
                    return Err(format!(
                        "expect average+amplitude of {family} function to be <= 1, got {upper}"
                    ));
                }
                let lower = self.average - self.amplitude;
                if lower < 0.0 {
                    return Err(format!(
                        "expect average-amplitude of {family} function to be >= 0, got {lower}"
                    ));
                }
                if self.period <= 0.0 {
                    return Err(format!(
                        "expect period of {family} function to be > 0, got {}",
                        self.period
                    ));
                }
                if !(0.0..1.0).contains(&self.start) {
                    return Err(format!(
                        "expect start of {family} function to be in [0, 1), got {}",
                        self.start
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for UserSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.kind, self.average, self.amplitude, self.period, self.start
        )
    }
}

/// Per-channel recurrence state the generator advances once per frame.
///
/// `sample()` reads `y0 + y` clamped into `[0, 1]`; `step()` advances the
/// state to the next frame. `kind` selects which of the two recurrences
/// (`Sin`'s rotation, `Tri`'s reflecting ramp) runs; the fields belonging to
/// the other two kinds stay at zero, matching §3.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorState {
    kind: Kind,
    y0: f64,
    x: f64,
    y: f64,
    c: f64,
    s: f64,
    a: f64,
    dy: f64,
}

impl GeneratorState {
    pub const ZERO: GeneratorState = GeneratorState {
        kind: Kind::Cst,
        y0: 0.0,
        x: 0.0,
        y: 0.0,
        c: 0.0,
        s: 0.0,
        a: 0.0,
        dy: 0.0,
    };

    /// Convert a validated spec into recurrence state at the given tick rate.
    ///
    /// Callers must have already run [`UserSpec::validate`]; this does not
    /// re-check invariants.
    pub fn from_spec(spec: &UserSpec, tick_rate: f64) -> GeneratorState {
        match spec.kind {
            Kind::Cst => GeneratorState {
                kind: Kind::Cst,
                y0: spec.average,
                ..GeneratorState::ZERO
            },
            Kind::Sin => {
                let pulses_per_period = (tick_rate * spec.period).max(1.0);
                let theta = 2.0 * PI / pulses_per_period;
                let phase = 2.0 * PI * spec.start;
                GeneratorState {
                    kind: Kind::Sin,
                    y0: spec.average,
                    x: spec.amplitude * phase.cos(),
                    y: spec.amplitude * phase.sin(),
                    c: theta.cos(),
                    s: theta.sin(),
                    a: 0.0,
                    dy: 0.0,
                }
            }
            Kind::Tri => {
                let pulses_per_period = (tick_rate * spec.period).max(1.0);
                let slope = 4.0 * spec.amplitude / pulses_per_period;
                let a = spec.amplitude;
                // Three-way split so start=0/0.25/0.5/0.75 land exactly on
                // the triangle's trough/rise-through-zero/peak/fall-through-zero
                // points, continuous in both value and slope sign across the
                // branch boundaries.
                let (y, dy) = if spec.start < 0.25 {
                    (4.0 * a * spec.start, slope)
                } else if spec.start < 0.75 {
                    (a - 4.0 * a * (spec.start - 0.25), -slope)
                } else {
                    (-a + 4.0 * a * (spec.start - 0.75), slope)
                };
                GeneratorState {
                    kind: Kind::Tri,
                    y0: spec.average,
                    x: 0.0,
                    y,
                    c: 0.0,
                    s: 0.0,
                    a,
                    dy,
                }
            }
        }
    }

    /// The sample for the current frame, in `[0, 1]`.
    #[inline]
    pub fn sample(&self) -> f64 {
        (self.y0 + self.y).clamp(0.0, 1.0)
    }

    /// Advance the recurrence by one frame.
    #[inline]
    pub fn step(&mut self) {
        match self.kind {
            Kind::Cst => {}
            Kind::Sin => {
                let y = self.y * self.c + self.x * self.s;
                let x = self.x * self.c - self.y * self.s;
                self.y = y;
                self.x = x;
            }
            Kind::Tri => {
                self.y += self.dy;
                if self.y > self.a {
                    self.y = 2.0 * self.a - self.y;
                    self.dy = -self.dy;
                } else if self.y < -self.a {
                    self.y = -2.0 * self.a - self.y;
                    self.dy = -self.dy;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn rotation_energy(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cst_rejects_nonzero_shape_fields() {
        let mut spec = UserSpec::silent();
        spec.amplitude = 0.1;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn cst_accepts_full_average_range() {
        let spec = UserSpec {
            kind: Kind::Cst,
            average: 1.0,
            amplitude: 0.0,
            period: 0.0,
            start: 0.0,
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn sin_rejects_average_plus_amplitude_over_one() {
        let spec = UserSpec {
            kind: Kind::Sin,
            average: 0.5,
            amplitude: 0.6,
            period: 0.01,
            start: 0.0,
        };
        let err = spec.validate().unwrap_err();
        assert_eq!(
            err,
            "expect average+amplitude of sinusoidal function to be <= 1, got 1.1"
        );
    }

    #[test]
    fn sin_rejects_out_of_range_average_even_with_negative_amplitude() {
        // A negative amplitude satisfies `amplitude != 0` and can otherwise
        // pass both the average+amplitude and average-amplitude bound
        // checks while `average` itself is outside [0, 1]; the standalone
        // average-range check must still catch it.
        let spec = UserSpec {
            kind: Kind::Sin,
            average: 1.5,
            amplitude: -0.6,
            period: 0.01,
            start: 0.0,
        };
        let err = spec.validate().unwrap_err();
        assert_eq!(
            err,
            "expect average of sinusoidal function to be in the range [0,1], got 1.5"
        );
    }

    #[test]
    fn sin_accepts_boundary_sum_of_exactly_one() {
        let spec = UserSpec {
            kind: Kind::Sin,
            average: 0.5,
            amplitude: 0.5,
            period: 0.01,
            start: 0.0,
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn sin_rejects_start_equal_to_one() {
        let spec = UserSpec {
            kind: Kind::Sin,
            average: 0.5,
            amplitude: 0.1,
            period: 0.01,
            start: 1.0,
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn sin_accepts_start_just_under_one() {
        let spec = UserSpec {
            kind: Kind::Sin,
            average: 0.5,
            amplitude: 0.1,
            period: 0.01,
            start: 0.999_999,
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn cst_sample_is_constant() {
        let spec = UserSpec {
            kind: Kind::Cst,
            average: 0.5,
            amplitude: 0.0,
            period: 0.0,
            start: 0.0,
        };
        let mut state = GeneratorState::from_spec(&spec, DEFAULT_TICK_RATE);
        for _ in 0..10 {
            assert_eq!(state.sample(), 0.5);
            state.step();
        }
    }

    #[test]
    fn sin_rotation_preserves_magnitude() {
        let spec = UserSpec {
            kind: Kind::Sin,
            average: 0.5,
            amplitude: 0.3,
            period: 0.01,
            start: 0.0,
        };
        let mut state = GeneratorState::from_spec(&spec, DEFAULT_TICK_RATE);
        let target = spec.amplitude * spec.amplitude;
        for _ in 0..100_000 {
            state.step();
        }
        assert!((state.rotation_energy() - target).abs() < 1e-6);
    }

    #[test]
    fn tri_stays_within_amplitude_and_flips_slope() {
        let spec = UserSpec {
            kind: Kind::Tri,
            average: 0.5,
            amplitude: 0.25,
            period: 0.01,
            start: 0.5,
        };
        let mut state = GeneratorState::from_spec(&spec, DEFAULT_TICK_RATE);
        let mut sign_changes = 0;
        let mut last_dy_sign = state.dy.signum();
        for _ in 0..5000 {
            assert!(state.y.abs() <= spec.amplitude + 1e-9);
            state.step();
            let sign = state.dy.signum();
            if sign != last_dy_sign {
                sign_changes += 1;
                last_dy_sign = sign;
            }
        }
        assert!(sign_changes > 0);
    }

    #[test]
    fn random_valid_sin_specs_keep_rotation_energy_stable() {
        let rng = fastrand::Rng::with_seed(42);
        for _ in 0..200 {
            let amplitude = rng.f64() * 0.5 + 0.01;
            let average = rng.f64() * (1.0 - 2.0 * amplitude) + amplitude;
            let spec = UserSpec {
                kind: Kind::Sin,
                average,
                amplitude,
                period: rng.f64() * 0.1 + 0.001,
                start: rng.f64() * 0.999,
            };
            assert!(spec.validate().is_ok(), "generated an invalid spec: {spec:?}");
            let mut state = GeneratorState::from_spec(&spec, DEFAULT_TICK_RATE);
            let target = amplitude * amplitude;
            for _ in 0..1000 {
                state.step();
            }
            assert!((state.rotation_energy() - target).abs() < 1e-6);
        }
    }

    #[test]
    fn random_valid_tri_specs_stay_within_amplitude() {
        let rng = fastrand::Rng::with_seed(7);
        for _ in 0..200 {
            let amplitude = rng.f64() * 0.5 + 0.01;
            let average = rng.f64() * (1.0 - 2.0 * amplitude) + amplitude;
            let spec = UserSpec {
                kind: Kind::Tri,
                average,
                amplitude,
                period: rng.f64() * 0.1 + 0.001,
                start: rng.f64() * 0.999,
            };
            assert!(spec.validate().is_ok(), "generated an invalid spec: {spec:?}");
            let mut state = GeneratorState::from_spec(&spec, DEFAULT_TICK_RATE);
            for _ in 0..2000 {
                assert!(state.y.abs() <= amplitude + 1e-9);
                state.step();
            }
        }
    }

    #[test]
    fn tri_start_points_are_canonical() {
        let amp = 0.4;
        let base = UserSpec {
            kind: Kind::Tri,
            average: 0.0,
            amplitude: amp,
            period: 1.0,
            start: 0.0,
        };
        let at = |start: f64| {
            let spec = UserSpec { start, ..base };
            GeneratorState::from_spec(&spec, DEFAULT_TICK_RATE).y
        };
        assert!((at(0.0) - 0.0).abs() < 1e-9);
        assert!((at(0.25) - amp).abs() < 1e-9);
        assert!((at(0.5) - 0.0).abs() < 1e-9);
        assert!((at(0.75) - (-amp)).abs() < 1e-9);
    }
}
