// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The real-time PWM generator loop.
//!
//! One frame is 4096 sub-ticks. Per frame: drain the [`Exchange`], sample
//! each channel's recurrence, then walk the sub-ticks turning each sample
//! into a duty-cycled high/low interval written straight to the GPIO
//! `SET`/`CLEAR` registers. The loop never allocates, never blocks, and
//! never makes a syscall on its hot path except the once-per-frame
//! monotonic clock read used to measure its own frame rate.

use crate::exchange::Exchange;
use crate::gpio::{channel_mask, GpioWindow, NCHAN};
use crate::waveform::{GeneratorState, PULSES_PER_FRAME};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Busy-wait iteration count stretching one sub-tick to its target duration.
///
/// Hardware-specific; see the "per-sub-tick busy-wait" design note for why
/// this stays a fixed spin rather than a clock-bounded wait.
const PAUSE_VALUE: u32 = 9500;

/// Dedicated core the generator thread pins itself to.
const GENERATOR_CORE: usize = 3;

/// Real-time priority requested via `SCHED_FIFO`.
const GENERATOR_PRIORITY: i32 = 99;

/// EWMA smoothing factor for frame-rate telemetry.
const TELEMETRY_ALPHA: f64 = 0.1;

/// Frame-rate gauge, written by the generator and read by the control
/// handler. Backed by plain `AtomicU64` bit patterns with `Relaxed`
/// ordering: readers may observe a mean from one update paired with a
/// variance from another, which is fine for a human-facing approximation.
pub struct Telemetry {
    mean_bits: AtomicU64,
    variance_bits: AtomicU64,
}

impl Telemetry {
    pub fn new() -> Self {
        Telemetry {
            mean_bits: AtomicU64::new(0f64.to_bits()),
            variance_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn mean(&self) -> f64 {
        f64::from_bits(self.mean_bits.load(Ordering::Relaxed))
    }

    pub fn variance(&self) -> f64 {
        f64::from_bits(self.variance_bits.load(Ordering::Relaxed))
    }

    /// `true` once the generator has produced at least one measurement.
    pub fn has_measurement(&self) -> bool {
        self.mean() != 0.0
    }

    fn set_mean(&self, value: f64) {
        self.mean_bits.store(value.to_bits(), Ordering::Relaxed);
    }

    fn set_variance(&self, value: f64) {
        self.variance_bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Fold a newly measured frame rate into the running mean/variance.
    fn record(&self, freq: f64) {
        if !self.has_measurement() {
            self.set_mean(freq);
            self.set_variance(0.0);
            return;
        }
        let mean = self.mean();
        let delta = freq - mean;
        let incr = TELEMETRY_ALPHA * delta;
        let variance = self.variance();
        self.set_mean(mean + incr);
        self.set_variance((1.0 - TELEMETRY_ALPHA) * (variance + delta * incr));
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the generator thread, pinned and scheduled as §4.4 requires.
///
/// Returns once the exchange's stop bit is observed.
pub fn spawn(
    gpio: Arc<GpioWindow>,
    exchange: Arc<Exchange>,
    telemetry: Arc<Telemetry>,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("pwm-generator".into())
        .spawn(move || {
            pin_to_dedicated_core();
            run(&gpio, &exchange, &telemetry);
        })
}

/// The frame loop itself, factored out so tests can drive it with a
/// non-realtime, non-pinned caller.
fn run(gpio: &GpioWindow, exchange: &Exchange, telemetry: &Telemetry) {
    let mut states = [GeneratorState::ZERO; NCHAN];
    let masks: [u32; NCHAN] = std::array::from_fn(channel_mask);

    loop {
        if exchange.drain(&mut states) {
            return;
        }

        let mut pwmval = [0i32; NCHAN];
        for (channel, state) in states.iter_mut().enumerate() {
            let val = state.sample();
            pwmval[channel] = -1 - (val * PULSES_PER_FRAME as f64).round() as i32;
            state.step();
        }

        let frame_start = Instant::now();
        for _ in 0..PULSES_PER_FRAME {
            let mut flag = 0u32;
            for channel in 0..NCHAN {
                pwmval[channel] += 1;
                let high = (pwmval[channel] >> 31) as u32;
                flag |= high & masks[channel];
            }
            busy_wait(PAUSE_VALUE);
            gpio.write_frame(flag);
        }

        let elapsed = frame_start.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            telemetry.record(1.0 / elapsed);
        }
    }
}

#[inline]
fn busy_wait(iterations: u32) {
    let mut counter: u32 = 0;
    for _ in 0..iterations {
        counter = std::hint::black_box(counter.wrapping_add(1));
    }
}

/// Best-effort: pin this thread to [`GENERATOR_CORE`] and request
/// `SCHED_FIFO` at the highest priority the platform grants. Neither
/// failure is fatal — the generator still runs, just without real-time
/// guarantees — since a non-privileged or non-Linux host can't satisfy
/// this and the rest of the system should still be exercisable there.
fn pin_to_dedicated_core() {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(GENERATOR_CORE, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            log::warn!(
                "sched_setaffinity(core {GENERATOR_CORE}) failed: {}",
                io::Error::last_os_error()
            );
        }

        let param = libc::sched_param {
            sched_priority: GENERATOR_PRIORITY,
        };
        if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) != 0 {
            log::warn!(
                "sched_setscheduler(SCHED_FIFO, {GENERATOR_PRIORITY}) failed: {}",
                io::Error::last_os_error()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::GpioWindow;
    use crate::waveform::{Kind, UserSpec, DEFAULT_TICK_RATE};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn cst_average_half_yields_half_duty_cycle() {
        let gpio = GpioWindow::fallback();
        let exchange = Exchange::new();
        let state = GeneratorState::from_spec(
            &UserSpec {
                kind: Kind::Cst,
                average: 0.5,
                amplitude: 0.0,
                period: 0.0,
                start: 0.0,
            },
            DEFAULT_TICK_RATE,
        );
        exchange.publish(&[(0, state)]);

        let mut states = [GeneratorState::ZERO; NCHAN];
        exchange.drain(&mut states);

        let val = states[0].sample();
        let pwmval_init = -1 - (val * PULSES_PER_FRAME as f64).round() as i32;
        let mut pwmval = pwmval_init;
        let mut high_ticks = 0;
        for _ in 0..PULSES_PER_FRAME {
            pwmval += 1;
            if pwmval < 0 {
                high_ticks += 1;
            }
        }
        assert_eq!(high_ticks, (PULSES_PER_FRAME as f64 * 0.5).round() as u32);
        gpio.write_frame(0);
    }

    #[test]
    fn zero_average_is_fully_low_and_one_is_fully_high() {
        for (average, expected_high) in [(0.0, 0), (1.0, PULSES_PER_FRAME)] {
            let state = GeneratorState::from_spec(
                &UserSpec {
                    kind: Kind::Cst,
                    average,
                    amplitude: 0.0,
                    period: 0.0,
                    start: 0.0,
                },
                DEFAULT_TICK_RATE,
            );
            let val = state.sample();
            let mut pwmval = -1 - (val * PULSES_PER_FRAME as f64).round() as i32;
            let mut high_ticks = 0;
            for _ in 0..PULSES_PER_FRAME {
                pwmval += 1;
                if pwmval < 0 {
                    high_ticks += 1;
                }
            }
            assert_eq!(high_ticks, expected_high);
        }
    }

    #[test]
    fn stop_bit_ends_the_loop() {
        let gpio = Arc::new(GpioWindow::fallback());
        let exchange = Arc::new(Exchange::new());
        let telemetry = Arc::new(Telemetry::new());

        let gpio2 = gpio.clone();
        let exchange2 = exchange.clone();
        let telemetry2 = telemetry.clone();
        let handle = thread::spawn(move || run(&gpio2, &exchange2, &telemetry2));

        thread::sleep(Duration::from_millis(50));
        exchange.publish_stop();
        handle.join().expect("generator thread panicked");
    }

    #[test]
    fn telemetry_initializes_on_first_sample_then_smooths() {
        let telemetry = Telemetry::new();
        assert!(!telemetry.has_measurement());
        telemetry.record(1000.0);
        assert_eq!(telemetry.mean(), 1000.0);
        assert_eq!(telemetry.variance(), 0.0);
        telemetry.record(1010.0);
        assert!(telemetry.mean() > 1000.0 && telemetry.mean() < 1010.0);
    }
}
