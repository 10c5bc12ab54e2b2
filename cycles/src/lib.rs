/* Copyright (c) 2018 University of Utah
 *
 * Permission to use, copy, modify, and distribute this software for any
 * purpose with or without fee is hereby granted, provided that the above
 * copyright notice and this permission notice appear in all copies.
 *
 * THE SOFTWARE IS PROVIDED "AS IS" AND THE AUTHOR(S) DISCLAIM ALL WARRANTIES
 * WITH REGARD TO THIS SOFTWARE INCLUDING ALL IMPLIED WARRANTIES OF
 * MERCHANTABILITY AND FITNESS. IN NO EVENT SHALL AUTHORS BE LIABLE FOR
 * ANY SPECIAL, DIRECT, INDIRECT, OR CONSEQUENTIAL DAMAGES OR ANY DAMAGES
 * WHATSOEVER RESULTING FROM LOSS OF USE, DATA OR PROFITS, WHETHER IN AN
 * ACTION OF CONTRACT, NEGLIGENCE OR OTHER TORTIOUS ACTION, ARISING OUT OF
 * OR IN CONNECTION WITH THE USE OR PERFORMANCE OF THIS SOFTWARE.
 */

//! Cheap wall-clock-free cycle counting, used throughout the scheduler to
//! profile task run times without a syscall on the fast path.

use std::sync::Once;
use std::time::Instant;

const MAXCOUNT: u64 = 100000;

#[cfg(target_arch = "x86_64")]
#[inline]
pub fn rdtsc() -> u64 {
    unsafe { std::arch::x86_64::_rdtsc() }
}

#[cfg(target_arch = "x86")]
#[inline]
pub fn rdtsc() -> u64 {
    unsafe { std::arch::x86::_rdtsc() }
}

// Portable fallback for architectures without a cheap hardware cycle
// counter (e.g. aarch64 without a stable intrinsic in std). Scaled so that
// to_seconds() still behaves sanely: one "cycle" is one nanosecond.
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
#[inline]
pub fn rdtsc() -> u64 {
    let epoch = CALIBRATION.epoch();
    epoch.elapsed().as_nanos() as u64
}

struct Calibration {
    once: Once,
    epoch: std::cell::UnsafeCell<Option<Instant>>,
    cycles_per_second: std::sync::atomic::AtomicU64,
}

unsafe impl Sync for Calibration {}

impl Calibration {
    const fn new() -> Calibration {
        Calibration {
            once: Once::new(),
            epoch: std::cell::UnsafeCell::new(None),
            cycles_per_second: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn ensure(&self) {
        self.once.call_once(|| {
            unsafe {
                *self.epoch.get() = Some(Instant::now());
            }
            let rate = measure_cycles_per_second();
            self.cycles_per_second
                .store(rate, std::sync::atomic::Ordering::Relaxed);
        });
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    fn epoch(&self) -> Instant {
        self.ensure();
        unsafe { (*self.epoch.get()).unwrap() }
    }

    fn rate(&self) -> u64 {
        self.ensure();
        self.cycles_per_second.load(std::sync::atomic::Ordering::Relaxed)
    }
}

static CALIBRATION: Calibration = Calibration::new();

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn measure_cycles_per_second() -> u64 {
    let start_time = Instant::now();
    let start_cycles = rdtsc();
    std::thread::sleep(std::time::Duration::from_millis(10));
    let delta_cycles = rdtsc() - start_cycles;
    let delta_time = start_time.elapsed().as_secs_f64();
    (delta_cycles as f64 / delta_time) as u64
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn measure_cycles_per_second() -> u64 {
    // The fallback rdtsc() already counts nanoseconds.
    1_000_000_000
}

/// Converts a cycle count (as returned by `rdtsc()`) into seconds, using a
/// one-time calibration against the wall clock.
pub fn to_seconds(cycles: u64) -> f64 {
    cycles as f64 / CALIBRATION.rate() as f64
}

/// Converts a cycle count into whole microseconds.
pub fn to_micros(cycles: u64) -> u64 {
    (to_seconds(cycles) * 1_000_000.0) as u64
}

/// A small helper that accumulates elapsed cycles across repeated
/// start/stop pairs and periodically reports an average, mirroring the
/// accounting `CycleCounter` in the scheduler crate does for task run
/// times but without any logging dependency.
pub struct Cycles {
    start: u64,
    count: u64,
    total: u64,
}

impl Default for Cycles {
    fn default() -> Self {
        Self::new()
    }
}

impl Cycles {
    pub fn new() -> Cycles {
        Cycles {
            start: 0,
            count: 0,
            total: 0,
        }
    }

    pub fn start(&mut self) {
        self.start = rdtsc();
    }

    /// Stops the measurement and folds it into the running total. Returns
    /// the running average once `MAXCOUNT` samples have accumulated, then
    /// resets; otherwise returns `None`.
    pub fn stop(&mut self) -> Option<u64> {
        self.total += rdtsc() - self.start;
        self.count += 1;
        if self.count == MAXCOUNT {
            let avg = self.total / self.count;
            self.count = 0;
            self.total = 0;
            Some(avg)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rdtsc_is_monotonic_enough() {
        let a = rdtsc();
        let b = rdtsc();
        assert!(b >= a);
    }

    #[test]
    fn to_seconds_is_positive_for_positive_cycles() {
        assert!(to_seconds(1_000_000) > 0.0);
    }

    #[test]
    fn cycles_accumulates_until_maxcount() {
        let mut c = Cycles::new();
        c.start();
        assert!(c.stop().is_none());
    }
}
