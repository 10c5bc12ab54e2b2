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

//! Congestion detection: a queue is congested if its drop counter jumps
//! by more than `drop_diff` between two samples taken `check_interval`
//! apart, within a `check_time` observation window.

/// A source of drop-counter samples. Implemented by the (out of scope)
/// queue element in production; `RecordedDrops` below backs tests.
pub trait DropSource {
    fn drops(&self) -> u64;
}

pub struct RecordedDrops {
    samples: Vec<u64>,
    next: usize,
}

impl RecordedDrops {
    pub fn new(samples: Vec<u64>) -> RecordedDrops {
        RecordedDrops { samples, next: 0 }
    }
}

impl DropSource for RecordedDrops {
    fn drops(&self) -> u64 {
        self.samples.get(self.next.min(self.samples.len().saturating_sub(1))).copied().unwrap_or(0)
    }
}

/// Samples `source` every `check_interval_us`, for `check_time_us`
/// total, and reports whether any consecutive pair of samples differed
/// by more than `drop_diff`. `advance` is called once per sampling step
/// so a test double can move its cursor forward without needing a real
/// clock.
pub fn is_congested<F>(
    source: &dyn DropSource,
    check_time_us: u64,
    check_interval_us: u64,
    drop_diff: u64,
    mut advance: F,
) -> bool
where
    F: FnMut(),
{
    if check_interval_us == 0 {
        return false;
    }
    let steps = (check_time_us / check_interval_us).max(1);
    let mut previous = source.drops();
    for _ in 0..steps {
        advance();
        let current = source.drops();
        if current.abs_diff(previous) > drop_diff {
            return true;
        }
        previous = current;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct RecordedDropsAdvancing {
        samples: Vec<u64>,
        cursor: Cell<usize>,
    }

    impl RecordedDropsAdvancing {
        fn new(samples: Vec<u64>) -> Self {
            RecordedDropsAdvancing { samples, cursor: Cell::new(0) }
        }
        fn step(&self) {
            let next = (self.cursor.get() + 1).min(self.samples.len() - 1);
            self.cursor.set(next);
        }
    }

    impl DropSource for RecordedDropsAdvancing {
        fn drops(&self) -> u64 {
            self.samples[self.cursor.get()]
        }
    }

    #[test]
    fn flat_drop_counter_is_not_congested() {
        let samples = RecordedDrops::new(vec![10, 10, 10, 10]);
        let congested = is_congested(&samples, 300, 100, 1, || {});
        assert!(!congested);
    }

    #[test]
    fn a_jump_past_the_threshold_is_congested() {
        let samples = RecordedDropsAdvancing::new(vec![10, 10, 50, 50]);
        let congested = is_congested(&samples, 300, 100, 5, || samples.step());
        assert!(congested);
    }
}
