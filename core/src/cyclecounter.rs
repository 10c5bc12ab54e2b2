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

//! Tracks how expensive a whole `WorkerThread::drive_once` iteration is,
//! separate from the per-task EWMA tracked on `TaskState`. A `WorkerThread`
//! owns one of these, sized from its `RuntimeConfig`, and wraps every
//! iteration in `start`/`stop`.

use nfcycles::{rdtsc, to_seconds};

use crate::config::RuntimeConfig;

pub struct CycleCounter {
    thread_id: usize,
    total: u64,
    start_time: u64,
    run_count: u64,
    log_window: u64,
}

impl CycleCounter {
    /// `thread_id` is folded into the log line so a multi-threaded run's
    /// output can be told apart; `log_window` comes straight from the
    /// owning thread's `RuntimeConfig`.
    pub fn new(thread_id: usize, cfg: &RuntimeConfig) -> CycleCounter {
        CycleCounter {
            thread_id,
            total: 0,
            start_time: 0,
            run_count: 0,
            log_window: cfg.iter_log_window.max(1),
        }
    }

    pub fn start(&mut self) {
        self.start_time = rdtsc();
    }

    /// Stops the measurement, folding it into the running total. Every
    /// `log_window` calls it logs the average duration in microseconds
    /// and resets.
    pub fn stop(&mut self) -> u64 {
        let elapsed = rdtsc() - self.start_time;
        self.total += elapsed;
        self.run_count += 1;
        if self.run_count == self.log_window {
            info!(
                "thread {} driver loop iteration averaged {:.2} us over {} runs",
                self.thread_id,
                to_seconds(self.total / self.run_count) * 1_000_000.0,
                self.run_count
            );
            self.run_count = 0;
            self.total = 0;
        }
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_accumulates_before_logging() {
        let cfg = RuntimeConfig { iter_log_window: 3, ..RuntimeConfig::default() };
        let mut c = CycleCounter::new(0, &cfg);
        c.start();
        assert_eq!(c.stop(), c.total);
    }

    #[test]
    fn logging_resets_the_running_total() {
        let cfg = RuntimeConfig { iter_log_window: 2, ..RuntimeConfig::default() };
        let mut c = CycleCounter::new(0, &cfg);
        c.start();
        c.stop();
        c.start();
        c.stop();
        assert_eq!(c.total, 0);
        assert_eq!(c.run_count, 0);
    }
}
