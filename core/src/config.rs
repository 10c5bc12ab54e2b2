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

use serde::Deserialize;

use crate::error::{CoreError, CoreResult};

/// Tunables for the driver loop and balancer, loaded once at startup from
/// a TOML file and otherwise treated as read-only for the life of the
/// process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads to start, not counting the quiescent
    /// thread[0] or any command threads.
    pub threads: usize,

    /// Maximum tasks run per driver loop iteration.
    pub tasks_per_iter: u32,

    /// Hard ceiling on `tasks_per_iter`, regardless of configuration.
    pub tasks_per_iter_max: u32,

    /// Driver-loop iterations between `run_os()` calls.
    pub iters_per_os: u32,

    /// Run count below which a task's cycle measurement is discarded as a
    /// cold-start sample.
    pub profile_threshold: u64,

    /// Window, in samples, over which the cycle-count EWMA is computed.
    /// The weight given to the newest sample is `1 / ewma_window`.
    pub ewma_window: u64,

    /// Congestion-check sampling window, in microseconds.
    pub check_time_us: u64,

    /// Congestion-check sampling interval, in microseconds.
    pub check_interval_us: u64,

    /// Drop-counter delta across one sampling interval above which a
    /// queue is considered congested.
    pub drop_diff: u32,

    /// Default ticket count handed to a newly scheduled task.
    pub default_tickets: u32,

    /// Driver-loop iterations between `CycleCounter` logging its running
    /// average iteration time.
    pub iter_log_window: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            threads: 1,
            tasks_per_iter: 128,
            tasks_per_iter_max: 32768,
            iters_per_os: 2,
            profile_threshold: 20,
            ewma_window: 32,
            check_time_us: 1_000_000,
            check_interval_us: 100_000,
            drop_diff: 1,
            default_tickets: 1,
            iter_log_window: 100_000,
        }
    }
}

impl RuntimeConfig {
    /// Parses a `RuntimeConfig` from TOML text, falling back to
    /// `Default::default()` for any field left unspecified.
    pub fn from_toml(text: &str) -> CoreResult<RuntimeConfig> {
        toml::from_str(text).map_err(|e| CoreError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_driver_constants() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.tasks_per_iter, 128);
        assert_eq!(cfg.tasks_per_iter_max, 32768);
        assert_eq!(cfg.profile_threshold, 20);
        assert_eq!(cfg.ewma_window, 32);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg = RuntimeConfig::from_toml("threads = 4\n").unwrap();
        assert_eq!(cfg.threads, 4);
        assert_eq!(cfg.tasks_per_iter, 128);
    }

    #[test]
    fn garbage_toml_is_a_config_error() {
        assert!(RuntimeConfig::from_toml("not valid [[[ toml").is_err());
    }
}
