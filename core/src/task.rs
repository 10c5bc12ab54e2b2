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

//! The schedulable unit. An element's work function is wrapped in a `Task`
//! and driven by a `WorkerThread`'s stride scheduler; a `TaskState` carries
//! the bookkeeping the scheduler and balancer need and never touches the
//! element itself.

/// A large virtual-time unit; a task's stride is `STRIDE1 / tickets`, so a
/// task with more tickets advances its pass more slowly and is picked more
/// often. Mirrors the constant used by Click's stride scheduler.
pub const STRIDE1: u32 = 1 << 20;

/// Index of a task within its owning router's task arena. Stable for the
/// lifetime of the task; never reused while a pending op can still refer
/// to it.
pub type TaskId = usize;

/// Identifies a worker thread. Thread 0 is the quiescent thread that never
/// runs application tasks.
pub type ThreadId = usize;

/// The interface an element's scheduled work exposes to the runtime. Must
/// run to completion on every call; suspending mid-fire is a contract
/// violation, not a supported yield mechanism.
pub trait Task: Send {
    /// Runs the task until it either finishes its unit of work or decides
    /// to yield. Returns `true` if it did useful work this call ("work
    /// done"); a task that returns `false` is assumed to be starved
    /// (e.g. waiting on an empty upstream queue) and the scheduler may
    /// advance its pass further than usual to avoid busy-spinning on it.
    fn fire(&mut self) -> bool;

    /// A short name used in logs and in `task_thread`/`task_call` handler
    /// output.
    fn name(&self) -> &str;
}

/// Wrap-safe stride-scheduling pass comparison: returns `true` if `a` is
/// strictly ahead of `b`, treating pass as a 32-bit value that wraps.
#[inline]
pub fn pass_greater(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

#[inline]
pub fn pass_greater_eq(a: u32, b: u32) -> bool {
    a == b || pass_greater(a, b)
}

/// Scheduling and profiling metadata for one task, plus the task itself.
pub struct TaskState {
    pub id: TaskId,
    pub task: Box<dyn Task>,

    pub home_thread: ThreadId,
    pub pass: u32,
    pub tickets: u32,
    pub scheduled: bool,
    pub strong_unscheduled: bool,

    /// EWMA of cycles spent per `fire()`, updated only once `run_count`
    /// exceeds the profiling threshold.
    pub cycles: u64,
    pub run_count: u64,

    /// Externally supplied packet rate (fires/sec), set by the owning
    /// router's topology model from measured queue throughput.
    pub rate: f64,

    /// Cached `cycles * rate`, set by the balancer at the start of a
    /// balancing pass and read back by it after move planning.
    pub task_load: f64,
}

impl TaskState {
    pub fn new(id: TaskId, task: Box<dyn Task>, home_thread: ThreadId, tickets: u32) -> TaskState {
        TaskState {
            id,
            task,
            home_thread,
            pass: 0,
            tickets: tickets.max(1),
            scheduled: false,
            strong_unscheduled: false,
            cycles: 0,
            run_count: 0,
            rate: 0.0,
            task_load: 0.0,
        }
    }

    #[inline]
    pub fn stride(&self) -> u32 {
        STRIDE1 / self.tickets
    }

    /// Folds a freshly measured cycle count into the running EWMA, with
    /// the newest sample given a `1/window` weight. Cold-start samples
    /// (before `run_count` passes `threshold`) are counted but not mixed
    /// in, so a task's first few expensive compiles/allocations do not
    /// permanently bias its profile.
    pub fn record_cycles(&mut self, delta: u64, threshold: u64, window: u64) {
        self.run_count += 1;
        if self.run_count > threshold {
            self.cycles = delta / window + self.cycles * (window - 1) / window;
        }
    }

    #[inline]
    pub fn load(&self) -> f64 {
        self.cycles as f64 * self.rate
    }
}
