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

//! The cooperative, single-threaded-per-core driver loop. Each
//! `WorkerThread` owns one `SchedList` and runs tasks in stride-pass
//! order, forever, until told to stop. There is no work stealing: a
//! task only ever runs on its current home thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nfcycles::rdtsc;
use spin::RwLock;

use crate::config::RuntimeConfig;
use crate::cyclecounter::CycleCounter;
use crate::error::{CoreError, CoreResult};
use crate::pending::{PendingOp, PendingQueue};
use crate::sched::SchedList;
use crate::task::{ThreadId, TaskState};

/// Pins the calling OS thread to a single CPU core, mirroring the
/// `cpu_set_t`/`CPU_SET`/`pthread_setaffinity_np` dance userlevel click
/// does before spinning up a router thread. A `WorkerThread` doesn't
/// call this itself since tests run many of them on one OS thread;
/// hosts that actually spawn one OS thread per `WorkerThread` are
/// expected to call it right after spawning.
pub fn pin_to_core(core: usize) -> CoreResult<()> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        let rc = libc::pthread_setaffinity_np(
            libc::pthread_self(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        );
        if rc != 0 {
            return Err(CoreError::Fatal(format!(
                "pthread_setaffinity_np(core={}) failed: {}",
                core,
                nix::errno::Errno::from_i32(rc)
            )));
        }
    }
    Ok(())
}

/// A hook for the (out of scope) timer wheel. A no-op implementation is
/// used by tests and by hosts that only drive routers synchronously.
pub trait TimerSource {
    fn run_expired_timers(&mut self);
}

/// A hook for the (out of scope) select/poll event loop.
pub trait OsWaiter {
    fn run_os(&mut self);
}

pub struct NoopTimerSource;
impl TimerSource for NoopTimerSource {
    fn run_expired_timers(&mut self) {}
}

pub struct NoopOsWaiter;
impl OsWaiter for NoopOsWaiter {
    fn run_os(&mut self) {}
}

/// One worker thread's private state. `sched` is wrapped so that a
/// `CommandThread` can also reach in to remove a task (e.g. to start a
/// move) or read every task's load for balancing, mirroring the way the
/// scheduler this was adapted from shared its run queue behind a
/// `spin::RwLock` for its (since-removed) sibling work-stealing path.
/// The set of every thread's pending queue, indexed by `ThreadId`. Held
/// behind a lock so `addthread` can grow the pool while other threads
/// are running.
pub type PendingRegistry = Arc<RwLock<Vec<Arc<PendingQueue>>>>;

pub struct WorkerThread {
    pub id: ThreadId,
    pub sched: Arc<RwLock<SchedList>>,
    pub pending: Arc<PendingQueue>,
    siblings: PendingRegistry,
    stop: Arc<AtomicBool>,
    iter: u64,
    cfg: RuntimeConfig,
    iter_timer: CycleCounter,
}

impl WorkerThread {
    pub fn new(
        id: ThreadId,
        sched: Arc<RwLock<SchedList>>,
        pending: Arc<PendingQueue>,
        siblings: PendingRegistry,
        cfg: RuntimeConfig,
    ) -> WorkerThread {
        let iter_timer = CycleCounter::new(id, &cfg);
        WorkerThread {
            id,
            sched,
            pending,
            siblings,
            stop: Arc::new(AtomicBool::new(false)),
            iter: 0,
            cfg,
            iter_timer,
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Applies every pending op targeting this thread, then admits every
    /// task that has arrived in its inbox via a completed move.
    pub fn process_pending(&self) {
        let ops = self.pending.drain();
        let mut sched = self.sched.write();
        for (task_id, op) in ops {
            match op {
                PendingOp::Kill(_from) => {
                    sched.remove(task_id);
                }
                PendingOp::ChangeHome(target) => {
                    if let Some(mut task) = sched.remove(task_id) {
                        task.home_thread = target;
                        task.scheduled = false;
                        if let Some(dest) = self.siblings.read().get(target) {
                            dest.deliver(task);
                        }
                    }
                }
                PendingOp::RemoveFromSched => {
                    if let Some(task) = sched.remove(task_id) {
                        // Parked tasks are simply not reinserted; a
                        // later AddToSched op (or a fresh schedule())
                        // brings them back.
                        drop(task);
                    }
                }
                PendingOp::AddToSched => {}
            }
        }
        for mut arrived in self.pending.take_arrivals() {
            arrived.scheduled = true;
            let base = sched.peek_min().map(|t| t.pass).unwrap_or(0);
            arrived.pass = base.wrapping_add(arrived.stride());
            sched.insert(arrived);
        }
    }

    /// Runs up to `tasks_per_iter` tasks (capped by
    /// `tasks_per_iter_max`), in ascending-pass order. Mirrors the
    /// `run_tasks` loop this was grounded on: a task that is no longer
    /// schedulable (its home thread changed underneath it) is dropped
    /// from consideration instead of fired.
    pub fn run_tasks(&mut self, requested: u32) {
        let n = requested.min(self.cfg.tasks_per_iter_max);
        let mut sched = self.sched.write();
        for _ in 0..n {
            let mut t = match sched.pop_min() {
                Some(t) => t,
                None => break,
            };
            if t.home_thread != self.id || !t.scheduled {
                continue;
            }

            let start = rdtsc();
            let work_done = t.task.fire();
            let delta = rdtsc() - start;
            t.record_cycles(delta, self.cfg.profile_threshold, self.cfg.ewma_window);

            if t.scheduled {
                t.pass = t.pass.wrapping_add(t.stride());
                if !work_done {
                    if let Some(next_pass) = sched.peek_min().map(|x| x.pass) {
                        if crate::task::pass_greater(t.pass, next_pass) {
                            t.pass = next_pass;
                        }
                    }
                }
                sched.insert(t);
            }
        }
    }

    /// One full iteration of the cooperative driver loop: drain
    /// pendings, run a batch of tasks, service timers on a stride, and
    /// periodically yield to an OS wait. Returns `false` once a stop has
    /// been requested and observed.
    pub fn drive_once<T: TimerSource, O: OsWaiter>(&mut self, timers: &mut T, os: &mut O) -> bool {
        if self.stop.load(Ordering::Relaxed) {
            return false;
        }
        self.iter_timer.start();
        self.iter += 1;
        self.process_pending();
        self.run_tasks(self.cfg.tasks_per_iter);
        if self.iter % 8 == 0 {
            timers.run_expired_timers();
        }
        if self.iter % self.cfg.iters_per_os as u64 == 0 {
            os.run_os();
        }
        self.iter_timer.stop();
        true
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
