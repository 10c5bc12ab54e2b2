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

//! Cross-thread hand-off of task operations. Many threads may post into a
//! `PendingQueue`; only the owning `WorkerThread` ever drains it, on the
//! next iteration of its driver loop.

use std::collections::HashMap;

use spin::Mutex;

use crate::task::{TaskId, TaskState};

/// An operation posted to a task's home thread (or its future home
/// thread, for a move). Ordered by precedence when two ops target the
/// same task before the first is drained: `Kill` dominates `ChangeHome`,
/// which dominates `Add`/`Remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    AddToSched,
    RemoveFromSched,
    ChangeHome(usize),
    Kill(usize),
}

impl PendingOp {
    fn precedence(&self) -> u8 {
        match self {
            PendingOp::Kill(_) => 3,
            PendingOp::ChangeHome(_) => 2,
            PendingOp::AddToSched | PendingOp::RemoveFromSched => 1,
        }
    }
}

/// Per-thread queue of pending task operations. Pushes race freely;
/// drains are expected from a single owning thread but the lock makes
/// that merely a convention, not a requirement.
pub struct PendingQueue {
    // A map, not a list: coalescing on push is O(1) instead of requiring
    // a scan, and the one thing a drain ever needs is "all ops, order
    // doesn't matter across distinct tasks."
    ops: Mutex<HashMap<TaskId, PendingOp>>,

    // A task being moved onto this thread travels here, fully owned,
    // until the owning thread's next drain picks it up and inserts it
    // into its `SchedList`. Kept separate from `ops` because a
    // `TaskState` is not `Copy`/`PartialEq` the way a bare opcode is.
    inbox: Mutex<Vec<TaskState>>,
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingQueue {
    pub fn new() -> PendingQueue {
        PendingQueue {
            ops: Mutex::new(HashMap::new()),
            inbox: Mutex::new(Vec::new()),
        }
    }

    /// Hands a task over to this thread. Called by whichever thread is
    /// currently executing the move (the task's old home thread, acting
    /// on a `ChangeHome` op it observed for itself).
    pub fn deliver(&self, task: TaskState) {
        self.inbox.lock().push(task);
    }

    /// Claims every task that has arrived since the last call.
    pub fn take_arrivals(&self) -> Vec<TaskState> {
        self.inbox.lock().drain(..).collect()
    }

    /// Posts an operation for `task`. If an operation is already pending
    /// for that task, the higher-precedence one wins; same-precedence
    /// pushes overwrite with the latest (last-write-wins).
    pub fn push(&self, task: TaskId, op: PendingOp) {
        let mut ops = self.ops.lock();
        match ops.get(&task) {
            Some(existing) if existing.precedence() > op.precedence() => {}
            _ => {
                ops.insert(task, op);
            }
        }
    }

    /// Atomically claims every pending op and empties the queue. Safe to
    /// call from any thread, but only the owning thread should apply the
    /// results to its `SchedList`.
    pub fn drain(&self) -> Vec<(TaskId, PendingOp)> {
        let mut ops = self.ops.lock();
        ops.drain().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_dominates_change_home() {
        let q = PendingQueue::new();
        q.push(1, PendingOp::ChangeHome(2));
        q.push(1, PendingOp::Kill(0));
        q.push(1, PendingOp::ChangeHome(3));
        let drained = q.drain();
        assert_eq!(drained, vec![(1, PendingOp::Kill(0))]);
    }

    #[test]
    fn same_precedence_last_write_wins() {
        let q = PendingQueue::new();
        q.push(1, PendingOp::ChangeHome(2));
        q.push(1, PendingOp::ChangeHome(5));
        assert_eq!(q.drain(), vec![(1, PendingOp::ChangeHome(5))]);
    }

    #[test]
    fn drain_empties_the_queue() {
        let q = PendingQueue::new();
        q.push(1, PendingOp::AddToSched);
        assert_eq!(q.len(), 1);
        q.drain();
        assert!(q.is_empty());
    }

    #[test]
    fn delivered_tasks_are_claimed_once() {
        use crate::task::{Task, TaskState};

        struct Noop;
        impl Task for Noop {
            fn fire(&mut self) -> bool {
                true
            }
            fn name(&self) -> &str {
                "noop"
            }
        }

        let q = PendingQueue::new();
        q.deliver(TaskState::new(5, Box::new(Noop), 1, 1));
        let arrivals = q.take_arrivals();
        assert_eq!(arrivals.len(), 1);
        assert_eq!(arrivals[0].id, 5);
        assert!(q.take_arrivals().is_empty());
    }
}
