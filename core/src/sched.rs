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

//! The per-thread stride-ordered run queue. Unlike a plain round-robin
//! queue, position is keyed by virtual-time pass rather than arrival
//! order, and there is no sibling work-stealing: a task only ever runs on
//! its current home thread.

use crate::task::{pass_greater, TaskId, TaskState};

/// Tasks kept in ascending-pass order. Insertion is a binary search plus
/// a shift; this trades O(n) inserts for a trivial, obviously-correct
/// implementation of "always run the least-pass task next," which is
/// the only operation on the hot path (`peek_min`/`pop_min` are O(1)).
#[derive(Default)]
pub struct SchedList {
    tasks: Vec<TaskState>,
}

impl SchedList {
    pub fn new() -> SchedList {
        SchedList { tasks: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Inserts a task in pass order. Ties keep existing insertion order
    /// (the search scans past equal passes before placing the new task).
    pub fn insert(&mut self, task: TaskState) {
        let pos = self
            .tasks
            .iter()
            .position(|t| pass_greater(t.pass, task.pass))
            .unwrap_or(self.tasks.len());
        self.tasks.insert(pos, task);
    }

    pub fn peek_min(&self) -> Option<&TaskState> {
        self.tasks.first()
    }

    pub fn pop_min(&mut self) -> Option<TaskState> {
        if self.tasks.is_empty() {
            None
        } else {
            Some(self.tasks.remove(0))
        }
    }

    /// Removes a task by id, wherever it sits in the queue. Used when a
    /// pending op targets a task that is not at the head (e.g. a kill
    /// arriving for a task still waiting its turn).
    pub fn remove(&mut self, id: TaskId) -> Option<TaskState> {
        let pos = self.tasks.iter().position(|t| t.id == id)?;
        Some(self.tasks.remove(pos))
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|t| t.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskState> {
        self.tasks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TaskState> {
        self.tasks.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    struct Noop;
    impl Task for Noop {
        fn fire(&mut self) -> bool {
            true
        }
        fn name(&self) -> &str {
            "noop"
        }
    }

    fn task(id: TaskId, pass: u32) -> TaskState {
        let mut t = TaskState::new(id, Box::new(Noop), 0, 1);
        t.pass = pass;
        t
    }

    #[test]
    fn pop_min_returns_least_pass_first() {
        let mut sl = SchedList::new();
        sl.insert(task(1, 30));
        sl.insert(task(2, 10));
        sl.insert(task(3, 20));
        assert_eq!(sl.pop_min().unwrap().id, 2);
        assert_eq!(sl.pop_min().unwrap().id, 3);
        assert_eq!(sl.pop_min().unwrap().id, 1);
        assert!(sl.pop_min().is_none());
    }

    #[test]
    fn remove_by_id_works_regardless_of_position() {
        let mut sl = SchedList::new();
        sl.insert(task(1, 10));
        sl.insert(task(2, 20));
        sl.insert(task(3, 30));
        let removed = sl.remove(2).unwrap();
        assert_eq!(removed.id, 2);
        assert_eq!(sl.len(), 2);
        assert!(!sl.contains(2));
    }

    #[test]
    fn pass_ordering_survives_wraparound() {
        let mut sl = SchedList::new();
        sl.insert(task(1, u32::MAX - 1));
        sl.insert(task(2, 1));
        // task 2's pass (1) is "ahead" of task 1's pass (u32::MAX - 1) once
        // wrapped, so task 1 must still come out first.
        assert_eq!(sl.pop_min().unwrap().id, 1);
        assert_eq!(sl.pop_min().unwrap().id, 2);
    }
}
