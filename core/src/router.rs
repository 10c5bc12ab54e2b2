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

//! A named packet-processing graph: its tasks, their topology, and the
//! lifecycle state the command plane drives it through.

use crate::balance::{self, TaskLoad};
use crate::error::{CoreError, CoreResult};
use crate::task::{TaskId, ThreadId};
use crate::topology::TopologyModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterLifecycle {
    Loading,
    Running,
    Dying,
    Dead,
}

/// The interface the balancer and command plane consume to read and
/// steer a router's tasks. A `Router` implements it directly; element
/// graphs that are not retrieved into this pack (sources, queues,
/// reassemblers, ...) are the external collaborator that feeds
/// `update_info()` its raw measurements.
pub trait RouterInfo {
    fn router_name(&self) -> &str;
    fn update_info(&mut self);
    fn src_rate(&self) -> f64;
    fn task_ids(&self) -> &[TaskId];
    fn task_rate(&self, ref_ratio: f64) -> Vec<f64>;
    fn task_cycle(&self) -> Vec<u64>;
    fn check_congestion(&self) -> Option<TaskId>;
    fn reset_element(&mut self, name: &str) -> CoreResult<()>;

    /// Repartitions the router's whole task chain across its current
    /// CPU range by load, LPT-style. When `move_it` is true the new
    /// homes are committed; either way the computed `(task, thread)`
    /// assignments are returned for the caller to log or act on.
    fn update_chain(&mut self, move_it: bool) -> Vec<(TaskId, ThreadId)>;

    /// Looks at whichever task `check_congestion` last flagged and, if
    /// one exists and it has a chain predecessor on a different thread,
    /// swaps the two tasks' homes when `move_it` is true. Returns the
    /// congested task, if any, regardless of whether a move happened.
    fn update_local_chain(&mut self, move_it: bool) -> Option<TaskId>;
}

/// A router's tasks live in a stable arena indexed by `TaskId`; only the
/// ids (not the `TaskState`s themselves, which migrate between worker
/// threads) are held here.
pub struct Router {
    name: String,
    pub lifecycle: RouterLifecycle,
    pub topology: TopologyModel,
    task_ids: Vec<TaskId>,
    /// Maps a task's position in the topology to the TaskId the runtime
    /// assigned it when the router was activated.
    task_home: Vec<ThreadId>,
    /// Cached result of the last external congestion check (run via
    /// `congestion::is_congested` against a live `DropSource`, which is
    /// not something a `Router` owns); set through `note_congestion`.
    congested: Option<TaskId>,
}

impl Router {
    pub fn new(name: impl Into<String>, topology: TopologyModel, task_ids: Vec<TaskId>) -> Router {
        let n = task_ids.len();
        Router {
            name: name.into(),
            lifecycle: RouterLifecycle::Loading,
            topology,
            task_ids,
            task_home: vec![0; n],
            congested: None,
        }
    }

    pub fn is_system(&self) -> bool {
        self.name == "sys"
    }

    pub fn activate(&mut self) {
        self.lifecycle = RouterLifecycle::Running;
    }

    pub fn mark_dying(&mut self) {
        self.lifecycle = RouterLifecycle::Dying;
    }

    pub fn mark_dead(&mut self) {
        self.lifecycle = RouterLifecycle::Dead;
    }

    pub fn set_home(&mut self, task: TaskId, thread: ThreadId) {
        if let Some(pos) = self.task_ids.iter().position(|&t| t == task) {
            self.task_home[pos] = thread;
        }
    }

    pub fn home_of(&self, task: TaskId) -> Option<ThreadId> {
        self.task_ids
            .iter()
            .position(|&t| t == task)
            .map(|pos| self.task_home[pos])
    }

    /// Records the outcome of an external congestion check, consulted by
    /// `check_congestion`/`update_local_chain`.
    pub fn note_congestion(&mut self, task: Option<TaskId>) {
        self.congested = task;
    }

    fn task_loads(&self) -> Vec<TaskLoad> {
        let cycles = self.topology.task_cycle();
        let rates = self.topology.task_rate(1.0);
        self.task_ids
            .iter()
            .enumerate()
            .map(|(i, &task)| TaskLoad {
                task,
                cycles: cycles.get(i).copied().unwrap_or(0),
                rate: rates.get(i).copied().unwrap_or(0.0),
            })
            .collect()
    }
}

impl RouterInfo for Router {
    fn router_name(&self) -> &str {
        &self.name
    }

    fn update_info(&mut self) {
        // Rate/cycle propagation itself lives on `TopologyModel`; callers
        // that have fresh `QueueStats` call `self.topology.update_info`
        // directly. This hook exists so callers that only have a
        // `&mut dyn RouterInfo` can still trigger a refresh with
        // whatever the router already knows.
        let ref_rate = self.topology.src_rate();
        let stats = vec![Default::default(); self.task_ids.len()];
        self.topology.update_info(ref_rate, &stats);
    }

    fn src_rate(&self) -> f64 {
        self.topology.src_rate()
    }

    fn task_ids(&self) -> &[TaskId] {
        &self.task_ids
    }

    fn task_rate(&self, ref_ratio: f64) -> Vec<f64> {
        self.topology.task_rate(ref_ratio)
    }

    fn task_cycle(&self) -> Vec<u64> {
        self.topology.task_cycle().to_vec()
    }

    fn check_congestion(&self) -> Option<TaskId> {
        self.congested
    }

    fn reset_element(&mut self, name: &str) -> CoreResult<()> {
        if self.topology.task_index(name).is_some() {
            Ok(())
        } else {
            Err(CoreError::ElementNotFound(name.to_string(), self.name.clone()))
        }
    }

    fn update_chain(&mut self, move_it: bool) -> Vec<(TaskId, ThreadId)> {
        if self.task_home.is_empty() {
            return Vec::new();
        }
        let start = *self.task_home.iter().min().unwrap();
        let end = *self.task_home.iter().max().unwrap();
        let loads = self.task_loads();
        let assignments = balance::update_chain(&loads, start, end);
        if move_it {
            for &(task, thread) in &assignments {
                self.set_home(task, thread);
            }
        }
        assignments
    }

    fn update_local_chain(&mut self, move_it: bool) -> Option<TaskId> {
        let congested = self.congested?;
        let pos = self.task_ids.iter().position(|&t| t == congested)?;
        let order = self.topology.topo_order();
        let order_idx = order.iter().position(|&p| p == pos)?;
        if order_idx == 0 {
            return Some(congested);
        }
        let pred_pos = order[order_idx - 1];
        if move_it && self.task_home[pred_pos] != self.task_home[pos] {
            self.task_home.swap(pred_pos, pos);
        }
        Some(congested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::QueueStats;

    fn make_router(name: &str) -> Router {
        let topo = TopologyModel::parse("src,,q1,sink,q1,").unwrap();
        Router::new(name, topo, vec![0, 1])
    }

    #[test]
    fn sys_router_is_recognized_by_name() {
        assert!(make_router("sys").is_system());
        assert!(!make_router("app").is_system());
    }

    #[test]
    fn lifecycle_transitions_in_order() {
        let mut r = make_router("app");
        assert_eq!(r.lifecycle, RouterLifecycle::Loading);
        r.activate();
        assert_eq!(r.lifecycle, RouterLifecycle::Running);
        r.mark_dying();
        r.mark_dead();
        assert_eq!(r.lifecycle, RouterLifecycle::Dead);
    }

    #[test]
    fn home_thread_tracks_moves() {
        let mut r = make_router("app");
        r.set_home(0, 3);
        assert_eq!(r.home_of(0), Some(3));
        assert_eq!(r.home_of(1), Some(0));
    }

    #[test]
    fn reset_unknown_element_fails() {
        let mut r = make_router("app");
        assert!(r.reset_element("ghost").is_err());
        assert!(r.reset_element("src").is_ok());
    }

    #[test]
    fn update_chain_repartitions_across_home_range() {
        let mut r = make_router("app");
        r.set_home(0, 0);
        r.set_home(1, 2);
        let stats = vec![
            QueueStats { push_rate: 100.0, push_cycles: 100, ..Default::default() },
            QueueStats::default(),
        ];
        r.topology.update_info(100.0, &stats);

        let assignments = r.update_chain(true);
        assert_eq!(assignments.len(), 2);
        for (_, thread) in &assignments {
            assert!((0..=2).contains(thread));
        }
    }

    #[test]
    fn update_local_chain_swaps_home_with_predecessor() {
        let mut r = make_router("app");
        r.set_home(0, 0);
        r.set_home(1, 1);
        r.note_congestion(Some(1));

        let got = r.update_local_chain(true);
        assert_eq!(got, Some(1));
        assert_eq!(r.home_of(0), Some(1));
        assert_eq!(r.home_of(1), Some(0));
    }

    #[test]
    fn update_local_chain_reports_none_without_congestion() {
        let mut r = make_router("app");
        assert_eq!(r.update_local_chain(true), None);
    }
}
