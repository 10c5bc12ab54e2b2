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

//! The process-wide registry: worker thread handles, routers by name,
//! and the message-id to status map the control plane publishes
//! completion through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use spin::{Mutex, RwLock};

use crate::config::RuntimeConfig;
use crate::pending::PendingQueue;
use crate::router::Router;
use crate::sched::SchedList;
use crate::task::TaskId;
use crate::thread::{PendingRegistry, WorkerThread};

/// What the registry keeps for each worker thread: enough to post
/// pending ops and to read/move tasks for balancing, but none of the
/// driver-loop-only state (`WorkerThread` itself lives on the thread
/// that runs it).
#[derive(Clone)]
pub struct ThreadHandle {
    pub pending: Arc<PendingQueue>,
    pub sched: Arc<RwLock<SchedList>>,
}

/// `-2` unknown id, `-1` failed, `0` still running, `1` succeeded.
pub const MSG_UNKNOWN: i64 = -2;
pub const MSG_FAILED: i64 = -1;
pub const MSG_RUNNING: i64 = 0;
pub const MSG_OK: i64 = 1;

pub struct Master {
    threads: RwLock<Vec<ThreadHandle>>,
    registry: PendingRegistry,
    cfg: RuntimeConfig,
    routers: RwLock<HashMap<String, Router>>,
    msg_id: AtomicU64,
    msg_status: Mutex<HashMap<u64, AtomicI64>>,
    paused: AtomicI64,
    next_task_id: AtomicU64,
}

impl Master {
    /// Builds a `Master` registry along with `n` ready-to-spawn
    /// `WorkerThread`s sharing its pending-queue registry. The host is
    /// responsible for running each `WorkerThread`'s driver loop on its
    /// own OS thread.
    pub fn new(n: usize, cfg: RuntimeConfig) -> (Master, Vec<WorkerThread>) {
        let mut handles = Vec::with_capacity(n);
        let mut pendings = Vec::with_capacity(n);
        for _ in 0..n {
            let pending = Arc::new(PendingQueue::new());
            let sched = Arc::new(RwLock::new(SchedList::new()));
            pendings.push(pending.clone());
            handles.push(ThreadHandle { pending, sched });
        }
        let registry: PendingRegistry = Arc::new(RwLock::new(pendings));

        let workers: Vec<WorkerThread> = handles
            .iter()
            .enumerate()
            .map(|(id, h)| WorkerThread::new(id, h.sched.clone(), h.pending.clone(), registry.clone(), cfg.clone()))
            .collect();

        let master = Master {
            threads: RwLock::new(handles),
            registry,
            cfg,
            routers: RwLock::new(HashMap::new()),
            msg_id: AtomicU64::new(1),
            msg_status: Mutex::new(HashMap::new()),
            paused: AtomicI64::new(0),
            next_task_id: AtomicU64::new(0),
        };
        (master, workers)
    }

    /// Hands out `n` fresh, never-before-used `TaskId`s, for `addnf` to
    /// build a newly-parsed Router's task arena from.
    pub fn alloc_task_ids(&self, n: usize) -> Vec<TaskId> {
        let start = self.next_task_id.fetch_add(n as u64, Ordering::Relaxed);
        (0..n as u64).map(|i| (start + i) as TaskId).collect()
    }

    pub fn nthreads(&self) -> usize {
        self.threads.read().len()
    }

    pub fn thread_handle(&self, id: usize) -> Option<ThreadHandle> {
        self.threads.read().get(id).cloned()
    }

    /// `addthread`: appends a new worker thread to the pool and returns
    /// it for the host to spawn. Existing worker threads observe the
    /// growth on their next `ChangeHome` delivery, since they all share
    /// the same pending-queue registry.
    pub fn add_thread(&self) -> WorkerThread {
        let id = self.threads.read().len();
        let pending = Arc::new(PendingQueue::new());
        let sched = Arc::new(RwLock::new(SchedList::new()));
        self.threads.write().push(ThreadHandle { pending: pending.clone(), sched: sched.clone() });
        self.registry.write().push(pending.clone());
        WorkerThread::new(id, sched, pending, self.registry.clone(), self.cfg.clone())
    }

    pub fn get_msg_id(&self) -> u64 {
        let id = self.msg_id.fetch_add(1, Ordering::Relaxed);
        self.msg_status.lock().insert(id, AtomicI64::new(MSG_RUNNING));
        id
    }

    pub fn set_msg_status(&self, id: u64, status: i64) {
        if let Some(cell) = self.msg_status.lock().get(&id) {
            cell.store(status, Ordering::Relaxed);
        }
    }

    pub fn get_msg_status(&self, id: u64) -> i64 {
        self.msg_status
            .lock()
            .get(&id)
            .map(|cell| cell.load(Ordering::Relaxed))
            .unwrap_or(MSG_UNKNOWN)
    }

    pub fn add_router(&self, router: Router) {
        self.routers.write().insert(router.router_name_owned(), router);
    }

    pub fn remove_router(&self, name: &str) -> Option<Router> {
        self.routers.write().remove(name)
    }

    pub fn with_router<R>(&self, name: &str, f: impl FnOnce(&Router) -> R) -> Option<R> {
        self.routers.read().get(name).map(f)
    }

    pub fn with_router_mut<R>(&self, name: &str, f: impl FnOnce(&mut Router) -> R) -> Option<R> {
        self.routers.write().get_mut(name).map(f)
    }

    pub fn router_names(&self) -> Vec<String> {
        self.routers.read().keys().cloned().collect()
    }

    pub fn non_system_router_names(&self) -> Vec<String> {
        self.routers
            .read()
            .iter()
            .filter(|(_, r)| !r.is_system())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn pause(&self) {
        self.paused.fetch_add(1, Ordering::SeqCst);
    }

    pub fn unpause(&self) {
        self.paused.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst) > 0
    }
}

// `Router` does not expose an owned-name accessor elsewhere because
// every other caller only needs `&str`; the registry is the one place
// that needs to take ownership for the map key.
impl Router {
    fn router_name_owned(&self) -> String {
        use crate::router::RouterInfo;
        self.router_name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologyModel;

    fn router(name: &str) -> Router {
        let topo = TopologyModel::parse("src,,q,").unwrap();
        Router::new(name, topo, vec![0])
    }

    #[test]
    fn msg_status_starts_running_and_updates() {
        let (m, _workers) = Master::new(0, RuntimeConfig::default());
        let id = m.get_msg_id();
        assert_eq!(m.get_msg_status(id), MSG_RUNNING);
        m.set_msg_status(id, MSG_OK);
        assert_eq!(m.get_msg_status(id), MSG_OK);
    }

    #[test]
    fn unknown_msg_id_reports_unknown() {
        let (m, _workers) = Master::new(0, RuntimeConfig::default());
        assert_eq!(m.get_msg_status(999), MSG_UNKNOWN);
    }

    #[test]
    fn router_registry_add_remove_roundtrip() {
        let (m, _workers) = Master::new(0, RuntimeConfig::default());
        m.add_router(router("app"));
        assert!(m.with_router("app", |_| ()).is_some());
        assert!(m.remove_router("app").is_some());
        assert!(m.with_router("app", |_| ()).is_none());
    }

    #[test]
    fn non_system_routers_excludes_sys() {
        let (m, _workers) = Master::new(0, RuntimeConfig::default());
        m.add_router(router("sys"));
        m.add_router(router("app"));
        let names = m.non_system_router_names();
        assert_eq!(names, vec!["app".to_string()]);
    }

    #[test]
    fn pause_is_reference_counted() {
        let (m, _workers) = Master::new(0, RuntimeConfig::default());
        m.pause();
        m.pause();
        assert!(m.is_paused());
        m.unpause();
        assert!(m.is_paused());
        m.unpause();
        assert!(!m.is_paused());
    }

    #[test]
    fn add_thread_grows_the_pool_and_shares_the_registry() {
        let (m, workers) = Master::new(2, RuntimeConfig::default());
        assert_eq!(workers.len(), 2);
        assert_eq!(m.nthreads(), 2);
        let _new_worker = m.add_thread();
        assert_eq!(m.nthreads(), 3);
    }

    #[test]
    fn task_ids_are_allocated_without_overlap() {
        let (m, _workers) = Master::new(0, RuntimeConfig::default());
        let first = m.alloc_task_ids(3);
        let second = m.alloc_task_ids(2);
        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(second, vec![3, 4]);
    }
}
