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

//! Dispatches control-plane commands pulled off the `MsgQueue`: router
//! load/unload, task moves, and every balancer variant. Runs on its own
//! thread, outside the data plane, serially — one command finishes
//! (and its `msg_status` is recorded) before the next one starts.

use rand::thread_rng;

use crate::balance::{self, RouterLoad, TaskLoad};
use crate::master::Master;
use crate::msgqueue::{Message, MsgQueue};
use crate::pending::PendingOp;
use crate::router::{Router, RouterInfo};
use crate::task::TaskId;
use crate::topology::TopologyModel;

/// Collects `(task, cycles, rate)` triples for every task currently
/// resident on any worker thread, restricted to the given router names.
/// Reads straight from each thread's `SchedList`, since that is the only
/// place a `TaskState`'s live cycle/rate numbers exist.
fn collect_loads(master: &Master, router_names: &[String]) -> Vec<TaskLoad> {
    let task_ids: std::collections::HashSet<usize> = router_names
        .iter()
        .filter_map(|name| master.with_router(name, |r| r.task_ids().to_vec()))
        .flatten()
        .collect();

    let mut loads = Vec::new();
    for i in 0..master.nthreads() {
        if let Some(handle) = master.thread_handle(i) {
            for t in handle.sched.read().iter() {
                if task_ids.contains(&t.id) {
                    loads.push(TaskLoad { task: t.id, cycles: t.cycles, rate: t.rate });
                }
            }
        }
    }
    loads
}

/// Posts a `ChangeHome` pending op for every `(task, target_thread)`
/// assignment onto the task's *current* home thread, which will pick it
/// up on its next `process_pending` and hand it off.
fn execute_moves(master: &Master, assignments: &[(usize, usize)]) {
    for &(task, target) in assignments {
        for i in 0..master.nthreads() {
            if let Some(handle) = master.thread_handle(i) {
                if handle.sched.read().contains(task) {
                    handle.pending.push(task, PendingOp::ChangeHome(target));
                    break;
                }
            }
        }
    }
}

/// Resolves a `router.element` qualified name to the `TaskId` the
/// router assigned that element when it was loaded.
fn resolve_task(master: &Master, qualified: &str) -> Option<TaskId> {
    let mut parts = qualified.splitn(2, '.');
    let router_name = parts.next()?;
    let element_name = parts.next()?;
    master
        .with_router(router_name, |r| r.topology.task_index(element_name).map(|pos| r.task_ids()[pos]))
        .flatten()
}

/// Parses `movenf`/`move_reset_nf`'s whitespace-separated `router.element
/// target_thread` pairs into `(task, target_thread)` assignments. `None`
/// on a malformed pair count, an unresolvable element, or a non-numeric
/// thread.
fn parse_move_pairs(master: &Master, tokens: &[&str]) -> Option<Vec<(TaskId, usize)>> {
    if tokens.len() % 2 != 0 {
        return None;
    }
    let mut assignments = Vec::with_capacity(tokens.len() / 2);
    for pair in tokens.chunks(2) {
        let task = resolve_task(master, pair[0])?;
        let target: usize = pair[1].parse().ok()?;
        assignments.push((task, target));
    }
    Some(assignments)
}

/// Runs one command to completion and returns its status code (`1` ok,
/// `-1` failed), matching `Master::set_msg_status`'s convention.
pub fn dispatch(master: &Master, cmd: &str, arg: &str) -> i64 {
    match cmd {
        "addnf" => {
            let mut parts = arg.splitn(2, ';');
            let name = match parts.next() {
                Some(n) if !n.trim().is_empty() => n.trim(),
                _ => return -1,
            };
            let topo_spec = match parts.next() {
                Some(t) => t,
                None => return -1,
            };
            let topology = match TopologyModel::parse(topo_spec) {
                Ok(t) => t,
                Err(_) => return -1,
            };
            let task_ids = master.alloc_task_ids(topology.task_names().count());
            let mut router = Router::new(name, topology, task_ids);
            router.activate();
            master.add_router(router);
            1
        }
        "movenf" => {
            let tokens: Vec<&str> = arg.split_whitespace().collect();
            match parse_move_pairs(master, &tokens) {
                Some(assignments) => {
                    execute_moves(master, &assignments);
                    1
                }
                None => -1,
            }
        }
        "move_reset_nf" => {
            let tokens: Vec<&str> = arg.split_whitespace().collect();
            let reset_name = match tokens.first() {
                Some(&n) => n,
                None => return -1,
            };
            let assignments = match parse_move_pairs(master, &tokens[1..]) {
                Some(a) => a,
                None => return -1,
            };
            execute_moves(master, &assignments);
            let mut parts = reset_name.splitn(2, '.');
            let router_name = match parts.next() {
                Some(r) => r,
                None => return -1,
            };
            let element_name = match parts.next() {
                Some(e) => e,
                None => return -1,
            };
            match master.with_router_mut(router_name, |r| r.reset_element(element_name)) {
                Some(Ok(())) => 1,
                _ => -1,
            }
        }
        "balance" => {
            let names = master.non_system_router_names();
            let loads = collect_loads(master, &names);
            let report = balance::balance(&loads, master.nthreads());
            info!(
                "balance: old_balance={:.2} new_balance={:.2} (report only, no moves executed)",
                report.old_balance,
                report.new_balance
            );
            1
        }
        "newbalance" => {
            let start_thread: usize = match arg.trim().parse() {
                Ok(v) => v,
                Err(_) => return -1,
            };
            let names = master.non_system_router_names();
            let loads = collect_loads(master, &names);
            let (assignments, report) = balance::newbalance(&loads, start_thread, master.nthreads());
            info!(
                "newbalance: old_balance={:.2} new_balance={:.2}",
                report.old_balance,
                report.new_balance
            );
            execute_moves(master, &assignments);
            1
        }
        "randombalance" => {
            let start_thread: usize = arg.trim().parse().unwrap_or(1);
            let names = master.non_system_router_names();
            let ids: Vec<usize> = collect_loads(master, &names).into_iter().map(|t| t.task).collect();
            let mut rng = thread_rng();
            let assignments = balance::randombalance(&ids, start_thread, master.nthreads(), &mut rng);
            execute_moves(master, &assignments);
            1
        }
        "dividebalance" => {
            let start_thread: usize = match arg.trim().parse() {
                Ok(v) => v,
                Err(_) => return -1,
            };
            let names = master.non_system_router_names();
            let routers: Vec<RouterLoad> = names
                .iter()
                .map(|name| {
                    let tasks = collect_loads(master, std::slice::from_ref(name));
                    let total: f64 = tasks.iter().map(|t| t.load()).sum();
                    RouterLoad { tasks, total }
                })
                .collect();
            let assignments = balance::dividebalance(&routers, start_thread, master.nthreads());
            execute_moves(master, &assignments);
            1
        }
        "global" => {
            let move_flag: bool = match arg.trim().parse() {
                Ok(v) => v,
                Err(_) => return -1,
            };
            for name in master.non_system_router_names() {
                master.with_router_mut(&name, |r| {
                    let assignments = r.update_chain(move_flag);
                    info!(
                        "global: router={} update_chain touched {} tasks (move={})",
                        name,
                        assignments.len(),
                        move_flag
                    );
                });
            }
            1
        }
        "addthread" => {
            let n: i64 = match arg.trim().parse() {
                Ok(v) => v,
                Err(_) => return -1,
            };
            for _ in 0..n {
                let _worker = master.add_thread();
                // The host is responsible for actually spawning
                // `_worker`'s driver loop on a new OS thread; the
                // command plane only grows the registry.
            }
            1
        }
        "delnf" => {
            let name = arg.trim();
            match master.with_router(name, |r| r.task_ids().to_vec()) {
                Some(task_ids) => {
                    for i in 0..master.nthreads() {
                        if let Some(handle) = master.thread_handle(i) {
                            for &task in &task_ids {
                                handle.pending.push(task, PendingOp::Kill(i));
                            }
                        }
                    }
                    master.remove_router(name);
                    1
                }
                None => -1,
            }
        }
        _ => -1,
    }
}

/// The command-thread loop: block on `queue`, dispatch, record status,
/// repeat. Runs until told to stop.
pub fn run(master: &Master, queue: &MsgQueue, stop: &std::sync::atomic::AtomicBool) {
    while !stop.load(std::sync::atomic::Ordering::Relaxed) {
        let Message { cmd, arg, id } = queue.wait_for_message();
        let status = dispatch(master, &cmd, &arg);
        master.set_msg_status(id, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    #[test]
    fn unknown_command_fails() {
        let (master, _workers) = Master::new(1, RuntimeConfig::default());
        assert_eq!(dispatch(&master, "nonsense", ""), -1);
    }

    #[test]
    fn newbalance_rejects_unparseable_start_thread() {
        let (master, _workers) = Master::new(1, RuntimeConfig::default());
        assert_eq!(dispatch(&master, "newbalance", "not-a-number"), -1);
    }

    #[test]
    fn addthread_grows_the_pool() {
        let (master, _workers) = Master::new(1, RuntimeConfig::default());
        assert_eq!(dispatch(&master, "addthread", "2"), 1);
        assert_eq!(master.nthreads(), 3);
    }

    #[test]
    fn delnf_on_missing_router_fails() {
        let (master, _workers) = Master::new(1, RuntimeConfig::default());
        assert_eq!(dispatch(&master, "delnf", "ghost"), -1);
    }

    #[test]
    fn addnf_builds_activates_and_registers_a_router() {
        let (master, _workers) = Master::new(1, RuntimeConfig::default());
        assert_eq!(dispatch(&master, "addnf", "app;src,,q1,sink,q1,"), 1);
        let lifecycle = master.with_router("app", |r| r.lifecycle).unwrap();
        assert_eq!(lifecycle, crate::router::RouterLifecycle::Running);
        assert_eq!(master.with_router("app", |r| r.task_ids().len()).unwrap(), 2);
    }

    #[test]
    fn addnf_rejects_malformed_configuration_text() {
        let (master, _workers) = Master::new(1, RuntimeConfig::default());
        assert_eq!(dispatch(&master, "addnf", "app-with-no-topology"), -1);
        assert_eq!(dispatch(&master, "addnf", ";src,,q1,sink,q1,"), -1);
    }

    struct NoOpTask;
    impl crate::task::Task for NoOpTask {
        fn fire(&mut self) -> bool {
            true
        }
        fn name(&self) -> &str {
            "noop"
        }
    }

    #[test]
    fn movenf_relocates_a_task_by_qualified_name() {
        let (master, workers) = Master::new(2, RuntimeConfig::default());
        assert_eq!(dispatch(&master, "addnf", "app;src,,q1,sink,q1,"), 1);
        let task_id = master.with_router("app", |r| r.task_ids()[1]).unwrap();

        let handle0 = master.thread_handle(0).unwrap();
        let mut task = crate::task::TaskState::new(task_id, Box::new(NoOpTask), 0, 1);
        task.scheduled = true;
        handle0.sched.write().insert(task);

        assert_eq!(dispatch(&master, "movenf", "app.sink 1"), 1);
        workers[0].process_pending();
        workers[1].process_pending();

        assert!(!master.thread_handle(0).unwrap().sched.read().contains(task_id));
        assert!(master.thread_handle(1).unwrap().sched.read().contains(task_id));
    }

    #[test]
    fn movenf_rejects_an_unresolvable_element() {
        let (master, _workers) = Master::new(1, RuntimeConfig::default());
        assert_eq!(dispatch(&master, "addnf", "app;src,,q1,sink,q1,"), 1);
        assert_eq!(dispatch(&master, "movenf", "app.ghost 0"), -1);
    }

    #[test]
    fn move_reset_nf_moves_then_resets_the_named_element() {
        let (master, workers) = Master::new(2, RuntimeConfig::default());
        assert_eq!(dispatch(&master, "addnf", "app;src,,q1,sink,q1,"), 1);
        let task_id = master.with_router("app", |r| r.task_ids()[1]).unwrap();

        let handle0 = master.thread_handle(0).unwrap();
        let mut task = crate::task::TaskState::new(task_id, Box::new(NoOpTask), 0, 1);
        task.scheduled = true;
        handle0.sched.write().insert(task);

        assert_eq!(dispatch(&master, "move_reset_nf", "app.sink app.sink 1"), 1);
        workers[0].process_pending();
        workers[1].process_pending();
        assert!(master.thread_handle(1).unwrap().sched.read().contains(task_id));
    }

    #[test]
    fn global_invokes_update_chain_on_every_router() {
        let (master, _workers) = Master::new(3, RuntimeConfig::default());
        assert_eq!(dispatch(&master, "addnf", "app;src,,q1,sink,q1,"), 1);
        master.with_router_mut("app", |r| {
            r.set_home(r.task_ids()[0], 0);
            r.set_home(r.task_ids()[1], 2);
        });
        assert_eq!(dispatch(&master, "global", "true"), 1);
    }
}
