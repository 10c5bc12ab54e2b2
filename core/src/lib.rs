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

//! A stride-scheduled, multi-threaded packet-processing runtime core:
//! per-core driver loops, a control plane that loads and rebalances
//! named routers without stopping the data plane, and the family of
//! load-balancing algorithms that turn measured load into task moves.

#[macro_use]
extern crate log;

pub mod balance;
pub mod command;
pub mod config;
pub mod congestion;
pub mod cyclecounter;
pub mod error;
pub mod master;
pub mod msgqueue;
pub mod pending;
pub mod router;
pub mod sched;
pub mod task;
pub mod thread;
pub mod topology;

pub use config::RuntimeConfig;
pub use error::{CoreError, CoreResult};
pub use master::Master;
pub use msgqueue::{Message, MsgQueue};
pub use task::{Task, TaskState};
pub use thread::{pin_to_core, WorkerThread};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RouterInfo;

    struct Echo;
    impl Task for Echo {
        fn fire(&mut self) -> bool {
            true
        }
        fn name(&self) -> &str {
            "echo"
        }
    }

    /// End-to-end smoke test spanning config, master, router registry,
    /// and a cross-thread move driven entirely through `command::dispatch`
    /// — the rough shape of scenario S2 in miniature.
    #[test]
    fn addnf_then_movenf_relocates_a_task() {
        let cfg = RuntimeConfig::default();
        let (master, workers) = Master::new(2, cfg);

        assert_eq!(command::dispatch(&master, "addnf", "app;src,,q1,sink,q1,"), 1);
        let task_id = master.with_router("app", |r| r.task_ids()[1]).unwrap();

        let handle0 = master.thread_handle(0).unwrap();
        let mut task = TaskState::new(task_id, Box::new(Echo), 0, 1);
        task.scheduled = true;
        handle0.sched.write().insert(task);

        assert_eq!(command::dispatch(&master, "movenf", "app.sink 1"), 1);
        workers[0].process_pending();
        workers[1].process_pending();

        let handle1 = master.thread_handle(1).unwrap();
        assert!(!handle0.sched.read().contains(task_id));
        assert!(handle1.sched.read().contains(task_id));
    }
}
