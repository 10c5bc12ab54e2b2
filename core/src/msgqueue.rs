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

//! The control-plane command queue: a mutex-and-condvar FIFO that a
//! `CommandThread` blocks on, and that any external transport (socket,
//! CLI, test harness) posts into.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// A single control command posted to the runtime.
#[derive(Debug, Clone)]
pub struct Message {
    pub cmd: String,
    pub arg: String,
    pub id: u64,
}

pub struct MsgQueue {
    queue: Mutex<VecDeque<Message>>,
    cond: Condvar,
}

impl Default for MsgQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MsgQueue {
    pub fn new() -> MsgQueue {
        MsgQueue {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add_message(&self, msg: Message) {
        self.queue.lock().unwrap().push_back(msg);
        self.cond.notify_one();
    }

    /// Blocks until a message is available, then pops and returns it.
    pub fn wait_for_message(&self) -> Message {
        let mut queue = self.queue.lock().unwrap();
        while queue.is_empty() {
            queue = self.cond.wait(queue).unwrap();
        }
        queue.pop_front().expect("queue non-empty under lock")
    }

    /// Non-blocking pop, for tests and for hosts that drive the queue
    /// from their own event loop instead of a dedicated thread.
    pub fn try_get_message(&self) -> Option<Message> {
        self.queue.lock().unwrap().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn try_get_on_empty_queue_is_none() {
        let q = MsgQueue::new();
        assert!(q.try_get_message().is_none());
    }

    #[test]
    fn fifo_order_is_preserved() {
        let q = MsgQueue::new();
        q.add_message(Message { cmd: "a".into(), arg: "".into(), id: 1 });
        q.add_message(Message { cmd: "b".into(), arg: "".into(), id: 2 });
        assert_eq!(q.try_get_message().unwrap().cmd, "a");
        assert_eq!(q.try_get_message().unwrap().cmd, "b");
    }

    #[test]
    fn wait_for_message_wakes_on_post() {
        let q = Arc::new(MsgQueue::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.wait_for_message());
        thread::sleep(Duration::from_millis(20));
        q.add_message(Message { cmd: "addnf".into(), arg: "cfg".into(), id: 7 });
        let msg = handle.join().unwrap();
        assert_eq!(msg.id, 7);
    }
}
