//! A single named FIFO of `Entry` values.
//!
//! `Queue` only exposes the operations `spec.md` §4.B names; everything
//! else (id allocation discipline, journal interaction) lives one layer
//! up in [`crate::directory`] and [`crate::queues`].

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::entry::{ConnectionId, Entry, QueueName};

/// `next_id` plus the broadcast primitive every `wait_one` call
/// subscribes to. The mutex serializes allocation of `next_id` with the
/// `notify` broadcast so a task woken by `notify` is guaranteed to find
/// the new entry already installed (`spec.md` §5).
pub struct Waiter {
    pub next_id: Mutex<u64>,
    pub notify: Notify,
}

impl Waiter {
    fn new() -> Self {
        Self {
            next_id: Mutex::new(0),
            notify: Notify::new(),
        }
    }
}

/// One named queue. `owner = None` means persistent; `owner = Some(c)`
/// means transient to connection `c`.
pub struct Queue {
    pub name: QueueName,
    pub owner: Option<ConnectionId>,
    map: BTreeMap<u64, Entry>,
    pub waiter: Arc<Waiter>,
}

impl Queue {
    /// `spec.md` §4.B `make`: an empty queue, `next_id = 0`, a fresh
    /// waiter.
    pub fn make(owner: Option<ConnectionId>, name: QueueName) -> Self {
        Self {
            name,
            owner,
            map: BTreeMap::new(),
            waiter: Arc::new(Waiter::new()),
        }
    }

    /// An ephemeral queue standing in for one that does not exist, so
    /// read paths (`transfer`, `entry`, `wait_one`) can proceed without
    /// a separate existence check. Never inserted into a `Directory`.
    pub fn ephemeral(name: QueueName) -> Self {
        Self::make(None, name)
    }

    pub fn length(&self) -> usize {
        self.map.len()
    }

    /// `spec.md` §4.B `append`: insert under the given id and broadcast
    /// to every waiter. The caller must have allocated `id` while
    /// holding `self.waiter.next_id`.
    pub fn append(&mut self, id: u64, entry: Entry) {
        self.map.insert(id, entry);
        self.waiter.notify.notify_waiters();
    }

    /// `spec.md` §4.B `remove_id`: no-op if `id` is absent.
    pub fn remove_id(&mut self, id: u64) {
        self.map.remove(&id);
    }

    pub fn get(&self, id: u64) -> Option<&Entry> {
        self.map.get(&id)
    }

    /// `spec.md` §4.B `contents`: a snapshot of current entries, in id
    /// (and therefore insertion) order.
    pub fn contents(&self) -> Vec<(u64, &Entry)> {
        self.map.iter().map(|(id, e)| (*id, e)).collect()
    }

    /// Entries with id strictly greater than `from`, in id order. Used
    /// by `Queues::transfer`.
    pub fn entries_after(&self, from: i64) -> Vec<(u64, &Entry)> {
        self.map
            .iter()
            .filter(|(id, _)| **id as i64 > from)
            .map(|(id, e)| (*id, e))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Message, MessageKind};

    fn entry(origin: &str) -> Entry {
        Entry {
            timestamp_ns: 0,
            origin: ConnectionId::new(origin),
            message: Message {
                kind: MessageKind::Request,
                reply_to: None,
                origin: ConnectionId::new(origin),
                payload: vec![],
            },
        }
    }

    #[test]
    fn append_then_remove_keeps_length_consistent() {
        let mut q = Queue::make(None, QueueName::new("q"));
        q.append(0, entry("c1"));
        q.append(1, entry("c1"));
        assert_eq!(q.length(), 2);
        q.remove_id(0);
        assert_eq!(q.length(), 1);
        assert!(q.get(0).is_none());
        assert!(q.get(1).is_some());
    }

    #[test]
    fn remove_missing_id_is_a_no_op() {
        let mut q = Queue::make(None, QueueName::new("q"));
        q.append(0, entry("c1"));
        q.remove_id(99);
        assert_eq!(q.length(), 1);
    }

    #[test]
    fn entries_after_respects_from_cursor() {
        let mut q = Queue::make(None, QueueName::new("q"));
        for i in 0..4 {
            q.append(i, entry("c1"));
        }
        let after = q.entries_after(1);
        let ids: Vec<u64> = after.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn append_wakes_a_waiting_notify_subscriber() {
        let q = Arc::new(Mutex::new(Queue::make(None, QueueName::new("q"))));
        let waiter = q.lock().await.waiter.clone();
        let notified = waiter.notify.notified();
        let q2 = q.clone();
        let handle = tokio::spawn(async move {
            q2.lock().await.append(0, entry("c1"));
        });
        notified.await;
        handle.await.unwrap();
        assert_eq!(q.lock().await.length(), 1);
    }
}
