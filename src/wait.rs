//! Waiting/notify machinery (`spec.md` §4.D): `wait_one` blocks a task
//! until a named queue gains a message past a cursor or is created;
//! `wait` races `wait_one` over several names against a timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::directory::Directory;
use crate::entry::QueueName;

/// Blocks until `name` has progress visible past `from`, or is created
/// if it does not exist yet.
///
/// Preserves the source convention around the `next_id = 0` / `from =
/// -1` tie (`spec.md` §9 Open Questions): the wake predicate is the
/// literal `from < next_id - 1` comparison, widened into `i64` so `-1`
/// composes with it instead of being special-cased. A fresh, genuinely
/// empty queue (`next_id == 0`) does not wake a `from == -1` waiter
/// immediately — there is nothing past `-1` to see yet; the first
/// `send` into it does. See `DESIGN.md` for the recorded resolution.
pub async fn wait_one(dir: Arc<Mutex<Directory>>, from: i64, name: QueueName) {
    loop {
        let waiter = {
            let d = dir.lock().await;
            d.get(&name).map(|q| q.waiter.clone())
        };

        let Some(waiter) = waiter else {
            let rx = {
                let mut d = dir.lock().await;
                d.wait_for(name.clone())
            };
            // A directory is never torn down out from under a live
            // `Queues`, so the sender side is always eventually either
            // fired by `add` or dropped alongside the directory itself.
            let _ = rx.await;
            continue;
        };

        let next_id = *waiter.next_id.lock().await;
        if from < next_id as i64 - 1 {
            return;
        }

        // Subscribe before re-checking so a `send` racing in between
        // the first check and this one is not missed.
        let notified = waiter.notify.notified();
        let next_id = *waiter.next_id.lock().await;
        if from < next_id as i64 - 1 {
            return;
        }
        notified.await;
    }
}

/// `spec.md` §4.D `wait`: races `wait_one` over every name in `names`
/// against `timeout`. Returns as soon as any one resolves, or when the
/// timeout elapses. All sibling waiters are dropped (and so cancelled)
/// on return, since they are plain in-process futures rather than
/// detached tasks.
pub async fn wait(dir: Arc<Mutex<Directory>>, from: i64, timeout: Duration, names: &[QueueName]) {
    if names.is_empty() {
        tokio::time::sleep(timeout).await;
        return;
    }
    let races = names
        .iter()
        .map(|name| Box::pin(wait_one(dir.clone(), from, name.clone())));
    tokio::select! {
        _ = futures::future::select_all(races) => {}
        _ = tokio::time::sleep(timeout) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{ConnectionId, Entry, Message, MessageKind};
    use std::time::Instant;

    fn entry() -> Entry {
        Entry {
            timestamp_ns: 0,
            origin: ConnectionId::new("c1"),
            message: Message {
                kind: MessageKind::Request,
                reply_to: None,
                origin: ConnectionId::new("c1"),
                payload: vec![],
            },
        }
    }

    #[tokio::test]
    async fn wait_one_wakes_on_send_into_existing_queue() {
        let dir = Arc::new(Mutex::new(Directory::new()));
        dir.lock().await.add(None, QueueName::new("q"));

        let waiting = tokio::spawn(wait_one(dir.clone(), -1, QueueName::new("q")));
        tokio::task::yield_now().await;

        {
            let mut d = dir.lock().await;
            let q = d.get_mut(&QueueName::new("q")).unwrap();
            let mut next_id = q.waiter.next_id.lock().await;
            let id = *next_id;
            *next_id += 1;
            drop(next_id);
            q.append(id, entry());
        }

        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("wait_one should wake promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_one_wakes_on_creation_of_missing_queue() {
        let dir = Arc::new(Mutex::new(Directory::new()));
        let waiting = tokio::spawn(wait_one(dir.clone(), 0, QueueName::new("nope")));
        tokio::task::yield_now().await;

        dir.lock().await.add(None, QueueName::new("nope"));

        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("wait_one should wake on creation")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_times_out_with_no_intervening_send() {
        let dir = Arc::new(Mutex::new(Directory::new()));
        dir.lock().await.add(None, QueueName::new("q"));

        let start = Instant::now();
        wait(
            dir,
            -1,
            Duration::from_millis(50),
            &[QueueName::new("q")],
        )
        .await;
        assert!(start.elapsed() >= Duration::from_millis(45));
    }
}
