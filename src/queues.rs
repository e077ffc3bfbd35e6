//! The externally visible contract (`spec.md` §4.F): every mutation
//! goes build-Op → append-to-journal → apply, with no short-cut path
//! that touches the in-memory state directly.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::SwitchConfig;
use crate::directory::Directory;
use crate::entry::{ConnectionId, Entry, Message, MessageId, Op, QueueName};
use crate::error::SwitchError;
use crate::journal::{FileJournal, SharedJournal};
use crate::queue::Queue;

/// Monotonic nanosecond clock used to stamp `Entry::timestamp_ns`.
/// Timestamps are not part of the journalled `Op` (see `spec.md` §4.A) —
/// they are assigned fresh every time an op is applied, including
/// during replay, since they are bookkeeping, not part of any invariant.
struct Clock {
    start: Instant,
}

impl Clock {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    fn now_ns(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
}

/// Applies a single op to `dir`. Never touches a queue's `next_id` —
/// that allocation is owned by whoever is driving the apply (the live
/// `send` path, or `Queues::recover`'s replay loop), since both of
/// those already hold (or are the sole owner of) the relevant lock and
/// re-entering it here would deadlock or race.
fn apply_op(dir: &mut Directory, op: Op, clock: &Clock) {
    match op {
        Op::Add { owner, name } => dir.add(owner, name),
        Op::Remove { name } => dir.remove(&name),
        Op::Ack { id } => {
            if let Some(q) = dir.get_mut(&id.queue) {
                q.remove_id(id.sequence);
            }
        }
        Op::Send {
            origin,
            name,
            id,
            message,
        } => {
            // A concurrent remove() can in principle race a send() that
            // already passed its existence check (the facade only
            // holds the per-queue id-allocation lock across the
            // append, not the whole directory). Dropping the message
            // here is consistent with "send into a missing queue is
            // not an error" rather than resurrecting the queue.
            if let Some(q) = dir.get_mut(&name) {
                q.append(
                    id,
                    Entry {
                        timestamp_ns: clock.now_ns(),
                        origin,
                        message,
                    },
                );
            }
        }
    }
}

/// The queue manager. Cheap to clone: internally an `Arc<Mutex<Directory>>`
/// plus a `SharedJournal`, so every clone talks to the same state.
#[derive(Clone)]
pub struct Queues {
    directory: Arc<Mutex<Directory>>,
    journal: SharedJournal,
    clock: Arc<Clock>,
}

impl Queues {
    /// Starts from empty state with no recovery. Use [`Queues::recover`]
    /// to replay an existing journal on startup.
    pub fn new(journal: SharedJournal) -> Self {
        Self {
            directory: Arc::new(Mutex::new(Directory::new())),
            journal,
            clock: Arc::new(Clock::new()),
        }
    }

    /// Opens (or creates) the durable journal at `config.journal_path`,
    /// capping records at `config.max_record_bytes`, and replays it —
    /// the one constructor that wires every `SwitchConfig` setting into
    /// the live journal path end to end.
    pub async fn open(config: &SwitchConfig) -> Result<Self, SwitchError> {
        let journal: SharedJournal = Arc::new(FileJournal::open_with_config(config).await?);
        Self::recover(journal).await
    }

    /// Replays every record in `journal` into a fresh `Directory` before
    /// accepting new appends, per `spec.md` §4.E. A replayed `Op::Send`
    /// whose id does not strictly exceed the previous id seen for that
    /// queue violates invariant 4 (`spec.md` §3) and is fatal: recovery
    /// aborts rather than continue from a possibly-corrupt state.
    pub async fn recover(journal: SharedJournal) -> Result<Self, SwitchError> {
        let ops = journal.replay().await?;
        let replayed_count = ops.len();
        let clock = Clock::new();
        let mut directory = Directory::new();
        let mut last_id: HashMap<QueueName, u64> = HashMap::new();

        for op in ops {
            match &op {
                Op::Send { name, id, .. } => {
                    if let Some(&prev) = last_id.get(name) {
                        if *id <= prev {
                            return Err(SwitchError::InvariantViolation(format!(
                                "queue {name} replayed id {id} is not strictly greater than previous id {prev}"
                            )));
                        }
                    }
                    last_id.insert(name.clone(), *id);
                }
                Op::Remove { name } => {
                    // A removed queue's next incarnation (a later `Add` of
                    // the same name) restarts `next_id` at 0 per `Queue::make`
                    // (`spec.md` §4.B), so the high-water mark must not
                    // survive past the `Remove` that ends this incarnation.
                    last_id.remove(name);
                }
                _ => {}
            }
            apply_op(&mut directory, op, &clock);
        }

        // spec.md §3: next_id is set to max(existing ids) + 1, or 0 if empty.
        for name in directory.list("") {
            let next = next_id_after_recovery(&directory, &name);
            if let Some(q) = directory.get(&name) {
                *q.waiter.next_id.lock().await = next;
            }
        }

        tracing::info!(replayed_count, "replayed journal into in-memory state");

        Ok(Self {
            directory: Arc::new(Mutex::new(directory)),
            journal,
            clock: Arc::new(clock),
        })
    }

    async fn apply(&self, op: Op) {
        let mut dir = self.directory.lock().await;
        apply_op(&mut dir, op, &self.clock);
    }

    /// `spec.md` §4.F `Directory.add`: idempotent.
    pub async fn add(&self, owner: Option<ConnectionId>, name: QueueName) -> Result<(), SwitchError> {
        let op = Op::Add {
            owner,
            name: name.clone(),
        };
        self.journal.append(&op).await?;
        self.apply(op).await;
        Ok(())
    }

    /// `spec.md` §4.F `Directory.remove`: idempotent (remove-missing is
    /// a no-op).
    pub async fn remove(&self, name: &QueueName) -> Result<(), SwitchError> {
        let op = Op::Remove { name: name.clone() };
        self.journal.append(&op).await?;
        self.apply(op).await;
        Ok(())
    }

    /// `spec.md` §4.F `send`. Returns `None` without mutating anything
    /// if `name` does not name an existing queue — producers do not
    /// create queues by sending to them.
    ///
    /// The id is allocated, and `next_id` advanced, *before* the journal
    /// append; on append failure the id is permanently skipped rather
    /// than rolled back (`spec.md` §9 Open Questions — a deliberate,
    /// accepted gap, not a bug).
    pub async fn send(
        &self,
        origin: ConnectionId,
        name: QueueName,
        message: Message,
    ) -> Result<Option<MessageId>, SwitchError> {
        let waiter = {
            let dir = self.directory.lock().await;
            match dir.get(&name) {
                Some(q) => q.waiter.clone(),
                None => return Ok(None),
            }
        };

        let mut next_id = waiter.next_id.lock().await;
        let id = *next_id;
        *next_id += 1;

        let op = Op::Send {
            origin,
            name: name.clone(),
            id,
            message,
        };
        self.journal.append(&op).await?;
        self.apply(op).await;

        Ok(Some(MessageId {
            queue: name,
            sequence: id,
        }))
    }

    /// `spec.md` §4.F `ack`: ack of an unknown id is a no-op, and so is
    /// acking the same id twice.
    pub async fn ack(&self, id: MessageId) -> Result<(), SwitchError> {
        let op = Op::Ack { id };
        self.journal.append(&op).await?;
        self.apply(op).await;
        Ok(())
    }

    /// `spec.md` §4.F `transfer`: a pure read, no journal involved.
    /// Order across queues is unspecified; within each queue, insertion
    /// order is preserved.
    pub async fn transfer(&self, from: i64, names: &[QueueName]) -> Vec<(MessageId, Message)> {
        let dir = self.directory.lock().await;
        let mut out = Vec::new();
        for name in names {
            if let Some(q) = dir.get(name) {
                for (id, entry) in q.entries_after(from) {
                    out.push((
                        MessageId {
                            queue: name.clone(),
                            sequence: id,
                        },
                        entry.message.clone(),
                    ));
                }
            }
        }
        out
    }

    /// `spec.md` §4.F `entry`: `None` if the id does not exist.
    pub async fn entry(&self, id: &MessageId) -> Option<Entry> {
        let dir = self.directory.lock().await;
        dir.get(&id.queue).and_then(|q| q.get(id.sequence)).cloned()
    }

    /// `spec.md` §4.F `list`.
    pub async fn list(&self, prefix: &str) -> Vec<QueueName> {
        self.directory.lock().await.list(prefix)
    }

    /// `spec.md` §4.F `owned_queues`.
    pub async fn owned_queues(&self, owner: &ConnectionId) -> HashSet<QueueName> {
        self.directory.lock().await.owned_queues(owner)
    }

    /// `spec.md` §4.D `wait`.
    pub async fn wait(&self, from: i64, timeout: Duration, names: &[QueueName]) {
        crate::wait::wait(self.directory.clone(), from, timeout, names).await;
    }

    /// `spec.md` §4.F "Owner reap": called by the transport once it has
    /// independently determined that connection `owner` is gone. Each
    /// removal goes through the journal individually, so partial
    /// progress (e.g. a crash mid-reap) is safe — every step is
    /// idempotent and can simply be retried.
    pub async fn owner_reap(&self, owner: &ConnectionId) -> Result<(), SwitchError> {
        let names: Vec<QueueName> = self
            .directory
            .lock()
            .await
            .owned_queues(owner)
            .into_iter()
            .collect();
        for name in names {
            tracing::debug!(queue = %name, owner = %owner, "reaping transient queue for disconnected owner");
            self.remove(&name).await?;
        }
        Ok(())
    }

    /// `spec.md` §4.G `lengths`.
    pub async fn lengths(&self) -> Vec<(QueueName, usize)> {
        crate::metrics::lengths(&self.directory.lock().await)
    }

    /// `spec.md` §4.G `measure`.
    pub async fn measure(&self, name: &QueueName) -> Option<usize> {
        crate::metrics::measure(&self.directory.lock().await, name)
    }
}

fn next_id_after_recovery(dir: &Directory, name: &QueueName) -> u64 {
    dir.get(name)
        .and_then(|q: &Queue| q.contents().into_iter().map(|(id, _)| id).max())
        .map(|max| max + 1)
        .unwrap_or(0)
}
