// src/transport/memory/hub.rs

//! Shared in-process broker state.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{log_debug, Error, QueueSpec, Result};

/// Connection identifier handed out by the hub.
pub(super) type ConnectionId = u64;

/// Simulated broker shared by every [`MemoryTransport`](super::MemoryTransport)
/// created from it.
///
/// Queues behave like AMQP queues on the default exchange:
///
/// - publishing to a queue that does not exist drops the message (unroutable);
/// - an empty queue name on declare yields a generated `amq.gen-...` name;
/// - an exclusive queue belongs to the declaring connection: other
///   connections may publish to it but not declare or consume it, and it is
///   deleted when the owner closes;
/// - an auto-delete queue is deleted when its last consumer is cancelled;
/// - re-declaring a queue with different flags is rejected.
///
/// # ⚠️  Testing Only - Subject to Change
///
/// Intended for tests, demos, and as the executable reference for the
/// semantics the AMQP transport relies on. Production code connects to a
/// real broker via [`TransportKind::Amqp`](crate::TransportKind::Amqp).
///
/// # Example
///
/// ```
/// use cloud_messenger::MemoryHub;
///
/// let hub = MemoryHub::new();
/// assert!(!hub.queue_exists("requests"));
/// ```
pub struct MemoryHub {
    // ---
    queues: Mutex<HashMap<String, MemoryQueue>>,
    next_connection: AtomicU64,
    refused_connections: AtomicU32,
}

struct MemoryQueue {
    durable: bool,
    exclusive: bool,
    auto_delete: bool,
    owner: Option<ConnectionId>,
    consumers: usize,
    messages: VecDeque<Bytes>,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    fn same_flags(&self, spec: &QueueSpec) -> bool {
        self.durable == spec.durable
            && self.exclusive == spec.exclusive
            && self.auto_delete == spec.auto_delete
    }
}

/// Outcome of trying to take a message off a queue.
pub(super) enum Pop {
    Message(Bytes),
    Empty(Arc<Notify>),
    Gone,
}

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self {
            queues: Mutex::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            refused_connections: AtomicU32::new(0),
        })
    }

    /// Refuse the next `count` connection attempts.
    ///
    /// Simulates a broker that is not reachable yet.
    pub fn refuse_connections(&self, count: u32) {
        self.refused_connections.store(count, Ordering::SeqCst);
    }

    /// Whether a queue with this name currently exists.
    pub fn queue_exists(&self, name: &str) -> bool {
        lock_ignore_poison(&self.queues).contains_key(name)
    }

    /// Number of ready (undelivered) messages in a queue.
    pub fn message_count(&self, name: &str) -> Option<usize> {
        lock_ignore_poison(&self.queues)
            .get(name)
            .map(|q| q.messages.len())
    }

    /// Publish directly into a queue, as another process on the broker would.
    ///
    /// Returns `false` if the queue does not exist and the message was dropped.
    pub fn inject(&self, queue: &str, payload: impl Into<Bytes>) -> bool {
        self.enqueue(queue, payload.into())
    }

    pub(super) fn connect(&self) -> Result<ConnectionId> {
        // ---
        let refused = self
            .refused_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

        if refused.is_ok() {
            return Err(Error::Connection("memory broker refused connection".into()));
        }

        Ok(self.next_connection.fetch_add(1, Ordering::SeqCst))
    }

    pub(super) fn declare(&self, conn: ConnectionId, spec: &QueueSpec) -> Result<String> {
        // ---
        let mut queues = lock_ignore_poison(&self.queues);

        let name = if spec.is_server_named() {
            format!("amq.gen-{}", Uuid::new_v4().simple())
        } else {
            spec.name.clone()
        };

        if let Some(existing) = queues.get(&name) {
            if let Some(owner) = existing.owner {
                if owner != conn {
                    return Err(Error::Broker(format!(
                        "RESOURCE_LOCKED - cannot obtain exclusive access to queue '{name}'"
                    )));
                }
            }
            if !existing.same_flags(spec) {
                return Err(Error::Broker(format!(
                    "PRECONDITION_FAILED - inequivalent arguments for queue '{name}'"
                )));
            }
            return Ok(name);
        }

        queues.insert(
            name.clone(),
            MemoryQueue {
                durable: spec.durable,
                exclusive: spec.exclusive,
                auto_delete: spec.auto_delete,
                owner: spec.exclusive.then_some(conn),
                consumers: 0,
                messages: VecDeque::new(),
                notify: Arc::new(Notify::new()),
            },
        );

        log_debug!("memory hub: declared queue {name}");
        Ok(name)
    }

    pub(super) fn purge(&self, queue: &str) -> Result<u32> {
        // ---
        let mut queues = lock_ignore_poison(&self.queues);
        let q = queues
            .get_mut(queue)
            .ok_or_else(|| not_found(queue))?;

        let purged = q.messages.len() as u32;
        q.messages.clear();
        Ok(purged)
    }

    pub(super) fn enqueue(&self, queue: &str, payload: Bytes) -> bool {
        // ---
        let mut queues = lock_ignore_poison(&self.queues);
        match queues.get_mut(queue) {
            Some(q) => {
                q.messages.push_back(payload);
                q.notify.notify_one();
                true
            }
            None => {
                log_debug!("memory hub: no queue {queue}, message dropped");
                false
            }
        }
    }

    /// Put an unacknowledged message back at the head of its queue.
    pub(super) fn requeue(&self, queue: &str, payload: Bytes) {
        // ---
        let mut queues = lock_ignore_poison(&self.queues);
        if let Some(q) = queues.get_mut(queue) {
            q.messages.push_front(payload);
            q.notify.notify_one();
        }
    }

    pub(super) fn add_consumer(&self, conn: ConnectionId, queue: &str) -> Result<()> {
        // ---
        let mut queues = lock_ignore_poison(&self.queues);
        let q = queues
            .get_mut(queue)
            .ok_or_else(|| not_found(queue))?;

        if let Some(owner) = q.owner {
            if owner != conn {
                return Err(Error::Broker(format!(
                    "RESOURCE_LOCKED - queue '{queue}' is exclusive to another connection"
                )));
            }
        }

        q.consumers += 1;
        Ok(())
    }

    pub(super) fn remove_consumer(&self, queue: &str) {
        // ---
        let mut queues = lock_ignore_poison(&self.queues);

        let delete = match queues.get_mut(queue) {
            Some(q) => {
                q.consumers = q.consumers.saturating_sub(1);
                q.auto_delete && q.consumers == 0
            }
            None => false,
        };

        if delete {
            if let Some(q) = queues.remove(queue) {
                q.notify.notify_waiters();
            }
            log_debug!("memory hub: auto-deleted queue {queue}");
        }
    }

    pub(super) fn pop(&self, queue: &str) -> Pop {
        // ---
        let mut queues = lock_ignore_poison(&self.queues);
        match queues.get_mut(queue) {
            Some(q) => match q.messages.pop_front() {
                Some(payload) => Pop::Message(payload),
                None => Pop::Empty(q.notify.clone()),
            },
            None => Pop::Gone,
        }
    }

    /// Drop every exclusive queue owned by a closing connection.
    pub(super) fn release(&self, conn: ConnectionId) {
        // ---
        let mut queues = lock_ignore_poison(&self.queues);
        let owned: Vec<String> = queues
            .iter()
            .filter(|(_, q)| q.owner == Some(conn))
            .map(|(name, _)| name.clone())
            .collect();

        for name in owned {
            if let Some(q) = queues.remove(&name) {
                q.notify.notify_waiters();
            }
            log_debug!("memory hub: deleted exclusive queue {name}");
        }
    }
}

fn not_found(queue: &str) -> Error {
    Error::Broker(format!("NOT_FOUND - no queue '{queue}'"))
}
