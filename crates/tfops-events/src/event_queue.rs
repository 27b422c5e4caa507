use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tfops_contract::InboundEvent;
use tokio::sync::{Notify, RwLock};
use tracing::warn;

/// Result type for event queue operations.
pub type EventQueueResult<T> = Result<T, EventQueueError>;

/// Errors returned by queue implementations.
#[derive(Debug, Error)]
pub enum EventQueueError {
    #[error("delivery '{0}' is not in flight")]
    UnknownDelivery(String),
    #[error("spooled event '{path}' is unreadable: {message}")]
    CorruptRecord { path: PathBuf, message: String },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One claimed event. `attempt` is 1 on first delivery and grows with every
/// redelivery of the same queue entry.
pub struct Delivery {
    pub id: String,
    pub attempt: u32,
    pub consumer_id: String,
    pub event: InboundEvent,
}

/// Competing-consumer queue with manual acknowledgment.
///
/// Each entry is handed to at most one consumer at a time. Entries that are
/// neither acked nor nacked stay in flight until `requeue_expired` releases
/// them, so delivery is at-least-once.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Stores an event and returns its delivery id.
    async fn publish(&self, event: InboundEvent) -> EventQueueResult<String>;
    async fn receive(&self, consumer_id: &str) -> EventQueueResult<Option<Delivery>>;
    async fn ack(&self, delivery_id: &str) -> EventQueueResult<()>;
    /// Releases a claimed entry for redelivery. The entry is not handed out
    /// again before `redeliver_after` has elapsed.
    async fn nack(&self, delivery_id: &str, redeliver_after: Duration) -> EventQueueResult<()>;
    /// Removes a claimed entry from circulation without acknowledging it.
    async fn dead_letter(&self, delivery_id: &str) -> EventQueueResult<()>;
    /// Releases entries claimed longer than `visibility_timeout` ago and
    /// returns their ids.
    async fn requeue_expired(&self, visibility_timeout: Duration)
        -> EventQueueResult<Vec<String>>;
}

/// In-memory implementation for tests and single-process use.
#[derive(Debug, Default)]
pub struct InMemoryEventQueue {
    inner: RwLock<QueueInner>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct QueueInner {
    next_sequence: u64,
    pending: VecDeque<String>,
    entries: HashMap<String, QueueEntry>,
    dead: Vec<String>,
}

#[derive(Debug)]
struct QueueEntry {
    event: InboundEvent,
    attempt: u32,
    claim: Option<Claim>,
    not_before: Option<Instant>,
}

#[derive(Debug)]
struct Claim {
    consumer_id: String,
    claimed_at: Instant,
}

impl InMemoryEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.read().await.pending.len()
    }

    pub async fn in_flight_len(&self) -> usize {
        self.inner
            .read()
            .await
            .entries
            .values()
            .filter(|entry| entry.claim.is_some())
            .count()
    }

    pub async fn dead_letter_ids(&self) -> Vec<String> {
        self.inner.read().await.dead.clone()
    }

    /// Waits until nothing is pending or in flight, or `timeout` elapses.
    /// Returns true when the queue drained.
    pub async fn wait_until_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if self.inner.read().await.entries.is_empty() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    fn release(
        inner: &mut QueueInner,
        delivery_id: &str,
        not_before: Option<Instant>,
    ) -> EventQueueResult<()> {
        let entry = inner
            .entries
            .get_mut(delivery_id)
            .filter(|entry| entry.claim.is_some())
            .ok_or_else(|| EventQueueError::UnknownDelivery(delivery_id.to_string()))?;
        entry.claim = None;
        entry.not_before = not_before;
        inner.pending.push_back(delivery_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl EventQueue for InMemoryEventQueue {
    async fn publish(&self, event: InboundEvent) -> EventQueueResult<String> {
        let mut inner = self.inner.write().await;
        inner.next_sequence += 1;
        let delivery_id = format!("{:08}-{}", inner.next_sequence, event.event_key());
        inner.entries.insert(
            delivery_id.clone(),
            QueueEntry {
                event,
                attempt: 0,
                claim: None,
                not_before: None,
            },
        );
        inner.pending.push_back(delivery_id.clone());
        drop(inner);
        self.notify.notify_waiters();
        Ok(delivery_id)
    }

    async fn receive(&self, consumer_id: &str) -> EventQueueResult<Option<Delivery>> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let now = Instant::now();
        let mut deferred = Vec::new();
        let mut claimed = None;
        while let Some(delivery_id) = inner.pending.pop_front() {
            let Some(entry) = inner.entries.get_mut(&delivery_id) else {
                continue;
            };
            if entry.claim.is_some() {
                continue;
            }
            if entry.not_before.is_some_and(|not_before| not_before > now) {
                deferred.push(delivery_id);
                continue;
            }
            entry.attempt += 1;
            entry.not_before = None;
            entry.claim = Some(Claim {
                consumer_id: consumer_id.to_string(),
                claimed_at: now,
            });
            claimed = Some(Delivery {
                id: delivery_id,
                attempt: entry.attempt,
                consumer_id: consumer_id.to_string(),
                event: entry.event.clone(),
            });
            break;
        }
        // Entries waiting out a redelivery delay keep their queue position.
        for delivery_id in deferred.into_iter().rev() {
            inner.pending.push_front(delivery_id);
        }
        Ok(claimed)
    }

    async fn ack(&self, delivery_id: &str) -> EventQueueResult<()> {
        let mut inner = self.inner.write().await;
        let claimed = inner
            .entries
            .get(delivery_id)
            .is_some_and(|entry| entry.claim.is_some());
        if !claimed {
            return Err(EventQueueError::UnknownDelivery(delivery_id.to_string()));
        }
        inner.entries.remove(delivery_id);
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn nack(&self, delivery_id: &str, redeliver_after: Duration) -> EventQueueResult<()> {
        let mut inner = self.inner.write().await;
        let not_before = (!redeliver_after.is_zero()).then(|| Instant::now() + redeliver_after);
        Self::release(&mut inner, delivery_id, not_before)?;
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dead_letter(&self, delivery_id: &str) -> EventQueueResult<()> {
        let mut inner = self.inner.write().await;
        let claimed = inner
            .entries
            .get(delivery_id)
            .is_some_and(|entry| entry.claim.is_some());
        if !claimed {
            return Err(EventQueueError::UnknownDelivery(delivery_id.to_string()));
        }
        inner.entries.remove(delivery_id);
        inner.dead.push(delivery_id.to_string());
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn requeue_expired(
        &self,
        visibility_timeout: Duration,
    ) -> EventQueueResult<Vec<String>> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let mut expired = inner
            .entries
            .iter()
            .filter_map(|(delivery_id, entry)| {
                let claim = entry.claim.as_ref()?;
                (now.duration_since(claim.claimed_at) > visibility_timeout)
                    .then(|| (delivery_id.clone(), claim.consumer_id.clone()))
            })
            .collect::<Vec<_>>();
        expired.sort();
        for (delivery_id, consumer_id) in &expired {
            warn!(
                delivery_id = delivery_id.as_str(),
                consumer_id = consumer_id.as_str(),
                "requeueing delivery after visibility timeout"
            );
            Self::release(&mut inner, delivery_id, None)?;
        }
        drop(inner);
        if !expired.is_empty() {
            self.notify.notify_waiters();
        }
        Ok(expired.into_iter().map(|(delivery_id, _)| delivery_id).collect())
    }
}
