//! Pull-style broker abstraction and an in-process at-least-once broker
//!
//! A [`Delivery`] that is neither acked nor nacked before its ack deadline
//! is handed out again, exactly like a nacked one, with `delivery_attempt`
//! increased by one. Nothing here deduplicates: a handler may see the same
//! `message_id` more than once.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

/// One handout of a message to a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    pub payload: Vec<u8>,
    /// 1 on the first handout
    pub delivery_attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The subscription no longer hands out messages
    Closed,
    Unavailable(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Closed => write!(f, "subscription closed"),
            BrokerError::Unavailable(msg) => write!(f, "broker unavailable: {msg}"),
        }
    }
}

impl std::error::Error for BrokerError {}

#[async_trait]
pub trait Subscription: Send + Sync {
    /// Up to `max` deliveries; may return none when nothing is due yet
    async fn pull(&self, max: usize) -> Result<Vec<Delivery>, BrokerError>;

    /// Settles a delivery
    ///
    /// Only the current handout of a message can settle it: a late ack for
    /// an earlier attempt whose deadline already passed is ignored, as are
    /// unknown or already settled ids.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Requests immediate redelivery; settles like [`Subscription::ack`]
    async fn nack(&self, delivery: &Delivery) -> Result<(), BrokerError>;
}

#[derive(Debug)]
struct Message {
    message_id: String,
    payload: Vec<u8>,
    attempt: u32,
}

#[derive(Debug, Default)]
struct Queue {
    ready: VecDeque<Message>,
    leased: HashMap<String, (Message, Instant)>,
    closed: bool,
}

impl Queue {
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .leased
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some((message, _)) = self.leased.remove(&id) {
                debug!("ack deadline passed for {id}, redelivering");
                self.requeue(message);
            }
        }
    }

    fn requeue(&mut self, mut message: Message) {
        message.attempt = message.attempt.saturating_add(1);
        self.ready.push_back(message);
    }

    /// Removes the lease held by `delivery`, if it is still the current handout
    fn settle(&mut self, delivery: &Delivery) -> Option<Message> {
        let current = self
            .leased
            .get(&delivery.message_id)
            .is_some_and(|(message, _)| message.attempt == delivery.delivery_attempt);
        if !current {
            trace!(
                "ignoring stale settle of {} attempt {}",
                delivery.message_id, delivery.delivery_attempt
            );
            return None;
        }
        self.leased
            .remove(&delivery.message_id)
            .map(|(message, _)| message)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.leased.values().map(|(_, deadline)| *deadline).min()
    }
}

/// In-memory topic with one subscription
#[derive(Debug)]
pub struct MemoryBroker {
    ack_deadline: Duration,
    queue: Mutex<Queue>,
    changed: Notify,
}

/// Longest a `pull` waits for a message before returning empty-handed
const PULL_WAIT: Duration = Duration::from_millis(250);

impl MemoryBroker {
    pub fn new(ack_deadline: Duration) -> Self {
        Self {
            ack_deadline,
            queue: Mutex::new(Queue::default()),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes a payload under a fresh message id
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> String {
        let message_id = Uuid::new_v4().to_string();
        self.publish_with_id(message_id.clone(), payload);
        message_id
    }

    pub fn publish_with_id(&self, message_id: impl Into<String>, payload: impl Into<Vec<u8>>) {
        let message = Message {
            message_id: message_id.into(),
            payload: payload.into(),
            attempt: 1,
        };
        trace!("published {}", message.message_id);
        self.lock().ready.push_back(message);
        self.changed.notify_waiters();
    }

    /// Stops handing out messages; pending ones are kept
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_waiters();
    }

    /// Messages not yet acked, handed out or not
    pub fn outstanding(&self) -> usize {
        let queue = self.lock();
        queue.ready.len() + queue.leased.len()
    }

    /// Resolves once every published message has been acked
    pub async fn wait_drained(&self) {
        loop {
            let changed = self.changed.notified();
            if self.outstanding() == 0 {
                return;
            }
            let _ = tokio::time::timeout(PULL_WAIT, changed).await;
        }
    }
}

#[async_trait]
impl Subscription for MemoryBroker {
    async fn pull(&self, max: usize) -> Result<Vec<Delivery>, BrokerError> {
        let wait_until = Instant::now() + PULL_WAIT;

        loop {
            let changed = self.changed.notified();
            let next_deadline = {
                let mut queue = self.lock();
                if queue.closed {
                    return Err(BrokerError::Closed);
                }

                let now = Instant::now();
                queue.requeue_expired(now);

                let mut deliveries = Vec::new();
                while deliveries.len() < max {
                    let Some(message) = queue.ready.pop_front() else {
                        break;
                    };
                    deliveries.push(Delivery {
                        message_id: message.message_id.clone(),
                        payload: message.payload.clone(),
                        delivery_attempt: message.attempt,
                    });
                    queue
                        .leased
                        .insert(message.message_id.clone(), (message, now + self.ack_deadline));
                }

                if !deliveries.is_empty() || now >= wait_until {
                    return Ok(deliveries);
                }
                queue.next_deadline()
            };

            let sleep_until = next_deadline.map_or(wait_until, |d| d.min(wait_until));
            let _ = tokio::time::timeout_at(sleep_until, changed).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        if self.lock().settle(delivery).is_some() {
            trace!("acked {}", delivery.message_id);
        }
        self.changed.notify_waiters();
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        {
            let mut queue = self.lock();
            if let Some(message) = queue.settle(delivery) {
                trace!("nacked {}", delivery.message_id);
                queue.requeue(message);
            }
        }
        self.changed.notify_waiters();
        Ok(())
    }
}
