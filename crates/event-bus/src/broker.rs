//! Broker transport contract and the in-memory broker.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    error::{EventBusError, Result},
    message::Message,
};

/// Message broker transport.
///
/// Real Kafka or cloud pub/sub clients plug in here.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Sends a message to its topic.
    async fn send(&self, message: Message) -> Result<()>;

    /// Subscribes to a topic. Every subscriber receives every message.
    async fn subscribe(&self, topic: &str) -> Result<Subscription>;
}

/// Acknowledgement of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Ack,
    Nack,
}

trait Acker: Send + Sync {
    fn settle(&self, delivery: &Delivery, kind: AckKind);
}

/// A message handed to a subscriber.
///
/// Must be settled with [`Delivery::ack`] or [`Delivery::nack`]; a nacked
/// delivery is redelivered to the same subscription.
pub struct Delivery {
    pub message: Message,
    /// 1 for the first delivery, incremented on each redelivery.
    pub attempt: u32,
    acker: Arc<dyn Acker>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("attempt", &self.attempt)
            .finish()
    }
}

impl Delivery {
    pub fn ack(self) {
        self.acker.clone().settle(&self, AckKind::Ack);
    }

    pub fn nack(self) {
        self.acker.clone().settle(&self, AckKind::Nack);
    }
}

/// Stream of deliveries for one topic.
pub struct Subscription {
    topic: String,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next delivery. Returns `None` once the broker is gone.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

/// A settled delivery, as recorded by the in-memory broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub topic: String,
    pub attempt: u32,
    pub kind: AckKind,
}

#[derive(Default)]
struct BrokerState {
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Delivery>>>,
    sent: Vec<Message>,
    send_attempts: usize,
    fail_on_send: bool,
    fail_topics: HashSet<String>,
    send_delay: Option<Duration>,
    settlements: Vec<Settlement>,
    max_redeliveries: Option<u32>,
}

/// In-process broker for tests and single-node runs.
///
/// Records every sent message and every ack/nack. Sends can be made to fail
/// globally or per topic, or to stall for a fixed delay.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

struct MemoryAcker {
    state: Arc<Mutex<BrokerState>>,
    redeliver: mpsc::UnboundedSender<Delivery>,
}

impl Acker for MemoryAcker {
    fn settle(&self, delivery: &Delivery, kind: AckKind) {
        let mut state = self.state.lock().unwrap();
        state.settlements.push(Settlement {
            topic: delivery.message.topic.clone(),
            attempt: delivery.attempt,
            kind,
        });
        let exhausted = state
            .max_redeliveries
            .is_some_and(|max| delivery.attempt > max);
        drop(state);

        if kind == AckKind::Nack && !exhausted {
            let _ = self.redeliver.send(Delivery {
                message: delivery.message.clone(),
                attempt: delivery.attempt + 1,
                acker: delivery.acker.clone(),
            });
        }
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every send fail with a transport error until cleared.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.state.lock().unwrap().fail_on_send = fail;
    }

    /// Makes sends to one topic fail with a transport error until cleared.
    pub fn set_fail_on_topic(&self, topic: &str, fail: bool) {
        let mut state = self.state.lock().unwrap();
        if fail {
            state.fail_topics.insert(topic.to_string());
        } else {
            state.fail_topics.remove(topic);
        }
    }

    /// Delays every send by `delay` before it is accepted.
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().send_delay = delay;
    }

    /// Stops redelivering a nacked message after `max` redeliveries.
    pub fn set_max_redeliveries(&self, max: Option<u32>) {
        self.state.lock().unwrap().max_redeliveries = max;
    }

    /// Returns every message accepted so far.
    pub fn sent(&self) -> Vec<Message> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Returns the accepted messages for one topic.
    pub fn sent_to(&self, topic: &str) -> Vec<Message> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Number of times the transport was invoked, including failed sends.
    pub fn send_attempts(&self) -> usize {
        self.state.lock().unwrap().send_attempts
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.state.lock().unwrap().settlements.clone()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn send(&self, message: Message) -> Result<()> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.send_attempts += 1;
            state.send_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_on_send || state.fail_topics.contains(&message.topic) {
            return Err(EventBusError::Transport(format!(
                "broker rejected message for topic {}",
                message.topic
            )));
        }

        if let Some(subscribers) = state.subscribers.get_mut(&message.topic) {
            subscribers.retain(|tx| !tx.is_closed());
            for tx in subscribers.iter() {
                let acker = Arc::new(MemoryAcker {
                    state: self.state.clone(),
                    redeliver: tx.clone(),
                });
                let _ = tx.send(Delivery {
                    message: message.clone(),
                    attempt: 1,
                    acker,
                });
            }
        }
        state.sent.push(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .unwrap()
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription {
            topic: topic.to_string(),
            rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str) -> Message {
        Message {
            topic: topic.to_string(),
            body: b"[]".to_vec(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn subscribers_receive_sent_messages() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe("BLOB_VERIFY").await.unwrap();

        broker.send(message("BLOB_VERIFY")).await.unwrap();
        broker.send(message("OTHER")).await.unwrap();

        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.message.topic, "BLOB_VERIFY");
        assert_eq!(delivery.attempt, 1);
        delivery.ack();

        assert_eq!(broker.sent().len(), 2);
        assert_eq!(broker.settlements()[0].kind, AckKind::Ack);
    }

    #[tokio::test]
    async fn nack_redelivers() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe("T").await.unwrap();
        broker.send(message("T")).await.unwrap();

        sub.next().await.unwrap().nack();
        let again = sub.next().await.unwrap();
        assert_eq!(again.attempt, 2);
        again.ack();

        let kinds: Vec<_> = broker.settlements().iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![AckKind::Nack, AckKind::Ack]);
    }

    #[tokio::test]
    async fn injected_failures_still_count_attempts() {
        let broker = InMemoryBroker::new();
        broker.set_fail_on_topic("T", true);

        assert!(broker.send(message("T")).await.is_err());
        assert!(broker.send(message("U")).await.is_ok());
        assert_eq!(broker.send_attempts(), 2);
        assert_eq!(broker.sent().len(), 1);
    }
}
