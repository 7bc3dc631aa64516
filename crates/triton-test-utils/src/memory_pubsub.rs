//! An in-memory pub/sub transport, standing in for the emulator the
//! original integration suite ran against.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use triton::errors::BackendError;
use triton::pubsub::{PubSubTransport, PulledMessage};

struct Topic {
    messages: Vec<(String, Bytes)>,
    /// Subscription name → offset of the next unacked message.
    subscriptions: HashMap<String, usize>,
    next_ephemeral: usize,
}

#[derive(Default)]
pub struct MemoryPubSub {
    topics: Mutex<HashMap<String, Topic>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every body ever published to a topic, in order.
    pub fn published(&self, topic: &str) -> Vec<Bytes> {
        let topics = self.topics.lock().unwrap();
        topics
            .get(topic)
            .map(|t| t.messages.iter().map(|(_, b)| b.clone()).collect())
            .unwrap_or_default()
    }
}

fn topic_entry<'a>(topics: &'a mut HashMap<String, Topic>, name: &str) -> &'a mut Topic {
    topics.entry(name.to_owned()).or_insert_with(|| Topic {
        messages: Vec::new(),
        subscriptions: HashMap::new(),
        next_ephemeral: 0,
    })
}

#[async_trait]
impl PubSubTransport for MemoryPubSub {
    async fn publish(&self, topic: &str, bodies: &[Bytes]) -> Result<Vec<String>, BackendError> {
        let mut topics = self.topics.lock().unwrap();
        let topic = topic_entry(&mut topics, topic);
        let mut ids = Vec::with_capacity(bodies.len());
        for body in bodies {
            let id = format!("m-{}", topic.messages.len());
            topic.messages.push((id.clone(), body.clone()));
            ids.push(id);
        }
        Ok(ids)
    }

    async fn create_subscription(
        &self,
        topic: &str,
        name: Option<&str>,
    ) -> Result<String, BackendError> {
        let mut topics = self.topics.lock().unwrap();
        let topic = topic_entry(&mut topics, topic);
        let head = topic.messages.len();
        match name {
            Some(name) => {
                topic
                    .subscriptions
                    .entry(name.to_owned())
                    .or_insert(head);
                Ok(name.to_owned())
            }
            None => {
                let name = format!("ephemeral-{}", topic.next_ephemeral);
                topic.next_ephemeral += 1;
                topic.subscriptions.insert(name.clone(), head);
                Ok(name)
            }
        }
    }

    async fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
    ) -> Result<Vec<PulledMessage>, BackendError> {
        let topics = self.topics.lock().unwrap();
        for topic in topics.values() {
            if let Some(&offset) = topic.subscriptions.get(subscription) {
                let end = (offset + max_messages).min(topic.messages.len());
                return Ok(topic.messages[offset..end]
                    .iter()
                    .enumerate()
                    .map(|(i, (id, body))| PulledMessage {
                        ack_id: (offset + i).to_string(),
                        message_id: id.clone(),
                        data: body.clone(),
                    })
                    .collect());
            }
        }
        Err(BackendError::other(format!(
            "unknown subscription '{subscription}'"
        )))
    }

    async fn acknowledge(
        &self,
        subscription: &str,
        ack_ids: &[String],
    ) -> Result<(), BackendError> {
        let mut topics = self.topics.lock().unwrap();
        for topic in topics.values_mut() {
            if let Some(offset) = topic.subscriptions.get_mut(subscription) {
                for ack_id in ack_ids {
                    let idx = ack_id.parse::<usize>().map_err(|_| {
                        BackendError::other(format!("malformed ack id '{ack_id}'"))
                    })?;
                    if idx + 1 > *offset {
                        *offset = idx + 1;
                    }
                }
                return Ok(());
            }
        }
        Err(BackendError::other(format!(
            "unknown subscription '{subscription}'"
        )))
    }
}
