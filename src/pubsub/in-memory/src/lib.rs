// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! An in-memory publish/subscribe service.
//!
//! Use this crate in tests and samples. It implements
//! [Transport][pubsub_core::transport::Transport] with topics and
//! subscriptions held in memory: published messages fan out to every
//! subscription of the topic, delivered messages are redelivered when their
//! ack deadline lapses or they are nacked, and failures can be injected.
//!
//! # Example
//! ```
//! use pubsub_in_memory::InMemoryService;
//! # fn sample() -> pubsub_core::Result<()> {
//! let service = InMemoryService::new();
//! service.create_topic("projects/p/topics/t")?;
//! service.create_subscription("projects/p/subscriptions/s", "projects/p/topics/t", 10)?;
//! # Ok(()) }
//! ```

mod state;

use futures::StreamExt;
use pubsub_core::error::rpc::{Code, Status};
use pubsub_core::model::{
    AcknowledgeRequest, Message, ModifyAckDeadlineRequest, PublishRequest, PublishResponse,
    PullRequest, PullResponse, StreamingPullRequest, StreamingPullResponse,
};
use pubsub_core::transport::{MessageStream, Transport};
use pubsub_core::{Error, Result};
use state::{Subscription, Topic};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;

// The most messages sent in a single stream response.
const MAX_RESPONSE_MESSAGES: usize = 100;

/// A publish/subscribe service held in memory.
///
/// Clones share the same topics and subscriptions.
#[derive(Clone, Debug, Default)]
pub struct InMemoryService {
    inner: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Topic>,
    subscriptions: HashMap<String, Subscription>,
    publish_requests: Vec<PublishRequest>,
    fail_publish: VecDeque<Code>,
    fail_stream_open: VecDeque<Code>,
    next_message_id: u64,
}

impl State {
    fn subscription(&mut self, name: &str) -> Result<&mut Subscription> {
        self.subscriptions
            .get_mut(name)
            .ok_or_else(|| status(Code::NotFound, format!("subscription {name} not found")))
    }
}

fn status<T: Into<String>>(code: Code, message: T) -> Error {
    Error::service(Status::default().set_code(code).set_message(message))
}

impl InMemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_topic<T: Into<String>>(&self, topic: T) -> Result<()> {
        let topic = topic.into();
        let mut state = self.lock();
        if state.topics.contains_key(&topic) {
            return Err(status(
                Code::AlreadyExists,
                format!("topic {topic} already exists"),
            ));
        }
        state.topics.insert(topic, Topic::default());
        Ok(())
    }

    /// Creates a subscription that receives the messages published to
    /// `topic` from now on.
    pub fn create_subscription<S, T>(
        &self,
        subscription: S,
        topic: T,
        ack_deadline_seconds: i32,
    ) -> Result<()>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let (subscription, topic) = (subscription.into(), topic.into());
        if !(10..=600).contains(&ack_deadline_seconds) {
            return Err(status(
                Code::InvalidArgument,
                format!("invalid ack deadline {ack_deadline_seconds}"),
            ));
        }
        let mut state = self.lock();
        if state.subscriptions.contains_key(&subscription) {
            return Err(status(
                Code::AlreadyExists,
                format!("subscription {subscription} already exists"),
            ));
        }
        let Some(t) = state.topics.get_mut(&topic) else {
            return Err(status(Code::NotFound, format!("topic {topic} not found")));
        };
        t.subscriptions.push(subscription.clone());
        state.subscriptions.insert(
            subscription,
            Subscription::new(
                topic,
                Duration::from_secs(ack_deadline_seconds as u64),
            ),
        );
        Ok(())
    }

    /// Deletes a subscription. Open streams end with a `NOT_FOUND` error.
    pub fn delete_subscription(&self, subscription: &str) -> Result<()> {
        let mut state = self.lock();
        let removed = state.subscriptions.remove(subscription).ok_or_else(|| {
            status(
                Code::NotFound,
                format!("subscription {subscription} not found"),
            )
        })?;
        if let Some(topic) = state.topics.get_mut(&removed.topic) {
            topic.subscriptions.retain(|s| s != subscription);
        }
        Ok(())
    }

    /// The next publish call fails with `code`.
    ///
    /// Calling this multiple times fails that many publish calls.
    pub fn fail_next_publish(&self, code: Code) {
        self.lock().fail_publish.push_back(code);
    }

    /// The next attempt to open a stream fails with `code`.
    pub fn fail_next_stream_open(&self, code: Code) {
        self.lock().fail_stream_open.push_back(code);
    }

    /// Every publish request received, including failed ones.
    pub fn publish_requests(&self) -> Vec<PublishRequest> {
        self.lock().publish_requests.clone()
    }

    /// The messages published to `topic`, with their ids.
    pub fn published(&self, topic: &str) -> Vec<Message> {
        self.lock()
            .topics
            .get(topic)
            .map(|t| t.published.clone())
            .unwrap_or_default()
    }

    /// The ids of the messages acknowledged on `subscription`.
    pub fn acked(&self, subscription: &str) -> Vec<String> {
        self.lock()
            .subscriptions
            .get(subscription)
            .map(|s| s.acked().to_vec())
            .unwrap_or_default()
    }

    /// The number of messages waiting for delivery on `subscription`.
    pub fn backlog(&self, subscription: &str) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        state
            .subscriptions
            .get_mut(subscription)
            .map(|s| {
                s.expire(now);
                s.backlog_len()
            })
            .unwrap_or_default()
    }

    /// The number of delivered messages not yet acked on `subscription`.
    pub fn outstanding(&self, subscription: &str) -> usize {
        self.lock()
            .subscriptions
            .get(subscription)
            .map(|s| s.outstanding_len())
            .unwrap_or_default()
    }

    /// How many streams were opened on `subscription`.
    pub fn stream_opens(&self, subscription: &str) -> usize {
        self.lock()
            .subscriptions
            .get(subscription)
            .map(|s| s.stream_opens)
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn stream(
        self,
        request: StreamingPullRequest,
        mut changed: watch::Receiver<u64>,
        tx: UnboundedSender<Result<StreamingPullResponse>>,
    ) {
        let deadline =
            Duration::from_secs(request.stream_ack_deadline_seconds.clamp(10, 600) as u64);
        loop {
            changed.borrow_and_update();
            let now = Instant::now();
            let delivered = {
                let mut state = self.lock();
                state.subscription(&request.subscription).map(|s| {
                    let received = s.deliver(MAX_RESPONSE_MESSAGES, deadline, now);
                    (received, s.next_deadline())
                })
            };
            let (received_messages, next_deadline) = match delivered {
                Ok(d) => d,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };
            if !received_messages.is_empty() {
                let response = StreamingPullResponse { received_messages };
                if tx.send(Ok(response)).is_err() {
                    return;
                }
                continue;
            }
            let expiry = async {
                match next_deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = tx.closed() => return,
                _ = changed.changed() => {},
                _ = expiry => {},
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for InMemoryService {
    async fn publish(&self, req: PublishRequest) -> Result<PublishResponse> {
        let mut state = self.lock();
        state.publish_requests.push(req.clone());
        if let Some(code) = state.fail_publish.pop_front() {
            return Err(status(code, "injected publish failure"));
        }
        if req.messages.is_empty() {
            return Err(status(Code::InvalidArgument, "no messages to publish"));
        }
        let State {
            topics,
            subscriptions,
            next_message_id,
            ..
        } = &mut *state;
        let topic = topics
            .get_mut(&req.topic)
            .ok_or_else(|| status(Code::NotFound, format!("topic {} not found", req.topic)))?;
        let mut ids = Vec::with_capacity(req.messages.len());
        for mut message in req.messages {
            *next_message_id += 1;
            message.message_id = next_message_id.to_string();
            for name in &topic.subscriptions {
                if let Some(sub) = subscriptions.get_mut(name) {
                    sub.push(message.clone());
                }
            }
            ids.push(message.message_id.clone());
            topic.published.push(message);
        }
        Ok(PublishResponse::new().set_message_ids(ids))
    }

    async fn streaming_pull(&self, req: StreamingPullRequest) -> Result<MessageStream> {
        let changed = {
            let mut state = self.lock();
            if let Some(code) = state.fail_stream_open.pop_front() {
                return Err(status(code, "injected stream failure"));
            }
            let sub = state.subscription(&req.subscription)?;
            sub.stream_opens += 1;
            sub.watch()
        };
        let (tx, rx) = unbounded_channel();
        tokio::spawn(self.clone().stream(req, changed, tx));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn pull(&self, req: PullRequest) -> Result<PullResponse> {
        if req.max_messages <= 0 {
            return Err(status(
                Code::InvalidArgument,
                format!("invalid max_messages {}", req.max_messages),
            ));
        }
        let now = Instant::now();
        let mut state = self.lock();
        let sub = state.subscription(&req.subscription)?;
        let deadline = sub.ack_deadline;
        let received_messages = sub.deliver(req.max_messages as usize, deadline, now);
        Ok(PullResponse { received_messages })
    }

    async fn acknowledge(&self, req: AcknowledgeRequest) -> Result<()> {
        let mut state = self.lock();
        let sub = state.subscription(&req.subscription)?;
        for ack_id in &req.ack_ids {
            sub.ack(ack_id);
        }
        Ok(())
    }

    async fn modify_ack_deadline(&self, req: ModifyAckDeadlineRequest) -> Result<()> {
        if !(0..=600).contains(&req.ack_deadline_seconds) {
            return Err(status(
                Code::InvalidArgument,
                format!("invalid ack deadline {}", req.ack_deadline_seconds),
            ));
        }
        let now = Instant::now();
        let mut state = self.lock();
        let sub = state.subscription(&req.subscription)?;
        for ack_id in &req.ack_ids {
            sub.modify_ack_deadline(ack_id, req.ack_deadline_seconds, now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const TOPIC: &str = "projects/p/topics/t";
    const SUB_A: &str = "projects/p/subscriptions/a";
    const SUB_B: &str = "projects/p/subscriptions/b";

    fn service() -> anyhow::Result<InMemoryService> {
        let service = InMemoryService::new();
        service.create_topic(TOPIC)?;
        service.create_subscription(SUB_A, TOPIC, 10)?;
        service.create_subscription(SUB_B, TOPIC, 10)?;
        Ok(service)
    }

    fn publish_request(data: &[&str]) -> PublishRequest {
        PublishRequest {
            topic: TOPIC.to_string(),
            messages: data.iter().map(|d| Message::new().set_data(d.to_string())).collect(),
        }
    }

    fn pull_request(subscription: &str, max_messages: i32) -> PullRequest {
        PullRequest {
            subscription: subscription.to_string(),
            max_messages,
        }
    }

    #[tokio::test]
    async fn publish_fans_out() -> anyhow::Result<()> {
        let service = service()?;
        let response = service.publish(publish_request(&["a", "b"])).await?;
        assert_eq!(response.message_ids, vec!["1", "2"]);
        assert_eq!(service.backlog(SUB_A), 2);
        assert_eq!(service.backlog(SUB_B), 2);
        let published = service.published(TOPIC);
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].message_id, "2");
        assert_eq!(service.publish_requests().len(), 1);
        Ok(())
    }

    #[test_case("projects/p/topics/missing", 1, Code::NotFound)]
    #[test_case(TOPIC, 0, Code::InvalidArgument)]
    #[tokio::test]
    async fn publish_errors(topic: &str, count: usize, want: Code) -> anyhow::Result<()> {
        let service = service()?;
        let request = PublishRequest {
            topic: topic.to_string(),
            messages: vec![Message::new().set_data("x"); count],
        };
        let err = service.publish(request).await.unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(want), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn injected_publish_failure() -> anyhow::Result<()> {
        let service = service()?;
        service.fail_next_publish(Code::Unavailable);
        let err = service.publish(publish_request(&["a"])).await.unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::Unavailable));
        assert_eq!(service.backlog(SUB_A), 0);
        service.publish(publish_request(&["a"])).await?;
        assert_eq!(service.backlog(SUB_A), 1);
        assert_eq!(service.publish_requests().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn pull_ack_and_nack() -> anyhow::Result<()> {
        let service = service()?;
        service.publish(publish_request(&["a", "b", "c"])).await?;
        let received = service.pull(pull_request(SUB_A, 2)).await?.received_messages;
        assert_eq!(received.len(), 2);
        assert_eq!(service.outstanding(SUB_A), 2);

        service
            .acknowledge(AcknowledgeRequest {
                subscription: SUB_A.to_string(),
                ack_ids: vec![received[0].ack_id.clone()],
            })
            .await?;
        service
            .modify_ack_deadline(ModifyAckDeadlineRequest {
                subscription: SUB_A.to_string(),
                ack_deadline_seconds: 0,
                ack_ids: vec![received[1].ack_id.clone()],
            })
            .await?;
        assert_eq!(service.acked(SUB_A), vec!["1"]);
        assert_eq!(service.outstanding(SUB_A), 0);
        assert_eq!(service.backlog(SUB_A), 2);

        let again = service.pull(pull_request(SUB_A, 10)).await?.received_messages;
        let ids: Vec<&str> = again
            .iter()
            .filter_map(|r| r.message.as_ref().map(|m| m.message_id.as_str()))
            .collect();
        assert_eq!(ids, vec!["2", "3"]);
        assert_eq!(again[0].delivery_attempt, 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn lapsed_deadline_redelivers() -> anyhow::Result<()> {
        let service = service()?;
        service.publish(publish_request(&["a"])).await?;
        let first = service.pull(pull_request(SUB_A, 1)).await?.received_messages;
        assert_eq!(first.len(), 1);
        assert_eq!(service.backlog(SUB_A), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(service.backlog(SUB_A), 1);
        let second = service.pull(pull_request(SUB_A, 1)).await?.received_messages;
        assert_eq!(second[0].delivery_attempt, 2);
        Ok(())
    }

    #[tokio::test]
    async fn admin_errors() -> anyhow::Result<()> {
        let service = service()?;
        let err = service.create_topic(TOPIC).unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::AlreadyExists));
        let err = service.create_subscription(SUB_A, TOPIC, 10).unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::AlreadyExists));
        let err = service
            .create_subscription("projects/p/subscriptions/c", "projects/p/topics/x", 10)
            .unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::NotFound));
        let err = service
            .create_subscription("projects/p/subscriptions/c", TOPIC, 5)
            .unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::InvalidArgument));
        let err = service.pull(pull_request(SUB_A, 0)).await.unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::InvalidArgument));

        service.delete_subscription(SUB_B)?;
        let err = service.pull(pull_request(SUB_B, 1)).await.unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::NotFound));
        service.publish(publish_request(&["a"])).await?;
        assert_eq!(service.backlog(SUB_A), 1);
        Ok(())
    }

    fn stream_request(subscription: &str) -> StreamingPullRequest {
        StreamingPullRequest {
            subscription: subscription.to_string(),
            stream_ack_deadline_seconds: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn streaming_delivers_new_messages() -> anyhow::Result<()> {
        let service = service()?;
        service.publish(publish_request(&["a"])).await?;
        let mut stream = service.streaming_pull(stream_request(SUB_A)).await?;
        assert_eq!(service.stream_opens(SUB_A), 1);

        let response = stream.next().await.ok_or_else(|| anyhow::anyhow!("closed"))??;
        assert_eq!(response.received_messages.len(), 1);

        service.publish(publish_request(&["b", "c"])).await?;
        let response = stream.next().await.ok_or_else(|| anyhow::anyhow!("closed"))??;
        let data: Vec<_> = response
            .received_messages
            .iter()
            .filter_map(|r| r.message.as_ref().map(|m| m.data.clone()))
            .collect();
        assert_eq!(data, vec!["b", "c"]);
        assert_eq!(service.outstanding(SUB_A), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_redelivers_lapsed() -> anyhow::Result<()> {
        let service = service()?;
        service.publish(publish_request(&["a"])).await?;
        let mut stream = service.streaming_pull(stream_request(SUB_A)).await?;
        let first = stream.next().await.ok_or_else(|| anyhow::anyhow!("closed"))??;
        let start = Instant::now();
        let second = stream.next().await.ok_or_else(|| anyhow::anyhow!("closed"))??;
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_ne!(
            first.received_messages[0].ack_id,
            second.received_messages[0].ack_id
        );
        assert_eq!(second.received_messages[0].delivery_attempt, 2);
        Ok(())
    }

    #[tokio::test]
    async fn streaming_errors() -> anyhow::Result<()> {
        let service = service()?;
        let err = service
            .streaming_pull(stream_request("projects/p/subscriptions/missing"))
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected an error"))?;
        assert_eq!(err.status().map(|s| s.code), Some(Code::NotFound));

        service.fail_next_stream_open(Code::Unavailable);
        let err = service
            .streaming_pull(stream_request(SUB_A))
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected an error"))?;
        assert_eq!(err.status().map(|s| s.code), Some(Code::Unavailable));

        let mut stream = service.streaming_pull(stream_request(SUB_A)).await?;
        service.delete_subscription(SUB_A)?;
        let err = stream
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("closed"))?
            .unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::NotFound));
        assert!(stream.next().await.is_none());
        Ok(())
    }
}
