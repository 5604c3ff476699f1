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

use pubsub_core::model::{Message, ReceivedMessage};
use std::collections::{HashMap, VecDeque};
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

#[derive(Debug, Default)]
pub(crate) struct Topic {
    pub(crate) subscriptions: Vec<String>,
    pub(crate) published: Vec<Message>,
}

/// The messages of one subscription.
///
/// Messages wait in the backlog until delivered. Delivered messages are
/// outstanding until acked, or until their deadline lapses and they return to
/// the backlog.
#[derive(Debug)]
pub(crate) struct Subscription {
    pub(crate) topic: String,
    pub(crate) ack_deadline: Duration,
    pub(crate) stream_opens: usize,
    backlog: VecDeque<Pending>,
    outstanding: HashMap<String, Leased>,
    acked: Vec<String>,
    next_ack_id: u64,
    changed: watch::Sender<u64>,
}

#[derive(Debug)]
struct Pending {
    message: Message,
    delivery_attempt: i32,
}

#[derive(Debug)]
struct Leased {
    message: Message,
    delivery_attempt: i32,
    deadline: Instant,
}

impl Subscription {
    pub(crate) fn new(topic: String, ack_deadline: Duration) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            topic,
            ack_deadline,
            stream_opens: 0,
            backlog: VecDeque::new(),
            outstanding: HashMap::new(),
            acked: Vec::new(),
            next_ack_id: 0,
            changed,
        }
    }

    /// Notifies streams when new messages are available.
    pub(crate) fn watch(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.backlog.push_back(Pending {
            message,
            delivery_attempt: 0,
        });
        self.bump();
    }

    pub(crate) fn deliver(
        &mut self,
        max: usize,
        deadline: Duration,
        now: Instant,
    ) -> Vec<ReceivedMessage> {
        self.expire(now);
        let count = std::cmp::min(max, self.backlog.len());
        let mut received = Vec::with_capacity(count);
        for pending in self.backlog.drain(..count) {
            self.next_ack_id += 1;
            let ack_id = format!("ack-{:06}", self.next_ack_id);
            let delivery_attempt = pending.delivery_attempt + 1;
            received.push(ReceivedMessage {
                ack_id: ack_id.clone(),
                message: Some(pending.message.clone()),
                delivery_attempt,
            });
            self.outstanding.insert(
                ack_id,
                Leased {
                    message: pending.message,
                    delivery_attempt,
                    deadline: now + deadline,
                },
            );
        }
        received
    }

    /// Returns messages with a lapsed deadline to the backlog.
    pub(crate) fn expire(&mut self, now: Instant) {
        let mut lapsed: Vec<String> = self
            .outstanding
            .iter()
            .filter(|(_, l)| l.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        if lapsed.is_empty() {
            return;
        }
        lapsed.sort();
        for ack_id in lapsed {
            if let Some(leased) = self.outstanding.remove(&ack_id) {
                tracing::debug!(ack_id, "ack deadline lapsed, redelivering");
                self.backlog.push_back(Pending {
                    message: leased.message,
                    delivery_attempt: leased.delivery_attempt,
                });
            }
        }
        self.bump();
    }

    /// Unknown or expired ack ids are ignored.
    pub(crate) fn ack(&mut self, ack_id: &str) {
        if let Some(leased) = self.outstanding.remove(ack_id) {
            self.acked.push(leased.message.message_id);
        }
    }

    pub(crate) fn modify_ack_deadline(&mut self, ack_id: &str, seconds: i32, now: Instant) {
        if seconds == 0 {
            if let Some(leased) = self.outstanding.remove(ack_id) {
                self.backlog.push_front(Pending {
                    message: leased.message,
                    delivery_attempt: leased.delivery_attempt,
                });
                self.bump();
            }
            return;
        }
        if let Some(leased) = self.outstanding.get_mut(ack_id) {
            leased.deadline = now + Duration::from_secs(seconds as u64);
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.outstanding.values().map(|l| l.deadline).min()
    }

    pub(crate) fn acked(&self) -> &[String] {
        &self.acked
    }

    pub(crate) fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub(crate) fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    fn bump(&self) {
        self.changed.send_modify(|v| *v += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription() -> Subscription {
        let mut sub = Subscription::new("projects/p/topics/t".into(), Duration::from_secs(10));
        for i in 0..3 {
            sub.push(
                Message::new()
                    .set_data(format!("m{i}"))
                    .set_message_id(format!("{i}")),
            );
        }
        sub
    }

    #[test]
    fn deliver_and_ack() {
        let mut sub = subscription();
        let now = Instant::now();
        let received = sub.deliver(2, sub.ack_deadline, now);
        assert_eq!(received.len(), 2);
        assert!(received.iter().all(|r| r.delivery_attempt == 1));
        assert_eq!((sub.backlog_len(), sub.outstanding_len()), (1, 2));

        sub.ack(&received[0].ack_id);
        sub.ack("unknown");
        assert_eq!(sub.acked(), ["0".to_string()]);
        assert_eq!(sub.outstanding_len(), 1);
    }

    #[test]
    fn nack_redelivers_first() {
        let mut sub = subscription();
        let now = Instant::now();
        let received = sub.deliver(1, sub.ack_deadline, now);
        sub.modify_ack_deadline(&received[0].ack_id, 0, now);
        let again = sub.deliver(1, sub.ack_deadline, now);
        let message = again[0].message.as_ref().map(|m| m.message_id.as_str());
        assert_eq!(message, Some("0"));
        assert_eq!(again[0].delivery_attempt, 2);
        assert_ne!(again[0].ack_id, received[0].ack_id);
    }

    #[test]
    fn lapsed_deadlines_redeliver() {
        let mut sub = subscription();
        let now = Instant::now();
        let received = sub.deliver(3, Duration::from_secs(10), now);
        sub.modify_ack_deadline(&received[0].ack_id, 60, now);
        assert_eq!(sub.next_deadline(), Some(now + Duration::from_secs(10)));

        sub.expire(now + Duration::from_secs(10));
        assert_eq!((sub.backlog_len(), sub.outstanding_len()), (2, 1));
        // Acks for lapsed messages are ignored.
        sub.ack(&received[1].ack_id);
        assert!(sub.acked().is_empty());
    }

    #[test]
    fn watch_sees_new_messages() {
        let mut sub = subscription();
        let rx = sub.watch();
        assert!(!rx.has_changed().unwrap_or(true));
        sub.push(Message::new());
        assert!(rx.has_changed().unwrap_or(false));
    }
}
