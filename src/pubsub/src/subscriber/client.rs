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

use super::builder::{SubscriberBuilder, SubscriberOptions};
use super::flow_control::FlowController;
use super::session::{MessageHandler, Session};
use crate::model::{AcknowledgeRequest, ModifyAckDeadlineRequest, PullRequest, ReceivedMessage};
use crate::transport::Transport;
use crate::{Error, Result};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// The result of a subscription, shared by everybody waiting on it.
pub type SubscriptionResult = std::result::Result<(), Arc<Error>>;

/// The lifecycle of a [Subscriber].
///
/// A subscriber starts `Idle`, moves to `Streaming` when started, to
/// `Draining` when cancelled while its handlers finish, and ends `Stopped`.
/// A permanent error moves it from `Streaming` to `Stopped` directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriberState {
    Idle,
    Streaming,
    Draining,
    Stopped,
}

/// Receives messages from a subscription.
///
/// Use [start][Subscriber::start] to receive messages over a stream, or
/// [pull][Subscriber::pull] to receive them one request at a time.
///
/// # Example
/// ```
/// # use pubsub_core::subscriber::{Handler, Subscriber};
/// # use pubsub_core::model::Message;
/// # use pubsub_core::transport::Transport;
/// # use std::sync::Arc;
/// # async fn sample(transport: Arc<dyn Transport>) -> anyhow::Result<()> {
/// let subscriber = Subscriber::builder(transport, "projects/my-project/subscriptions/my-subscription").build();
/// let handle = subscriber.start(|m: Message, h: Handler| async move {
///     println!("received {:?}", m.data);
///     h.ack();
/// })?;
/// // ... later
/// handle.stop().await?;
/// # Ok(()) }
/// ```
///
/// # Cloning
///
/// `Subscriber` uses an [Arc] internally, clones share the same lifecycle.
#[derive(Clone, Debug)]
pub struct Subscriber {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    transport: Arc<dyn Transport>,
    options: SubscriberOptions,
    state: Arc<watch::Sender<SubscriberState>>,
}

impl Subscriber {
    /// Returns a builder for a subscriber on `subscription`.
    pub fn builder<T: Into<String>>(
        transport: Arc<dyn Transport>,
        subscription: T,
    ) -> SubscriberBuilder {
        SubscriberBuilder::new(transport, subscription.into())
    }

    pub(super) fn new(transport: Arc<dyn Transport>, options: SubscriberOptions) -> Self {
        let (state, _) = watch::channel(SubscriberState::Idle);
        Self {
            inner: Arc::new(Inner {
                transport,
                options,
                state: Arc::new(state),
            }),
        }
    }

    /// The subscription name.
    pub fn subscription(&self) -> &str {
        &self.inner.options.subscription
    }

    pub fn state(&self) -> SubscriberState {
        *self.inner.state.borrow()
    }

    /// Starts receiving messages.
    ///
    /// Each message is handed to `handler` once it is admitted by flow
    /// control. The messages are under lease management until the handler
    /// acks or nacks them.
    ///
    /// A subscriber starts at most once. Returns an error where
    /// [Error::is_closed] is true if it was already started.
    pub fn start<H: MessageHandler>(&self, handler: H) -> Result<SubscriptionHandle> {
        let started = self.inner.state.send_if_modified(|state| {
            if *state != SubscriberState::Idle {
                return false;
            }
            *state = SubscriberState::Streaming;
            true
        });
        if !started {
            return Err(Error::closed(format!(
                "the subscriber for {} was already started",
                self.inner.options.subscription
            )));
        }

        let cancel = CancellationToken::new();
        let flow = FlowController::new(self.inner.options.flow_control.clone());
        let session = Session::new(
            self.inner.transport.clone(),
            self.inner.options.clone(),
            Arc::new(handler),
            flow.clone(),
            cancel.clone(),
            self.inner.state.clone(),
        );
        let join = tokio::spawn(session.run());
        let outcome = async move {
            match join.await {
                Ok(result) => result.map_err(Arc::new),
                Err(e) => Err(Arc::new(Error::handler(e))),
            }
        }
        .boxed()
        .shared();
        Ok(SubscriptionHandle {
            cancel,
            state: self.inner.state.subscribe(),
            outcome,
            flow,
            stream_timeout: self.inner.options.stream_timeout,
        })
    }

    /// Receives up to `max_messages` messages with a single request.
    ///
    /// The messages are not under lease management. Use
    /// [acknowledge][Subscriber::acknowledge] and
    /// [modify_ack_deadline][Subscriber::modify_ack_deadline] to reply.
    pub async fn pull(&self, max_messages: i32) -> Result<Vec<ReceivedMessage>> {
        let response = self
            .inner
            .transport
            .pull(PullRequest {
                subscription: self.inner.options.subscription.clone(),
                max_messages,
            })
            .await?;
        Ok(response.received_messages)
    }

    /// Acknowledges messages received with [pull][Subscriber::pull].
    pub async fn acknowledge<I, T>(&self, ack_ids: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let ack_ids: Vec<String> = ack_ids.into_iter().map(Into::into).collect();
        if ack_ids.is_empty() {
            return Ok(());
        }
        self.inner
            .transport
            .acknowledge(AcknowledgeRequest {
                subscription: self.inner.options.subscription.clone(),
                ack_ids,
            })
            .await
    }

    /// Changes the ack deadline of messages received with
    /// [pull][Subscriber::pull].
    ///
    /// A deadline of zero returns the messages to the service.
    pub async fn modify_ack_deadline<I, T>(&self, ack_ids: I, seconds: i32) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let ack_ids: Vec<String> = ack_ids.into_iter().map(Into::into).collect();
        if ack_ids.is_empty() {
            return Ok(());
        }
        self.inner
            .transport
            .modify_ack_deadline(ModifyAckDeadlineRequest {
                subscription: self.inner.options.subscription.clone(),
                ack_deadline_seconds: seconds,
                ack_ids,
            })
            .await
    }
}

/// Controls a running subscription.
///
/// Dropping the handle cancels the subscription.
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    state: watch::Receiver<SubscriberState>,
    outcome: Shared<BoxFuture<'static, SubscriptionResult>>,
    flow: FlowController,
    stream_timeout: Option<Duration>,
}

impl SubscriptionHandle {
    /// Stops receiving messages.
    ///
    /// Messages already handed to the application are processed, pending
    /// acknowledgements are sent, and all other messages are returned to the
    /// service. Returns immediately; use [wait][SubscriptionHandle::wait] to
    /// wait until that completes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> SubscriberState {
        *self.state.borrow()
    }

    /// Waits until the subscription stops.
    ///
    /// Returns the error that stopped the subscription, if any. If the
    /// subscriber has a stream timeout and it elapses first, returns an error
    /// where [Error::is_timeout] is true. The subscription keeps running in
    /// that case.
    pub async fn wait(&self) -> SubscriptionResult {
        let Some(timeout) = self.stream_timeout else {
            return self.outcome.clone().await;
        };
        match tokio::time::timeout(timeout, self.outcome.clone()).await {
            Ok(result) => result,
            Err(_) => Err(Arc::new(Error::timeout(format!(
                "the subscription did not stop within {timeout:?}"
            )))),
        }
    }

    /// Cancels the subscription and waits until it stops.
    ///
    /// Calling this on a stopped subscription returns its result again.
    pub async fn stop(&self) -> SubscriptionResult {
        self.cancel();
        self.outcome.clone().await
    }

    /// The flow controller admitting messages for this subscription.
    pub fn flow_controller(&self) -> &FlowController {
        &self.flow
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("state", &self.state())
            .field("flow", &self.flow)
            .field("stream_timeout", &self.stream_timeout)
            .finish()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::super::flow_control::FlowControlOptions;
    use super::super::handler::{Handler, ImplicitReply};
    use super::super::lease_state::tests::{sorted, test_id, test_ids};
    use super::*;
    use crate::error::rpc::{Code, Status};
    use crate::model::{Message, PullResponse};
    use crate::transport::tests::{FakeStream, MockTransport, Open};
    use tokio::sync::Semaphore;
    use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

    const SUBSCRIPTION: &str = "projects/p/subscriptions/s";

    fn received(range: std::ops::Range<i32>) -> Vec<ReceivedMessage> {
        range
            .map(|i| {
                ReceivedMessage::new(test_id(i), Message::new().set_data(format!("data-{i}")))
            })
            .collect()
    }

    fn status(code: Code) -> Error {
        Error::service(Status::default().set_code(code).set_message("fail"))
    }

    fn subscriber(fake: &Arc<FakeStream>) -> SubscriberBuilder {
        Subscriber::builder(fake.clone(), SUBSCRIPTION)
    }

    /// Forwards the ack id and acks.
    fn acking(
        tx: UnboundedSender<String>,
    ) -> impl Fn(Message, Handler) -> futures::future::Ready<()> + Send + Sync + 'static {
        move |_m, h| {
            let _ = tx.send(h.ack_id().to_string());
            h.ack();
            futures::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn receive_and_ack() -> anyhow::Result<()> {
        let fake = Arc::new(FakeStream::default().then(Open::Deliver(received(0..3))));
        let subscriber = subscriber(&fake).build();
        assert_eq!(subscriber.subscription(), SUBSCRIPTION);
        assert_eq!(subscriber.state(), SubscriberState::Idle);

        let (tx, mut rx) = unbounded_channel();
        let handle = subscriber.start(acking(tx))?;
        assert_eq!(handle.state(), SubscriberState::Streaming);
        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(rx.recv().await.ok_or_else(|| anyhow::anyhow!("closed"))?);
        }
        assert_eq!(sorted(&got), test_ids(0..3));

        handle.stop().await?;
        assert_eq!(subscriber.state(), SubscriberState::Stopped);
        assert_eq!(sorted(&fake.acked()), test_ids(0..3));
        assert!(fake.nacked().is_empty(), "{:?}", fake.nacked());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn nack_and_implicit_reply() -> anyhow::Result<()> {
        let fake = Arc::new(FakeStream::default().then(Open::Deliver(received(0..3))));
        let (tx, mut rx) = unbounded_channel();
        let handle = subscriber(&fake).build().start(move |m: Message, h: Handler| {
            let tx = tx.clone();
            async move {
                match &m.data[..] {
                    b"data-0" => h.ack(),
                    b"data-1" => h.nack(),
                    _ => drop(h),
                }
                let _ = tx.send(());
            }
        })?;
        for _ in 0..3 {
            rx.recv().await.ok_or_else(|| anyhow::anyhow!("closed"))?;
        }
        handle.stop().await?;
        assert_eq!(fake.acked(), vec![test_id(0)]);
        assert_eq!(sorted(&fake.nacked()), test_ids(1..3));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn implicit_ack() -> anyhow::Result<()> {
        let fake = Arc::new(FakeStream::default().then(Open::Deliver(received(0..2))));
        let (tx, mut rx) = unbounded_channel();
        let handle = subscriber(&fake)
            .set_implicit_reply(ImplicitReply::Ack)
            .build()
            .start(move |_m: Message, h: Handler| {
                let _ = tx.send(h.ack_id().to_string());
                async {}
            })?;
        for _ in 0..2 {
            rx.recv().await.ok_or_else(|| anyhow::anyhow!("closed"))?;
        }
        handle.stop().await?;
        assert_eq!(sorted(&fake.acked()), test_ids(0..2));
        assert!(fake.nacked().is_empty(), "{:?}", fake.nacked());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn panic_nacks_and_keeps_running() -> anyhow::Result<()> {
        let fake = Arc::new(FakeStream::default().then(Open::Deliver(received(0..2))));
        let (tx, mut rx) = unbounded_channel();
        let handle = subscriber(&fake)
            .set_implicit_reply(ImplicitReply::Ack)
            .build()
            .start(move |m: Message, h: Handler| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(());
                    assert_ne!(&m.data[..], b"data-0", "bad message");
                    h.ack();
                }
            })?;
        for _ in 0..2 {
            rx.recv().await.ok_or_else(|| anyhow::anyhow!("closed"))?;
        }
        handle.stop().await?;
        assert_eq!(fake.acked(), vec![test_id(1)]);
        assert_eq!(fake.nacked(), vec![test_id(0)]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_stops() -> anyhow::Result<()> {
        let fake = Arc::new(FakeStream::default().then(Open::Fail(status(Code::NotFound))));
        let subscriber = subscriber(&fake).build();
        let handle = subscriber.start(|_m: Message, _h: Handler| async {})?;
        let err = handle.wait().await.unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::NotFound), "{err:?}");
        assert_eq!(handle.state(), SubscriberState::Stopped);
        assert_eq!(fake.opens(), 1);

        // Stopping again reports the same error.
        let err = handle.stop().await.unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::NotFound), "{err:?}");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_reopen() -> anyhow::Result<()> {
        let fake = Arc::new(
            FakeStream::default()
                .then(Open::Fail(status(Code::Unavailable)))
                .then(Open::End)
                .then(Open::Deliver(received(0..1))),
        );
        let (tx, mut rx) = unbounded_channel();
        let handle = subscriber(&fake).build().start(acking(tx))?;
        let got = rx.recv().await.ok_or_else(|| anyhow::anyhow!("closed"))?;
        assert_eq!(got, test_id(0));
        assert_eq!(fake.opens(), 3);
        assert_eq!(handle.state(), SubscriberState::Streaming);
        handle.stop().await?;
        assert_eq!(fake.acked(), vec![test_id(0)]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn start_only_once() -> anyhow::Result<()> {
        let fake = Arc::new(FakeStream::default());
        let subscriber = subscriber(&fake).build();
        let handle = subscriber.start(|_m: Message, _h: Handler| async {})?;
        let err = subscriber
            .start(|_m: Message, _h: Handler| async {})
            .unwrap_err();
        assert!(err.is_closed(), "{err:?}");

        handle.stop().await?;
        handle.stop().await?;
        assert_eq!(subscriber.state(), SubscriberState::Stopped);
        let err = subscriber
            .clone()
            .start(|_m: Message, _h: Handler| async {})
            .unwrap_err();
        assert!(err.is_closed(), "{err:?}");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn wait_with_timeout() -> anyhow::Result<()> {
        let fake = Arc::new(FakeStream::default());
        let handle = subscriber(&fake)
            .set_stream_timeout(Duration::from_secs(5))
            .build()
            .start(|_m: Message, _h: Handler| async {})?;
        let start = tokio::time::Instant::now();
        let err = handle.wait().await.unwrap_err();
        assert!(err.is_timeout(), "{err:?}");
        assert!(start.elapsed() >= Duration::from_secs(5), "{:?}", start.elapsed());
        assert_eq!(handle.state(), SubscriberState::Streaming);

        handle.stop().await?;
        assert_eq!(handle.state(), SubscriberState::Stopped);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels() -> anyhow::Result<()> {
        let fake = Arc::new(FakeStream::default());
        let subscriber = subscriber(&fake).build();
        let handle = subscriber.start(|_m: Message, _h: Handler| async {})?;
        drop(handle);
        while subscriber.state() != SubscriberState::Stopped {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drains_handlers() -> anyhow::Result<()> {
        let fake = Arc::new(FakeStream::default().then(Open::Deliver(received(0..1))));
        let gate = Arc::new(Semaphore::new(0));
        let (tx, mut rx) = unbounded_channel();
        let g = gate.clone();
        let handle = subscriber(&fake)
            .build()
            .start(move |_m: Message, h: Handler| {
                let (tx, gate) = (tx.clone(), g.clone());
                async move {
                    let _ = tx.send(());
                    let _permit = gate.acquire().await;
                    h.ack();
                }
            })?;
        rx.recv().await.ok_or_else(|| anyhow::anyhow!("closed"))?;

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.state(), SubscriberState::Draining);
        assert!(fake.acked().is_empty(), "{:?}", fake.acked());

        gate.add_permits(1);
        handle.wait().await?;
        assert_eq!(handle.state(), SubscriberState::Stopped);
        assert_eq!(fake.acked(), vec![test_id(0)]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn flow_control_limits_handlers() -> anyhow::Result<()> {
        let fake = Arc::new(FakeStream::default().then(Open::Deliver(received(0..5))));
        let gate = Arc::new(Semaphore::new(0));
        let (tx, mut rx) = unbounded_channel();
        let g = gate.clone();
        let handle = subscriber(&fake)
            .with_flow_control(FlowControlOptions::new().set_max_outstanding_messages(2_u64))
            .build()
            .start(move |_m: Message, h: Handler| {
                let (tx, gate) = (tx.clone(), g.clone());
                async move {
                    let _ = tx.send(h.ack_id().to_string());
                    if let Ok(permit) = gate.acquire().await {
                        permit.forget();
                    }
                    h.ack();
                }
            })?;
        let first = [rx.recv().await, rx.recv().await];
        assert!(first.iter().all(Option::is_some), "{first:?}");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.flow_controller().outstanding().0, 2);

        gate.add_permits(1);
        rx.recv().await.ok_or_else(|| anyhow::anyhow!("closed"))?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.flow_controller().outstanding().0, 2);

        gate.add_permits(4);
        for _ in 0..2 {
            rx.recv().await.ok_or_else(|| anyhow::anyhow!("closed"))?;
        }
        handle.stop().await?;
        assert_eq!(sorted(&fake.acked()), test_ids(0..5));
        assert_eq!(handle.flow_controller().outstanding(), (0, 0));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn leases_are_extended() -> anyhow::Result<()> {
        let fake = Arc::new(FakeStream::default().then(Open::Deliver(received(0..1))));
        let handle = subscriber(&fake)
            .build()
            .start(|_m: Message, h: Handler| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                h.ack();
            })?;
        tokio::time::sleep(Duration::from_secs(40)).await;
        handle.stop().await?;
        assert!(fake.extended().contains(&test_id(0)), "{:?}", fake.extended());
        assert_eq!(fake.acked(), vec![test_id(0)]);
        Ok(())
    }

    #[tokio::test]
    async fn synchronous_pull() -> anyhow::Result<()> {
        let mut mock = MockTransport::new();
        mock.expect_pull()
            .withf(|r| r.subscription == SUBSCRIPTION && r.max_messages == 10)
            .return_once(|_| {
                Ok(PullResponse {
                    received_messages: received(0..2),
                })
            });
        mock.expect_acknowledge()
            .withf(|r| r.subscription == SUBSCRIPTION && r.ack_ids == test_ids(0..2))
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_modify_ack_deadline()
            .withf(|r| {
                r.subscription == SUBSCRIPTION
                    && r.ack_ids == vec![test_id(7)]
                    && r.ack_deadline_seconds == 0
            })
            .times(1)
            .returning(|_| Ok(()));
        let subscriber = Subscriber::builder(Arc::new(mock), SUBSCRIPTION).build();

        let messages = subscriber.pull(10).await?;
        assert_eq!(messages, received(0..2));
        let ack_ids: Vec<String> = messages.into_iter().map(|m| m.ack_id).collect();
        subscriber.acknowledge(ack_ids).await?;
        subscriber.acknowledge(Vec::<String>::new()).await?;
        subscriber.modify_ack_deadline([test_id(7)], 0).await?;
        subscriber.modify_ack_deadline(Vec::<String>::new(), 10).await?;
        Ok(())
    }

    #[tokio::test]
    async fn pull_error() -> anyhow::Result<()> {
        let mut mock = MockTransport::new();
        mock.expect_pull()
            .return_once(|_| Err(status(Code::PermissionDenied)));
        let subscriber = Subscriber::builder(Arc::new(mock), SUBSCRIPTION).build();
        let err = subscriber.pull(1).await.unwrap_err();
        assert_eq!(err.status().map(|s| s.code), Some(Code::PermissionDenied));
        Ok(())
    }
}
