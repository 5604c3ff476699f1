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

use super::builder::SubscriberOptions;
use super::client::SubscriberState;
use super::delivery::Delivery;
use super::flow_control::FlowController;
use super::handler::Handler;
use super::lease_loop::LeaseLoop;
use super::leaser::DefaultLeaser;
use super::retry_policy::{RetryResult, StreamRetryPolicy};
use crate::model::Message;
use crate::transport::Transport;
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use gax::retry_state::RetryState;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// The application callback for received messages.
///
/// Any `Fn(Message, Handler) -> impl Future<Output = ()>` closure implements
/// this trait.
///
/// # Example
/// ```
/// # use pubsub_core::model::Message;
/// # use pubsub_core::subscriber::{Handler, MessageHandler};
/// fn handler() -> impl MessageHandler {
///     |message: Message, h: Handler| async move {
///         println!("received {:?}", message.data);
///         h.ack();
///     }
/// }
/// ```
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: Message, handler: Handler) -> BoxFuture<'static, ()>;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Message, Handler) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, message: Message, handler: Handler) -> BoxFuture<'static, ()> {
        (self)(message, handler).boxed()
    }
}

/// The background task behind a `SubscriptionHandle`.
pub(super) struct Session {
    transport: Arc<dyn Transport>,
    options: SubscriberOptions,
    handler: Arc<dyn MessageHandler>,
    flow: FlowController,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SubscriberState>>,
}

impl Session {
    pub(super) fn new(
        transport: Arc<dyn Transport>,
        options: SubscriberOptions,
        handler: Arc<dyn MessageHandler>,
        flow: FlowController,
        cancel: CancellationToken,
        state: Arc<watch::Sender<SubscriberState>>,
    ) -> Self {
        Self {
            transport,
            options,
            handler,
            flow,
            cancel,
            state,
        }
    }

    /// Receives messages until cancelled or a permanent error.
    ///
    /// On every exit path the in-flight handlers finish, pending acks are
    /// flushed and the remaining leases are nacked before this returns.
    pub(super) async fn run(self) -> Result<()> {
        let leaser = DefaultLeaser::new(
            self.transport.clone(),
            self.options.subscription.clone(),
            self.options.ack_deadline_seconds,
        );
        let LeaseLoop {
            handle: lease_loop,
            message_tx,
            ack_tx,
        } = LeaseLoop::new(leaser, self.options.lease_options());

        let mut delivery = Delivery::new(
            self.handler.clone(),
            self.options.implicit_reply,
            self.flow.clone(),
            self.cancel.clone(),
            message_tx,
            ack_tx,
        );
        let result = self.receive(&mut delivery).await;
        if result.is_ok() {
            self.state.send_replace(SubscriberState::Draining);
        }
        delivery.close().await;
        if let Err(e) = lease_loop.await {
            tracing::warn!(
                subscription = self.options.subscription,
                "the lease loop task failed: {e}"
            );
        }
        if let Err(e) = &result {
            tracing::error!(
                subscription = self.options.subscription,
                "the subscription stopped: {e}"
            );
        }
        self.state.send_replace(SubscriberState::Stopped);
        result
    }

    async fn receive(&self, delivery: &mut Delivery) -> Result<()> {
        let mut attempt = 0_u32;
        loop {
            let open = self.transport.streaming_pull(self.options.initial_request());
            let Some(open) = self.delivering(open, delivery).await else {
                return Ok(());
            };
            let mut stream = match open {
                Ok(stream) => stream,
                Err(e) => {
                    attempt += 1;
                    self.backoff(e, attempt, delivery).await?;
                    continue;
                }
            };
            loop {
                let Some(next) = self.delivering(stream.next(), delivery).await else {
                    return Ok(());
                };
                match next {
                    Some(Ok(response)) => {
                        attempt = 0;
                        delivery.push(response.received_messages);
                    }
                    Some(Err(e)) => {
                        attempt += 1;
                        self.backoff(e, attempt, delivery).await?;
                        break;
                    }
                    None => {
                        attempt += 1;
                        let e = Error::io("the service closed the stream");
                        self.backoff(e, attempt, delivery).await?;
                        break;
                    }
                }
            }
        }
    }

    /// Awaits `fut` while queued messages keep flowing to the application.
    ///
    /// Returns `None` if the session is cancelled first.
    async fn delivering<F: Future>(&self, fut: F, delivery: &mut Delivery) -> Option<F::Output> {
        let mut fut = std::pin::pin!(fut);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                _ = delivery.dispatch_next() => {},
                output = &mut fut => return Some(output),
            }
        }
    }

    /// Returns the error if it is permanent, otherwise sleeps before the
    /// stream is reopened.
    async fn backoff(&self, error: Error, attempt: u32, delivery: &mut Delivery) -> Result<()> {
        let error = match StreamRetryPolicy::on_error(error) {
            RetryResult::Permanent(e) => return Err(e),
            RetryResult::Continue(e) => e,
        };
        let state = RetryState::new(true).set_attempt_count(attempt);
        let delay = self.options.backoff.on_failure(&state);
        tracing::warn!(
            subscription = self.options.subscription,
            attempt,
            ?delay,
            "reopening the stream: {error}"
        );
        let _ = self.delivering(tokio::time::sleep(delay), delivery).await;
        Ok(())
    }
}
