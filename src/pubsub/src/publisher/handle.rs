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

use crate::Error;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;

/// The result of a publish operation.
///
/// - `Ok(String)`: The server-assigned message ID.
/// - `Err(Arc<Error>)`: The publish failed. All messages in a failed batch
///   share the same error.
pub type PublishResult = std::result::Result<String, Arc<Error>>;

pub(crate) type ResultSender = oneshot::Sender<PublishResult>;

/// A [Future] representing an in-flight publish operation.
///
/// This is returned by [Publisher::publish][crate::publisher::Publisher::publish].
/// The handle is resolved exactly once. It can be cloned, and every clone
/// observes the same outcome, either by awaiting it or by calling
/// [state][PublishHandle::state].
///
/// # Example
/// ```
/// # use pubsub_core::publisher::Publisher;
/// # use pubsub_core::model::Message;
/// # async fn sample(publisher: Publisher) -> anyhow::Result<()> {
/// let handle = publisher.publish("projects/p/topics/t", Message::new().set_data("hello world"));
/// match handle.await {
///     Ok(message_id) => println!("Message published with ID: {message_id}"),
///     Err(e) => eprintln!("Failed to publish message: {e:?}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PublishHandle {
    inner: Shared<BoxFuture<'static, PublishResult>>,
}

/// The observable state of a [PublishHandle].
#[derive(Clone, Debug)]
pub enum PublishState {
    Pending,
    Fulfilled(String),
    Failed(Arc<Error>),
}

/// The outcome of a handle in [wait_all].
#[derive(Clone, Debug)]
pub enum PublishOutcome {
    Fulfilled(String),
    Failed(Arc<Error>),
    /// The handle did not resolve before the timeout. It is still pending
    /// and may resolve later.
    TimedOut,
}

impl PublishHandle {
    pub(crate) fn new() -> (ResultSender, Self) {
        let (tx, rx) = oneshot::channel();
        let inner = async move {
            match rx.await {
                Ok(r) => r,
                Err(_) => Err(Arc::new(Error::closed(
                    "the publisher dropped the message before sending it",
                ))),
            }
        }
        .boxed()
        .shared();
        (tx, Self { inner })
    }

    pub(crate) fn resolved(result: PublishResult) -> Self {
        let inner = futures::future::ready(result).boxed().shared();
        Self { inner }
    }

    /// Returns the current state without waiting.
    pub fn state(&self) -> PublishState {
        match self.inner.clone().now_or_never() {
            None => PublishState::Pending,
            Some(Ok(id)) => PublishState::Fulfilled(id),
            Some(Err(e)) => PublishState::Failed(e),
        }
    }
}

impl std::fmt::Debug for PublishHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishHandle")
            .field("state", &self.state())
            .finish()
    }
}

impl Future for PublishHandle {
    type Output = PublishResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

/// Waits for all the handles, up to `timeout`.
///
/// The outcomes are returned in the same order as `handles`. Handles that do
/// not resolve in time are reported as [PublishOutcome::TimedOut] and are
/// left untouched.
///
/// # Example
/// ```
/// # use pubsub_core::publisher::{Publisher, wait_all, PublishOutcome};
/// # use pubsub_core::model::Message;
/// # use std::time::Duration;
/// # async fn sample(publisher: Publisher) {
/// let handles = publisher.publish_all(
///     "projects/p/topics/t",
///     (0..10).map(|i| Message::new().set_data(format!("message {i}"))),
/// );
/// for outcome in wait_all(&handles, Duration::from_secs(30)).await {
///     if let PublishOutcome::Failed(e) = outcome {
///         eprintln!("publish failed: {e}");
///     }
/// }
/// # }
/// ```
pub async fn wait_all(handles: &[PublishHandle], timeout: Duration) -> Vec<PublishOutcome> {
    let deadline = tokio::time::Instant::now() + timeout;
    let waits = handles.iter().cloned().map(|h| async move {
        match tokio::time::timeout_at(deadline, h).await {
            Ok(Ok(id)) => PublishOutcome::Fulfilled(id),
            Ok(Err(e)) => PublishOutcome::Failed(e),
            Err(_) => PublishOutcome::TimedOut,
        }
    });
    futures::future::join_all(waits).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_ok() -> anyhow::Result<()> {
        let (tx, handle) = PublishHandle::new();
        assert!(matches!(handle.state(), PublishState::Pending));
        let clone = handle.clone();
        let _ = tx.send(Ok("id-1".to_string()));
        assert!(
            matches!(handle.state(), PublishState::Fulfilled(ref id) if id == "id-1"),
            "{handle:?}"
        );
        assert_eq!(clone.await.map_err(|e| anyhow::anyhow!("{e}"))?, "id-1");
        assert_eq!(handle.await.map_err(|e| anyhow::anyhow!("{e}"))?, "id-1");
        Ok(())
    }

    #[tokio::test]
    async fn resolve_err() {
        let (tx, handle) = PublishHandle::new();
        let _ = tx.send(Err(Arc::new(Error::io("boom"))));
        let got = handle.clone().await;
        assert!(matches!(got, Err(ref e) if e.is_io()), "{got:?}");
        assert!(matches!(handle.state(), PublishState::Failed(_)), "{handle:?}");
    }

    #[tokio::test]
    async fn dropped_sender() {
        let (tx, handle) = PublishHandle::new();
        drop(tx);
        let got = handle.await;
        assert!(matches!(got, Err(ref e) if e.is_closed()), "{got:?}");
    }

    #[tokio::test]
    async fn resolved() {
        let handle = PublishHandle::resolved(Err(Arc::new(Error::closed("stopped"))));
        assert!(matches!(handle.state(), PublishState::Failed(_)), "{handle:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_all_mixed() {
        let (tx_ok, ok) = PublishHandle::new();
        let (tx_err, err) = PublishHandle::new();
        let (_tx_pending, pending) = PublishHandle::new();
        let _ = tx_ok.send(Ok("a".to_string()));
        let _ = tx_err.send(Err(Arc::new(Error::io("fail"))));

        let start = tokio::time::Instant::now();
        let handles = vec![ok, err, pending.clone()];
        let got = wait_all(&handles, Duration::from_secs(5)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert!(matches!(&got[0], PublishOutcome::Fulfilled(id) if id == "a"), "{got:?}");
        assert!(matches!(&got[1], PublishOutcome::Failed(_)), "{got:?}");
        assert!(matches!(&got[2], PublishOutcome::TimedOut), "{got:?}");
        // Timing out does not change the handle.
        assert!(matches!(pending.state(), PublishState::Pending));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_all_empty() {
        let got = wait_all(&[], Duration::from_secs(1)).await;
        assert!(got.is_empty());
    }
}
