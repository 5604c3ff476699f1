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

use super::actor::{BundledMessage, Dispatcher, ToDispatcher};
use super::handle::PublishHandle;
use super::options::BatchingOptions;
use crate::Error;
use crate::model::Message;
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Publishes messages to one or more topics.
///
/// Messages are accumulated in batches, one per topic and ordering key, and
/// sent in the background. `publish()` never waits for the service. Each
/// call returns a [PublishHandle] that resolves with the message id once the
/// batch is sent.
///
/// The publisher is cheap to clone. All clones share the same batches.
///
/// # Example
/// ```
/// # use pubsub_core::publisher::Publisher;
/// # use pubsub_core::model::Message;
/// # use pubsub_core::transport::Transport;
/// # async fn sample(transport: std::sync::Arc<dyn Transport>) -> anyhow::Result<()> {
/// let publisher = Publisher::builder(transport).build();
/// let handle = publisher.publish(
///     "projects/my-project/topics/my-topic",
///     Message::new().set_data("Hello, World"),
/// );
/// let message_id = handle.await?;
/// publisher.shutdown().await;
/// # Ok(()) }
/// ```
#[derive(Clone, Debug)]
pub struct Publisher {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    transport: Arc<dyn Transport>,
    batching_options: BatchingOptions,
    topics: Mutex<Topics>,
}

#[derive(Debug, Default)]
struct Topics {
    closed: bool,
    dispatchers: HashMap<String, mpsc::UnboundedSender<ToDispatcher>>,
    // The dispatchers run detached, these are only used to wait on shutdown.
    tasks: Vec<JoinHandle<()>>,
}

impl Publisher {
    /// Returns a builder for [Publisher].
    pub fn builder(transport: Arc<dyn Transport>) -> PublisherBuilder {
        PublisherBuilder::new(transport)
    }

    /// The batching options used by this publisher, after clamping.
    pub fn batching_options(&self) -> &BatchingOptions {
        &self.inner.batching_options
    }

    /// Publishes a message to `topic`.
    ///
    /// The message is added to the pending batch for its topic and ordering
    /// key. After [shutdown][Publisher::shutdown] the handle resolves with an
    /// error where [Error::is_closed] is true.
    pub fn publish<T: Into<String>>(&self, topic: T, msg: Message) -> PublishHandle {
        if self.is_closed() {
            return PublishHandle::resolved(Err(Arc::new(Error::closed(
                "the publisher was shut down",
            ))));
        }
        let (tx, handle) = PublishHandle::new();
        self.dispatch(topic.into(), ToDispatcher::Publish(BundledMessage { msg, tx }));
        handle
    }

    /// Publishes many messages to `topic`, in order.
    ///
    /// Returns one handle per message. An empty input sends nothing and
    /// returns no handles.
    pub fn publish_all<T, I>(&self, topic: T, messages: I) -> Vec<PublishHandle>
    where
        T: Into<String>,
        I: IntoIterator<Item = Message>,
    {
        let topic = topic.into();
        messages
            .into_iter()
            .map(|msg| self.publish(topic.as_str(), msg))
            .collect()
    }

    /// Sends all pending batches and waits until every message published
    /// before this call is resolved.
    ///
    /// Unlike [shutdown][Publisher::shutdown], the publisher keeps accepting
    /// messages.
    pub async fn flush(&self) {
        let waits: Vec<_> = {
            let topics = self.lock();
            topics
                .dispatchers
                .values()
                .filter_map(|d| {
                    let (tx, rx) = oneshot::channel();
                    d.send(ToDispatcher::Flush(tx)).ok().map(|_| rx)
                })
                .collect()
        };
        futures::future::join_all(waits).await;
    }

    /// Resumes publishing on an ordering key.
    ///
    /// A failed batch pauses its ordering key, and messages published with
    /// the key fail until this is called.
    pub fn resume_publish<T, K>(&self, topic: T, ordering_key: K)
    where
        T: AsRef<str>,
        K: Into<String>,
    {
        let topics = self.lock();
        if let Some(dispatcher) = topics.dispatchers.get(topic.as_ref()) {
            let _ = dispatcher.send(ToDispatcher::ResumePublish(ordering_key.into()));
        }
    }

    /// Stops the publisher.
    ///
    /// All partial batches are sent, and this returns once every message
    /// published before the call is resolved. Later calls to `publish()`
    /// fail. Calling `shutdown()` again has no effect.
    pub async fn shutdown(&self) {
        let tasks = {
            let mut topics = self.lock();
            if topics.closed {
                return;
            }
            topics.closed = true;
            // Dropping the senders closes each dispatcher.
            topics.dispatchers.clear();
            std::mem::take(&mut topics.tasks)
        };
        futures::future::join_all(tasks).await;
        tracing::debug!("publisher stopped");
    }

    /// Returns true once [shutdown][Publisher::shutdown] was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn dispatch(&self, topic: String, cmd: ToDispatcher) {
        let mut topics = self.lock();
        if topics.closed {
            drop(topics);
            if let ToDispatcher::Publish(msg) = cmd {
                let _ = msg
                    .tx
                    .send(Err(Arc::new(Error::closed("the publisher was shut down"))));
            }
            return;
        }
        let Topics {
            dispatchers, tasks, ..
        } = &mut *topics;
        let dispatcher = dispatchers.entry(topic).or_insert_with_key(|topic| {
            let (tx, rx) = mpsc::unbounded_channel();
            // Dropping the last sender, on shutdown or when the last clone of
            // the publisher is dropped, flushes and stops the dispatcher.
            let dispatcher = Dispatcher::new(
                topic.clone(),
                self.inner.transport.clone(),
                self.inner.batching_options.clone(),
                rx,
            );
            tasks.push(tokio::spawn(dispatcher.run()));
            tx
        });
        if let Err(mpsc::error::SendError(ToDispatcher::Publish(msg))) = dispatcher.send(cmd) {
            let _ = msg
                .tx
                .send(Err(Arc::new(Error::closed("the publisher dispatcher is gone"))));
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Topics> {
        self.inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A builder for [Publisher].
///
/// # Example
/// ```
/// # use pubsub_core::publisher::{BatchingOptions, Publisher};
/// # use pubsub_core::transport::Transport;
/// # use std::time::Duration;
/// # fn sample(transport: std::sync::Arc<dyn Transport>) {
/// let publisher = Publisher::builder(transport)
///     .with_batching(
///         BatchingOptions::new()
///             .set_message_count_threshold(10_u32)
///             .set_byte_threshold(1024_u32)
///             .set_delay_threshold(Duration::from_secs(1)),
///     )
///     .build();
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PublisherBuilder {
    transport: Arc<dyn Transport>,
    batching_options: BatchingOptions,
}

impl PublisherBuilder {
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            batching_options: BatchingOptions::default(),
        }
    }

    /// Configure publisher batching behavior.
    ///
    /// Values beyond the service limits are clamped.
    pub fn with_batching(mut self, options: BatchingOptions) -> Self {
        self.batching_options = options;
        self
    }

    /// Creates the publisher. Must be called from within a tokio runtime.
    pub fn build(self) -> Publisher {
        Publisher {
            inner: Arc::new(Inner {
                transport: self.transport,
                batching_options: self.batching_options.clamp(),
                topics: Mutex::new(Topics::default()),
            }),
        }
    }
}
