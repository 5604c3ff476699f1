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

//! Client-side message delivery for publish/subscribe services.
//!
//! This crate contains the delivery core of a publish/subscribe client:
//!
//! * A [Publisher][publisher::Publisher] that batches outgoing messages by
//!   topic and ordering key, with a future per message.
//! * A [Subscriber][subscriber::Subscriber] that streams messages to an
//!   application callback, extends their leases, and limits the messages in
//!   flight.
//!
//! The crate does not talk to the network. Applications provide an
//! implementation of [Transport][transport::Transport].
//!
//! # Example
//! ```
//! # use pubsub_core::model::Message;
//! # use pubsub_core::publisher::Publisher;
//! # use pubsub_in_memory::InMemoryService;
//! # use std::sync::Arc;
//! # tokio_test::block_on(async {
//! let service = InMemoryService::new();
//! let topic = pubsub_core::topic_path("my-project", "my-topic");
//! service.create_topic(&topic)?;
//!
//! let publisher = Publisher::builder(Arc::new(service.clone())).build();
//! let handle = publisher.publish(&topic, Message::new().set_data("hello"));
//! publisher.shutdown().await;
//! let id = handle.await?;
//! println!("published message {id}");
//! # anyhow::Ok(()) });
//! ```

pub mod config;
pub mod error;
pub mod model;
pub mod publisher;
pub mod subscriber;
pub mod transport;

pub use error::Error;

/// The result type returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Formats the full name of a topic.
///
/// # Example
/// ```
/// # use pubsub_core::topic_path;
/// assert_eq!(topic_path("my-project", "my-topic"), "projects/my-project/topics/my-topic");
/// ```
pub fn topic_path(project: &str, topic: &str) -> String {
    format!("projects/{project}/topics/{topic}")
}

/// Formats the full name of a subscription.
pub fn subscription_path(project: &str, subscription: &str) -> String {
    format!("projects/{project}/subscriptions/{subscription}")
}
