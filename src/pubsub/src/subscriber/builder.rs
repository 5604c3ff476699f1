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

use super::client::Subscriber;
use super::flow_control::FlowControlOptions;
use super::handler::ImplicitReply;
use super::lease_state::LeaseOptions;
use crate::model::StreamingPullRequest;
use crate::transport::Transport;
use gax::backoff_policy::{BackoffPolicy, BackoffPolicyArg};
use gax::exponential_backoff::ExponentialBackoff;
use std::sync::Arc;
use std::time::Duration;

const MIN_ACK_DEADLINE_SECONDS: i32 = 10;
const MAX_ACK_DEADLINE_SECONDS: i32 = 600;

/// The resolved configuration of a [Subscriber].
#[derive(Clone, Debug)]
pub(crate) struct SubscriberOptions {
    pub(crate) subscription: String,
    pub(crate) client_id: String,
    pub(crate) ack_deadline_seconds: i32,
    pub(crate) flow_control: FlowControlOptions,
    pub(crate) max_lease_extension: Duration,
    pub(crate) stream_timeout: Option<Duration>,
    pub(crate) implicit_reply: ImplicitReply,
    pub(crate) backoff: Arc<dyn BackoffPolicy>,
}

impl SubscriberOptions {
    pub(crate) fn initial_request(&self) -> StreamingPullRequest {
        StreamingPullRequest {
            subscription: self.subscription.clone(),
            stream_ack_deadline_seconds: self.ack_deadline_seconds,
            client_id: self.client_id.clone(),
            max_outstanding_messages: saturating_i64(self.flow_control.max_outstanding_messages),
            max_outstanding_bytes: saturating_i64(self.flow_control.max_outstanding_bytes),
        }
    }

    pub(super) fn lease_options(&self) -> LeaseOptions {
        LeaseOptions {
            ack_deadline: Duration::from_secs(self.ack_deadline_seconds as u64),
            max_lease_extension: self.max_lease_extension,
            ..LeaseOptions::default()
        }
    }
}

fn saturating_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// A builder for [Subscriber].
///
/// # Example
/// ```
/// # use pubsub_core::subscriber::{FlowControlOptions, Subscriber};
/// # use pubsub_core::transport::Transport;
/// # use std::sync::Arc;
/// # fn sample(transport: Arc<dyn Transport>) {
/// let subscriber = Subscriber::builder(transport, "projects/my-project/subscriptions/my-subscription")
///     .set_ack_deadline_seconds(20)
///     .with_flow_control(FlowControlOptions::new().set_max_outstanding_messages(100_u64))
///     .build();
/// # }
/// ```
#[derive(Debug)]
pub struct SubscriberBuilder {
    transport: Arc<dyn Transport>,
    options: SubscriberOptions,
}

impl SubscriberBuilder {
    pub(crate) fn new(transport: Arc<dyn Transport>, subscription: String) -> Self {
        Self {
            transport,
            options: SubscriberOptions {
                subscription,
                client_id: uuid::Uuid::new_v4().to_string(),
                ack_deadline_seconds: MIN_ACK_DEADLINE_SECONDS,
                flow_control: FlowControlOptions::default(),
                max_lease_extension: Duration::from_secs(60 * 60),
                stream_timeout: None,
                implicit_reply: ImplicitReply::default(),
                backoff: Arc::new(ExponentialBackoff::default()),
            },
        }
    }

    /// Sets the ack deadline to use for the stream.
    ///
    /// This value represents how long the application has to ack or nack an
    /// incoming message. Note that this value is independent of the deadline
    /// configured on the server-side subscription.
    ///
    /// If the server does not hear back from the client within this deadline
    /// (e.g. if an application crashes), it will resend any unacknowledged
    /// messages to another subscriber.
    ///
    /// The minimum deadline you can specify is 10 seconds. The maximum deadline
    /// you can specify is 600 seconds (10 minutes). Values outside that range
    /// are clamped.
    ///
    /// The default value is 10 seconds.
    pub fn set_ack_deadline_seconds<T: Into<i32>>(mut self, v: T) -> Self {
        self.options.ack_deadline_seconds = v
            .into()
            .clamp(MIN_ACK_DEADLINE_SECONDS, MAX_ACK_DEADLINE_SECONDS);
        self
    }

    /// Limits the messages handed to the application at the same time.
    ///
    /// The limits are also sent to the service when the stream opens.
    pub fn with_flow_control(mut self, v: FlowControlOptions) -> Self {
        self.options.flow_control = v;
        self
    }

    /// The maximum time a message is kept under lease.
    ///
    /// Once this time elapses the client stops extending the lease, and the
    /// service may redeliver the message.
    ///
    /// The default value is 60 minutes.
    pub fn set_max_lease_extension<T: Into<Duration>>(mut self, v: T) -> Self {
        self.options.max_lease_extension = v.into();
        self
    }

    /// How long [SubscriptionHandle::wait][super::SubscriptionHandle::wait]
    /// waits before reporting a timeout.
    ///
    /// By default it waits until the subscription stops.
    pub fn set_stream_timeout<T: Into<Duration>>(mut self, v: T) -> Self {
        self.options.stream_timeout = Some(v.into());
        self
    }

    /// The reply for messages whose [Handler][super::Handler] is dropped
    /// without an explicit ack or nack.
    pub fn set_implicit_reply(mut self, v: ImplicitReply) -> Self {
        self.options.implicit_reply = v;
        self
    }

    /// The backoff policy between attempts to reopen a failed stream.
    ///
    /// # Example
    /// ```
    /// # use pubsub_core::subscriber::Subscriber;
    /// # use pubsub_core::transport::Transport;
    /// # use std::sync::Arc;
    /// use gax::exponential_backoff::ExponentialBackoffBuilder;
    /// use std::time::Duration;
    /// # fn sample(transport: Arc<dyn Transport>) -> anyhow::Result<()> {
    /// let policy = ExponentialBackoffBuilder::new()
    ///     .with_initial_delay(Duration::from_millis(100))
    ///     .with_maximum_delay(Duration::from_secs(5))
    ///     .build()?;
    /// let subscriber = Subscriber::builder(transport, "projects/my-project/subscriptions/my-subscription")
    ///     .with_backoff_policy(policy)
    ///     .build();
    /// # Ok(()) }
    /// ```
    pub fn with_backoff_policy<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.options.backoff = v.into().into();
        self
    }

    pub fn build(self) -> Subscriber {
        Subscriber::new(self.transport, self.options)
    }
}
