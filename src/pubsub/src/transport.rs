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

//! The boundary between this crate and the messaging service.
//!
//! The publisher and the subscriber never talk to the network directly. They
//! call an implementation of [Transport], which may use gRPC, HTTP, or, as in
//! the tests and the samples, an in-memory service.

use crate::Result;
use crate::model::{
    AcknowledgeRequest, ModifyAckDeadlineRequest, PublishRequest, PublishResponse, PullRequest,
    PullResponse, StreamingPullRequest, StreamingPullResponse,
};
use futures::stream::BoxStream;

/// The stream of responses returned by [Transport::streaming_pull].
///
/// The stream ends when the service closes it. An `Err` item reports a broken
/// stream; the subscriber decides whether to open a new one.
pub type MessageStream = BoxStream<'static, Result<StreamingPullResponse>>;

/// The RPCs used by the publisher and the subscriber.
///
/// Implementations must be safe to call from many tasks at once. Failures
/// should be reported as [Error::service][crate::Error::service] when the
/// service returned a status, and as [Error::io][crate::Error::io] when the
/// request could not be completed.
#[async_trait::async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync {
    /// Publishes a batch of messages, returning their ids in request order.
    async fn publish(&self, req: PublishRequest) -> Result<PublishResponse>;

    /// Opens a stream of messages for a subscription.
    async fn streaming_pull(&self, req: StreamingPullRequest) -> Result<MessageStream>;

    /// Pulls up to `max_messages` messages without opening a stream.
    async fn pull(&self, req: PullRequest) -> Result<PullResponse>;

    async fn acknowledge(&self, req: AcknowledgeRequest) -> Result<()>;

    /// Changes the ack deadline of the messages, zero makes them available
    /// for redelivery.
    async fn modify_ack_deadline(&self, req: ModifyAckDeadlineRequest) -> Result<()>;
}
