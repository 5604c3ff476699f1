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

//! The messages exchanged with the service.
//!
//! The types carry the field numbers of the `google.pubsub.v1` protos, so the
//! size of a message is its encoded length on the wire. Transports are free
//! to encode them with [prost] or to map them to their own types.

use bytes::Bytes;
use std::collections::HashMap;

/// A message published to a topic and delivered to subscribers.
///
/// # Example
/// ```
/// # use pubsub_core::model::Message;
/// let msg = Message::new()
///     .set_data("hello")
///     .set_attributes([("origin", "python-sample"), ("username", "gcp")])
///     .set_ordering_key("user-123");
/// assert_eq!(msg.data.as_ref(), b"hello");
/// ```
#[derive(Clone, PartialEq, prost::Message)]
pub struct Message {
    /// The message payload.
    #[prost(bytes = "bytes", tag = "1")]
    pub data: Bytes,

    /// Attributes for this message.
    #[prost(map = "string, string", tag = "2")]
    pub attributes: HashMap<String, String>,

    /// The id assigned by the service when the message is published.
    ///
    /// Publishers leave this field empty.
    #[prost(string, tag = "3")]
    pub message_id: String,

    /// Messages with the same non-empty ordering key are delivered in the
    /// order they were published.
    #[prost(string, tag = "5")]
    pub ordering_key: String,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of [data][Message::data].
    pub fn set_data<T: Into<Bytes>>(mut self, v: T) -> Self {
        self.data = v.into();
        self
    }

    /// Sets the value of [attributes][Message::attributes].
    pub fn set_attributes<T, K, V>(mut self, v: T) -> Self
    where
        T: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes = v.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Sets the value of [message_id][Message::message_id].
    pub fn set_message_id<T: Into<String>>(mut self, v: T) -> Self {
        self.message_id = v.into();
        self
    }

    /// Sets the value of [ordering_key][Message::ordering_key].
    pub fn set_ordering_key<T: Into<String>>(mut self, v: T) -> Self {
        self.ordering_key = v.into();
        self
    }

    /// The number of bytes this message contributes to a publish request.
    pub fn encoded_size(&self) -> usize {
        prost::Message::encoded_len(self)
    }
}

/// Request for the `Publish` method.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PublishRequest {
    /// The topic, in the format `projects/{project}/topics/{topic}`.
    #[prost(string, tag = "1")]
    pub topic: String,
    #[prost(message, repeated, tag = "2")]
    pub messages: Vec<Message>,
}

/// Response for the `Publish` method.
///
/// The ids are in the same order as the messages in the request.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PublishResponse {
    #[prost(string, repeated, tag = "1")]
    pub message_ids: Vec<String>,
}

impl PublishResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of [message_ids][PublishResponse::message_ids].
    pub fn set_message_ids<T, V>(mut self, v: T) -> Self
    where
        T: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.message_ids = v.into_iter().map(|v| v.into()).collect();
        self
    }
}

/// A message and its acknowledgment id.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ReceivedMessage {
    /// The id used to acknowledge this delivery.
    #[prost(string, tag = "1")]
    pub ack_id: String,
    #[prost(message, optional, tag = "2")]
    pub message: Option<Message>,
    /// How many times the service attempted to deliver this message.
    #[prost(int32, tag = "3")]
    pub delivery_attempt: i32,
}

impl ReceivedMessage {
    pub fn new<T: Into<String>>(ack_id: T, message: Message) -> Self {
        Self {
            ack_id: ack_id.into(),
            message: Some(message),
            delivery_attempt: 0,
        }
    }
}

/// Request for the synchronous `Pull` method.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PullRequest {
    /// The subscription, in the format `projects/{project}/subscriptions/{sub}`.
    #[prost(string, tag = "1")]
    pub subscription: String,
    #[prost(int32, tag = "3")]
    pub max_messages: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PullResponse {
    #[prost(message, repeated, tag = "1")]
    pub received_messages: Vec<ReceivedMessage>,
}

/// Request for the `Acknowledge` method.
#[derive(Clone, PartialEq, prost::Message)]
pub struct AcknowledgeRequest {
    #[prost(string, tag = "1")]
    pub subscription: String,
    #[prost(string, repeated, tag = "2")]
    pub ack_ids: Vec<String>,
}

/// Request for the `ModifyAckDeadline` method.
///
/// A deadline of zero makes the messages available for redelivery.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ModifyAckDeadlineRequest {
    #[prost(string, tag = "1")]
    pub subscription: String,
    #[prost(int32, tag = "3")]
    pub ack_deadline_seconds: i32,
    #[prost(string, repeated, tag = "4")]
    pub ack_ids: Vec<String>,
}

/// The initial request of a streaming pull.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamingPullRequest {
    #[prost(string, tag = "1")]
    pub subscription: String,
    #[prost(int32, tag = "5")]
    pub stream_ack_deadline_seconds: i32,
    /// Identifies the client across stream reconnects.
    #[prost(string, tag = "6")]
    pub client_id: String,
    #[prost(int64, tag = "7")]
    pub max_outstanding_messages: i64,
    #[prost(int64, tag = "8")]
    pub max_outstanding_bytes: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamingPullResponse {
    #[prost(message, repeated, tag = "1")]
    pub received_messages: Vec<ReceivedMessage>,
}
