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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::UnboundedSender;

/// The action an application does with a message.
#[derive(Debug, PartialEq)]
pub(super) enum AckResult {
    Ack(String),
    Nack(String),
}

/// The reply sent for a message whose [Handler] is dropped without calling
/// [ack][Handler::ack] or [nack][Handler::nack].
///
/// A handler that panics always replies with a nack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImplicitReply {
    Ack,
    #[default]
    Nack,
}

/// A handler for acknowledging or rejecting messages.
#[derive(Debug)]
#[non_exhaustive]
pub enum Handler {
    AtLeastOnce(AtLeastOnce),
}

impl Handler {
    /// Acknowledge the message associated with this handler.
    ///
    /// Note that the acknowledgement is best effort. The message may still be
    /// redelivered to this client, or another client.
    pub fn ack(self) {
        match self {
            Handler::AtLeastOnce(h) => h.ack(),
        }
    }

    /// Rejects the message associated with this handler.
    ///
    /// The message will be removed from this `Subscriber`'s lease management.
    /// The service will redeliver this message, possibly to another client.
    pub fn nack(self) {
        match self {
            Handler::AtLeastOnce(h) => h.nack(),
        }
    }

    /// The id used to acknowledge the message.
    pub fn ack_id(&self) -> &str {
        match self {
            Handler::AtLeastOnce(h) => &h.ack_id,
        }
    }
}

/// A handler for at-least-once delivery.
#[derive(Debug)]
pub struct AtLeastOnce {
    ack_id: String,
    ack_tx: UnboundedSender<AckResult>,
    implicit: ImplicitReply,
    replied: bool,
    // Set when the application callback holding this handler panicked.
    poisoned: Option<Arc<AtomicBool>>,
}

impl AtLeastOnce {
    pub(super) fn new(
        ack_id: String,
        ack_tx: UnboundedSender<AckResult>,
        implicit: ImplicitReply,
    ) -> Self {
        Self {
            ack_id,
            ack_tx,
            implicit,
            replied: false,
            poisoned: None,
        }
    }

    pub(super) fn with_poison(mut self, flag: Arc<AtomicBool>) -> Self {
        self.poisoned = Some(flag);
        self
    }

    /// Acknowledge the message associated with this handler.
    ///
    /// Note that the acknowledgement is best effort. The message may still be
    /// redelivered to this client, or another client.
    pub fn ack(mut self) {
        self.reply(ImplicitReply::Ack);
    }

    /// Rejects the message associated with this handler.
    ///
    /// The message will be removed from this `Subscriber`'s lease management.
    /// The service will redeliver this message, possibly to another client.
    pub fn nack(mut self) {
        self.reply(ImplicitReply::Nack);
    }

    fn reply(&mut self, reply: ImplicitReply) {
        self.replied = true;
        let ack_id = std::mem::take(&mut self.ack_id);
        let result = match reply {
            ImplicitReply::Ack => AckResult::Ack(ack_id),
            ImplicitReply::Nack => AckResult::Nack(ack_id),
        };
        // The lease loop may be gone after shutdown.
        let _ = self.ack_tx.send(result);
    }
}

impl Drop for AtLeastOnce {
    fn drop(&mut self) {
        if self.replied {
            return;
        }
        let poisoned = self
            .poisoned
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst));
        let reply = if poisoned || std::thread::panicking() {
            ImplicitReply::Nack
        } else {
            self.implicit
        };
        tracing::debug!(ack_id = self.ack_id, ?reply, "handler dropped without a reply");
        self.reply(reply);
    }
}
