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
use crate::model::PublishRequest;
use crate::publisher::actor::BundledMessage;
use crate::transport::Transport;
use std::sync::Arc;
use tokio::task::JoinSet;

/// The outcome of sending one batch, as seen by the batch actors.
pub(crate) type BatchResult = std::result::Result<(), Arc<Error>>;

/// The messages accumulated for one ordering key.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    messages: Vec<BundledMessage>,
    // The sum of the encoded sizes of the messages.
    messages_byte_size: u32,
}

impl Batch {
    pub(crate) fn new() -> Self {
        Batch::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }

    pub(crate) fn size(&self) -> u32 {
        self.messages_byte_size
    }

    pub(crate) fn into_messages(self) -> Vec<BundledMessage> {
        self.messages
    }

    pub(crate) fn push(&mut self, msg: BundledMessage) {
        let msg_size = msg.msg.encoded_size() as u32;
        self.messages_byte_size = self.messages_byte_size.saturating_add(msg_size);
        self.messages.push(msg);
    }

    /// Drains the batch and spawns a task to send the messages.
    ///
    /// The batch is left empty, so the actor can start filling the next batch
    /// while this one is being sent in the background.
    pub(crate) fn flush(
        &mut self,
        transport: Arc<dyn Transport>,
        topic: String,
        inflight: &mut JoinSet<BatchResult>,
    ) {
        if self.is_empty() {
            return;
        }
        let batch_to_send = std::mem::take(self);
        tracing::debug!(
            topic,
            messages = batch_to_send.len(),
            bytes = batch_to_send.size(),
            "flushing batch"
        );
        inflight.spawn(batch_to_send.send(transport, topic));
    }

    /// Sends the batch to the service and resolves the publish handles.
    ///
    /// Either every handle receives its message id, or every handle receives
    /// the same error.
    async fn send(self, transport: Arc<dyn Transport>, topic: String) -> BatchResult {
        let (msgs, txs): (Vec<_>, Vec<_>) = self
            .messages
            .into_iter()
            .map(|msg| (msg.msg, msg.tx))
            .unzip();
        let want = msgs.len();
        let request = PublishRequest {
            topic: topic.clone(),
            messages: msgs,
        };
        let result = transport.publish(request).await.and_then(|response| {
            if response.message_ids.len() == want {
                Ok(response.message_ids)
            } else {
                Err(Error::io(format!(
                    "the service returned {} message ids for {want} messages",
                    response.message_ids.len()
                )))
            }
        });

        match result {
            Err(e) => {
                tracing::warn!(topic, messages = want, "publish failed: {e}");
                let e = Arc::new(e);
                for tx in txs {
                    // The user may have dropped the handle, so it is ok if this fails.
                    let _ = tx.send(Err(e.clone()));
                }
                Err(e)
            }
            Ok(ids) => {
                txs.into_iter().zip(ids).for_each(|(tx, id)| {
                    // The user may have dropped the handle, so it is ok if this fails.
                    let _ = tx.send(Ok(id));
                });
                Ok(())
            }
        }
    }
}
