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

use crate::model::{AcknowledgeRequest, ModifyAckDeadlineRequest};
use crate::transport::Transport;
use std::sync::Arc;

// The service rejects requests with more ack ids than this.
const ACK_IDS_MAX_BATCH_SIZE: usize = 2500;

/// A trait representing leaser actions
///
/// We stub out the interface, in order to test the lease management.
#[async_trait::async_trait]
pub(crate) trait Leaser {
    /// Acknowledge a batch of messages.
    async fn ack(&self, ack_ids: Vec<String>);
    /// Negatively acknowledge a batch of messages.
    async fn nack(&self, ack_ids: Vec<String>);
    /// Extend lease deadlines for a batch of messages.
    async fn extend(&self, ack_ids: Vec<String>);
}

/// Implements [Leaser] with the acknowledge and modify ack deadline RPCs.
///
/// Failures are logged and otherwise ignored. The service redelivers any
/// message whose ack or nack was lost.
#[derive(Clone, Debug)]
pub(crate) struct DefaultLeaser {
    transport: Arc<dyn Transport>,
    subscription: String,
    ack_deadline_seconds: i32,
}

impl DefaultLeaser {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        subscription: String,
        ack_deadline_seconds: i32,
    ) -> Self {
        Self {
            transport,
            subscription,
            ack_deadline_seconds,
        }
    }

    async fn modify_ack_deadline(&self, ack_ids: Vec<String>, seconds: i32, op: &str) {
        for chunk in ack_ids.chunks(ACK_IDS_MAX_BATCH_SIZE) {
            let req = ModifyAckDeadlineRequest {
                subscription: self.subscription.clone(),
                ack_deadline_seconds: seconds,
                ack_ids: chunk.to_vec(),
            };
            if let Err(e) = self.transport.modify_ack_deadline(req).await {
                tracing::warn!(
                    subscription = self.subscription,
                    count = chunk.len(),
                    "{op} failed: {e}"
                );
            }
        }
    }
}

#[async_trait::async_trait]
impl Leaser for DefaultLeaser {
    async fn ack(&self, ack_ids: Vec<String>) {
        for chunk in ack_ids.chunks(ACK_IDS_MAX_BATCH_SIZE) {
            let req = AcknowledgeRequest {
                subscription: self.subscription.clone(),
                ack_ids: chunk.to_vec(),
            };
            if let Err(e) = self.transport.acknowledge(req).await {
                tracing::warn!(
                    subscription = self.subscription,
                    count = chunk.len(),
                    "acknowledge failed: {e}"
                );
            }
        }
    }

    async fn nack(&self, ack_ids: Vec<String>) {
        self.modify_ack_deadline(ack_ids, 0, "nack").await
    }

    async fn extend(&self, ack_ids: Vec<String>) {
        self.modify_ack_deadline(ack_ids, self.ack_deadline_seconds, "lease extension")
            .await
    }
}
