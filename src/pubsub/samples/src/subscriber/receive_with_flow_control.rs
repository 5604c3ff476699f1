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

// [START pubsub_subscriber_flow_settings]
use pubsub_core::model::Message;
use pubsub_core::subscriber::{FlowControlOptions, Handler, Subscriber};
use pubsub_core::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Receives `count` messages while at most 10 of them, and at most 1 MiB,
/// are handled at the same time.
pub async fn sample(
    transport: Arc<dyn Transport>,
    subscription: &str,
    count: usize,
) -> anyhow::Result<usize> {
    let flow_control = FlowControlOptions::new()
        .set_max_outstanding_messages(10_u64)
        .set_max_outstanding_bytes(1024 * 1024_u64);
    let subscriber = Subscriber::builder(transport, subscription)
        .with_flow_control(flow_control)
        .build();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = subscriber.start(move |m: Message, h: Handler| {
        let tx = tx.clone();
        async move {
            // Simulate some work.
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(m.message_id);
            h.ack();
        }
    })?;

    let mut received = 0;
    while received < count {
        if rx.recv().await.is_none() {
            break;
        }
        received += 1;
    }

    handle.stop().await?;
    Ok(received)
}
// [END pubsub_subscriber_flow_settings]
