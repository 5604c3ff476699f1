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

// [START pubsub_quickstart_subscriber]
use pubsub_core::model::Message;
use pubsub_core::subscriber::{Handler, Subscriber};
use pubsub_core::transport::Transport;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives `count` messages and returns their payloads.
pub async fn sample(
    transport: Arc<dyn Transport>,
    subscription: &str,
    count: usize,
) -> anyhow::Result<Vec<String>> {
    let subscriber = Subscriber::builder(transport, subscription).build();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = subscriber.start(move |m: Message, h: Handler| {
        let tx = tx.clone();
        async move {
            println!("received message {}", m.message_id);
            let _ = tx.send(String::from_utf8_lossy(&m.data).to_string());
            h.ack();
        }
    })?;

    let mut received = Vec::new();
    while received.len() < count {
        let Some(data) = rx.recv().await else { break };
        received.push(data);
    }

    handle.stop().await?;
    Ok(received)
}
// [END pubsub_quickstart_subscriber]
