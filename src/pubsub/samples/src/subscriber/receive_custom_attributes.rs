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

// [START pubsub_subscriber_async_pull_custom_attributes]
use pubsub_core::model::Message;
use pubsub_core::subscriber::{Handler, Subscriber};
use pubsub_core::transport::Transport;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Returns the attributes of the first message received.
pub async fn sample(
    transport: Arc<dyn Transport>,
    subscription: &str,
) -> anyhow::Result<HashMap<String, String>> {
    let subscriber = Subscriber::builder(transport, subscription).build();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = subscriber.start(move |m: Message, h: Handler| {
        let tx = tx.clone();
        async move {
            for (key, value) in &m.attributes {
                println!("{key} = {value}");
            }
            let _ = tx.send(m.attributes);
            h.ack();
        }
    })?;

    let attributes = rx.recv().await.unwrap_or_default();
    handle.stop().await?;
    Ok(attributes)
}
// [END pubsub_subscriber_async_pull_custom_attributes]
