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

// [START pubsub_subscriber_sync_pull]
use pubsub_core::subscriber::Subscriber;
use pubsub_core::transport::Transport;
use std::sync::Arc;

/// Pulls up to `max_messages` messages and acknowledges them.
pub async fn sample(
    transport: Arc<dyn Transport>,
    subscription: &str,
    max_messages: i32,
) -> anyhow::Result<usize> {
    let subscriber = Subscriber::builder(transport, subscription).build();

    let received = subscriber.pull(max_messages).await?;
    let mut ack_ids = Vec::new();
    for r in received {
        if let Some(m) = &r.message {
            println!("received message {}", m.message_id);
        }
        ack_ids.push(r.ack_id);
    }

    let count = ack_ids.len();
    subscriber.acknowledge(ack_ids).await?;
    println!("acknowledged {count} messages");
    Ok(count)
}
// [END pubsub_subscriber_sync_pull]
