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

// [START pubsub_resume_publish_with_ordering_keys]
use pubsub_core::model::Message;
use pubsub_core::publisher::Publisher;
use pubsub_core::transport::Transport;
use std::sync::Arc;

/// Returns the ids of the messages published after the key resumed.
pub async fn sample(transport: Arc<dyn Transport>, topic: &str) -> anyhow::Result<Vec<String>> {
    let publisher = Publisher::builder(transport).build();
    let key = "key1";

    let mut ids = Vec::new();
    for data in ["message1", "message2", "message3"] {
        let message = Message::new().set_data(data).set_ordering_key(key);
        match publisher.publish(topic, message).await {
            Ok(id) => ids.push(id),
            Err(e) => {
                println!("publish failed: {e}, resuming the ordering key");
                publisher.resume_publish(topic, key);
            }
        }
    }

    publisher.shutdown().await;
    Ok(ids)
}
// [END pubsub_resume_publish_with_ordering_keys]
