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

// [START pubsub_quickstart_publisher]
use pubsub_core::model::Message;
use pubsub_core::publisher::Publisher;
use pubsub_core::transport::Transport;
use std::sync::Arc;

pub async fn sample(transport: Arc<dyn Transport>, topic: &str) -> anyhow::Result<Vec<String>> {
    let publisher = Publisher::builder(transport).build();

    let handles: Vec<_> = (0..10)
        .map(|i| publisher.publish(topic, Message::new().set_data(format!("message {i}"))))
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        let id = handle.await?;
        println!("published message with id {id}");
        ids.push(id);
    }
    publisher.shutdown().await;
    Ok(ids)
}
// [END pubsub_quickstart_publisher]
