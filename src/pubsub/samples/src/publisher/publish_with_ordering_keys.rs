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

// [START pubsub_publish_with_ordering_keys]
use pubsub_core::model::Message;
use pubsub_core::publisher::Publisher;
use pubsub_core::transport::Transport;
use std::sync::Arc;

pub async fn sample(transport: Arc<dyn Transport>, topic: &str) -> anyhow::Result<()> {
    let publisher = Publisher::builder(transport).build();

    let messages = [
        ("message1", "key1"),
        ("message2", "key2"),
        ("message3", "key1"),
        ("message4", "key2"),
    ];
    let handles: Vec<_> = messages
        .into_iter()
        .map(|(data, key)| {
            let message = Message::new().set_data(data).set_ordering_key(key);
            publisher.publish(topic, message)
        })
        .collect();

    for handle in handles {
        match handle.await {
            Ok(id) => println!("published message {id}"),
            Err(e) if e.is_ordering_key_paused() => {
                println!("the ordering key is paused, resume it to publish again: {e}")
            }
            Err(e) => return Err(e.into()),
        }
    }

    publisher.shutdown().await;
    Ok(())
}
// [END pubsub_publish_with_ordering_keys]
