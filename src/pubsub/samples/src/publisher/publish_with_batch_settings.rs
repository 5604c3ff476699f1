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

// [START pubsub_publisher_batch_settings]
use pubsub_core::model::Message;
use pubsub_core::publisher::{BatchingOptions, Publisher};
use pubsub_core::transport::Transport;
use std::sync::Arc;
use std::time::Duration;

pub async fn sample(transport: Arc<dyn Transport>, topic: &str) -> anyhow::Result<()> {
    // Send a batch when it holds 10 messages, 1 KiB, or its first message
    // waited 1 second, whichever happens first.
    let options = BatchingOptions::new()
        .set_message_count_threshold(10_u32)
        .set_byte_threshold(1024_u32)
        .set_delay_threshold(Duration::from_secs(1));
    let publisher = Publisher::builder(transport)
        .with_batching(options)
        .build();

    let handles = publisher.publish_all(
        topic,
        (0..25).map(|i| Message::new().set_data(format!("message {i}"))),
    );
    for handle in handles {
        let id = handle.await?;
        println!("published message {id}");
    }

    publisher.shutdown().await;
    Ok(())
}
// [END pubsub_publisher_batch_settings]
