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

// [START pubsub_publisher_concurrency_control]
use pubsub_core::model::Message;
use pubsub_core::publisher::{PublishOutcome, Publisher, wait_all};
use pubsub_core::transport::Transport;
use std::sync::Arc;
use std::time::Duration;

pub async fn sample(transport: Arc<dyn Transport>, topic: &str) -> anyhow::Result<usize> {
    let publisher = Publisher::builder(transport).build();

    let handles = publisher.publish_all(
        topic,
        (0..10).map(|i| Message::new().set_data(format!("message {i}"))),
    );

    // The handles resolve in the background, wait for all of them at once.
    let outcomes = wait_all(&handles, Duration::from_secs(60)).await;
    let mut published = 0;
    for outcome in outcomes {
        match outcome {
            PublishOutcome::Fulfilled(id) => {
                println!("published message {id}");
                published += 1;
            }
            PublishOutcome::Failed(e) => println!("publish failed: {e}"),
            PublishOutcome::TimedOut => println!("publish timed out"),
        }
    }

    publisher.shutdown().await;
    Ok(published)
}
// [END pubsub_publisher_concurrency_control]
