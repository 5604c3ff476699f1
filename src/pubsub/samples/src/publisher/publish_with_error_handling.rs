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

// [START pubsub_publish_with_error_handler]
use pubsub_core::model::Message;
use pubsub_core::publisher::Publisher;
use pubsub_core::transport::Transport;
use std::sync::Arc;

/// Returns the number of messages that failed to publish.
pub async fn sample(transport: Arc<dyn Transport>, topic: &str) -> anyhow::Result<usize> {
    let publisher = Publisher::builder(transport).build();

    let handles = publisher.publish_all(
        topic,
        (0..4).map(|i| Message::new().set_data(format!("message {i}"))),
    );

    let mut failures = 0;
    for result in futures::future::join_all(handles).await {
        match result {
            Ok(id) => println!("published message {id}"),
            Err(e) => {
                failures += 1;
                match e.status() {
                    Some(status) => println!("the service rejected the message: {status:?}"),
                    None => println!("the message was not published: {e}"),
                }
            }
        }
    }

    publisher.shutdown().await;
    Ok(failures)
}
// [END pubsub_publish_with_error_handler]
