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

// [START pubsub_subscriber_error_listener]
use pubsub_core::model::Message;
use pubsub_core::subscriber::{Handler, Subscriber};
use pubsub_core::transport::Transport;
use std::sync::Arc;
use std::time::Duration;

/// Receives messages until the subscription fails or `timeout` elapses.
///
/// Returns true if the subscription stopped because of an error.
pub async fn sample(
    transport: Arc<dyn Transport>,
    subscription: &str,
    timeout: Duration,
) -> anyhow::Result<bool> {
    let subscriber = Subscriber::builder(transport, subscription)
        .set_stream_timeout(timeout)
        .build();

    let handle = subscriber.start(|m: Message, h: Handler| async move {
        println!("received message {}", m.message_id);
        h.ack();
    })?;

    match handle.wait().await {
        Ok(()) => Ok(false),
        Err(e) if e.is_timeout() => {
            println!("no errors before the timeout, stopping");
            handle.stop().await?;
            Ok(false)
        }
        Err(e) => {
            println!("the subscription failed: {e}");
            Ok(true)
        }
    }
}
// [END pubsub_subscriber_error_listener]
