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

use pubsub_in_memory::InMemoryService;
use pubsub_samples::*;

fn enable_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[tokio::test(start_paused = true)]
async fn publisher_samples() -> anyhow::Result<()> {
    enable_tracing();
    let service = InMemoryService::new();
    run_publisher_samples(&service).await
}

#[tokio::test(start_paused = true)]
async fn subscriber_samples() -> anyhow::Result<()> {
    enable_tracing();
    let service = InMemoryService::new();
    run_subscriber_samples(&service).await
}
