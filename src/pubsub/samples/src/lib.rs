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

pub mod publisher;
pub mod subscriber;

use pubsub_core::error::rpc::Code;
use pubsub_core::model::Message;
use pubsub_core::publisher::Publisher;
use pubsub_core::transport::Transport;
use pubsub_in_memory::InMemoryService;
use rand::{Rng, distr::Alphanumeric};
use std::sync::Arc;
use std::time::Duration;

pub const PROJECT_ID: &str = "sample-project";
pub const RESOURCE_ID_LENGTH: usize = 32;

pub async fn run_publisher_samples(service: &InMemoryService) -> anyhow::Result<()> {
    let transport: Arc<dyn Transport> = Arc::new(service.clone());
    let topic = create_test_topic(service)?;

    tracing::info!("running publisher::publish");
    let ids = publisher::publish::sample(transport.clone(), &topic).await?;
    anyhow::ensure!(ids.len() == 10, "expected 10 message ids, got {ids:?}");

    tracing::info!("running publisher::publish_with_attributes");
    publisher::publish_with_attributes::sample(transport.clone(), &topic).await?;
    let last = service.published(&topic).pop();
    anyhow::ensure!(
        last.is_some_and(|m| m.attributes.get("origin").is_some_and(|v| v == "rust-sample")),
        "the published message is missing its attributes"
    );

    tracing::info!("running publisher::publish_with_futures");
    let count = publisher::publish_with_futures::sample(transport.clone(), &topic).await?;
    anyhow::ensure!(count == 10, "expected 10 published messages, got {count}");

    tracing::info!("running publisher::publish_with_error_handling");
    service.fail_next_publish(Code::PermissionDenied);
    let failures =
        publisher::publish_with_error_handling::sample(transport.clone(), &topic).await?;
    anyhow::ensure!(failures == 4, "expected 4 failures, got {failures}");

    tracing::info!("running publisher::publish_with_batch_settings");
    let before = service.publish_requests().len();
    publisher::publish_with_batch_settings::sample(transport.clone(), &topic).await?;
    let batches = service.publish_requests().len() - before;
    anyhow::ensure!(batches >= 3, "expected at least 3 batches, got {batches}");

    tracing::info!("running publisher::publish_with_ordering_keys");
    publisher::publish_with_ordering_keys::sample(transport.clone(), &topic).await?;

    tracing::info!("running publisher::resume_publish");
    service.fail_next_publish(Code::Unavailable);
    let ids = publisher::resume_publish::sample(transport, &topic).await?;
    anyhow::ensure!(ids.len() == 2, "expected 2 messages after resume, got {ids:?}");

    Ok(())
}

pub async fn run_subscriber_samples(service: &InMemoryService) -> anyhow::Result<()> {
    let transport: Arc<dyn Transport> = Arc::new(service.clone());
    let topic = create_test_topic(service)?;

    tracing::info!("running subscriber::receive");
    let subscription = create_test_subscription(service, &topic)?;
    publish_test_messages(transport.clone(), &topic, 3).await?;
    let received = subscriber::receive::sample(transport.clone(), &subscription, 3).await?;
    anyhow::ensure!(received.len() == 3, "expected 3 messages, got {received:?}");
    service.delete_subscription(&subscription)?;

    tracing::info!("running subscriber::receive_custom_attributes");
    let subscription = create_test_subscription(service, &topic)?;
    publisher::publish_with_attributes::sample(transport.clone(), &topic).await?;
    let attributes =
        subscriber::receive_custom_attributes::sample(transport.clone(), &subscription).await?;
    anyhow::ensure!(
        attributes.get("username").is_some_and(|v| v == "gcp"),
        "unexpected attributes {attributes:?}"
    );
    service.delete_subscription(&subscription)?;

    tracing::info!("running subscriber::receive_with_flow_control");
    let subscription = create_test_subscription(service, &topic)?;
    publish_test_messages(transport.clone(), &topic, 25).await?;
    let count =
        subscriber::receive_with_flow_control::sample(transport.clone(), &subscription, 25)
            .await?;
    anyhow::ensure!(count == 25, "expected 25 messages, got {count}");
    service.delete_subscription(&subscription)?;

    tracing::info!("running subscriber::synchronous_pull");
    let subscription = create_test_subscription(service, &topic)?;
    publish_test_messages(transport.clone(), &topic, 5).await?;
    let count = subscriber::synchronous_pull::sample(transport.clone(), &subscription, 10).await?;
    anyhow::ensure!(count == 5, "expected 5 messages, got {count}");
    anyhow::ensure!(service.backlog(&subscription) == 0);
    service.delete_subscription(&subscription)?;

    tracing::info!("running subscriber::receive_with_error_listener");
    let subscription = create_test_subscription(service, &topic)?;
    let failed = subscriber::receive_with_error_listener::sample(
        transport.clone(),
        &subscription,
        Duration::from_secs(5),
    )
    .await?;
    anyhow::ensure!(!failed, "the subscription should time out without errors");
    service.fail_next_stream_open(Code::PermissionDenied);
    let failed = subscriber::receive_with_error_listener::sample(
        transport,
        &subscription,
        Duration::from_secs(5),
    )
    .await?;
    anyhow::ensure!(failed, "the subscription should fail with a permanent error");
    service.delete_subscription(&subscription)?;

    Ok(())
}

pub fn create_test_topic(service: &InMemoryService) -> anyhow::Result<String> {
    let name = random_topic_name(PROJECT_ID);
    service.create_topic(&name)?;
    tracing::info!("created topic {name}");
    Ok(name)
}

pub fn create_test_subscription(service: &InMemoryService, topic: &str) -> anyhow::Result<String> {
    let name = random_subscription_name(PROJECT_ID);
    service.create_subscription(&name, topic, 10)?;
    tracing::info!("created subscription {name}");
    Ok(name)
}

async fn publish_test_messages(
    transport: Arc<dyn Transport>,
    topic: &str,
    count: usize,
) -> anyhow::Result<()> {
    let publisher = Publisher::builder(transport).build();
    let handles = publisher.publish_all(
        topic,
        (0..count).map(|i| Message::new().set_data(format!("test message {i}"))),
    );
    publisher.shutdown().await;
    for handle in handles {
        handle.await?;
    }
    Ok(())
}

fn random_id(prefix: &str) -> String {
    let id: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(RESOURCE_ID_LENGTH - prefix.len())
        .map(char::from)
        .collect();
    format!("{prefix}{id}")
}

fn random_topic_name(project: &str) -> String {
    pubsub_core::topic_path(project, &random_id("topic-"))
}

fn random_subscription_name(project: &str) -> String {
    pubsub_core::subscription_path(project, &random_id("subscription-"))
}
