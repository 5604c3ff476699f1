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

//! Publish messages to topics.
//!
//! A [Publisher] batches messages per topic and ordering key, and sends each
//! batch with a single [Transport][crate::transport::Transport] call. Every
//! published message gets a [PublishHandle] that resolves to the message id
//! assigned by the service.

mod actor;
mod batch;
mod client;
mod handle;
mod options;

pub use client::{Publisher, PublisherBuilder};
pub use handle::{PublishHandle, PublishOutcome, PublishResult, PublishState, wait_all};
pub use options::BatchingOptions;
