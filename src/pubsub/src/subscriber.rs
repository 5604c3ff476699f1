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

//! Receive messages from a subscription.
//!
//! A [Subscriber] either streams messages to an application callback, with
//! lease management and flow control, or pulls them on demand.

mod builder;
mod client;
mod delivery;
mod flow_control;
mod handler;
mod lease_loop;
mod lease_state;
mod leaser;
mod retry_policy;
mod session;

pub use builder::SubscriberBuilder;
pub use client::{Subscriber, SubscriberState, SubscriptionHandle, SubscriptionResult};
pub use flow_control::{FlowControlOptions, FlowController, FlowPermit};
pub use handler::{AtLeastOnce, Handler, ImplicitReply};
pub use session::MessageHandler;
