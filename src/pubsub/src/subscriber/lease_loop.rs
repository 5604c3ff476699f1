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

use super::flow_control::FlowPermit;
use super::handler::AckResult;
use super::lease_state::{LeaseEvent, LeaseOptions, LeaseState};
use super::leaser::Leaser;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;

/// Messages from the stream to the lease loop.
#[derive(Debug)]
pub(super) enum LeaseCommand {
    /// Start managing the lease of a message.
    Add(String),
    /// The message was admitted by flow control.
    Attach(String, FlowPermit),
}

/// A convenience struct that groups the components of the lease loop.
#[derive(Debug)]
pub(super) struct LeaseLoop {
    /// A handle to the task running the lease loop.
    pub(super) handle: JoinHandle<()>,
    /// For sending messages from the stream to the lease loop.
    pub(super) message_tx: UnboundedSender<LeaseCommand>,
    /// For sending acks/nacks from the application to the lease loop.
    pub(super) ack_tx: UnboundedSender<AckResult>,
}

impl LeaseLoop {
    pub(super) fn new<L>(leaser: L, options: LeaseOptions) -> Self
    where
        L: Leaser + Send + Sync + 'static,
    {
        let (message_tx, mut message_rx) = unbounded_channel();
        let (ack_tx, mut ack_rx) = unbounded_channel();
        let mut state = LeaseState::new(leaser, options);

        let loop_ack_tx = ack_tx.clone();
        let handle = tokio::spawn(async move {
            // Keeps `ack_rx` open, the loop ends when `message_rx` closes.
            let _ack_tx = loop_ack_tx;
            loop {
                tokio::select! {
                    biased;
                    event = state.next_event() => {
                        // Extensions go out well before the ack deadline, a
                        // slow call here delays the next one without lapsing
                        // any lease.
                        match event {
                            LeaseEvent::Flush => state.flush().await,
                            LeaseEvent::Extend => state.extend().await,
                        }
                    },
                    message = message_rx.recv() => {
                        match message {
                            None => break shutdown(state, ack_rx).await,
                            Some(LeaseCommand::Add(ack_id)) => state.add(ack_id),
                            Some(LeaseCommand::Attach(ack_id, permit)) => {
                                state.attach(&ack_id, permit)
                            }
                        }
                    },
                    ack_id = ack_rx.recv() => {
                        match ack_id {
                            // The loop owns a sender, this does not happen.
                            None => break,
                            Some(AckResult::Ack(ack_id)) => state.ack(ack_id),
                            Some(AckResult::Nack(ack_id)) => state.nack(ack_id),
                        }
                    },
                }
            }
        });
        LeaseLoop {
            handle,
            message_tx,
            ack_tx,
        }
    }
}

// Shuts down lease management.
//
// Processes any acks and nacks from the application that we already know
// about and triggers a shutdown of the lease state.
async fn shutdown<L>(mut state: LeaseState<L>, mut ack_rx: UnboundedReceiver<AckResult>)
where
    L: Leaser + Send + Sync + 'static,
{
    while let Ok(r) = ack_rx.try_recv() {
        match r {
            AckResult::Ack(ack_id) => state.ack(ack_id),
            AckResult::Nack(ack_id) => state.nack(ack_id),
        }
    }
    state.shutdown().await;
}
