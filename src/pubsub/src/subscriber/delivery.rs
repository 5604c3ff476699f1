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

use super::flow_control::{FlowController, FlowPermit};
use super::handler::{AckResult, AtLeastOnce, Handler, ImplicitReply};
use super::lease_loop::LeaseCommand;
use super::session::MessageHandler;
use crate::model::{Message, ReceivedMessage};
use crate::{Error, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Hands received messages to the application as flow control admits them.
///
/// Messages are leased as soon as they arrive and wait in a queue until they
/// are admitted. A message waiting for admission does not hold back the
/// messages behind it in the stream.
pub(super) struct Delivery {
    handler: Arc<dyn MessageHandler>,
    implicit_reply: ImplicitReply,
    flow: FlowController,
    cancel: CancellationToken,
    message_tx: UnboundedSender<LeaseCommand>,
    ack_tx: UnboundedSender<AckResult>,
    pending: VecDeque<(String, Message)>,
    admitting: Option<Admission>,
    handlers: JoinSet<()>,
}

/// The message at the head of the queue, and its admission in progress.
struct Admission {
    ack_id: String,
    message: Message,
    permit: BoxFuture<'static, Result<FlowPermit>>,
}

impl Delivery {
    pub(super) fn new(
        handler: Arc<dyn MessageHandler>,
        implicit_reply: ImplicitReply,
        flow: FlowController,
        cancel: CancellationToken,
        message_tx: UnboundedSender<LeaseCommand>,
        ack_tx: UnboundedSender<AckResult>,
    ) -> Self {
        Self {
            handler,
            implicit_reply,
            flow,
            cancel,
            message_tx,
            ack_tx,
            pending: VecDeque::new(),
            admitting: None,
            handlers: JoinSet::new(),
        }
    }

    /// Leases the messages and queues them for admission.
    pub(super) fn push(&mut self, messages: Vec<ReceivedMessage>) {
        for ReceivedMessage {
            ack_id, message, ..
        } in messages
        {
            let _ = self.message_tx.send(LeaseCommand::Add(ack_id.clone()));
            self.pending.push_back((ack_id, message.unwrap_or_default()));
        }
    }

    /// Admits the next queued message and starts its handler.
    ///
    /// Never completes while the queue is empty. Dropping the future keeps
    /// the admission in progress, the next call resumes it.
    pub(super) async fn dispatch_next(&mut self) {
        if self.admitting.is_none() {
            let Some((ack_id, message)) = self.pending.pop_front() else {
                return futures::future::pending::<()>().await;
            };
            let (flow, cancel) = (self.flow.clone(), self.cancel.clone());
            let bytes = message.encoded_size() as u64;
            self.admitting = Some(Admission {
                ack_id,
                message,
                permit: async move { flow.admit(bytes, &cancel).await }.boxed(),
            });
        }
        let Some(admission) = self.admitting.as_mut() else {
            return;
        };
        let permit = admission.permit.as_mut().await;
        let Some(Admission {
            ack_id, message, ..
        }) = self.admitting.take()
        else {
            return;
        };
        match permit {
            Ok(permit) => self.start(ack_id, message, permit),
            // Cancelled, the message goes back to the service.
            Err(_) => {
                let _ = self.ack_tx.send(AckResult::Nack(ack_id));
            }
        }
    }

    fn start(&mut self, ack_id: String, message: Message, permit: FlowPermit) {
        let _ = self.message_tx.send(LeaseCommand::Attach(ack_id.clone(), permit));
        self.handlers.spawn(invoke(
            self.handler.clone(),
            message,
            ack_id,
            self.ack_tx.clone(),
            self.implicit_reply,
        ));
        while self.handlers.try_join_next().is_some() {}
    }

    /// Nacks the messages that never reached the application, then waits
    /// for the running handlers.
    pub(super) async fn close(mut self) {
        let admitting = self.admitting.take().map(|a| a.ack_id);
        let queued = self.pending.drain(..).map(|(ack_id, _)| ack_id);
        for ack_id in admitting.into_iter().chain(queued) {
            let _ = self.ack_tx.send(AckResult::Nack(ack_id));
        }
        while self.handlers.join_next().await.is_some() {}
    }
}

/// Runs the application callback for one message.
///
/// A panic in the callback nacks the message and is logged.
async fn invoke(
    handler: Arc<dyn MessageHandler>,
    message: Message,
    ack_id: String,
    ack_tx: UnboundedSender<AckResult>,
    implicit: ImplicitReply,
) {
    let poisoned = Arc::new(AtomicBool::new(false));
    let h = Handler::AtLeastOnce(
        AtLeastOnce::new(ack_id.clone(), ack_tx, implicit).with_poison(poisoned.clone()),
    );
    let call = std::pin::pin!(
        AssertUnwindSafe(async move { handler.handle(message, h).await }).catch_unwind()
    );
    if let Err(payload) = call.await {
        poisoned.store(true, Ordering::SeqCst);
        let e = Error::handler(panic_message(&*payload));
        tracing::warn!(ack_id, "the message handler panicked: {e}");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return s.to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "the handler panicked with a non-string payload".to_string()
}
