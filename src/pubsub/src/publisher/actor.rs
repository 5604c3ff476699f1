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

use super::batch::{Batch, BatchResult};
use super::handle::ResultSender;
use super::options::BatchingOptions;
use crate::Error;
use crate::model::Message;
use crate::transport::Transport;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

/// A command sent from the `Publisher` to the background Dispatcher actor.
#[derive(Debug)]
pub(crate) enum ToDispatcher {
    /// A request to publish a single message.
    Publish(BundledMessage),
    /// A request to flush all outstanding messages.
    Flush(oneshot::Sender<()>),
    /// A request to resume publishing on an ordering key.
    ResumePublish(String),
}

/// A command sent from the Dispatcher to a batch actor.
#[derive(Debug)]
pub(crate) enum ToBatchActor {
    Publish(BundledMessage),
    Flush(oneshot::Sender<()>),
    ResumePublish,
}

/// A single message and the sender half of the channel that resolves its
/// [PublishHandle][super::PublishHandle].
#[derive(Debug)]
pub(crate) struct BundledMessage {
    pub msg: Message,
    pub tx: ResultSender,
}

impl BundledMessage {
    // The user may have dropped the handle, so it is ok if this fails.
    fn fail(self, e: Error) {
        let _ = self.tx.send(Err(Arc::new(e)));
    }
}

/// The Dispatcher runs in a background task and handles all the operations
/// for one topic by dispatching them to a batch actor per ordering key.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    topic: String,
    transport: Arc<dyn Transport>,
    batching_options: BatchingOptions,
    rx: mpsc::UnboundedReceiver<ToDispatcher>,
}

impl Dispatcher {
    pub(crate) fn new(
        topic: String,
        transport: Arc<dyn Transport>,
        batching_options: BatchingOptions,
        rx: mpsc::UnboundedReceiver<ToDispatcher>,
    ) -> Self {
        Self {
            topic,
            transport,
            batching_options,
            rx,
        }
    }

    /// The main loop of the Dispatcher.
    ///
    /// 1. A Publish command is dispatched to the batch actor for its ordering
    ///    key, creating the actor if needed.
    /// 2. A Flush command flushes all batch actors and waits for them.
    /// 3. A ResumePublish command is forwarded to the actor for the key.
    ///
    /// The loop terminates when the `rx` channel is closed. It then closes
    /// every batch actor and waits until they have resolved all their
    /// messages.
    pub(crate) async fn run(mut self) {
        // Publish without ordering keys are treated as having the key "".
        let mut batch_actors: HashMap<String, mpsc::UnboundedSender<ToBatchActor>> =
            HashMap::new();
        let mut actor_tasks = JoinSet::new();
        while let Some(msg) = self.rx.recv().await {
            match msg {
                ToDispatcher::Publish(msg) => {
                    let ordering_key = msg.msg.ordering_key.clone();
                    let batch_actor = batch_actors.entry(ordering_key).or_insert_with_key(|key| {
                        let (tx, rx) = mpsc::unbounded_channel();
                        let context = BatchActorContext::new(
                            self.topic.clone(),
                            self.transport.clone(),
                            self.batching_options.clone(),
                            rx,
                        );
                        if key.is_empty() {
                            actor_tasks.spawn(ConcurrentBatchActor::new(context).run());
                        } else {
                            actor_tasks.spawn(SequentialBatchActor::new(context).run());
                        }
                        tx
                    });
                    if let Err(mpsc::error::SendError(ToBatchActor::Publish(msg))) =
                        batch_actor.send(ToBatchActor::Publish(msg))
                    {
                        msg.fail(Error::closed("the batch actor is gone"));
                    }
                }
                ToDispatcher::Flush(tx) => {
                    let mut flush_set = JoinSet::new();
                    for batch_actor in batch_actors.values() {
                        let (tx, rx) = oneshot::channel();
                        if batch_actor.send(ToBatchActor::Flush(tx)).is_ok() {
                            flush_set.spawn(rx);
                        }
                    }
                    flush_set.join_all().await;
                    let _ = tx.send(());
                }
                ToDispatcher::ResumePublish(ordering_key) => {
                    if let Some(batch_actor) = batch_actors.get(&ordering_key) {
                        let _ = batch_actor.send(ToBatchActor::ResumePublish);
                    }
                }
            }
        }
        // Dropping the senders makes each actor flush and exit.
        drop(batch_actors);
        actor_tasks.join_all().await;
        tracing::debug!(topic = self.topic, "publisher dispatcher stopped");
    }
}

/// The state shared by both kinds of batch actors.
#[derive(Debug)]
pub(crate) struct BatchActorContext {
    topic: String,
    transport: Arc<dyn Transport>,
    batching_options: BatchingOptions,
    rx: mpsc::UnboundedReceiver<ToBatchActor>,
    pending_batch: Batch,
    // When the pending batch must be sent, armed by its first message.
    deadline: Option<Instant>,
}

impl BatchActorContext {
    pub(crate) fn new(
        topic: String,
        transport: Arc<dyn Transport>,
        batching_options: BatchingOptions,
        rx: mpsc::UnboundedReceiver<ToBatchActor>,
    ) -> Self {
        Self {
            topic,
            transport,
            batching_options,
            rx,
            pending_batch: Batch::new(),
            deadline: None,
        }
    }

    fn at_batch_threshold(&self) -> bool {
        self.pending_batch.len() as u32 >= self.batching_options.message_count_threshold
            || self.pending_batch.size() >= self.batching_options.byte_threshold
    }

    // A message that cannot share a batch with any other message.
    fn is_oversized(&self, msg: &BundledMessage) -> bool {
        msg.msg.encoded_size() as u64 > self.batching_options.byte_threshold as u64
    }

    fn arm_deadline(&mut self) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.batching_options.delay_threshold);
        }
    }

    // Flush the pending batch if it's not empty.
    fn flush(&mut self, inflight: &mut JoinSet<BatchResult>) {
        self.deadline = None;
        self.pending_batch
            .flush(self.transport.clone(), self.topic.clone(), inflight);
    }
}

// Waits until `deadline`, or forever if there is no deadline.
async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

/// A batch actor that sends batches concurrently.
#[derive(Debug)]
pub(crate) struct ConcurrentBatchActor {
    context: BatchActorContext,
}

impl ConcurrentBatchActor {
    pub(crate) fn new(context: BatchActorContext) -> Self {
        Self { context }
    }

    /// The main loop of the concurrent batch actor.
    ///
    /// 1. A Publish command adds the message to the pending batch, and flushes
    ///    the batch once it reaches a threshold.
    /// 2. The latency timer flushes a partial batch.
    /// 3. A Flush command sends the pending batch and waits for all the
    ///    inflight batches.
    ///
    /// The loop terminates when the `rx` channel is closed, after all inflight
    /// batches complete.
    pub(crate) async fn run(mut self) {
        let mut inflight: JoinSet<BatchResult> = JoinSet::new();
        loop {
            let deadline = self.context.deadline;
            tokio::select! {
                // Remove completed inflight batches.
                _ = inflight.join_next(), if !inflight.is_empty() => {}
                _ = expired(deadline), if deadline.is_some() => {
                    self.context.flush(&mut inflight);
                }
                msg = self.context.rx.recv() => {
                    match msg {
                        Some(ToBatchActor::Publish(msg)) => self.publish(msg, &mut inflight),
                        Some(ToBatchActor::Flush(tx)) => {
                            self.context.flush(&mut inflight);
                            while inflight.join_next().await.is_some() {}
                            let _ = tx.send(());
                        }
                        Some(ToBatchActor::ResumePublish) => {
                            // Nothing to resume as we do not pause without ordering key.
                        }
                        None => {
                            self.context.flush(&mut inflight);
                            while inflight.join_next().await.is_some() {}
                            break;
                        }
                    }
                }
            }
        }
    }

    fn publish(&mut self, msg: BundledMessage, inflight: &mut JoinSet<BatchResult>) {
        if self.context.is_oversized(&msg) {
            // Keep the publish order: the pending batch goes first.
            self.context.flush(inflight);
            self.context.pending_batch.push(msg);
            self.context.flush(inflight);
            return;
        }
        self.context.arm_deadline();
        self.context.pending_batch.push(msg);
        if self.context.at_batch_threshold() {
            self.context.flush(inflight);
        }
    }
}

/// A batch actor that sends batches sequentially, with at most one batch
/// inflight.
///
/// If a batch fails the actor pauses: all queued messages fail, and so do
/// new ones, until the application resumes the ordering key.
#[derive(Debug)]
pub(crate) struct SequentialBatchActor {
    context: BatchActorContext,
    pending_msgs: VecDeque<BundledMessage>,
    paused: bool,
    // The latency timer fired while a batch was inflight.
    overdue: bool,
}

impl SequentialBatchActor {
    pub(crate) fn new(context: BatchActorContext) -> Self {
        Self {
            context,
            pending_msgs: VecDeque::new(),
            paused: false,
            overdue: false,
        }
    }

    /// The main loop of the sequential batch actor.
    ///
    /// 1. A Publish command queues the message. If nothing is inflight and
    ///    the queue holds a full batch, the batch is sent.
    /// 2. The completion of the inflight batch sends the next batch if it is
    ///    full or overdue.
    /// 3. The latency timer sends a partial batch, or marks it overdue if a
    ///    batch is inflight.
    /// 4. A Flush command sends all queued messages in sequential batches.
    /// 5. A ResumePublish command unpauses the actor.
    ///
    /// The loop terminates when the `rx` channel is closed, after all queued
    /// messages are resolved.
    pub(crate) async fn run(mut self) {
        // At most one task at a time, a JoinSet makes it simpler to await.
        let mut inflight: JoinSet<BatchResult> = JoinSet::new();
        loop {
            if self.paused {
                match self.context.rx.recv().await {
                    Some(ToBatchActor::Publish(msg)) => {
                        let key = msg.msg.ordering_key.clone();
                        msg.fail(Error::ordering_key_paused(key));
                    }
                    Some(ToBatchActor::Flush(tx)) => {
                        // Nothing is queued while paused.
                        let _ = tx.send(());
                    }
                    Some(ToBatchActor::ResumePublish) => {
                        self.paused = false;
                    }
                    None => break,
                }
                continue;
            }
            let deadline = self.context.deadline;
            tokio::select! {
                join = inflight.join_next(), if !inflight.is_empty() => {
                    self.handle_inflight_join(join);
                    self.send_next(&mut inflight);
                }
                _ = expired(deadline), if deadline.is_some() => {
                    self.context.deadline = None;
                    self.overdue = true;
                    if inflight.is_empty() {
                        self.send_next(&mut inflight);
                    }
                }
                msg = self.context.rx.recv() => {
                    match msg {
                        Some(ToBatchActor::Publish(msg)) => {
                            if self.is_idle() {
                                self.context.arm_deadline();
                            }
                            self.pending_msgs.push_back(msg);
                            if inflight.is_empty() {
                                self.send_next(&mut inflight);
                            }
                        }
                        Some(ToBatchActor::Flush(tx)) => {
                            self.flush(&mut inflight).await;
                            let _ = tx.send(());
                        }
                        Some(ToBatchActor::ResumePublish) => {
                            // Nothing to resume as we are not paused.
                        }
                        None => {
                            self.flush(&mut inflight).await;
                            break;
                        }
                    }
                }
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.pending_msgs.is_empty() && self.context.pending_batch.is_empty()
    }

    // Send the next batch if it is ready. Requires that nothing is inflight.
    fn send_next(&mut self, inflight: &mut JoinSet<BatchResult>) {
        if self.paused {
            return;
        }
        let full = self.move_to_batch();
        if self.context.pending_batch.is_empty() || !(full || self.overdue) {
            return;
        }
        self.context.flush(inflight);
        self.overdue = false;
        if !self.is_idle() {
            self.context.arm_deadline();
        }
    }

    // Sends all the queued messages in sequential batches.
    async fn flush(&mut self, inflight: &mut JoinSet<BatchResult>) {
        if let Some(join) = inflight.join_next().await {
            self.handle_inflight_join(Some(join));
        }
        while !self.paused && !self.is_idle() {
            self.move_to_batch();
            self.context.flush(inflight);
            self.handle_inflight_join(inflight.join_next().await);
        }
        self.context.deadline = None;
        self.overdue = false;
    }

    // Move queued messages to the pending batch respecting batch thresholds.
    //
    // Returns true if the pending batch should be sent now.
    fn move_to_batch(&mut self) -> bool {
        while let Some(front) = self.pending_msgs.front() {
            let oversized = self.context.is_oversized(front);
            if oversized && !self.context.pending_batch.is_empty() {
                return true;
            }
            if let Some(msg) = self.pending_msgs.pop_front() {
                self.context.pending_batch.push(msg);
            }
            if oversized || self.context.at_batch_threshold() {
                return true;
            }
        }
        self.context.at_batch_threshold()
    }

    // Pause publish operations, failing every queued message.
    fn pause(&mut self) {
        self.paused = true;
        self.overdue = false;
        self.context.deadline = None;
        let batch = std::mem::take(&mut self.context.pending_batch);
        let queued = batch.into_messages().into_iter().chain(self.pending_msgs.drain(..));
        let mut count = 0;
        for msg in queued {
            let key = msg.msg.ordering_key.clone();
            msg.fail(Error::ordering_key_paused(key));
            count += 1;
        }
        tracing::warn!(
            topic = self.context.topic,
            failed = count,
            "publishing paused for an ordering key after a failed batch"
        );
    }

    fn handle_inflight_join(&mut self, join: Option<Result<BatchResult, JoinError>>) {
        // A failed batch already resolved its own handles.
        if let Some(Err(_) | Ok(Err(_))) = join {
            self.pause();
        }
    }
}
