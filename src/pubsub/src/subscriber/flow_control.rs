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

//! Bounds the number and size of messages held by the application.
//!
//! Every message delivered to a handler holds a [FlowPermit]. The permit is
//! released when the message is acked, nacked, or its lease expires. Once
//! the budget is spent, new deliveries wait in FIFO order.

use crate::Error;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Options for the flow controller.
///
/// A limit of zero disables that limit.
///
/// A single message larger than `max_outstanding_bytes` is still delivered.
/// It waits until no other message is outstanding and is then admitted
/// alone, over the byte limit.
///
/// # Example
/// ```
/// # use pubsub_core::subscriber::FlowControlOptions;
/// let options = FlowControlOptions::new()
///     .set_max_outstanding_messages(10_u64)
///     .set_max_outstanding_bytes(1024 * 1024_u64);
/// ```
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct FlowControlOptions {
    pub(crate) max_outstanding_messages: u64,
    pub(crate) max_outstanding_bytes: u64,
}

impl FlowControlOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The maximum number of messages held by the application.
    pub fn set_max_outstanding_messages<V: Into<u64>>(mut self, v: V) -> Self {
        self.max_outstanding_messages = v.into();
        self
    }

    /// The maximum total size of the messages held by the application.
    ///
    /// A message over this size is admitted when nothing else is
    /// outstanding.
    pub fn set_max_outstanding_bytes<V: Into<u64>>(mut self, v: V) -> Self {
        self.max_outstanding_bytes = v.into();
        self
    }

    pub fn max_outstanding_messages(&self) -> u64 {
        self.max_outstanding_messages
    }

    pub fn max_outstanding_bytes(&self) -> u64 {
        self.max_outstanding_bytes
    }
}

impl Default for FlowControlOptions {
    fn default() -> Self {
        Self {
            max_outstanding_messages: 1000,
            max_outstanding_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Admits messages while the outstanding budget allows it.
#[derive(Clone, Debug)]
pub struct FlowController {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    options: FlowControlOptions,
    budget: Mutex<Budget>,
}

#[derive(Debug, Default)]
struct Budget {
    count: u64,
    bytes: u64,
    waiters: VecDeque<Waiter>,
    next_id: u64,
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    bytes: u64,
    tx: oneshot::Sender<()>,
}

impl FlowController {
    pub fn new(options: FlowControlOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                budget: Mutex::new(Budget::default()),
            }),
        }
    }

    /// Waits until a message of `bytes` fits in the budget, and reserves it.
    ///
    /// Requests are granted in the order they arrive. A message larger than
    /// the byte limit is admitted once nothing else is outstanding.
    ///
    /// Returns an error where [Error::is_cancelled] is true if `cancel` fires
    /// first. In that case nothing is reserved.
    pub async fn admit(&self, bytes: u64, cancel: &CancellationToken) -> crate::Result<FlowPermit> {
        let (id, mut rx) = {
            let mut budget = self.inner.lock();
            if budget.waiters.is_empty() && self.inner.fits(&budget, bytes) {
                budget.count += 1;
                budget.bytes += bytes;
                return Ok(self.permit(bytes));
            }
            let id = budget.next_id;
            budget.next_id += 1;
            let (tx, rx) = oneshot::channel();
            budget.waiters.push_back(Waiter { id, bytes, tx });
            (id, rx)
        };
        let mut guard = WaitGuard {
            inner: &self.inner,
            id,
            bytes,
            armed: true,
        };
        tokio::select! {
            biased;
            granted = &mut rx => {
                guard.armed = false;
                if granted.is_err() {
                    // Senders are only dropped after granting or removing the waiter.
                    return Err(Error::cancelled("the flow controller dropped the request"));
                }
                Ok(self.permit(bytes))
            }
            _ = cancel.cancelled() => {
                Err(Error::cancelled("flow control admission was cancelled"))
            }
        }
    }

    /// Returns the number of messages and bytes currently outstanding.
    pub fn outstanding(&self) -> (u64, u64) {
        let budget = self.inner.lock();
        (budget.count, budget.bytes)
    }

    /// The number of admissions waiting for budget.
    pub fn waiting(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    fn permit(&self, bytes: u64) -> FlowPermit {
        FlowPermit {
            inner: self.inner.clone(),
            bytes,
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Budget> {
        self.budget.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fits(&self, budget: &Budget, bytes: u64) -> bool {
        let max_messages = self.options.max_outstanding_messages;
        let max_bytes = self.options.max_outstanding_bytes;
        let count_ok = max_messages == 0 || budget.count < max_messages;
        // An empty budget admits any size, or oversized messages never fit.
        let bytes_ok = max_bytes == 0 || budget.count == 0 || budget.bytes + bytes <= max_bytes;
        count_ok && bytes_ok
    }

    fn release(&self, bytes: u64) {
        let mut budget = self.lock();
        budget.count = budget.count.saturating_sub(1);
        budget.bytes = budget.bytes.saturating_sub(bytes);
        self.grant(&mut budget);
    }

    // Wakes waiters in FIFO order while they fit.
    fn grant(&self, budget: &mut Budget) {
        while let Some(front) = budget.waiters.front() {
            if !self.fits(budget, front.bytes) {
                break;
            }
            if let Some(waiter) = budget.waiters.pop_front() {
                budget.count += 1;
                budget.bytes += waiter.bytes;
                // If the waiter is gone its guard returns the budget.
                let _ = waiter.tx.send(());
            }
        }
    }
}

// Returns the budget, or removes the waiter, if `admit()` does not complete.
struct WaitGuard<'a> {
    inner: &'a Inner,
    id: u64,
    bytes: u64,
    armed: bool,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut budget = self.inner.lock();
        if let Some(pos) = budget.waiters.iter().position(|w| w.id == self.id) {
            budget.waiters.remove(pos);
        } else {
            // Granted, but the caller is no longer waiting.
            budget.count = budget.count.saturating_sub(1);
            budget.bytes = budget.bytes.saturating_sub(self.bytes);
        }
        self.inner.grant(&mut budget);
    }
}

/// A reservation in the flow control budget, released on drop.
#[derive(Debug)]
pub struct FlowPermit {
    inner: Arc<Inner>,
    bytes: u64,
}

impl FlowPermit {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for FlowPermit {
    fn drop(&mut self) {
        self.inner.release(self.bytes);
    }
}
