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
use super::leaser::Leaser;
use std::collections::HashMap;
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior};

/// Timing parameters for lease management.
#[derive(Clone, Debug)]
pub(super) struct LeaseOptions {
    /// How often pending acks and nacks are sent.
    pub(super) flush_period: Duration,
    /// When the first flush happens.
    pub(super) flush_start: Duration,
    /// How often leases are extended.
    pub(super) extend_period: Duration,
    /// When the first extension happens.
    pub(super) extend_start: Duration,
    /// The lease granted by each extension.
    pub(super) ack_deadline: Duration,
    /// The total time a message may be held under lease.
    pub(super) max_lease_extension: Duration,
}

impl Default for LeaseOptions {
    fn default() -> Self {
        LeaseOptions {
            flush_period: Duration::from_millis(100),
            flush_start: Duration::from_millis(100),
            extend_period: Duration::from_secs(3),
            extend_start: Duration::from_secs(1),
            ack_deadline: Duration::from_secs(10),
            max_lease_extension: Duration::from_secs(60 * 60),
        }
    }
}

/// The periodic work of the lease loop.
#[derive(Debug, PartialEq)]
pub(super) enum LeaseEvent {
    Flush,
    Extend,
}

/// A message under lease management.
#[derive(Debug)]
pub(super) struct LeaseInfo {
    received: Instant,
    deadline: Instant,
    // Released when the lease ends, for any reason.
    permit: Option<FlowPermit>,
}

#[derive(Debug)]
pub(super) struct LeaseState<L>
where
    L: Leaser,
{
    under_lease: HashMap<String, LeaseInfo>,
    to_ack: Vec<String>,
    to_nack: Vec<String>,
    leaser: L,
    options: LeaseOptions,
    flush_interval: Interval,
    extend_interval: Interval,
}

impl<L> LeaseState<L>
where
    L: Leaser,
{
    pub(super) fn new(leaser: L, options: LeaseOptions) -> Self {
        let now = Instant::now();
        let mut flush_interval =
            tokio::time::interval_at(now + options.flush_start, options.flush_period);
        flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut extend_interval =
            tokio::time::interval_at(now + options.extend_start, options.extend_period);
        extend_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            under_lease: HashMap::new(),
            to_ack: Vec::new(),
            to_nack: Vec::new(),
            leaser,
            options,
            flush_interval,
            extend_interval,
        }
    }

    /// Waits for the next periodic action.
    pub(super) async fn next_event(&mut self) -> LeaseEvent {
        tokio::select! {
            biased;
            _ = self.flush_interval.tick() => LeaseEvent::Flush,
            _ = self.extend_interval.tick() => LeaseEvent::Extend,
        }
    }

    /// Accept a new ack ID under lease management
    pub(super) fn add(&mut self, ack_id: String) {
        let now = Instant::now();
        self.under_lease.insert(
            ack_id,
            LeaseInfo {
                received: now,
                deadline: now + self.options.ack_deadline,
                permit: None,
            },
        );
    }

    /// Ties a flow control permit to the lease of a message.
    ///
    /// If the lease already ended the permit is released immediately.
    pub(super) fn attach(&mut self, ack_id: &str, permit: FlowPermit) {
        if let Some(info) = self.under_lease.get_mut(ack_id) {
            info.permit = Some(permit);
        }
    }

    /// Process an ack from the application
    pub(super) fn ack(&mut self, ack_id: String) {
        self.under_lease.remove(&ack_id);
        // Unconditionally add the ack ID to the next ack batch. It doesn't hurt
        // to optimistically add it, even if its lease has expired.
        self.to_ack.push(ack_id);
    }

    /// Process a nack from the application
    pub(super) fn nack(&mut self, ack_id: String) {
        if self.under_lease.remove(&ack_id).is_some() {
            // Only nack messages under our lease. An expired lease needs no
            // further action.
            self.to_nack.push(ack_id);
        }
    }

    /// Flush pending acks/nacks
    pub(super) async fn flush(&mut self) {
        let to_ack = std::mem::take(&mut self.to_ack);
        let to_nack = std::mem::take(&mut self.to_nack);
        if !to_ack.is_empty() {
            self.leaser.ack(to_ack).await;
        }
        if !to_nack.is_empty() {
            self.leaser.nack(to_nack).await;
        }
    }

    /// Extends leases for messages under lease management
    ///
    /// Drops messages whose lease lapsed, or that exhausted the maximum lease
    /// extension. The service redelivers those messages.
    pub(super) async fn extend(&mut self) {
        let now = Instant::now();
        let max_extension = self.options.max_lease_extension;
        let before = self.under_lease.len();
        self.under_lease
            .retain(|_, info| info.deadline > now && info.received + max_extension > now);
        let expired = before - self.under_lease.len();
        if expired != 0 {
            tracing::debug!(expired, "dropped messages with expired leases");
        }
        if self.under_lease.is_empty() {
            return;
        }
        let deadline = now + self.options.ack_deadline;
        let ack_ids = self
            .under_lease
            .iter_mut()
            .map(|(ack_id, info)| {
                info.deadline = deadline;
                ack_id.clone()
            })
            .collect();
        self.leaser.extend(ack_ids).await;
    }

    /// Shutdown the leaser
    ///
    /// This flushes all pending acks and nacks all other messages.
    pub(super) async fn shutdown(self) {
        let mut to_nack = self.to_nack;
        to_nack.extend(self.under_lease.into_keys());
        if !self.to_ack.is_empty() {
            self.leaser.ack(self.to_ack).await;
        }
        if !to_nack.is_empty() {
            self.leaser.nack(to_nack).await;
        }
    }

    #[cfg(test)]
    fn leased(&self) -> Vec<String> {
        let mut v: Vec<String> = self.under_lease.keys().cloned().collect();
        v.sort();
        v
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::super::flow_control::{FlowControlOptions, FlowController};
    use super::super::leaser::tests::MockLeaser;
    use super::*;
    use tokio_util::sync::CancellationToken;

    pub(crate) fn test_id(v: i32) -> String {
        format!("{v:03}")
    }

    pub(crate) fn test_ids(range: std::ops::Range<i32>) -> Vec<String> {
        range.map(test_id).collect()
    }

    pub(crate) fn sorted(v: &[String]) -> Vec<String> {
        let mut s = v.to_owned();
        s.sort();
        s
    }

    fn strs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn basic_add_ack_nack() {
        let mut state = LeaseState::new(MockLeaser::new(), LeaseOptions::default());
        assert!(state.leased().is_empty());

        state.add("1".to_string());
        state.add("2".to_string());
        state.add("3".to_string());
        assert_eq!(state.leased(), strs(&["1", "2", "3"]));

        state.ack("1".to_string());
        assert_eq!(state.leased(), strs(&["2", "3"]));
        assert_eq!(state.to_ack, strs(&["1"]));

        state.nack("2".to_string());
        assert_eq!(state.leased(), strs(&["3"]));
        assert_eq!(state.to_nack, strs(&["2"]));

        state.add("4".to_string());
        state.ack("4".to_string());
        state.nack("3".to_string());
        assert!(state.leased().is_empty());
        assert_eq!(state.to_ack, strs(&["1", "4"]));
        assert_eq!(state.to_nack, strs(&["2", "3"]));
    }

    #[tokio::test]
    async fn ack_out_of_lease_included() {
        let mut state = LeaseState::new(MockLeaser::new(), LeaseOptions::default());
        state.ack("1".to_string());
        assert_eq!(state.to_ack, strs(&["1"]));
    }

    #[tokio::test]
    async fn nack_out_of_lease_ignored() {
        let mut state = LeaseState::new(MockLeaser::new(), LeaseOptions::default());
        state.nack("1".to_string());
        assert!(state.to_nack.is_empty());
    }

    #[tokio::test]
    async fn permit_released_with_lease() -> anyhow::Result<()> {
        let fc = FlowController::new(FlowControlOptions::default());
        let cancel = CancellationToken::new();
        let mut state = LeaseState::new(MockLeaser::new(), LeaseOptions::default());

        state.add(test_id(1));
        state.attach(&test_id(1), fc.admit(10, &cancel).await?);
        state.add(test_id(2));
        state.attach(&test_id(2), fc.admit(20, &cancel).await?);
        assert_eq!(fc.outstanding(), (2, 30));

        state.ack(test_id(1));
        assert_eq!(fc.outstanding(), (1, 20));
        state.nack(test_id(2));
        assert_eq!(fc.outstanding(), (0, 0));

        // The lease already ended.
        state.attach(&test_id(1), fc.admit(10, &cancel).await?);
        assert_eq!(fc.outstanding(), (0, 0));
        Ok(())
    }

    #[tokio::test]
    async fn flush() {
        let mut mock = MockLeaser::new();
        mock.expect_ack()
            .times(1)
            .withf(|v| sorted(v) == test_ids(0..10))
            .returning(|_| ());
        mock.expect_nack()
            .times(1)
            .withf(|v| sorted(v) == test_ids(10..20))
            .returning(|_| ());

        let mut state = LeaseState::new(mock, LeaseOptions::default());
        for i in 0..100 {
            state.add(test_id(i));
        }
        for i in 0..10 {
            state.ack(test_id(i));
        }
        for i in 10..20 {
            state.nack(test_id(i));
        }
        state.flush().await;
        assert_eq!(state.leased(), test_ids(20..100));
        assert!(state.to_ack.is_empty());
        assert!(state.to_nack.is_empty());

        // Nothing to send.
        state.flush().await;
    }

    #[tokio::test(start_paused = true)]
    async fn extend() {
        let mut seq = mockall::Sequence::new();
        let mut mock = MockLeaser::new();
        mock.expect_extend()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|v| sorted(v) == test_ids(0..10))
            .returning(|_| ());
        mock.expect_extend()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|v| sorted(v) == test_ids(0..20))
            .returning(|_| ());
        mock.expect_extend()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|v| sorted(v) == test_ids(10..20))
            .returning(|_| ());

        let mut state = LeaseState::new(mock, LeaseOptions::default());
        for i in 0..10 {
            state.add(test_id(i));
        }
        state.extend().await;

        for i in 10..20 {
            state.add(test_id(i));
        }
        state.extend().await;

        // Acked and nacked messages are not extended.
        for i in 0..5 {
            state.ack(test_id(i));
        }
        for i in 5..10 {
            state.nack(test_id(i));
        }
        state.extend().await;

        // No messages, no RPC.
        for i in 10..20 {
            state.ack(test_id(i));
        }
        state.extend().await;
    }

    #[tokio::test(start_paused = true)]
    async fn extend_drops_exhausted_leases() -> anyhow::Result<()> {
        let mut mock = MockLeaser::new();
        mock.expect_extend().returning(|_| ());
        let options = LeaseOptions {
            ack_deadline: Duration::from_secs(10),
            max_lease_extension: Duration::from_secs(60),
            ..Default::default()
        };
        let fc = FlowController::new(FlowControlOptions::default());
        let cancel = CancellationToken::new();
        let mut state = LeaseState::new(mock, options);
        state.add(test_id(1));
        state.attach(&test_id(1), fc.admit(10, &cancel).await?);

        // Keep extending until the first message exhausts its budget.
        for step in 1..=12 {
            tokio::time::advance(Duration::from_secs(5)).await;
            if step == 6 {
                state.add(test_id(2));
            }
            state.extend().await;
            if step == 11 {
                assert_eq!(state.leased(), test_ids(1..3));
            }
        }
        assert_eq!(state.leased(), vec![test_id(2)]);
        assert_eq!(fc.outstanding(), (0, 0), "expiry releases the permit");

        // Expired messages are not nacked.
        state.nack(test_id(1));
        assert!(state.to_nack.is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn extend_drops_lapsed_leases() {
        let mock = MockLeaser::new();
        let mut state = LeaseState::new(mock, LeaseOptions::default());
        state.add(test_id(1));
        tokio::time::advance(Duration::from_secs(11)).await;
        state.extend().await;
        assert!(state.leased().is_empty());
    }

    #[tokio::test]
    async fn shutdown() {
        let mut mock = MockLeaser::new();
        mock.expect_ack()
            .times(1)
            .withf(|v| sorted(v) == test_ids(0..10))
            .returning(|_| ());
        mock.expect_nack()
            .times(1)
            .withf(|v| sorted(v) == test_ids(10..30))
            .returning(|_| ());

        let mut state = LeaseState::new(mock, LeaseOptions::default());
        for i in 0..30 {
            state.add(test_id(i));
        }
        for i in 0..10 {
            state.ack(test_id(i));
        }
        for i in 10..20 {
            state.nack(test_id(i));
        }
        state.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn events() {
        let options = LeaseOptions {
            flush_start: Duration::from_millis(100),
            flush_period: Duration::from_millis(100),
            extend_start: Duration::from_millis(250),
            extend_period: Duration::from_secs(1),
            ..Default::default()
        };
        let mut state = LeaseState::new(MockLeaser::new(), options);
        let start = Instant::now();
        assert_eq!(state.next_event().await, LeaseEvent::Flush);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        assert_eq!(state.next_event().await, LeaseEvent::Flush);
        assert_eq!(state.next_event().await, LeaseEvent::Extend);
        assert_eq!(start.elapsed(), Duration::from_millis(250));
        assert_eq!(state.next_event().await, LeaseEvent::Flush);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }
}
