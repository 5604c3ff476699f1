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

use std::time::Duration;

const MAX_DELAY: Duration = Duration::from_secs(60 * 60 * 24); // 1 day
// Service limits for a single publish request.
const MAX_MESSAGES: u32 = 1000;
const MAX_BYTES: u32 = 1e7 as u32; // 10MB

/// Options for configuring publisher batching behavior.
///
/// A batch is sent as soon as it holds `message_count_threshold` messages,
/// holds at least `byte_threshold` bytes, or its first message has waited
/// `delay_threshold`. To turn off batching, set the value of
/// `message_count_threshold` to 1.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct BatchingOptions {
    pub(crate) message_count_threshold: u32,
    pub(crate) byte_threshold: u32,
    pub(crate) delay_threshold: Duration,
}

impl BatchingOptions {
    /// Create a new instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the [BatchingOptions][Self::message_count_threshold] field.
    ///
    /// # Example
    /// ```
    /// # use pubsub_core::publisher::BatchingOptions;
    /// let options = BatchingOptions::new().set_message_count_threshold(100_u32);
    /// ```
    pub fn set_message_count_threshold<V: Into<u32>>(mut self, v: V) -> Self {
        self.message_count_threshold = v.into();
        self
    }

    /// Set the [BatchingOptions][Self::byte_threshold] field.
    ///
    /// # Example
    /// ```
    /// # use pubsub_core::publisher::BatchingOptions;
    /// let options = BatchingOptions::new().set_byte_threshold(4096_u32);
    /// ```
    pub fn set_byte_threshold<V: Into<u32>>(mut self, v: V) -> Self {
        self.byte_threshold = v.into();
        self
    }

    /// Set the [BatchingOptions][Self::delay_threshold] field.
    ///
    /// # Example
    /// ```
    /// # use pubsub_core::publisher::BatchingOptions;
    /// # use std::time::Duration;
    /// let options = BatchingOptions::new().set_delay_threshold(Duration::from_millis(10));
    /// ```
    pub fn set_delay_threshold<V: Into<Duration>>(mut self, v: V) -> Self {
        self.delay_threshold = v.into();
        self
    }

    pub fn message_count_threshold(&self) -> u32 {
        self.message_count_threshold
    }

    pub fn byte_threshold(&self) -> u32 {
        self.byte_threshold
    }

    pub fn delay_threshold(&self) -> Duration {
        self.delay_threshold
    }

    // Enforce the service limits, a zero threshold means "flush every message".
    pub(crate) fn clamp(self) -> Self {
        Self {
            message_count_threshold: self.message_count_threshold.clamp(1, MAX_MESSAGES),
            byte_threshold: self.byte_threshold.clamp(1, MAX_BYTES),
            delay_threshold: std::cmp::min(self.delay_threshold, MAX_DELAY),
        }
    }
}

impl std::default::Default for BatchingOptions {
    fn default() -> Self {
        Self {
            message_count_threshold: 10_u32,
            byte_threshold: 1024_u32,
            delay_threshold: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batching_options() {
        let options = BatchingOptions::new()
            .set_byte_threshold(1_234_u32)
            .set_message_count_threshold(123_u32)
            .set_delay_threshold(Duration::from_millis(12));
        assert_eq!(options.byte_threshold(), 1_234_u32);
        assert_eq!(options.message_count_threshold(), 123_u32);
        assert_eq!(options.delay_threshold(), Duration::from_millis(12));
    }

    #[test]
    fn defaults() {
        let options = BatchingOptions::default();
        assert_eq!(options.message_count_threshold(), 10);
        assert_eq!(options.byte_threshold(), 1024);
        assert_eq!(options.delay_threshold(), Duration::from_secs(1));
        assert_eq!(options.clone().clamp(), options);
    }

    #[test]
    fn clamp() {
        let options = BatchingOptions::new()
            .set_message_count_threshold(MAX_MESSAGES + 1)
            .set_byte_threshold(u32::MAX)
            .set_delay_threshold(MAX_DELAY * 2)
            .clamp();
        assert_eq!(options.message_count_threshold(), MAX_MESSAGES);
        assert_eq!(options.byte_threshold(), MAX_BYTES);
        assert_eq!(options.delay_threshold(), MAX_DELAY);

        let options = BatchingOptions::new()
            .set_message_count_threshold(0_u32)
            .set_byte_threshold(0_u32)
            .clamp();
        assert_eq!(options.message_count_threshold(), 1);
        assert_eq!(options.byte_threshold(), 1);
    }
}
