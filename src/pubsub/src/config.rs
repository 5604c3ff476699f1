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

//! Load publisher and subscriber settings from JSON.
//!
//! # Example
//! ```
//! # use pubsub_core::config::Config;
//! # fn sample() -> anyhow::Result<()> {
//! let config = Config::from_json(r#"{"maxMessages": 100, "maxLatency": 0.05}"#)?;
//! let options = config.batching_options();
//! assert_eq!(options.message_count_threshold(), 100);
//! # Ok(()) }
//! ```

use crate::publisher::BatchingOptions;
use crate::subscriber::{FlowControlOptions, SubscriberBuilder};
use std::time::Duration;

/// The errors returned when loading a [Config].
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("cannot parse the configuration: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// The recognized configuration keys.
///
/// Absent keys keep the library defaults.
#[serde_with::serde_as]
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
#[non_exhaustive]
pub struct Config {
    /// Publish a batch once it holds this many messages.
    pub max_messages: Option<u32>,
    /// Publish a batch once it holds this many bytes.
    pub max_bytes: Option<u32>,
    /// Publish a batch once its first message waited this long, in seconds.
    #[serde_as(as = "Option<serde_with::DurationSecondsWithFrac<f64>>")]
    pub max_latency: Option<Duration>,
    /// The maximum number of messages handed to the application at once.
    pub flow_control_max_messages: Option<u64>,
    /// The maximum bytes of messages handed to the application at once.
    pub flow_control_max_bytes: Option<u64>,
    pub ack_deadline_seconds: Option<i32>,
    /// How long to wait for a subscription to stop, absent waits forever.
    #[serde_as(as = "Option<serde_with::DurationSecondsWithFrac<f64>>")]
    pub stream_timeout_seconds: Option<Duration>,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_messages == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "maxMessages",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_bytes == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "maxBytes",
                reason: "must be greater than zero".to_string(),
            });
        }
        let invalid_deadline = self
            .ack_deadline_seconds
            .filter(|v| !(10..=600).contains(v));
        if let Some(v) = invalid_deadline {
            return Err(ConfigError::InvalidValue {
                field: "ackDeadlineSeconds",
                reason: format!("{v} is outside the [10, 600] range"),
            });
        }
        Ok(())
    }

    /// The publisher batching options, starting from the defaults.
    pub fn batching_options(&self) -> BatchingOptions {
        let mut options = BatchingOptions::default();
        if let Some(v) = self.max_messages {
            options = options.set_message_count_threshold(v);
        }
        if let Some(v) = self.max_bytes {
            options = options.set_byte_threshold(v);
        }
        if let Some(v) = self.max_latency {
            options = options.set_delay_threshold(v);
        }
        options
    }

    /// The subscriber flow control options, starting from the defaults.
    pub fn flow_control_options(&self) -> FlowControlOptions {
        let mut options = FlowControlOptions::default();
        if let Some(v) = self.flow_control_max_messages {
            options = options.set_max_outstanding_messages(v);
        }
        if let Some(v) = self.flow_control_max_bytes {
            options = options.set_max_outstanding_bytes(v);
        }
        options
    }

    /// Applies the subscriber settings to `builder`.
    pub fn configure_subscriber(&self, builder: SubscriberBuilder) -> SubscriberBuilder {
        let mut builder = builder.with_flow_control(self.flow_control_options());
        if let Some(v) = self.ack_deadline_seconds {
            builder = builder.set_ack_deadline_seconds(v);
        }
        if let Some(v) = self.stream_timeout_seconds {
            builder = builder.set_stream_timeout(v);
        }
        builder
    }
}
