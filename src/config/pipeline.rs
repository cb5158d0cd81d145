//! Pipeline configuration (topic, consumer group, polling)

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::application::pipeline::DispatcherConfig;

/// Topic and consumer settings
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Topic product events are published to and consumed from
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Consumer group owning the committed offsets
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Partitions of the topic
    #[serde(default = "default_partitions")]
    pub partitions: u32,

    /// Appended to a topic name to form its dead-letter topic
    #[serde(default = "default_dead_letter_suffix")]
    pub dead_letter_suffix: String,

    /// Records fetched per poll
    #[serde(default = "default_poll_batch_size")]
    pub poll_batch_size: usize,

    /// Pause after an empty poll, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl PipelineConfig {
    /// Get poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Name of the dead-letter topic for the configured topic
    pub fn dead_letter_topic(&self) -> String {
        format!("{}{}", self.topic, self.dead_letter_suffix)
    }

    /// Dispatcher settings derived from this section
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            poll_batch_size: self.poll_batch_size,
            poll_interval: self.poll_interval(),
        }
    }

    /// Validate pipeline configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.topic.trim().is_empty() {
            return Err(ValidationError::MissingRequired("PIPELINE_TOPIC"));
        }
        if self.group_id.trim().is_empty() {
            return Err(ValidationError::MissingRequired("PIPELINE_GROUP_ID"));
        }
        if self.dead_letter_suffix.is_empty() {
            return Err(ValidationError::MissingRequired("PIPELINE_DEAD_LETTER_SUFFIX"));
        }
        if self.partitions == 0 || self.partitions > 1024 {
            return Err(ValidationError::InvalidPartitionCount);
        }
        if self.poll_batch_size == 0 {
            return Err(ValidationError::InvalidBatchSize);
        }
        if self.poll_interval_ms == 0 {
            return Err(ValidationError::InvalidTimeout("pipeline.poll_interval_ms"));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            group_id: default_group_id(),
            partitions: default_partitions(),
            dead_letter_suffix: default_dead_letter_suffix(),
            poll_batch_size: default_poll_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_topic() -> String {
    "product-created-events-topic".to_string()
}

fn default_group_id() -> String {
    "product-created-events".to_string()
}

fn default_partitions() -> u32 {
    3
}

fn default_dead_letter_suffix() -> String {
    "-dlt".to_string()
}

fn default_poll_batch_size() -> usize {
    32
}

fn default_poll_interval_ms() -> u64 {
    200
}
