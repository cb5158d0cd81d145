//! Redis Streams implementation of the MessageBroker port.
//!
//! Layout per `(topic, partition)`, all under one hash tag so a partition's
//! keys share a cluster slot:
//!
//! | Key | Type | Purpose |
//! |-----|------|---------|
//! | `{prefix}:{topic:p}:log` | stream | Entries; entry id `N-0` holds offset `N-1` |
//! | `{prefix}:{topic:p}:seq` | string | Next offset counter |
//! | `{prefix}:{topic:p}:group:{g}` | string | Committed offset of group `g` |
//!
//! Offsets are assigned and appended by one Lua script, so concurrent
//! producers cannot interleave counter and append.
//!
//! Each entry stores its body in the `record` field. Raw entries written by
//! `send_raw` also carry a `headers` field (a JSON object).

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamRangeReply;
use redis::{AsyncCommands, RedisError, Script};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use crate::domain::foundation::partition_for;
use crate::ports::{
    decode_entry, BrokerRecord, DeliveryReceipt, Headers, MessageBroker, Polled, PublishError,
    TransportError, UndecodableRecord,
};

const APPEND_SCRIPT: &str = r#"
local offset = redis.call('INCR', KEYS[2]) - 1
redis.call('XADD', KEYS[1], tostring(offset + 1) .. '-0', unpack(ARGV))
return offset
"#;

const RECORD_FIELD: &str = "record";
const HEADERS_FIELD: &str = "headers";

/// Redis Streams broker for multi-process deployments.
#[derive(Clone)]
pub struct RedisStreamBroker {
    conn: MultiplexedConnection,
    prefix: String,
    default_partitions: u32,
    partitions: HashMap<String, u32>,
    timeout: Duration,
}

impl RedisStreamBroker {
    /// Create a broker on an existing connection.
    pub fn new(conn: MultiplexedConnection, default_partitions: u32, timeout: Duration) -> Self {
        Self {
            conn,
            prefix: "pipeline".to_string(),
            default_partitions: default_partitions.max(1),
            partitions: HashMap::new(),
            timeout,
        }
    }

    /// Connect to Redis at `url`.
    pub async fn connect(
        url: &str,
        default_partitions: u32,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = redis::Client::open(url).map_err(|e| TransportError::Unavailable(e.to_string()))?;
        let conn = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| TransportError::Unavailable(format!("connect to {} timed out", url)))?
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Ok(Self::new(conn, default_partitions, timeout))
    }

    /// Set the key prefix (default `pipeline`).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Pin the partition count of a topic.
    pub fn with_topic_partitions(mut self, topic: impl Into<String>, partitions: u32) -> Self {
        self.partitions.insert(topic.into(), partitions.max(1));
        self
    }

    fn partitions_of(&self, topic: &str) -> u32 {
        self.partitions
            .get(topic)
            .copied()
            .unwrap_or(self.default_partitions)
    }

    fn slot(&self, topic: &str, partition: u32) -> String {
        format!("{}:{{{}:{}}}", self.prefix, topic, partition)
    }

    fn log_key(&self, topic: &str, partition: u32) -> String {
        format!("{}:log", self.slot(topic, partition))
    }

    fn seq_key(&self, topic: &str, partition: u32) -> String {
        format!("{}:seq", self.slot(topic, partition))
    }

    fn group_key(&self, topic: &str, group: &str, partition: u32) -> String {
        format!("{}:group:{}", self.slot(topic, partition), group)
    }

    /// Runs a Redis call under the configured timeout.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, RedisError>>,
    ) -> Result<T, RedisFailure> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RedisFailure::from(e)),
            Err(_) => Err(RedisFailure::Unreachable(format!(
                "redis call timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    /// Appends `fields` (name/value pairs) and returns the assigned offset.
    async fn append(
        &self,
        topic: &str,
        partition: u32,
        fields: &[(&str, &str)],
    ) -> Result<DeliveryReceipt, PublishError> {
        let mut conn = self.conn.clone();
        let script = Script::new(APPEND_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(self.log_key(topic, partition))
            .key(self.seq_key(topic, partition));
        for (name, value) in fields {
            invocation.arg(*name).arg(*value);
        }

        let offset: i64 = self
            .bounded(invocation.invoke_async(&mut conn))
            .await
            .map_err(|e| e.into_publish_error(topic))?;

        let offset = u64::try_from(offset).map_err(|_| PublishError::Rejected {
            topic: topic.to_string(),
            reason: format!("negative offset {} returned", offset),
        })?;

        tracing::debug!(topic, partition, offset, "Entry appended to stream");

        Ok(DeliveryReceipt {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }

    fn check_partition(&self, topic: &str, partition: u32) -> Result<(), TransportError> {
        if partition >= self.partitions_of(topic) {
            return Err(TransportError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            });
        }
        Ok(())
    }
}

/// Redis failures split by whether the server was reachable.
enum RedisFailure {
    Unreachable(String),
    Failed(String),
}

impl From<RedisError> for RedisFailure {
    fn from(e: RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
            RedisFailure::Unreachable(e.to_string())
        } else {
            RedisFailure::Failed(e.to_string())
        }
    }
}

impl RedisFailure {
    fn into_publish_error(self, topic: &str) -> PublishError {
        match self {
            RedisFailure::Unreachable(reason) => PublishError::Unavailable(reason),
            RedisFailure::Failed(reason) => PublishError::Rejected {
                topic: topic.to_string(),
                reason,
            },
        }
    }

    fn into_transport_error(self) -> TransportError {
        match self {
            RedisFailure::Unreachable(reason) | RedisFailure::Failed(reason) => {
                TransportError::Unavailable(reason)
            }
        }
    }
}

/// Stream entry id `N-0` holds offset `N-1`.
fn offset_from_entry_id(id: &str) -> Option<u64> {
    let (ms, _) = id.split_once('-')?;
    ms.parse::<u64>().ok()?.checked_sub(1)
}

#[async_trait]
impl MessageBroker for RedisStreamBroker {
    async fn send(&self, topic: &str, record: BrokerRecord) -> Result<DeliveryReceipt, PublishError> {
        let partition = partition_for(&record.envelope.partition_key, self.partitions_of(topic));
        let body = serde_json::to_string(&record).map_err(|e| PublishError::Encoding(e.to_string()))?;

        self.append(topic, partition, &[(RECORD_FIELD, body.as_str())]).await
    }

    async fn send_raw(
        &self,
        topic: &str,
        partition: u32,
        body: &str,
        headers: &Headers,
    ) -> Result<DeliveryReceipt, PublishError> {
        let partition = partition % self.partitions_of(topic);
        let headers =
            serde_json::to_string(headers).map_err(|e| PublishError::Encoding(e.to_string()))?;

        self.append(
            topic,
            partition,
            &[(RECORD_FIELD, body), (HEADERS_FIELD, headers.as_str())],
        )
        .await
    }

    async fn partition_count(&self, topic: &str) -> Result<u32, TransportError> {
        Ok(self.partitions_of(topic))
    }

    async fn poll(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
        max: usize,
    ) -> Result<Vec<Polled>, TransportError> {
        self.check_partition(topic, partition)?;
        let mut conn = self.conn.clone();

        let committed: Option<u64> = self
            .bounded(conn.get(self.group_key(topic, group, partition)))
            .await
            .map_err(RedisFailure::into_transport_error)?;
        let start = committed.unwrap_or(0);

        let reply: StreamRangeReply = self
            .bounded(conn.xrange_count(
                self.log_key(topic, partition),
                format!("{}-0", start + 1),
                "+",
                max,
            ))
            .await
            .map_err(RedisFailure::into_transport_error)?;

        reply
            .ids
            .into_iter()
            .map(|entry| {
                // Without an offset the entry cannot be committed past.
                let offset = offset_from_entry_id(&entry.id).ok_or_else(|| {
                    TransportError::CorruptEntry {
                        topic: topic.to_string(),
                        partition,
                        reason: format!("unexpected entry id {}", entry.id),
                    }
                })?;
                let headers: Headers = entry
                    .get::<String>(HEADERS_FIELD)
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or_default();

                Ok(match entry.get::<String>(RECORD_FIELD) {
                    Some(body) => decode_entry(topic, partition, offset, &body, headers),
                    None => Polled::Undecodable(UndecodableRecord {
                        topic: topic.to_string(),
                        partition,
                        offset,
                        body: String::new(),
                        headers,
                        reason: "missing record field".to_string(),
                    }),
                })
            })
            .collect()
    }

    async fn commit(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
        next_offset: u64,
    ) -> Result<(), TransportError> {
        self.check_partition(topic, partition)?;
        let mut conn = self.conn.clone();

        self.bounded(conn.set::<_, _, ()>(self.group_key(topic, group, partition), next_offset))
            .await
            .map_err(RedisFailure::into_transport_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_ids_map_to_zero_based_offsets() {
        assert_eq!(offset_from_entry_id("1-0"), Some(0));
        assert_eq!(offset_from_entry_id("42-0"), Some(41));
    }

    #[test]
    fn malformed_entry_ids_are_rejected() {
        assert_eq!(offset_from_entry_id("0-0"), None);
        assert_eq!(offset_from_entry_id("abc-0"), None);
        assert_eq!(offset_from_entry_id("17"), None);
    }

    #[test]
    fn append_script_writes_offset_plus_one_as_entry_id() {
        assert!(APPEND_SCRIPT.contains("INCR"));
        assert!(APPEND_SCRIPT.contains("tostring(offset + 1) .. '-0', unpack(ARGV)"));
    }
}
