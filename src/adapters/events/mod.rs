//! Broker adapters.
//!
//! Adapters implement the transport ports for different environments:
//!
//! - `InMemoryBroker` - Partitioned in-process log for tests and local runs
//! - `RedisStreamBroker` - Redis Streams, one stream per topic partition
//! - `BrokerDeadLetterSink` - Dead letters republished to `<topic><suffix>`

mod broker_dead_letter_sink;
mod in_memory_broker;
mod redis_stream_broker;

pub use broker_dead_letter_sink::BrokerDeadLetterSink;
pub use in_memory_broker::InMemoryBroker;
pub use redis_stream_broker::RedisStreamBroker;
