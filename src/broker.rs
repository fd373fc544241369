//! Broker connection and topology.
//!
//! One AMQP connection and one channel per process. Queues are durable and
//! every publish is persistent; the sequence queue dead-letters rejected
//! messages into its `.dlq` companion through the default exchange.
//!
//! Publishers and consumers share the process's single channel; the channel
//! is never handed across concurrency boundaries because each binary drives
//! exactly one cooperative loop.

use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

use crate::error::Result;

/// The single queue used by the pipeline.
pub const SEQUENCE_TOPIC: &str = "lead_sequence_steps";

/// Header carrying the worker's redelivery count. Absent means zero.
pub const RETRY_HEADER: &str = "x-retries";

/// AMQP delivery mode 2: persist messages to disk.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Name of the dead-letter companion queue for a topic.
pub fn dlq_name(topic: &str) -> String {
    format!("{}.dlq", topic)
}

/// Process-wide broker handle: one connection, one channel.
pub struct Broker {
    // Held so the channel's connection is not dropped underneath it.
    _connection: Connection,
    channel: Channel,
}

impl Broker {
    /// Connect and open the process channel with prefetch 1.
    pub async fn connect(url: &str) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel.basic_qos(1, BasicQosOptions::default()).await?;
        Ok(Self {
            _connection: connection,
            channel,
        })
    }

    /// Declare the durable queue for `topic` plus its dead-letter companion.
    /// Rejected-without-requeue messages land in the companion via the
    /// default exchange.
    pub async fn declare_topology(&self, topic: &str) -> Result<()> {
        fn durable() -> QueueDeclareOptions {
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            }
        }

        self.channel
            .queue_declare(&dlq_name(topic), durable(), FieldTable::default())
            .await?;

        let mut arguments = FieldTable::default();
        arguments.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(LongString::from("")),
        );
        arguments.insert(
            ShortString::from("x-dead-letter-routing-key"),
            AMQPValue::LongString(LongString::from(dlq_name(topic))),
        );
        self.channel
            .queue_declare(topic, durable(), arguments)
            .await?;

        tracing::debug!(topic, dlq = %dlq_name(topic), "declared broker topology");
        Ok(())
    }

    /// Publish a persistent message to `topic` through the default exchange.
    /// `retries` stamps the redelivery-count header when present.
    pub async fn publish(&self, topic: &str, payload: &[u8], retries: Option<u32>) -> Result<()> {
        let mut properties = BasicProperties::default()
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
            .with_content_type(ShortString::from("application/json"));

        if let Some(count) = retries {
            let mut headers = FieldTable::default();
            headers.insert(
                ShortString::from(RETRY_HEADER),
                AMQPValue::LongInt(count as i32),
            );
            properties = properties.with_headers(headers);
        }

        self.channel
            .basic_publish(
                "",
                topic,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?
            .await?;
        Ok(())
    }

    /// Open a manually-acknowledged consumer on `topic`.
    pub async fn consumer(&self, topic: &str, tag: &str) -> Result<lapin::Consumer> {
        let consumer = self
            .channel
            .basic_consume(
                topic,
                tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(consumer)
    }

    /// Close the channel and connection during shutdown.
    pub async fn close(&self) -> Result<()> {
        self.channel.close(200, "shutting down").await?;
        Ok(())
    }
}

/// Read the redelivery count from message properties. Absent or
/// non-integer headers count as zero.
pub fn retry_count(properties: &BasicProperties) -> u32 {
    let Some(headers) = properties.headers().as_ref() else {
        return 0;
    };
    let Some((_, value)) = headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == RETRY_HEADER)
    else {
        return 0;
    };
    match value {
        AMQPValue::ShortShortInt(v) => (*v).max(0) as u32,
        AMQPValue::ShortShortUInt(v) => *v as u32,
        AMQPValue::ShortInt(v) => (*v).max(0) as u32,
        AMQPValue::ShortUInt(v) => *v as u32,
        AMQPValue::LongInt(v) => (*v).max(0) as u32,
        AMQPValue::LongUInt(v) => *v,
        AMQPValue::LongLongInt(v) => (*v).max(0) as u32,
        _ => 0,
    }
}
