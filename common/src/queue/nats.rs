// NATS JetStream channel: fetch one message per transaction, ack on commit, nak on rollback

use crate::errors::QueueError;
use crate::models::Record;
use crate::queue::channel::{Channel, Transaction, TxnState};
use async_nats::jetstream::{
    consumer::PullConsumer,
    stream::{Config as StreamConfig, RetentionPolicy, Stream},
    AckKind, Context as JetStreamContext, Message,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// NATS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL (e.g., "nats://localhost:4222")
    pub url: String,
    /// Stream holding records for the sink
    pub stream_name: String,
    /// Subject filter bound to the stream
    pub subject: String,
    /// Maximum age for messages in the stream (in seconds)
    pub max_age_seconds: u64,
    /// Maximum number of messages to retain
    pub max_messages: i64,
    /// Durable consumer name
    pub consumer_name: String,
    /// Maximum number of delivery attempts
    pub max_deliver: i64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream_name: "RECORDS".to_string(),
            subject: "records.>".to_string(),
            max_age_seconds: 86400, // 24 hours
            max_messages: 1_000_000,
            consumer_name: "sftp-sink".to_string(),
            max_deliver: -1,
        }
    }
}

/// NATS JetStream client
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: JetStreamContext,
    config: NatsConfig,
}

impl NatsClient {
    /// Create a new NATS client and connect to the server
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn new(config: NatsConfig) -> Result<Self, QueueError> {
        info!("Connecting to NATS server");

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS server successfully");

        let jetstream = async_nats::jetstream::new(client.clone());

        Ok(Self {
            client,
            jetstream,
            config,
        })
    }

    /// Create or get the record stream with work-queue retention
    #[instrument(skip(self))]
    pub async fn initialize_stream(&self) -> Result<Stream, QueueError> {
        info!(
            stream_name = %self.config.stream_name,
            "Initializing JetStream stream"
        );

        let stream_config = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects: vec![self.config.subject.clone()],
            retention: RetentionPolicy::WorkQueue, // Messages deleted after acknowledgment
            max_age: Duration::from_secs(self.config.max_age_seconds),
            max_messages: self.config.max_messages,
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| QueueError::StreamCreation(format!("Failed to create stream: {}", e)))
    }

    /// Create or get the durable pull consumer
    #[instrument(skip(self))]
    pub async fn get_or_create_consumer(&self) -> Result<PullConsumer, QueueError> {
        let stream = self.initialize_stream().await?;

        let consumer_config = async_nats::jetstream::consumer::pull::Config {
            durable_name: Some(self.config.consumer_name.clone()),
            ack_policy: async_nats::jetstream::consumer::AckPolicy::Explicit,
            max_deliver: self.config.max_deliver,
            ack_wait: Duration::from_secs(300),
            ..Default::default()
        };

        let consumer = stream
            .get_or_create_consumer(&self.config.consumer_name, consumer_config)
            .await
            .map_err(|e| {
                QueueError::ConsumerCreation(format!("Failed to create consumer: {}", e))
            })?;

        info!(
            consumer_name = %self.config.consumer_name,
            "Consumer created successfully"
        );

        Ok(consumer)
    }

    /// Get the NATS client
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Get the configuration
    pub fn config(&self) -> &NatsConfig {
        &self.config
    }
}

/// Channel backed by a JetStream durable pull consumer
pub struct NatsChannel {
    consumer: PullConsumer,
    fetch_expiry: Duration,
}

impl NatsChannel {
    pub async fn connect(client: &NatsClient, fetch_expiry: Duration) -> Result<Self, QueueError> {
        let consumer = client.get_or_create_consumer().await?;
        Ok(Self {
            consumer,
            fetch_expiry,
        })
    }
}

#[async_trait]
impl Channel for NatsChannel {
    type Txn = NatsTransaction;

    async fn begin(&self) -> Result<NatsTransaction, QueueError> {
        Ok(NatsTransaction {
            consumer: self.consumer.clone(),
            fetch_expiry: self.fetch_expiry,
            taken: Vec::new(),
            state: TxnState::Open,
        })
    }
}

pub struct NatsTransaction {
    consumer: PullConsumer,
    fetch_expiry: Duration,
    taken: Vec<Message>,
    state: TxnState,
}

impl NatsTransaction {
    async fn nak_taken(&mut self) -> Result<(), QueueError> {
        for message in self.taken.drain(..) {
            message.ack_with(AckKind::Nak(None)).await.map_err(|e| {
                QueueError::AckFailed(format!("Failed to negative acknowledge message: {}", e))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for NatsTransaction {
    async fn take(&mut self) -> Result<Option<Record>, QueueError> {
        self.state.ensure_open()?;

        let mut batch = self
            .consumer
            .fetch()
            .max_messages(1)
            .expires(self.fetch_expiry)
            .messages()
            .await
            .map_err(|e| QueueError::ConsumeFailed(format!("Failed to fetch message: {}", e)))?;

        match batch.next().await {
            Some(Ok(message)) => {
                let record = Record::new(message.payload.to_vec());
                debug!(subject = %message.subject, "Fetched message");
                self.taken.push(message);
                Ok(Some(record))
            }
            Some(Err(e)) => Err(QueueError::ConsumeFailed(format!(
                "Error receiving message: {}",
                e
            ))),
            None => Ok(None),
        }
    }

    async fn commit(&mut self) -> Result<(), QueueError> {
        self.state.ensure_open()?;
        for message in self.taken.drain(..) {
            message.ack().await.map_err(|e| {
                QueueError::AckFailed(format!("Failed to acknowledge message: {}", e))
            })?;
        }
        self.state = TxnState::Committed;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), QueueError> {
        self.state.ensure_open()?;
        self.state = TxnState::RolledBack;
        self.nak_taken().await
    }

    async fn close(&mut self) {
        if self.state == TxnState::Open {
            if let Err(e) = self.nak_taken().await {
                // Unacked messages are redelivered after ack_wait anyway
                warn!(error = %e, "Failed to release unfinished transaction");
            }
        }
        self.state = TxnState::Closed;
    }
}
