use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable},
};
use tracing::info;

use crate::{
    config::Config,
    models::message::{DlqMessage, PushMessage},
};

pub struct RabbitMqClient {
    channel: Channel,
    push_queue_name: String,
    retry_queue_name: String,
    failed_queue_name: String,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        info!("RabbitMQ connection established");

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        // Republish-before-ack relies on broker confirmation.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to enable publisher confirms: {}", e))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        // Work queue dead-letters broker-side drops into the failed queue.
        let mut push_queue_args = FieldTable::default();
        push_queue_args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString("".into()),
        );
        push_queue_args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(config.failed_queue_name.as_str().into()),
        );

        channel
            .queue_declare(
                &config.push_queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                push_queue_args,
            )
            .await
            .map_err(|e| anyhow!("Failed to declare push queue: {}", e))?;

        // Holding queue for delayed redelivery: messages sit here with a
        // per-message TTL and dead-letter back onto the work queue.
        let mut retry_queue_args = FieldTable::default();
        retry_queue_args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString("".into()),
        );
        retry_queue_args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(config.push_queue_name.as_str().into()),
        );

        channel
            .queue_declare(
                &config.retry_queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                retry_queue_args,
            )
            .await
            .map_err(|e| anyhow!("Failed to declare retry queue: {}", e))?;

        // The failed queue carries no dead-letter arguments of its own:
        // nothing it holds may ever be redirected again.
        channel
            .queue_declare(
                &config.failed_queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare failed queue: {}", e))?;

        info!(
            push_queue = %config.push_queue_name,
            retry_queue = %config.retry_queue_name,
            failed_queue = %config.failed_queue_name,
            "Queues declared"
        );

        Ok(Self {
            channel,
            push_queue_name: config.push_queue_name.clone(),
            retry_queue_name: config.retry_queue_name.clone(),
            failed_queue_name: config.failed_queue_name.clone(),
        })
    }

    pub async fn create_consumer(&self) -> Result<Consumer, Error> {
        let consumer = self
            .channel
            .basic_consume(
                &self.push_queue_name,
                "push_worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        info!(queue = %self.push_queue_name, "Consumer created for queue");

        Ok(consumer)
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))?;

        Ok(())
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| anyhow!("Failed to reject message: {}", e))?;

        Ok(())
    }

    /// Publish a retry copy onto the holding queue with the incremented
    /// attempt count and the backoff delay as per-message expiration.
    /// Returns only once the broker confirmed the publish.
    pub async fn publish_retry(
        &self,
        message: &PushMessage,
        attempts: u32,
        delay: Duration,
    ) -> Result<(), Error> {
        let payload = serde_json::to_vec(message)?;

        let mut headers = FieldTable::default();
        headers.insert("attempts".into(), AMQPValue::LongInt(attempts as i32));

        let properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_headers(headers)
            .with_expiration(delay.as_millis().to_string().into());

        let confirmation = self
            .channel
            .basic_publish(
                "",
                &self.retry_queue_name,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| anyhow!("Failed to publish retry message: {}", e))?
            .await
            .map_err(|e| anyhow!("Retry publish confirmation failed: {}", e))?;

        ensure_confirmed(confirmation, "retry")
    }

    pub async fn publish_to_dlq(&self, message: &DlqMessage) -> Result<(), Error> {
        let payload = serde_json::to_vec(message)?;

        let confirmation = self
            .channel
            .basic_publish(
                "",
                &self.failed_queue_name,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message to dlq: {}", e))?
            .await
            .map_err(|e| anyhow!("Dlq publish confirmation failed: {}", e))?;

        ensure_confirmed(confirmation, "dlq")
    }
}

fn ensure_confirmed(confirmation: Confirmation, target: &str) -> Result<(), Error> {
    match confirmation {
        Confirmation::Nack(_) => Err(anyhow!("Broker rejected {} publish", target)),
        _ => Ok(()),
    }
}
