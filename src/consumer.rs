use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use futures_util::StreamExt;
use lapin::{BasicProperties, message::Delivery, types::AMQPValue};
use tracing::{error, info, warn};

use crate::{
    clients::{circuit_breaker::CircuitBreaker, dlq::DeadLetterPublisher, rbmq::RabbitMqClient},
    error::DeliveryError,
    models::{
        message::{DlqMessage, PushMessage},
        record::{NotificationRecord, NotificationStatus},
        retry::RetryConfig,
        validation::validate_message,
    },
};

#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Dispatch one rendered notification; returns the provider message id.
    async fn send(&self, message: &PushMessage) -> Result<String, DeliveryError>;
}

/// Outcome of the atomic attempt upsert. `AlreadyTerminal` is the
/// cross-instance dedup backstop: the conditional write refused to rewind
/// a record that already reached `sent` or `failed`.
#[derive(Debug, Clone, Copy)]
pub enum AttemptOutcome {
    Accepted { attempts: u32 },
    AlreadyTerminal { status: NotificationStatus },
}

#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    async fn begin_attempt(&self, message: &PushMessage, attempts: u32)
    -> Result<AttemptOutcome, Error>;

    async fn status_of(&self, request_id: &str) -> Result<Option<NotificationStatus>, Error>;

    async fn mark_sent(&self, request_id: &str, attempts: u32) -> Result<(), Error>;

    async fn mark_failed(&self, request_id: &str, attempts: u32, error: &str)
    -> Result<(), Error>;

    async fn fetch(&self, request_id: &str) -> Result<Option<NotificationRecord>, Error>;
}

#[async_trait]
pub trait DedupCache: Send + Sync {
    async fn is_sent(&self, request_id: &str) -> Result<bool, Error>;

    async fn mark_sent(&self, request_id: &str) -> Result<(), Error>;
}

/// What the broker loop must do with the current delivery. Exactly one
/// settlement per received message: a terminal ack, or republish-then-ack.
#[derive(Debug)]
pub enum Disposition {
    Discard { reason: String },
    Duplicate,
    Delivered,
    Retry {
        message: PushMessage,
        next_attempts: u32,
        delay: Duration,
    },
    DeadLetter { envelope: DlqMessage },
}

pub struct DeliveryConsumer {
    gateway: Arc<dyn PushGateway>,
    ledger: Arc<dyn DeliveryLedger>,
    cache: Arc<dyn DedupCache>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
}

impl DeliveryConsumer {
    pub fn new(
        gateway: Arc<dyn PushGateway>,
        ledger: Arc<dyn DeliveryLedger>,
        cache: Arc<dyn DedupCache>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            gateway,
            ledger,
            cache,
            breaker,
            retry,
        }
    }

    /// Full validate -> dedupe -> record -> deliver sequence for one
    /// message. Broker-free: the caller settles the returned disposition.
    pub async fn process(&self, payload: &[u8], header_attempts: u32) -> Disposition {
        let message = match serde_json::from_slice::<PushMessage>(payload) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Discarding malformed message");
                return Disposition::Discard {
                    reason: format!("Malformed message: {}", e),
                };
            }
        };

        if let Err(e) = validate_message(&message) {
            error!(request_id = %message.request_id, error = %e, "Discarding invalid message");
            return Disposition::Discard {
                reason: e.to_string(),
            };
        }

        let request_id = message.request_id.clone();
        info!(request_id = %request_id, attempts = header_attempts, "Message received");

        if let Some(disposition) = self.check_duplicate(&request_id).await {
            return disposition;
        }

        let attempt_outcome = self
            .ledger
            .begin_attempt(&message, header_attempts.max(1))
            .await;

        let attempts = match attempt_outcome {
            Ok(AttemptOutcome::Accepted { attempts }) => attempts,
            Ok(AttemptOutcome::AlreadyTerminal { status }) => {
                info!(request_id = %request_id, status = %status, "Record already terminal, skipping");
                if status == NotificationStatus::Sent {
                    self.backfill_cache(&request_id).await;
                }
                return Disposition::Duplicate;
            }
            Err(e) => {
                error!(request_id = %request_id, error = %e, "Ledger upsert failed");
                return self
                    .retry_or_dead_letter(
                        message,
                        header_attempts.max(1),
                        format!("Ledger upsert failed: {}", e),
                    )
                    .await;
            }
        };

        // A redelivery that slipped past max_retries never reaches the
        // gateway, keeping the invocation count bounded.
        if attempts > self.retry.max_attempts {
            return self
                .fail_and_dead_letter(message, attempts, "Retry budget exhausted".to_string())
                .await;
        }

        let outcome = self.breaker.call(|| self.gateway.send(&message)).await;

        match outcome {
            Ok(message_id) => {
                info!(request_id = %request_id, message_id = %message_id, "Push delivered");

                // The ledger row already carries status=sent or will be
                // flagged below; a failed write here must never turn a
                // delivered notification into a retry.
                if let Err(e) = self.ledger.mark_sent(&request_id, attempts).await {
                    error!(
                        request_id = %request_id,
                        error = %e,
                        "Ledger write failed after successful send, record out of sync"
                    );
                }

                if let Err(e) = self.cache.mark_sent(&request_id).await {
                    warn!(request_id = %request_id, error = %e, "Dedup cache write failed");
                }

                Disposition::Delivered
            }
            Err(e) if e.is_permanent() => {
                warn!(request_id = %request_id, attempts, error = %e, "Push rejected permanently");
                self.fail_and_dead_letter(message, attempts, e.to_string()).await
            }
            Err(e) => {
                warn!(request_id = %request_id, attempts, error = %e, "Push delivery failed");
                self.retry_or_dead_letter(message, attempts, e.to_string()).await
            }
        }
    }

    /// Two-tier dedup: cache first, ledger second. Either layer failing is
    /// logged and treated as a miss, since the attempt upsert is the final
    /// arbiter anyway.
    async fn check_duplicate(&self, request_id: &str) -> Option<Disposition> {
        match self.cache.is_sent(request_id).await {
            Ok(true) => {
                info!(request_id = %request_id, "Skipped: already sent (cache)");
                return Some(Disposition::Duplicate);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Dedup cache read failed, checking ledger");
            }
        }

        match self.ledger.status_of(request_id).await {
            Ok(Some(NotificationStatus::Sent)) => {
                self.backfill_cache(request_id).await;
                info!(request_id = %request_id, "Skipped: already sent (ledger)");
                Some(Disposition::Duplicate)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Ledger status read failed, continuing");
                None
            }
        }
    }

    async fn backfill_cache(&self, request_id: &str) {
        if let Err(e) = self.cache.mark_sent(request_id).await {
            warn!(request_id = %request_id, error = %e, "Dedup cache backfill failed");
        }
    }

    async fn retry_or_dead_letter(
        &self,
        message: PushMessage,
        attempts: u32,
        error: String,
    ) -> Disposition {
        if attempts < self.retry.max_attempts {
            let delay = self.retry.delay(attempts);
            info!(
                request_id = %message.request_id,
                attempts,
                delay_ms = delay.as_millis() as u64,
                "Retry scheduled"
            );

            return Disposition::Retry {
                message,
                next_attempts: attempts + 1,
                delay,
            };
        }

        self.fail_and_dead_letter(message, attempts, error).await
    }

    async fn fail_and_dead_letter(
        &self,
        message: PushMessage,
        attempts: u32,
        error: String,
    ) -> Disposition {
        error!(
            request_id = %message.request_id,
            attempts,
            error = %error,
            "Delivery abandoned, routing to dead-letter queue"
        );

        if let Err(e) = self
            .ledger
            .mark_failed(&message.request_id, attempts, &error)
            .await
        {
            error!(
                request_id = %message.request_id,
                error = %e,
                "Ledger write failed while recording final failure"
            );
        }

        Disposition::DeadLetter {
            envelope: DlqMessage {
                original_message: message,
                error,
                attempts,
                failed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            },
        }
    }
}

/// Cooperative pull loop: one message in flight at a time, shutdown signal
/// checked between messages so the current delivery is drained first.
pub async fn run(
    consumer: &DeliveryConsumer,
    rbmq: &RabbitMqClient,
    dlq: &DeadLetterPublisher,
) -> Result<(), Error> {
    let mut deliveries = rbmq.create_consumer().await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Delivery consumer started");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping consumer");
                break;
            }
            delivery = deliveries.next() => {
                let Some(delivery) = delivery else {
                    warn!("Broker delivery channel closed");
                    break;
                };

                match delivery {
                    Ok(delivery) => handle_delivery(consumer, rbmq, dlq, delivery).await,
                    Err(e) => error!(error = %e, "Failed to receive delivery"),
                }
            }
        }
    }

    Ok(())
}

async fn handle_delivery(
    consumer: &DeliveryConsumer,
    rbmq: &RabbitMqClient,
    dlq: &DeadLetterPublisher,
    delivery: Delivery,
) {
    let attempts = attempts_from(&delivery.properties);
    let disposition = consumer.process(&delivery.data, attempts).await;

    if let Err(e) = settle(rbmq, dlq, &delivery, disposition).await {
        error!(error = %e, "Failed to settle delivery");
    }
}

async fn settle(
    rbmq: &RabbitMqClient,
    dlq: &DeadLetterPublisher,
    delivery: &Delivery,
    disposition: Disposition,
) -> Result<(), Error> {
    match disposition {
        Disposition::Discard { .. } | Disposition::Duplicate | Disposition::Delivered => {
            rbmq.acknowledge(delivery.delivery_tag).await
        }
        Disposition::Retry {
            message,
            next_attempts,
            delay,
        } => {
            // Republish must be confirmed before the original is acked; a
            // crash in between leaves the message on the queue instead of
            // losing it.
            match rbmq.publish_retry(&message, next_attempts, delay).await {
                Ok(()) => rbmq.acknowledge(delivery.delivery_tag).await,
                Err(e) => {
                    error!(
                        request_id = %message.request_id,
                        error = %e,
                        "Retry republish unconfirmed, returning message to broker"
                    );
                    rbmq.reject(delivery.delivery_tag, true).await
                }
            }
        }
        Disposition::DeadLetter { envelope } => {
            dlq.publish(&envelope).await;
            rbmq.acknowledge(delivery.delivery_tag).await
        }
    }
}

/// Attempt count carried as message-level metadata, defaulting to 1 on
/// first receipt.
pub fn attempts_from(properties: &BasicProperties) -> u32 {
    properties
        .headers()
        .as_ref()
        .and_then(|headers| {
            headers
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == "attempts")
                .map(|(_, value)| value)
        })
        .and_then(|value| match value {
            AMQPValue::ShortShortInt(n) => Some(i64::from(*n)),
            AMQPValue::ShortShortUInt(n) => Some(i64::from(*n)),
            AMQPValue::ShortInt(n) => Some(i64::from(*n)),
            AMQPValue::ShortUInt(n) => Some(i64::from(*n)),
            AMQPValue::LongInt(n) => Some(i64::from(*n)),
            AMQPValue::LongUInt(n) => Some(i64::from(*n)),
            AMQPValue::LongLongInt(n) => Some(*n),
            _ => None,
        })
        .filter(|n| *n > 0)
        .map(|n| n as u32)
        .unwrap_or(1)
}
