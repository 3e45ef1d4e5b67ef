use std::{path::PathBuf, sync::Arc};

use anyhow::{Error, Result};
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};

use crate::{clients::rbmq::RabbitMqClient, models::message::DlqMessage};

/// Routes permanently-failed messages to the durable failed queue. When
/// the broker will not confirm the publish, the envelope is appended to a
/// local durable fallback log instead; silent loss of a dead letter
/// defeats the purpose of keeping one.
pub struct DeadLetterPublisher {
    rbmq: Arc<RabbitMqClient>,
    fallback_path: PathBuf,
}

impl DeadLetterPublisher {
    pub fn new(rbmq: Arc<RabbitMqClient>, fallback_path: PathBuf) -> Self {
        Self {
            rbmq,
            fallback_path,
        }
    }

    pub async fn publish(&self, envelope: &DlqMessage) {
        match self.rbmq.publish_to_dlq(envelope).await {
            Ok(()) => {
                warn!(
                    request_id = %envelope.original_message.request_id,
                    attempts = envelope.attempts,
                    "Message routed to dead-letter queue"
                );
            }
            Err(e) => {
                error!(
                    request_id = %envelope.original_message.request_id,
                    error = %e,
                    "Dead-letter publish unconfirmed, writing fallback entry"
                );

                if let Err(write_err) = self.append_fallback(envelope).await {
                    error!(
                        request_id = %envelope.original_message.request_id,
                        error = %write_err,
                        "Dead-letter fallback write failed, envelope lost"
                    );
                }
            }
        }
    }

    async fn append_fallback(&self, envelope: &DlqMessage) -> Result<(), Error> {
        let mut line = serde_json::to_vec(envelope)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.fallback_path)
            .await?;

        file.write_all(&line).await?;
        file.sync_all().await?;

        Ok(())
    }
}
