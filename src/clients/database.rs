use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};

use crate::{
    consumer::{AttemptOutcome, DeliveryLedger},
    models::{
        message::PushMessage,
        record::{NotificationRecord, NotificationStatus},
    },
};

const CHANNEL: &str = "push";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS notifications (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        request_id TEXT NOT NULL UNIQUE,
        recipient_id TEXT NOT NULL,
        device_token TEXT NOT NULL,
        channel TEXT NOT NULL,
        payload JSONB NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
";

pub struct DatabaseClient {
    client: Client,
}

impl DatabaseClient {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection terminated");
            }
        });

        client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| anyhow!("Failed to ensure notifications schema: {}", e))?;

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }
}

fn record_from_row(row: &Row) -> NotificationRecord {
    let status: String = row.get("status");
    let attempts: i32 = row.get("attempts");

    NotificationRecord {
        id: row.get("id"),
        request_id: row.get("request_id"),
        recipient_id: row.get("recipient_id"),
        device_token: row.get("device_token"),
        channel: row.get("channel"),
        payload: row.get("payload"),
        status: NotificationStatus::from_string(&status),
        attempts: attempts.max(0) as u32,
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl DeliveryLedger for DatabaseClient {
    /// Single conditional write: inserts the record as `processing`, or
    /// bumps `attempts` on an existing one, refusing to touch rows that
    /// already reached a terminal status. Safe under concurrent consumer
    /// instances racing on the same request_id.
    async fn begin_attempt(
        &self,
        message: &PushMessage,
        attempts: u32,
    ) -> Result<AttemptOutcome, Error> {
        let payload = serde_json::to_value(&message.payload)?;

        let row = self
            .client
            .query_opt(
                "INSERT INTO notifications \
                     (request_id, recipient_id, device_token, channel, payload, status, attempts) \
                 VALUES ($1, $2, $3, $4, $5, 'processing', $6) \
                 ON CONFLICT (request_id) DO UPDATE SET \
                     status = 'processing', \
                     attempts = notifications.attempts + 1, \
                     updated_at = now() \
                 WHERE notifications.status NOT IN ('sent', 'failed') \
                 RETURNING attempts",
                &[
                    &message.request_id,
                    &message.recipient_id,
                    &message.device_token,
                    &CHANNEL,
                    &payload,
                    &(attempts.max(1) as i32),
                ],
            )
            .await
            .map_err(|e| anyhow!("Attempt upsert failed: {}", e))?;

        match row {
            Some(row) => {
                let attempts: i32 = row.get("attempts");
                Ok(AttemptOutcome::Accepted {
                    attempts: attempts.max(1) as u32,
                })
            }
            None => {
                let status = self
                    .status_of(&message.request_id)
                    .await?
                    .ok_or_else(|| anyhow!("Upsert matched no row and none exists"))?;

                Ok(AttemptOutcome::AlreadyTerminal { status })
            }
        }
    }

    async fn status_of(&self, request_id: &str) -> Result<Option<NotificationStatus>, Error> {
        let row = self
            .client
            .query_opt(
                "SELECT status FROM notifications WHERE request_id = $1",
                &[&request_id],
            )
            .await
            .map_err(|e| anyhow!("Status lookup failed: {}", e))?;

        Ok(row.map(|row| {
            let status: String = row.get("status");
            NotificationStatus::from_string(&status)
        }))
    }

    async fn mark_sent(&self, request_id: &str, attempts: u32) -> Result<(), Error> {
        self.client
            .execute(
                "UPDATE notifications \
                 SET status = 'sent', attempts = $2, updated_at = now() \
                 WHERE request_id = $1 AND status = 'processing'",
                &[&request_id, &(attempts as i32)],
            )
            .await
            .map_err(|e| anyhow!("Failed to record sent status: {}", e))?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        request_id: &str,
        attempts: u32,
        error: &str,
    ) -> Result<(), Error> {
        self.client
            .execute(
                "UPDATE notifications \
                 SET status = 'failed', attempts = $2, last_error = $3, updated_at = now() \
                 WHERE request_id = $1 AND status = 'processing'",
                &[&request_id, &(attempts as i32), &error],
            )
            .await
            .map_err(|e| anyhow!("Failed to record failed status: {}", e))?;

        Ok(())
    }

    async fn fetch(&self, request_id: &str) -> Result<Option<NotificationRecord>, Error> {
        let row = self
            .client
            .query_opt(
                "SELECT id, request_id, recipient_id, device_token, channel, payload, \
                        status, attempts, last_error, created_at, updated_at \
                 FROM notifications WHERE request_id = $1",
                &[&request_id],
            )
            .await
            .map_err(|e| anyhow!("Record lookup failed: {}", e))?;

        Ok(row.as_ref().map(record_from_row))
    }
}
