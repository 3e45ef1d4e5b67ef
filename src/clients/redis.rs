use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::info;

use crate::{config::Config, consumer::DedupCache};

const SENT_MARKER: &str = "sent";

/// TTL-bounded dedup layer in front of the ledger. Advisory only: a miss
/// means "check the ledger", never "not sent".
pub struct RedisClient {
    connection: MultiplexedConnection,
    idempotency_ttl_seconds: u64,
}

impl RedisClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            idempotency_ttl_seconds: config.idempotency_ttl_seconds,
        })
    }
}

fn dedup_key(request_id: &str) -> String {
    format!("push:dedup:{}", request_id)
}

#[async_trait]
impl DedupCache for RedisClient {
    async fn is_sent(&self, request_id: &str) -> Result<bool, Error> {
        let mut connection = self.connection.clone();

        let value: Option<String> = connection
            .get(&dedup_key(request_id))
            .await
            .map_err(|e| anyhow!("Failed to read dedup entry: {}", e))?;

        Ok(value.as_deref() == Some(SENT_MARKER))
    }

    async fn mark_sent(&self, request_id: &str) -> Result<(), Error> {
        let mut connection = self.connection.clone();

        connection
            .set_ex::<_, _, ()>(
                &dedup_key(request_id),
                SENT_MARKER,
                self.idempotency_ttl_seconds,
            )
            .await
            .map_err(|e| anyhow!("Failed to write dedup entry: {}", e))?;

        Ok(())
    }
}
