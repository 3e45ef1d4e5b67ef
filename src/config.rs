use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{circuit_breaker::CircuitBreakerConfig, retry::RetryConfig};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,

    #[serde(default = "default_push_queue_name")]
    pub push_queue_name: String,

    #[serde(default = "default_retry_queue_name")]
    pub retry_queue_name: String,

    #[serde(default = "default_failed_queue_name")]
    pub failed_queue_name: String,

    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    pub redis_url: String,

    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,

    pub database_url: String,

    pub fcm_project_id: String,

    #[serde(default = "default_fcm_endpoint")]
    pub fcm_endpoint: String,

    #[serde(default = "default_circuit_breaker_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,

    #[serde(default = "default_circuit_breaker_success_threshold")]
    pub circuit_breaker_success_threshold: u32,

    #[serde(default = "default_circuit_breaker_timeout_seconds")]
    pub circuit_breaker_timeout_seconds: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    #[serde(default = "default_dlq_fallback_path")]
    pub dlq_fallback_path: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            base_delay_ms: self.base_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            success_threshold: self.circuit_breaker_success_threshold,
            timeout_seconds: self.circuit_breaker_timeout_seconds,
        }
    }
}

fn default_push_queue_name() -> String {
    "push.queue".to_string()
}

fn default_retry_queue_name() -> String {
    "push.retry.queue".to_string()
}

fn default_failed_queue_name() -> String {
    "failed.queue".to_string()
}

fn default_prefetch_count() -> u16 {
    1
}

fn default_idempotency_ttl_seconds() -> u64 {
    86_400
}

fn default_fcm_endpoint() -> String {
    "https://fcm.googleapis.com".to_string()
}

fn default_circuit_breaker_failure_threshold() -> u32 {
    5
}

fn default_circuit_breaker_success_threshold() -> u32 {
    2
}

fn default_circuit_breaker_timeout_seconds() -> u64 {
    60
}

fn default_max_retry_attempts() -> u32 {
    5
}

fn default_base_retry_delay_ms() -> u64 {
    2_000
}

fn default_max_retry_delay_ms() -> u64 {
    300_000
}

fn default_dlq_fallback_path() -> String {
    "failed-notifications.log".to_string()
}

fn default_server_port() -> u16 {
    4001
}
