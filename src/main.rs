use std::sync::Arc;

use anyhow::{Error, Result};
use push_delivery::{
    api::{AppState, run_api_server},
    clients::{
        circuit_breaker::CircuitBreaker, database::DatabaseClient, dlq::DeadLetterPublisher,
        fcm::FcmClient, health::HealthChecker, rbmq::RabbitMqClient, redis::RedisClient,
    },
    config::Config,
    consumer::{self, DedupCache, DeliveryConsumer, DeliveryLedger, PushGateway},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting push delivery worker");

    let database_client = Arc::new(DatabaseClient::connect(&config.database_url).await?);
    let redis_client = Arc::new(RedisClient::connect(&config).await?);
    let rbmq = Arc::new(RabbitMqClient::connect(&config).await?);

    let breaker = Arc::new(CircuitBreaker::new(
        "push_gateway".to_string(),
        config.circuit_breaker_config(),
    ));

    let gateway: Arc<dyn PushGateway> = Arc::new(FcmClient::new(&config)?);
    let ledger: Arc<dyn DeliveryLedger> = database_client.clone();
    let cache: Arc<dyn DedupCache> = redis_client;

    let dead_letter_publisher = DeadLetterPublisher::new(
        Arc::clone(&rbmq),
        config.dlq_fallback_path.clone().into(),
    );

    let delivery_consumer = DeliveryConsumer::new(
        gateway,
        Arc::clone(&ledger),
        cache,
        Arc::clone(&breaker),
        config.retry_config(),
    );

    let state = Arc::new(AppState {
        ledger,
        health_checker: HealthChecker::new(config.clone(), breaker),
    });

    let api_config = config.clone();
    tokio::spawn(async move {
        if let Err(e) = run_api_server(api_config, state).await {
            error!(error = %e, "Status server terminated");
        }
    });

    consumer::run(&delivery_consumer, &rbmq, &dead_letter_publisher).await?;

    info!("Push delivery worker stopped");

    Ok(())
}
