//! Product event pipeline consumer.
//!
//! Wires the Redis Streams broker, the PostgreSQL ledger and the HTTP
//! invoker into one dispatcher and runs it until Ctrl-C.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use product_event_pipeline::adapters::{
    BrokerDeadLetterSink, HttpInvoker, PostgresLedger, RedisStreamBroker,
};
use product_event_pipeline::application::{
    ConsumerDispatcher, ConsumerOrchestrator, DeadLetterRecoverer,
};
use product_event_pipeline::config::AppConfig;
use product_event_pipeline::domain::product::ProductCreatedEvent;
use product_event_pipeline::ports::MessageBroker;
use product_event_pipeline::telemetry;

#[tokio::main]
async fn main() {
    let config = match AppConfig::load().map_err(anyhow::Error::from).and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = telemetry::init(&config.telemetry) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(config).await {
        tracing::error!(error = ?e, "Consumer exited with error");
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> Result<()> {
    info!(
        topic = %config.pipeline.topic,
        group = %config.pipeline.group_id,
        partitions = config.pipeline.partitions,
        "Starting product event consumer"
    );

    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .idle_timeout(config.database.idle_timeout())
        .max_lifetime(config.database.max_lifetime())
        .connect(&config.database.url)
        .await
        .context("connecting to PostgreSQL")?;

    let ledger = PostgresLedger::new(pool);
    if config.database.run_migrations {
        ledger.migrate().await.context("running migrations")?;
        info!("Migrations applied");
    }

    let broker: Arc<dyn MessageBroker> = Arc::new(
        RedisStreamBroker::connect(
            &config.redis.url,
            config.pipeline.partitions,
            config.redis.timeout(),
        )
        .await
        .context("connecting to Redis")?
        .with_prefix(config.redis.key_prefix.clone())
        .with_topic_partitions(config.pipeline.topic.clone(), config.pipeline.partitions),
    );

    let invoker = HttpInvoker::new(config.invoker.http()).context("building HTTP invoker")?;
    let sink = BrokerDeadLetterSink::new(Arc::clone(&broker), config.pipeline.dead_letter_suffix.clone());
    let recoverer = DeadLetterRecoverer::new(config.retry.policy(), Arc::new(sink));

    let orchestrator = ConsumerOrchestrator::<ProductCreatedEvent>::new(
        Arc::new(ledger),
        Arc::new(invoker),
        "product-created-notifier",
    );

    let mut dispatcher = ConsumerDispatcher::new(
        Arc::clone(&broker),
        Arc::new(recoverer),
        config.pipeline.dispatcher(),
    );
    dispatcher.register(
        config.pipeline.topic.clone(),
        config.pipeline.group_id.clone(),
        Arc::new(orchestrator),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, stopping consumer");
        let _ = shutdown_tx.send(true);
    });

    dispatcher.run(shutdown_rx).await.context("running dispatcher")?;
    info!("Consumer stopped");
    Ok(())
}
