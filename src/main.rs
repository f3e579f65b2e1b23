use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use notification_service::{
    api::{AppState, run_api_server},
    clients::{
        channel::{ChannelRegistry, NotificationChannel},
        circuit_breaker::{CircuitBreaker, CircuitStore, GuardedChannel, MemoryCircuitStore},
        email::EmailChannel,
        fcm::FcmChannel,
        health::HealthChecker,
        mail_relay::RelayEmailChannel,
        rbmq::RabbitMqClient,
        redis::RedisCircuitStore,
        template::TemplateCatalog,
    },
    config::{Config, EmailTransport},
    consumer::{ConsumerSettings, QueueConsumer},
    dispatcher::Dispatcher,
    logging,
    metrics::DeliveryMetrics,
    models::notification::NotificationKind,
};
use tokio::{net::TcpListener, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let config = Config::load()?;
    logging::init(&config);

    let span = logging::root_span(&config);
    run(config).instrument(span).await
}

async fn run(config: Config) -> Result<(), Error> {
    let metrics = Arc::new(DeliveryMetrics::default());
    let templates = TemplateCatalog::default();

    let redis = match &config.redis_url {
        Some(url) => Some(RedisCircuitStore::connect(url).await?),
        None => None,
    };
    let circuit_store: Arc<dyn CircuitStore> = match &redis {
        Some(redis) => Arc::new(redis.clone()),
        None => Arc::new(MemoryCircuitStore::new()),
    };

    let channels = build_channels(&config, &templates, &circuit_store)?;
    if channels.kinds().is_empty() {
        warn!("No delivery channel enabled, every request will be rejected as unsupported");
    }
    let channel_names = channels
        .iter()
        .map(|(_, channel)| channel.name().to_string())
        .collect::<Vec<_>>();

    let publisher = Arc::new(RabbitMqClient::connect(&config).await?);

    let dispatcher = Arc::new(
        Dispatcher::new(channels, publisher.clone(), templates, Arc::clone(&metrics))
            .with_send_timeout(config.channel_timeout()),
    );

    let mut health_checker = HealthChecker::new(config.clone(), Arc::clone(&metrics));
    if let Some(redis) = redis {
        health_checker = health_checker.with_redis(redis);
    }
    if config.circuit_breaker_enabled {
        health_checker = health_checker.with_circuit_breakers(Arc::clone(&circuit_store), channel_names);
    }

    let shutdown = CancellationToken::new();
    let mut workers = JoinSet::new();

    for index in 0..config.worker_concurrency {
        let consumer_tag = format!("{}-{}", config.consumer_tag, index);
        let reader = RabbitMqClient::connect(&config)
            .await?
            .into_reader(&consumer_tag)
            .await?;

        let settings = ConsumerSettings {
            name: consumer_tag,
            retry_policy: config.retry_policy(),
            fetch_error_backoff: config.fetch_error_backoff(),
        };
        let consumer = QueueConsumer::new(reader, Arc::clone(&dispatcher), publisher.clone(), settings);

        workers.spawn(consumer.run(shutdown.clone()).in_current_span());
    }

    info!(workers = config.worker_concurrency, "Queue consumers started");

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.server_port)).await?;
    let state = AppState {
        dispatcher,
        health_checker: Arc::new(health_checker),
        shutdown: shutdown.clone(),
        default_timeout: config.request_timeout(),
    };
    let server = tokio::spawn(run_api_server(listener, state, shutdown.clone()).in_current_span());

    shutdown_signal().await;
    info!("Shutdown signal received, stopping");
    shutdown.cancel();

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Consumer exited with error"),
            Err(e) => error!(error = %e, "Consumer task panicked"),
        }
    }

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "API server exited with error"),
        Err(e) => error!(error = %e, "API server task panicked"),
    }

    if let Err(e) = publisher.close().await {
        warn!(error = %e, "Publisher did not close cleanly");
    }

    info!("Notification service stopped");
    Ok(())
}

fn build_channels(
    config: &Config,
    templates: &TemplateCatalog,
    circuit_store: &Arc<dyn CircuitStore>,
) -> Result<ChannelRegistry, Error> {
    let mut registry = ChannelRegistry::new();

    if config.email_enabled {
        let email: Arc<dyn NotificationChannel> = match config.email_transport {
            EmailTransport::Smtp => Arc::new(EmailChannel::new(config, templates.clone())?),
            EmailTransport::Relay => Arc::new(RelayEmailChannel::new(config, templates.clone())?),
        };
        registry.register(NotificationKind::Email, guard(config, email, circuit_store));
    }

    if config.push_enabled {
        let push = Arc::new(FcmChannel::new(config, templates.clone())?);
        registry.register(NotificationKind::Push, guard(config, push, circuit_store));
    }

    Ok(registry)
}

fn guard(
    config: &Config,
    channel: Arc<dyn NotificationChannel>,
    circuit_store: &Arc<dyn CircuitStore>,
) -> Arc<dyn NotificationChannel> {
    if !config.circuit_breaker_enabled {
        return channel;
    }

    let breaker = CircuitBreaker::new(
        channel.name().to_string(),
        Arc::clone(circuit_store),
        config.circuit_breaker_config(),
    );
    Arc::new(GuardedChannel::new(channel, breaker))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
