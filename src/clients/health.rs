use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{circuit_breaker::CircuitStore, rbmq::RabbitMqClient, redis::RedisCircuitStore},
    config::Config,
    metrics::DeliveryMetrics,
    models::{
        circuit_breaker::CircuitState,
        health::{HealthCheckResponse, HealthStatus, ServiceHealth},
    },
};

const MESSAGE_BROKER: &str = "message_broker";
const CACHE_SERVICE: &str = "cache_service";

pub struct HealthChecker {
    config: Config,
    redis: Option<RedisCircuitStore>,
    circuit_store: Option<Arc<dyn CircuitStore>>,
    channels: Vec<String>,
    metrics: Arc<DeliveryMetrics>,
}

impl HealthChecker {
    pub fn new(config: Config, metrics: Arc<DeliveryMetrics>) -> Self {
        Self {
            config,
            redis: None,
            circuit_store: None,
            channels: Vec::new(),
            metrics,
        }
    }

    pub fn with_redis(mut self, redis: RedisCircuitStore) -> Self {
        self.redis = Some(redis);
        self
    }

    /// Reports the breaker state of each named channel.
    pub fn with_circuit_breakers(mut self, store: Arc<dyn CircuitStore>, channels: Vec<String>) -> Self {
        self.circuit_store = Some(store);
        self.channels = channels;
        self
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert(MESSAGE_BROKER.to_string(), self.check_rabbitmq().await);

        if let Some(redis) = &self.redis {
            checks.insert(CACHE_SERVICE.to_string(), Self::check_redis(redis).await);
        }

        for channel in &self.channels {
            checks.insert(channel.clone(), self.check_circuit_breaker(channel).await);
        }

        HealthCheckResponse {
            status: determine_overall_status(&checks),
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            checks,
            delivery: self.metrics.snapshot(),
        }
    }

    async fn check_rabbitmq(&self) -> ServiceHealth {
        let start = Instant::now();

        match RabbitMqClient::connect(&self.config).await {
            Ok(client) => {
                let elapsed = start.elapsed().as_millis() as u64;
                if let Err(e) = client.close().await {
                    debug!(error = %e, "Health probe connection did not close cleanly");
                }
                debug!(response_time_ms = elapsed, "RabbitMQ health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "RabbitMQ connection failed");
                ServiceHealth::unhealthy(format!("Connection failed: {}", e))
            }
        }
    }

    async fn check_redis(redis: &RedisCircuitStore) -> ServiceHealth {
        let start = Instant::now();

        match redis.ping().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Redis health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Redis ping failed");
                ServiceHealth::unhealthy(format!("Ping failed: {}", e))
            }
        }
    }

    async fn check_circuit_breaker(&self, service_name: &str) -> ServiceHealth {
        let Some(store) = &self.circuit_store else {
            return ServiceHealth::healthy(0);
        };

        match store.state(service_name).await {
            Ok(state) => {
                debug!(
                    service = service_name,
                    circuit_state = state.as_str(),
                    "Circuit breaker state checked"
                );
                circuit_health(state)
            }
            Err(e) => {
                warn!(service = service_name, error = %e, "Failed to read circuit breaker state");
                ServiceHealth::degraded("unknown".to_string(), Some(e.to_string()))
            }
        }
    }
}

fn circuit_health(state: CircuitState) -> ServiceHealth {
    match state {
        CircuitState::Closed => ServiceHealth::healthy(0).with_circuit_breaker(state.as_str().to_string()),
        CircuitState::HalfOpen => ServiceHealth::degraded(
            state.as_str().to_string(),
            Some("Circuit breaker testing recovery".to_string()),
        ),
        CircuitState::Open => ServiceHealth::degraded(
            state.as_str().to_string(),
            Some("Circuit breaker is open".to_string()),
        ),
    }
}

/// An unreachable broker or Redis makes the service unhealthy; an open or
/// recovering channel only degrades it, since the fallback queue still
/// accepts work.
pub fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
    let critical_unhealthy = checks
        .iter()
        .filter(|(name, _)| name.as_str() == MESSAGE_BROKER || name.as_str() == CACHE_SERVICE)
        .any(|(_, health)| health.status == HealthStatus::Unhealthy);

    let has_degraded = checks
        .values()
        .any(|health| health.status != HealthStatus::Healthy);

    if critical_unhealthy {
        HealthStatus::Unhealthy
    } else if has_degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
