use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Error, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    clients::channel::NotificationChannel,
    error::ChannelError,
    models::{
        circuit_breaker::{CircuitBreakerConfig, CircuitState},
        notification::{NotificationId, NotificationRequest},
    },
};

/// Where breaker state lives. Redis shares it between replicas; the
/// in-memory store keeps it per process.
#[async_trait]
pub trait CircuitStore: Send + Sync {
    async fn state(&self, service: &str) -> Result<CircuitState, Error>;
    async fn set_state(&self, service: &str, state: CircuitState) -> Result<(), Error>;
    async fn increment_failures(&self, service: &str, ttl_seconds: u64) -> Result<u32, Error>;
    async fn increment_successes(&self, service: &str) -> Result<u32, Error>;
    async fn reset_failures(&self, service: &str) -> Result<(), Error>;
    async fn reset_counters(&self, service: &str) -> Result<(), Error>;
    async fn set_opened_at(&self, service: &str, epoch_seconds: u64) -> Result<(), Error>;
    async fn opened_at(&self, service: &str) -> Result<Option<u64>, Error>;
}

#[derive(Debug, Default, Clone)]
struct CircuitRecord {
    state: Option<CircuitState>,
    failures: u32,
    successes: u32,
    opened_at: Option<u64>,
}

#[derive(Default)]
pub struct MemoryCircuitStore {
    records: Mutex<HashMap<String, CircuitRecord>>,
}

impl MemoryCircuitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CircuitStore for MemoryCircuitStore {
    async fn state(&self, service: &str) -> Result<CircuitState, Error> {
        let records = self.records.lock().await;
        Ok(records
            .get(service)
            .and_then(|record| record.state)
            .unwrap_or(CircuitState::Closed))
    }

    async fn set_state(&self, service: &str, state: CircuitState) -> Result<(), Error> {
        let mut records = self.records.lock().await;
        records.entry(service.to_string()).or_default().state = Some(state);
        Ok(())
    }

    // Failure counts do not expire in memory; they reset on success instead.
    async fn increment_failures(&self, service: &str, _ttl_seconds: u64) -> Result<u32, Error> {
        let mut records = self.records.lock().await;
        let record = records.entry(service.to_string()).or_default();
        record.failures += 1;
        Ok(record.failures)
    }

    async fn increment_successes(&self, service: &str) -> Result<u32, Error> {
        let mut records = self.records.lock().await;
        let record = records.entry(service.to_string()).or_default();
        record.successes += 1;
        Ok(record.successes)
    }

    async fn reset_failures(&self, service: &str) -> Result<(), Error> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(service) {
            record.failures = 0;
        }
        Ok(())
    }

    async fn reset_counters(&self, service: &str) -> Result<(), Error> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(service) {
            record.failures = 0;
            record.successes = 0;
            record.opened_at = None;
        }
        Ok(())
    }

    async fn set_opened_at(&self, service: &str, epoch_seconds: u64) -> Result<(), Error> {
        let mut records = self.records.lock().await;
        records.entry(service.to_string()).or_default().opened_at = Some(epoch_seconds);
        Ok(())
    }

    async fn opened_at(&self, service: &str) -> Result<Option<u64>, Error> {
        let records = self.records.lock().await;
        Ok(records.get(service).and_then(|record| record.opened_at))
    }
}

pub struct CircuitBreaker {
    service_name: String,
    store: Arc<dyn CircuitStore>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(
        service_name: String,
        store: Arc<dyn CircuitStore>,
        config: CircuitBreakerConfig,
    ) -> Self {
        info!(service = %service_name, "Circuit breaker initialized");

        Self {
            service_name,
            store,
            config,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub async fn state(&self) -> Result<CircuitState, Error> {
        self.store.state(&self.service_name).await
    }

    /// Decides whether a call may go through, moving Open → HalfOpen once the
    /// open timeout has elapsed.
    pub async fn allow_request(&self) -> Result<bool, Error> {
        match self.state().await? {
            CircuitState::Closed => Ok(true),
            CircuitState::HalfOpen => {
                debug!(service = %self.service_name, "Circuit breaker in half-open state");
                Ok(true)
            }
            CircuitState::Open => {
                if self.should_attempt_reset().await? {
                    info!(service = %self.service_name, "Circuit breaker attempting reset");
                    self.store
                        .set_state(&self.service_name, CircuitState::HalfOpen)
                        .await?;
                    return Ok(true);
                }
                warn!(service = %self.service_name, "Circuit breaker is open, rejecting request");
                Ok(false)
            }
        }
    }

    pub async fn record_success(&self) -> Result<(), Error> {
        let state = self.state().await?;

        if state == CircuitState::HalfOpen {
            let successes = self.store.increment_successes(&self.service_name).await?;
            debug!(
                service = %self.service_name,
                successes,
                threshold = self.config.success_threshold,
                "Circuit breaker success recorded"
            );

            if successes >= self.config.success_threshold {
                self.store
                    .set_state(&self.service_name, CircuitState::Closed)
                    .await?;
                self.store.reset_counters(&self.service_name).await?;
                info!(service = %self.service_name, "Circuit breaker closed after successful recovery");
            }
        } else if state == CircuitState::Closed {
            self.store.reset_failures(&self.service_name).await?;
        }

        Ok(())
    }

    pub async fn record_failure(&self) -> Result<(), Error> {
        let state = self.state().await?;

        if state == CircuitState::HalfOpen {
            self.open().await?;
            warn!(service = %self.service_name, "Circuit breaker reopened after failed recovery attempt");
            return Ok(());
        }

        let failures = self
            .store
            .increment_failures(&self.service_name, self.config.timeout_seconds)
            .await?;
        debug!(
            service = %self.service_name,
            failures,
            threshold = self.config.failure_threshold,
            "Circuit breaker failure recorded"
        );

        if failures >= self.config.failure_threshold {
            self.open().await?;
            warn!(
                service = %self.service_name,
                failures,
                "Circuit breaker opened due to consecutive failures"
            );
        }

        Ok(())
    }

    async fn open(&self) -> Result<(), Error> {
        self.store
            .set_state(&self.service_name, CircuitState::Open)
            .await?;
        self.store.reset_counters(&self.service_name).await?;
        self.store
            .set_opened_at(&self.service_name, epoch_seconds())
            .await
    }

    async fn should_attempt_reset(&self) -> Result<bool, Error> {
        match self.store.opened_at(&self.service_name).await? {
            Some(opened_at) => {
                let elapsed = epoch_seconds().saturating_sub(opened_at);
                Ok(elapsed >= self.config.timeout_seconds)
            }
            None => Ok(false),
        }
    }
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Wraps a channel so that an open circuit fails fast without touching the
/// transport. Store errors never block delivery; they are logged and the
/// call proceeds as if the circuit were closed.
pub struct GuardedChannel {
    inner: Arc<dyn NotificationChannel>,
    breaker: CircuitBreaker,
}

impl GuardedChannel {
    pub fn new(inner: Arc<dyn NotificationChannel>, breaker: CircuitBreaker) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl NotificationChannel for GuardedChannel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(
        &self,
        notification_id: &NotificationId,
        request: &NotificationRequest,
    ) -> Result<(), ChannelError> {
        let allowed = self.breaker.allow_request().await.unwrap_or_else(|e| {
            warn!(service = %self.breaker.service_name(), error = %e, "Circuit state unavailable");
            true
        });

        if !allowed {
            return Err(ChannelError::CircuitOpen(
                self.breaker.service_name().to_string(),
            ));
        }

        let result = self.inner.send(notification_id, request).await;

        let recorded = match &result {
            Ok(()) => self.breaker.record_success().await,
            Err(ChannelError::Render(_)) => Ok(()),
            Err(_) => self.breaker.record_failure().await,
        };
        if let Err(e) = recorded {
            warn!(service = %self.breaker.service_name(), error = %e, "Failed to record circuit outcome");
        }

        result
    }
}
