use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::info;

use crate::{clients::circuit_breaker::CircuitStore, models::circuit_breaker::CircuitState};

/// Circuit breaker state in Redis, shared by every replica of the service.
#[derive(Clone)]
pub struct RedisCircuitStore {
    connection: MultiplexedConnection,
}

impl RedisCircuitStore {
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        info!("Connecting to Redis...");

        let client =
            Client::open(redis_url).map_err(|_| anyhow!("Failed to create redis client"))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|_| anyhow!("Failed to connect to redis client"))?;

        info!("Redis connection established");

        Ok(Self { connection })
    }

    pub async fn ping(&self) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.ping::<String>().await?;
        Ok(())
    }

    fn key(service: &str, field: &str) -> String {
        format!("circuit:{}:{}", service, field)
    }
}

#[async_trait]
impl CircuitStore for RedisCircuitStore {
    async fn state(&self, service: &str) -> Result<CircuitState, Error> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(Self::key(service, "state")).await?;

        Ok(value
            .map(|s| CircuitState::from_string(&s))
            .unwrap_or(CircuitState::Closed))
    }

    async fn set_state(&self, service: &str, state: CircuitState) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(Self::key(service, "state"), state.as_str())
            .await?;
        Ok(())
    }

    async fn increment_failures(&self, service: &str, ttl_seconds: u64) -> Result<u32, Error> {
        let key = Self::key(service, "failures");
        let mut conn = self.connection.clone();
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, ttl_seconds as i64).await?;
        Ok(count)
    }

    async fn increment_successes(&self, service: &str) -> Result<u32, Error> {
        let mut conn = self.connection.clone();
        let count: u32 = conn.incr(Self::key(service, "successes"), 1).await?;
        Ok(count)
    }

    async fn reset_failures(&self, service: &str) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(Self::key(service, "failures")).await?;
        Ok(())
    }

    async fn reset_counters(&self, service: &str) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(vec![
            Self::key(service, "failures"),
            Self::key(service, "successes"),
            Self::key(service, "opened_at"),
        ])
        .await?;
        Ok(())
    }

    async fn set_opened_at(&self, service: &str, epoch_seconds: u64) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(Self::key(service, "opened_at"), epoch_seconds)
            .await?;
        Ok(())
    }

    async fn opened_at(&self, service: &str) -> Result<Option<u64>, Error> {
        let mut conn = self.connection.clone();
        let opened_at: Option<u64> = conn.get(Self::key(service, "opened_at")).await?;
        Ok(opened_at)
    }
}
