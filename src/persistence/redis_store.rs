use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

use super::PlanStore;
use crate::error::BotError;
use crate::execution::Plan;
use crate::Result;

/// Redis persistence for plans
///
/// Each plan is a JSON string at `plan:{instrument}`; `SET` and `DEL` are
/// atomic per key.
pub struct RedisPlanStore {
    conn: ConnectionManager,
}

impl RedisPlanStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| BotError::Store("Redis connection timeout after 5 seconds".into()))??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    fn key(instrument: &str) -> String {
        format!("plan:{}", instrument)
    }
}

#[async_trait]
impl PlanStore for RedisPlanStore {
    async fn load(&self, instrument: &str) -> Result<Option<Plan>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(Self::key(instrument)).await?;

        value
            .map(|json| {
                serde_json::from_str(&json)
                    .map_err(|e| BotError::Store(format!("parse plan for {}: {}", instrument, e)))
            })
            .transpose()
    }

    async fn save(&self, instrument: &str, plan: &Plan) -> Result<()> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(plan)?;
        conn.set::<_, _, ()>(Self::key(instrument), value).await?;

        tracing::debug!(instrument, "Saved plan to Redis");
        Ok(())
    }

    async fn delete(&self, instrument: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.del(Self::key(instrument)).await?;

        if removed > 0 {
            tracing::debug!(instrument, "Deleted plan from Redis");
        }
        Ok(())
    }
}
