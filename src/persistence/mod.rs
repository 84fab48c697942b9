// Plan persistence module
pub mod file;
pub mod memory;
pub mod redis_store;

pub use file::FilePlanStore;
pub use memory::InMemoryPlanStore;
pub use redis_store::RedisPlanStore;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{StoreBackend, StoreConfig};
use crate::execution::Plan;
use crate::Result;

/// Durable record of the active plan, one per instrument
///
/// `save` and `delete` replace or remove the whole record atomically. A missing
/// record means the instrument is flat.
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn load(&self, instrument: &str) -> Result<Option<Plan>>;

    async fn save(&self, instrument: &str, plan: &Plan) -> Result<()>;

    /// Remove the record; deleting a missing record is not an error
    async fn delete(&self, instrument: &str) -> Result<()>;
}

/// Open the backend selected in configuration
///
/// Paper runs get a private in-memory store regardless of `backend`. The
/// simulated account starts flat, so sharing the live record would make the
/// reconciler discard the live plan as stale.
pub async fn open_store(config: &StoreConfig, paper: bool) -> Result<Arc<dyn PlanStore>> {
    if paper {
        tracing::info!("Paper run, plans kept in memory only");
        return Ok(Arc::new(InMemoryPlanStore::default()));
    }

    let store: Arc<dyn PlanStore> = match config.backend {
        StoreBackend::File => Arc::new(FilePlanStore::new(&config.path)?),
        StoreBackend::Redis => Arc::new(RedisPlanStore::new(&config.redis_url).await?),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory plan store, plans will not survive this run");
            Arc::new(InMemoryPlanStore::default())
        }
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use rust_decimal_macros::dec;

    fn live_plan() -> Plan {
        Plan {
            side: Side::Long,
            entry_price: dec!(100),
            quantity: dec!(62.5),
            take_profit_1: dec!(101),
            take_profit_2: dec!(102),
            take_profit_final: dec!(108),
            tp1_hit: true,
            tp2_hit: false,
            instrument: Some("SOLUSDT".to_string()),
            opened_at: None,
        }
    }

    #[tokio::test]
    async fn test_paper_store_is_isolated_from_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let live = FilePlanStore::new(dir.path()).unwrap();
        live.save("SOLUSDT", &live_plan()).await.unwrap();

        let config = StoreConfig {
            backend: StoreBackend::File,
            path: dir.path().to_path_buf(),
            ..StoreConfig::default()
        };
        let paper = open_store(&config, true).await.unwrap();

        assert!(paper.load("SOLUSDT").await.unwrap().is_none());
        paper.delete("SOLUSDT").await.unwrap();

        assert_eq!(live.load("SOLUSDT").await.unwrap(), Some(live_plan()));
    }

    #[tokio::test]
    async fn test_live_store_uses_configured_backend() {
        let dir = tempfile::tempdir().unwrap();
        FilePlanStore::new(dir.path())
            .unwrap()
            .save("SOLUSDT", &live_plan())
            .await
            .unwrap();

        let config = StoreConfig {
            backend: StoreBackend::File,
            path: dir.path().to_path_buf(),
            ..StoreConfig::default()
        };
        let store = open_store(&config, false).await.unwrap();

        assert_eq!(store.load("SOLUSDT").await.unwrap(), Some(live_plan()));
    }
}
