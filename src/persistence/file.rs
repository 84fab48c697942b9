use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::PlanStore;
use crate::error::BotError;
use crate::execution::Plan;
use crate::Result;

/// One JSON file per instrument under a state directory
///
/// Writes go to a temporary sibling that is synced and renamed over the
/// record, so a crash leaves either the old or the new plan on disk.
pub struct FilePlanStore {
    dir: PathBuf,
}

impl FilePlanStore {
    /// Create the store, creating `dir` if needed
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| BotError::Store(format!("create {}: {}", dir.display(), e)))?;

        tracing::info!("Plan store at {}", dir.display());

        Ok(Self { dir })
    }

    fn record_path(&self, instrument: &str) -> Result<PathBuf> {
        let valid = !instrument.is_empty()
            && instrument
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(BotError::Store(format!(
                "instrument '{}' is not usable as a record key",
                instrument
            )));
        }
        Ok(self.dir.join(format!("{}.json", instrument)))
    }
}

#[async_trait]
impl PlanStore for FilePlanStore {
    async fn load(&self, instrument: &str) -> Result<Option<Plan>> {
        let path = self.record_path(instrument)?;

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BotError::Store(format!("read {}: {}", path.display(), e)));
            }
        };

        let plan = serde_json::from_str(&contents)
            .map_err(|e| BotError::Store(format!("parse {}: {}", path.display(), e)))?;
        Ok(Some(plan))
    }

    async fn save(&self, instrument: &str, plan: &Plan) -> Result<()> {
        let path = self.record_path(instrument)?;
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(plan)?;

        let write = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp_path, &path).await
        };
        write
            .await
            .map_err(|e| BotError::Store(format!("write {}: {}", path.display(), e)))?;

        tracing::debug!(instrument, "Saved plan to {}", path.display());
        Ok(())
    }

    async fn delete(&self, instrument: &str) -> Result<()> {
        let path = self.record_path(instrument)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(instrument, "Deleted plan {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BotError::Store(format!("delete {}: {}", path.display(), e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use rust_decimal_macros::dec;

    fn test_plan() -> Plan {
        Plan {
            side: Side::Short,
            entry_price: dec!(150.5),
            quantity: dec!(41.5),
            take_profit_1: dec!(148.995),
            take_profit_2: dec!(147.49),
            take_profit_final: dec!(140.2),
            tp1_hit: true,
            tp2_hit: false,
            instrument: Some("SOLUSDT".to_string()),
            opened_at: None,
        }
    }

    #[tokio::test]
    async fn test_missing_record_is_flat() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePlanStore::new(dir.path()).unwrap();

        assert!(store.load("SOLUSDT").await.unwrap().is_none());
        // Deleting a missing record is fine
        store.delete("SOLUSDT").await.unwrap();
    }

    #[tokio::test]
    async fn test_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePlanStore::new(dir.path()).unwrap();
        let plan = test_plan();

        store.save("SOLUSDT", &plan).await.unwrap();
        assert_eq!(store.load("SOLUSDT").await.unwrap(), Some(plan.clone()));
        assert!(!dir.path().join("SOLUSDT.json.tmp").exists());

        // Overwrite in place
        let mut updated = plan;
        updated.tp2_hit = true;
        store.save("SOLUSDT", &updated).await.unwrap();
        assert!(store.load("SOLUSDT").await.unwrap().unwrap().tp2_hit);

        store.delete("SOLUSDT").await.unwrap();
        assert!(store.load("SOLUSDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_uses_stable_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePlanStore::new(dir.path()).unwrap();
        store.save("SOLUSDT", &test_plan()).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("SOLUSDT.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        for key in [
            "side",
            "entry_price",
            "take_profit_1",
            "take_profit_2",
            "take_profit_final",
            "tp1_hit",
            "tp2_hit",
            "quantity",
        ] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(value["side"], "short");
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SOLUSDT.json"), "{not json").unwrap();
        let store = FilePlanStore::new(dir.path()).unwrap();

        assert!(matches!(
            store.load("SOLUSDT").await,
            Err(BotError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePlanStore::new(dir.path()).unwrap();

        assert!(store.load("../etc/passwd").await.is_err());
        assert!(store.save("SOL/USDT", &test_plan()).await.is_err());
    }
}
