use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::PlanStore;
use crate::error::BotError;
use crate::execution::Plan;
use crate::Result;

/// Plan store that lives for the process only
#[derive(Default)]
pub struct InMemoryPlanStore {
    plans: RwLock<HashMap<String, Plan>>,
}

impl InMemoryPlanStore {
    pub fn with_plan(instrument: &str, plan: Plan) -> Self {
        let store = Self::default();
        if let Ok(mut plans) = store.plans.write() {
            plans.insert(instrument.to_string(), plan);
        }
        store
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn load(&self, instrument: &str) -> Result<Option<Plan>> {
        let plans = self.plans.read().map_err(|e| BotError::Store(e.to_string()))?;
        Ok(plans.get(instrument).cloned())
    }

    async fn save(&self, instrument: &str, plan: &Plan) -> Result<()> {
        let mut plans = self.plans.write().map_err(|e| BotError::Store(e.to_string()))?;
        plans.insert(instrument.to_string(), plan.clone());
        Ok(())
    }

    async fn delete(&self, instrument: &str) -> Result<()> {
        let mut plans = self.plans.write().map_err(|e| BotError::Store(e.to_string()))?;
        plans.remove(instrument);
        Ok(())
    }
}
