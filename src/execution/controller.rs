use chrono::Utc;
use std::sync::Arc;

use super::entry::EntryPlanner;
use super::plan::Plan;
use super::reconciler::{PositionReconciler, ReconcileOutcome};
use crate::config::BotConfig;
use crate::error::BotError;
use crate::exchange::{fetch_history, MarketData, MarketGateway};
use crate::persistence::PlanStore;
use crate::strategy::SignalProvider;
use crate::Result;

/// What a single run did
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Not enough candles to evaluate; no account calls were made
    InsufficientHistory { required: usize, available: usize },
    /// An existing plan was applied
    Reconciled(ReconcileOutcome),
    /// A live position exists that this bot does not manage
    Unmanaged { reason: String },
    /// A new position was opened with this plan
    Entered(Plan),
    /// Flat, and no entry was taken
    NoEntry,
}

/// One decision cycle: history, signal, account state, then manage or enter
pub struct TradingController {
    config: BotConfig,
    gateway: Arc<dyn MarketGateway>,
    market_data: Arc<dyn MarketData>,
    store: Arc<dyn PlanStore>,
    signal: Box<dyn SignalProvider>,
    reconciler: PositionReconciler,
    planner: EntryPlanner,
}

impl TradingController {
    pub fn new(
        config: BotConfig,
        gateway: Arc<dyn MarketGateway>,
        market_data: Arc<dyn MarketData>,
        store: Arc<dyn PlanStore>,
        signal: Box<dyn SignalProvider>,
    ) -> Self {
        let reconciler = PositionReconciler::new(config.instrument.clone(), config.risk.clone());
        let planner = EntryPlanner::new(config.instrument.clone(), config.risk.clone());

        Self {
            config,
            gateway,
            market_data,
            store,
            signal,
            reconciler,
            planner,
        }
    }

    pub async fn run_once(&self) -> Result<RunOutcome> {
        let instrument = self.config.instrument.as_str();
        tracing::info!(
            instrument,
            timeframe = %self.config.timeframe,
            signal = self.signal.name(),
            "Starting run"
        );

        let candles = fetch_history(
            self.market_data.as_ref(),
            instrument,
            self.config.timeframe,
            self.config.history_limit,
            self.config.exchange.max_parallel_requests,
            Utc::now(),
        )
        .await?;

        let required = self.signal.min_candles_required();
        if candles.len() < required {
            tracing::warn!(
                instrument,
                required,
                available = candles.len(),
                "Not enough history, skipping run"
            );
            return Ok(RunOutcome::InsufficientHistory {
                required,
                available: candles.len(),
            });
        }

        let snapshot = match self.signal.evaluate(&candles) {
            Ok(snapshot) => snapshot,
            Err(BotError::InsufficientHistory {
                required,
                available,
            }) => {
                return Ok(RunOutcome::InsufficientHistory {
                    required,
                    available,
                });
            }
            Err(e) => return Err(e),
        };

        let Some(last) = candles.last() else {
            return Ok(RunOutcome::InsufficientHistory {
                required,
                available: 0,
            });
        };
        let price = rust_decimal::Decimal::try_from(last.close)
            .map_err(|e| BotError::Decode(format!("close price {}: {}", last.close, e)))?;

        tracing::debug!(
            instrument,
            price = %price,
            long = snapshot.long_signal,
            short = snapshot.short_signal,
            upper = %snapshot.volatility_upper,
            lower = %snapshot.volatility_lower,
            "Signal evaluated"
        );

        let balance = self.gateway.get_equity().await?;
        tracing::info!(instrument, balance = %balance, "💰 Account equity");

        let live = self.gateway.get_open_position(instrument).await?;
        let plan = self.store.load(instrument).await?;

        let outcome = self
            .reconciler
            .reconcile(
                self.gateway.as_ref(),
                self.store.as_ref(),
                plan,
                live.as_ref(),
                price,
            )
            .await?;

        let outcome = match outcome {
            ReconcileOutcome::Flat { .. } => {
                match self
                    .planner
                    .execute(
                        self.gateway.as_ref(),
                        self.store.as_ref(),
                        None,
                        &snapshot,
                        balance,
                        price,
                    )
                    .await?
                {
                    Some(plan) => RunOutcome::Entered(plan),
                    None => RunOutcome::NoEntry,
                }
            }
            ReconcileOutcome::Unmanaged { reason } => RunOutcome::Unmanaged { reason },
            managed => RunOutcome::Reconciled(managed),
        };

        tracing::info!(instrument, outcome = ?outcome, "Run complete");
        Ok(outcome)
    }
}
