use rust_decimal::Decimal;

use super::plan::{ExitReason, Plan};
use crate::config::RiskParams;
use crate::exchange::MarketGateway;
use crate::models::{LivePosition, OrderReceipt};
use crate::persistence::PlanStore;
use crate::Result;

/// Confirmed reduce order and the branch that sent it
#[derive(Debug, Clone, PartialEq)]
pub struct ExitFill {
    pub reason: ExitReason,
    pub receipt: OrderReceipt,
}

/// Result of reconciling the stored plan against the live position
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// No live position. A leftover plan, if any, was deleted.
    Flat { stale_plan_removed: bool },
    /// Live position without a usable plan; left untouched
    Unmanaged { reason: String },
    /// Plan applied; `plan` is the state after this run (`None` once closed)
    Managed {
        exits: Vec<ExitFill>,
        plan: Option<Plan>,
    },
}

/// Drives the stop / partial take-profit state machine for one instrument
pub struct PositionReconciler {
    instrument: String,
    risk: RiskParams,
}

impl PositionReconciler {
    pub fn new(instrument: impl Into<String>, risk: RiskParams) -> Self {
        Self {
            instrument: instrument.into(),
            risk,
        }
    }

    /// Apply the plan at `price`
    ///
    /// Each triggered branch places one reduce order and persists its effect
    /// only after the order is confirmed. The first failed call ends the run
    /// with earlier branches already committed.
    pub async fn reconcile(
        &self,
        gateway: &dyn MarketGateway,
        store: &dyn PlanStore,
        plan: Option<Plan>,
        live: Option<&LivePosition>,
        price: Decimal,
    ) -> Result<ReconcileOutcome> {
        let instrument = self.instrument.as_str();

        let live = match live {
            Some(live) if live.quantity > Decimal::ZERO => live,
            _ => {
                let stale = plan.is_some();
                if stale {
                    tracing::warn!(instrument, "No open position, removing leftover plan");
                    store.delete(instrument).await?;
                }
                return Ok(ReconcileOutcome::Flat {
                    stale_plan_removed: stale,
                });
            }
        };

        let Some(mut plan) = plan else {
            tracing::warn!(
                instrument,
                side = %live.side,
                quantity = %live.quantity,
                "Open position has no plan, leaving it untouched"
            );
            return Ok(ReconcileOutcome::Unmanaged {
                reason: "no plan for open position".to_string(),
            });
        };

        if plan.side != live.side {
            tracing::warn!(
                instrument,
                plan_side = %plan.side,
                live_side = %live.side,
                "Plan side disagrees with open position, discarding plan"
            );
            store.delete(instrument).await?;
            return Ok(ReconcileOutcome::Unmanaged {
                reason: format!("plan side {} != position side {}", plan.side, live.side),
            });
        }

        tracing::info!(
            instrument,
            side = %live.side,
            quantity = %live.quantity,
            price = %price,
            phase = ?plan.phase(),
            "Active position"
        );

        let triggers = plan.exit_triggers(price, self.risk.stop_loss_pct);
        if triggers.is_empty() {
            store.save(instrument, &plan).await?;
            return Ok(ReconcileOutcome::Managed {
                exits: Vec::new(),
                plan: Some(plan),
            });
        }

        let close_side = live.side.closing_order();
        let mut remaining = live.quantity;
        let mut exits = Vec::new();

        for reason in triggers {
            match reason {
                ExitReason::StopLoss | ExitReason::TakeProfitFinal => {
                    let tradable = gateway.round_to_tradable_precision(instrument, remaining);
                    if remaining > Decimal::ZERO && tradable <= Decimal::ZERO {
                        tracing::error!(
                            instrument,
                            ?reason,
                            remaining = %remaining,
                            "Remaining size below exchange minimum, closing plan and leaving dust for manual handling"
                        );
                    } else if remaining > Decimal::ZERO {
                        tracing::info!(
                            instrument,
                            ?reason,
                            quantity = %remaining,
                            "Closing full position"
                        );
                        let receipt = gateway
                            .place_reduce_order(instrument, close_side, remaining)
                            .await?;
                        exits.push(ExitFill { reason, receipt });
                    }
                    store.delete(instrument).await?;
                    return Ok(ReconcileOutcome::Managed { exits, plan: None });
                }
                ExitReason::TakeProfit1 | ExitReason::TakeProfit2 => {
                    let fraction = if reason == ExitReason::TakeProfit1 {
                        self.risk.tp1_fraction
                    } else {
                        self.risk.tp2_fraction
                    };
                    let quantity =
                        gateway.round_to_tradable_precision(instrument, remaining * fraction);

                    if quantity <= Decimal::ZERO {
                        tracing::warn!(
                            instrument,
                            ?reason,
                            remaining = %remaining,
                            "Partial exit rounds to zero, skipping"
                        );
                        continue;
                    }

                    tracing::info!(
                        instrument,
                        ?reason,
                        quantity = %quantity,
                        price = %price,
                        "Taking partial profit"
                    );
                    let receipt = gateway
                        .place_reduce_order(instrument, close_side, quantity)
                        .await?;
                    remaining -= receipt.quantity.min(remaining);

                    if reason == ExitReason::TakeProfit1 {
                        plan.tp1_hit = true;
                    } else {
                        plan.tp2_hit = true;
                    }
                    store.save(instrument, &plan).await?;
                    exits.push(ExitFill { reason, receipt });
                }
            }
        }

        Ok(ReconcileOutcome::Managed {
            exits,
            plan: Some(plan),
        })
    }
}
