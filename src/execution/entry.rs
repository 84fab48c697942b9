use chrono::Utc;
use rust_decimal::Decimal;

use super::plan::Plan;
use crate::config::RiskParams;
use crate::error::BotError;
use crate::exchange::MarketGateway;
use crate::models::{LivePosition, Side};
use crate::persistence::PlanStore;
use crate::strategy::SignalSnapshot;
use crate::Result;

/// Sized entry and exit targets, before any order is sent
#[derive(Debug, Clone, PartialEq)]
pub struct EntryProposal {
    pub side: Side,
    pub quantity: Decimal,
    pub plan: Plan,
}

/// Turns an entry signal into a market order and a stored plan
pub struct EntryPlanner {
    instrument: String,
    risk: RiskParams,
}

impl EntryPlanner {
    pub fn new(instrument: impl Into<String>, risk: RiskParams) -> Self {
        Self {
            instrument: instrument.into(),
            risk,
        }
    }

    /// Direction to trade, long first when both signals fire
    pub fn choose_side(signal: &SignalSnapshot) -> Option<Side> {
        if signal.long_signal {
            Some(Side::Long)
        } else if signal.short_signal {
            Some(Side::Short)
        } else {
            None
        }
    }

    /// Size the trade and derive its targets. No I/O.
    ///
    /// Returns `None` when there is no signal, the balance is not positive or
    /// the size rounds to zero.
    pub fn propose(
        &self,
        gateway: &dyn MarketGateway,
        signal: &SignalSnapshot,
        balance: Decimal,
        price: Decimal,
    ) -> Option<EntryProposal> {
        let side = Self::choose_side(signal)?;
        let instrument = self.instrument.as_str();

        if balance <= Decimal::ZERO || price <= Decimal::ZERO {
            tracing::warn!(instrument, balance = %balance, price = %price, "Cannot size entry");
            return None;
        }

        let notional = balance * self.risk.position_fraction * self.risk.leverage;
        let quantity = gateway.round_to_tradable_precision(instrument, notional / price);
        if quantity <= Decimal::ZERO {
            tracing::warn!(
                instrument,
                notional = %notional,
                price = %price,
                "Entry size rounds to zero"
            );
            return None;
        }

        let band = match side {
            Side::Long => signal.volatility_lower,
            Side::Short => signal.volatility_upper,
        };
        let risk_fraction = (price - band).abs() / price;
        let reward_fraction = risk_fraction * self.risk.risk_reward_ratio;
        let sign = side.sign();

        let plan = Plan {
            side,
            entry_price: price,
            quantity,
            take_profit_1: price * (Decimal::ONE + sign * self.risk.tp1_offset),
            take_profit_2: price * (Decimal::ONE + sign * self.risk.tp2_offset),
            take_profit_final: price * (Decimal::ONE + sign * reward_fraction),
            tp1_hit: false,
            tp2_hit: false,
            instrument: Some(self.instrument.clone()),
            opened_at: None,
        };

        Some(EntryProposal {
            side,
            quantity,
            plan,
        })
    }

    /// Open a position from `signal` and persist its plan
    ///
    /// The plan is written only after the order is confirmed. Fails if a live
    /// position is passed in.
    pub async fn execute(
        &self,
        gateway: &dyn MarketGateway,
        store: &dyn PlanStore,
        live: Option<&LivePosition>,
        signal: &SignalSnapshot,
        balance: Decimal,
        price: Decimal,
    ) -> Result<Option<Plan>> {
        let instrument = self.instrument.as_str();

        if let Some(live) = live {
            return Err(BotError::OrderRejected {
                code: "local".to_string(),
                message: format!(
                    "refusing entry on {}: {} position of {} already open",
                    instrument, live.side, live.quantity
                ),
            });
        }

        let Some(EntryProposal {
            side,
            quantity,
            mut plan,
        }) = self.propose(gateway, signal, balance, price)
        else {
            return Ok(None);
        };

        tracing::info!(
            instrument,
            side = %side,
            quantity = %quantity,
            price = %price,
            tp1 = %plan.take_profit_1,
            tp2 = %plan.take_profit_2,
            tp_final = %plan.take_profit_final,
            "🚀 Opening position"
        );

        let receipt = gateway
            .place_entry_order(instrument, side.opening_order(), quantity)
            .await?;
        tracing::info!(
            instrument,
            order_id = %receipt.order_id,
            client_order_id = %receipt.client_order_id,
            quantity = %receipt.quantity,
            "Entry order confirmed"
        );

        plan.quantity = receipt.quantity;
        plan.opened_at = Some(Utc::now());
        store.save(instrument, &plan).await?;

        Ok(Some(plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::PaperGateway;
    use crate::models::OrderSide;
    use crate::persistence::InMemoryPlanStore;
    use rust_decimal_macros::dec;

    const INSTRUMENT: &str = "SOLUSDT";

    fn signal(long: bool, short: bool) -> SignalSnapshot {
        SignalSnapshot {
            long_signal: long,
            short_signal: short,
            volatility_upper: dec!(103),
            volatility_lower: dec!(98),
        }
    }

    fn planner() -> EntryPlanner {
        EntryPlanner::new(INSTRUMENT, RiskParams::default())
    }

    #[test]
    fn test_long_targets() {
        let gateway = PaperGateway::new(dec!(1000));
        let proposal = planner()
            .propose(&gateway, &signal(true, false), dec!(1000), dec!(100))
            .unwrap();

        assert_eq!(proposal.side, Side::Long);
        // 1000 * 0.25 * 25 / 100
        assert_eq!(proposal.quantity, dec!(62.5));
        assert_eq!(proposal.plan.take_profit_1, dec!(101));
        assert_eq!(proposal.plan.take_profit_2, dec!(102));
        assert_eq!(proposal.plan.take_profit_final, dec!(108));
    }

    #[test]
    fn test_short_uses_upper_band() {
        let gateway = PaperGateway::new(dec!(1000));
        let proposal = planner()
            .propose(&gateway, &signal(false, true), dec!(1000), dec!(100))
            .unwrap();

        assert_eq!(proposal.side, Side::Short);
        assert_eq!(proposal.plan.take_profit_1, dec!(99));
        assert_eq!(proposal.plan.take_profit_2, dec!(98));
        // risk 3% * 4 = 12%
        assert_eq!(proposal.plan.take_profit_final, dec!(88));
    }

    #[test]
    fn test_long_wins_tie() {
        assert_eq!(EntryPlanner::choose_side(&signal(true, true)), Some(Side::Long));
        assert_eq!(EntryPlanner::choose_side(&signal(false, false)), None);
    }

    #[test]
    fn test_no_proposal_for_empty_account_or_dust() {
        let gateway = PaperGateway::new(dec!(0)).with_size_step(dec!(1));
        let planner = planner();

        assert!(planner
            .propose(&gateway, &signal(true, false), dec!(0), dec!(100))
            .is_none());
        // 0.01 * 0.25 * 25 / 100 = 0.000625, truncated to 0
        assert!(planner
            .propose(&gateway, &signal(true, false), dec!(0.01), dec!(100))
            .is_none());
    }

    #[tokio::test]
    async fn test_execute_places_order_then_saves_plan() {
        let gateway = PaperGateway::new(dec!(1000));
        let store = InMemoryPlanStore::default();

        let plan = planner()
            .execute(&gateway, &store, None, &signal(true, false), dec!(1000), dec!(100))
            .await
            .unwrap()
            .unwrap();

        let orders = gateway.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert!(!orders[0].reduce_only);
        assert_eq!(orders[0].quantity, dec!(62.5));

        let stored = store.load(INSTRUMENT).await.unwrap().unwrap();
        assert_eq!(stored, plan);
        assert!(!stored.tp1_hit && !stored.tp2_hit);
        assert!(stored.opened_at.is_some());
    }

    #[tokio::test]
    async fn test_rejected_entry_writes_no_plan() {
        let gateway = PaperGateway::new(dec!(1000));
        gateway.script_orders([Some("insufficient balance".to_string())]);
        let store = InMemoryPlanStore::default();

        let result = planner()
            .execute(&gateway, &store, None, &signal(false, true), dec!(1000), dec!(100))
            .await;

        assert!(matches!(result, Err(BotError::OrderRejected { .. })));
        assert!(store.load(INSTRUMENT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refuses_when_position_open() {
        let gateway = PaperGateway::new(dec!(1000));
        let store = InMemoryPlanStore::default();
        let live = LivePosition {
            side: Side::Short,
            quantity: dec!(1),
        };

        let result = planner()
            .execute(
                &gateway,
                &store,
                Some(&live),
                &signal(true, false),
                dec!(1000),
                dec!(100),
            )
            .await;

        assert!(result.is_err());
        assert!(gateway.orders().is_empty());
        assert!(store.load(INSTRUMENT).await.unwrap().is_none());
    }
}
