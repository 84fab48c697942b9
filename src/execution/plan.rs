use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::Side;

/// Why a reduce order was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit1,
    TakeProfit2,
    TakeProfitFinal,
}

/// Where an open plan is in its exit ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanPhase {
    NoHits,
    Tp1Hit,
    Tp2Hit,
}

/// Target-price plan for the open position on one instrument
///
/// The stop price is not stored; it is recomputed from `entry_price` and the
/// configured stop percentage. `quantity` is the size at entry and is never
/// used to size exits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub side: Side,
    pub entry_price: Decimal,
    #[serde(alias = "qty")]
    pub quantity: Decimal,
    #[serde(alias = "tp1_price")]
    pub take_profit_1: Decimal,
    #[serde(alias = "tp2_price")]
    pub take_profit_2: Decimal,
    #[serde(alias = "tp_price")]
    pub take_profit_final: Decimal,
    #[serde(default)]
    pub tp1_hit: bool,
    #[serde(default)]
    pub tp2_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
}

impl Plan {
    /// Stop threshold: `entry * (1 - pct)` for long, `entry * (1 + pct)` for short
    pub fn stop_price(&self, stop_loss_pct: Decimal) -> Decimal {
        self.entry_price * (Decimal::ONE - self.side.sign() * stop_loss_pct)
    }

    /// True once price has crossed the stop against the position
    pub fn stop_triggered(&self, price: Decimal, stop_loss_pct: Decimal) -> bool {
        let stop = self.stop_price(stop_loss_pct);
        match self.side {
            Side::Long => price <= stop,
            Side::Short => price >= stop,
        }
    }

    /// True once price has reached `target` in the favorable direction
    pub fn target_reached(&self, target: Decimal, price: Decimal) -> bool {
        match self.side {
            Side::Long => price >= target,
            Side::Short => price <= target,
        }
    }

    pub fn phase(&self) -> PlanPhase {
        if self.tp2_hit {
            PlanPhase::Tp2Hit
        } else if self.tp1_hit {
            PlanPhase::Tp1Hit
        } else {
            PlanPhase::NoHits
        }
    }

    /// Exits that apply at `price`, in execution order
    ///
    /// A stop excludes everything else. Take-profit levels are checked
    /// independently, so one price jump can trigger several of them.
    pub fn exit_triggers(&self, price: Decimal, stop_loss_pct: Decimal) -> Vec<ExitReason> {
        if self.stop_triggered(price, stop_loss_pct) {
            return vec![ExitReason::StopLoss];
        }

        let mut triggers = Vec::new();
        if !self.tp1_hit && self.target_reached(self.take_profit_1, price) {
            triggers.push(ExitReason::TakeProfit1);
        }
        if !self.tp2_hit && self.target_reached(self.take_profit_2, price) {
            triggers.push(ExitReason::TakeProfit2);
        }
        if self.target_reached(self.take_profit_final, price) {
            triggers.push(ExitReason::TakeProfitFinal);
        }
        triggers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_plan() -> Plan {
        Plan {
            side: Side::Long,
            entry_price: dec!(100),
            quantity: dec!(10),
            take_profit_1: dec!(101),
            take_profit_2: dec!(102),
            take_profit_final: dec!(108),
            tp1_hit: false,
            tp2_hit: false,
            instrument: Some("SOLUSDT".to_string()),
            opened_at: None,
        }
    }

    fn short_plan() -> Plan {
        Plan {
            side: Side::Short,
            take_profit_1: dec!(99),
            take_profit_2: dec!(98),
            take_profit_final: dec!(92),
            ..long_plan()
        }
    }

    #[test]
    fn test_stop_price_both_sides() {
        assert_eq!(long_plan().stop_price(dec!(0.02)), dec!(98));
        assert_eq!(short_plan().stop_price(dec!(0.02)), dec!(102));
    }

    #[test]
    fn test_stop_is_inclusive() {
        let plan = long_plan();
        assert!(plan.stop_triggered(dec!(98), dec!(0.02)));
        assert!(plan.stop_triggered(dec!(97.9), dec!(0.02)));
        assert!(!plan.stop_triggered(dec!(98.01), dec!(0.02)));

        let plan = short_plan();
        assert!(plan.stop_triggered(dec!(102), dec!(0.02)));
        assert!(!plan.stop_triggered(dec!(101.99), dec!(0.02)));
    }

    #[test]
    fn test_no_triggers_between_stop_and_tp1() {
        assert!(long_plan().exit_triggers(dec!(100.5), dec!(0.02)).is_empty());
        assert!(short_plan().exit_triggers(dec!(99.5), dec!(0.02)).is_empty());
    }

    #[test]
    fn test_price_jump_triggers_multiple_levels() {
        let triggers = long_plan().exit_triggers(dec!(103), dec!(0.02));
        assert_eq!(
            triggers,
            vec![ExitReason::TakeProfit1, ExitReason::TakeProfit2]
        );

        let triggers = short_plan().exit_triggers(dec!(91), dec!(0.02));
        assert_eq!(
            triggers,
            vec![
                ExitReason::TakeProfit1,
                ExitReason::TakeProfit2,
                ExitReason::TakeProfitFinal
            ]
        );
    }

    #[test]
    fn test_hit_flags_suppress_repeat_triggers() {
        let mut plan = long_plan();
        plan.tp1_hit = true;
        plan.tp2_hit = true;

        assert!(plan.exit_triggers(dec!(103), dec!(0.02)).is_empty());
        assert_eq!(plan.phase(), PlanPhase::Tp2Hit);
    }

    #[test]
    fn test_stop_wins_over_take_profit() {
        // Inverted ladder: tp1 sits below the stop, so one price satisfies both
        let mut plan = long_plan();
        plan.take_profit_1 = dec!(97);

        let triggers = plan.exit_triggers(dec!(97.5), dec!(0.02));
        assert_eq!(triggers, vec![ExitReason::StopLoss]);
    }

    #[test]
    fn test_reads_legacy_record_layout() {
        let json = r#"{
            "side": "long",
            "entry_price": 150.25,
            "tp_price": 162.27,
            "tp1_price": 151.7525,
            "tp2_price": 153.255,
            "tp1_hit": true,
            "tp2_hit": false,
            "qty": 41.5
        }"#;

        let plan: Plan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.side, Side::Long);
        assert_eq!(plan.take_profit_final, dec!(162.27));
        assert_eq!(plan.take_profit_1, dec!(151.7525));
        assert_eq!(plan.quantity, dec!(41.5));
        assert!(plan.tp1_hit);
        assert_eq!(plan.phase(), PlanPhase::Tp1Hit);
        assert!(plan.instrument.is_none());
    }
}
