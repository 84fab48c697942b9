use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{MarketData, MarketGateway};
use crate::error::BotError;
use crate::models::{Candle, LivePosition, OrderReceipt, OrderSide, Side, Timeframe};
use crate::Result;

/// Order recorded by the paper gateway
#[derive(Debug, Clone, PartialEq)]
pub struct PaperOrder {
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub reduce_only: bool,
}

#[derive(Debug, Default)]
struct PaperState {
    equity: Decimal,
    position: Option<LivePosition>,
    candles: Vec<Candle>,
    orders: Vec<PaperOrder>,
    scripted_rejections: VecDeque<Option<String>>,
    offline: bool,
    account_calls: usize,
}

/// Simulated exchange account held in memory
///
/// Market orders fill instantly and move the simulated position. Rejections can
/// be scripted per order to exercise failure paths.
#[derive(Clone)]
pub struct PaperGateway {
    state: Arc<Mutex<PaperState>>,
    size_step: Decimal,
}

impl PaperGateway {
    pub fn new(equity: Decimal) -> Self {
        Self {
            state: Arc::new(Mutex::new(PaperState {
                equity,
                ..Default::default()
            })),
            size_step: Decimal::new(1, 2), // 0.01 contracts
        }
    }

    pub fn with_candles(self, candles: Vec<Candle>) -> Self {
        self.lock().candles = candles;
        self
    }

    pub fn with_position(self, side: Side, quantity: Decimal) -> Self {
        self.lock().position = Some(LivePosition { side, quantity });
        self
    }

    pub fn with_size_step(mut self, size_step: Decimal) -> Self {
        self.size_step = size_step;
        self
    }

    /// Replace the candle history served to `fetch_candles`
    pub fn set_candles(&self, candles: Vec<Candle>) {
        self.lock().candles = candles;
    }

    /// Queue the outcome of upcoming orders: `None` fills, `Some(msg)` rejects
    pub fn script_orders(&self, outcomes: impl IntoIterator<Item = Option<String>>) {
        self.lock().scripted_rejections.extend(outcomes);
    }

    /// Make every account call fail with a connectivity error
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn orders(&self) -> Vec<PaperOrder> {
        self.lock().orders.clone()
    }

    pub fn position(&self) -> Option<LivePosition> {
        self.lock().position.clone()
    }

    /// Number of account calls made (equity, position and orders)
    pub fn account_calls(&self) -> usize {
        self.lock().account_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PaperState> {
        // A poisoned lock only happens after a panic in a test thread
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn submit(
        &self,
        instrument: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<OrderReceipt> {
        let mut state = self.lock();
        state.account_calls += 1;

        if state.offline {
            return Err(BotError::Connectivity("paper gateway offline".into()));
        }

        if let Some(Some(message)) = state.scripted_rejections.pop_front() {
            return Err(BotError::OrderRejected {
                code: "paper".to_string(),
                message,
            });
        }

        if quantity <= Decimal::ZERO {
            return Err(BotError::OrderRejected {
                code: "paper".to_string(),
                message: format!("invalid order size {}", quantity),
            });
        }

        let next = match (state.position.take(), reduce_only) {
            (Some(pos), true) => {
                if pos.side.closing_order() != side {
                    state.position = Some(pos);
                    return Err(BotError::OrderRejected {
                        code: "paper".to_string(),
                        message: "reduce-only order would increase position".into(),
                    });
                }
                let remaining = (pos.quantity - quantity).max(Decimal::ZERO);
                (!remaining.is_zero()).then_some(LivePosition {
                    side: pos.side,
                    quantity: remaining,
                })
            }
            (None, true) => {
                return Err(BotError::OrderRejected {
                    code: "paper".to_string(),
                    message: "no position to reduce".into(),
                });
            }
            (Some(pos), false) => {
                // One-way mode: entries in the same direction add to the position
                if pos.side.opening_order() != side {
                    state.position = Some(pos);
                    return Err(BotError::OrderRejected {
                        code: "paper".to_string(),
                        message: "opposite position already open".into(),
                    });
                }
                Some(LivePosition {
                    side: pos.side,
                    quantity: pos.quantity + quantity,
                })
            }
            (None, false) => Some(LivePosition {
                side: match side {
                    OrderSide::Buy => Side::Long,
                    OrderSide::Sell => Side::Short,
                },
                quantity,
            }),
        };

        state.position = next;
        state.orders.push(PaperOrder {
            instrument: instrument.to_string(),
            side,
            quantity,
            reduce_only,
        });

        Ok(OrderReceipt {
            order_id: format!("paper-{}", state.orders.len()),
            client_order_id: Uuid::new_v4().to_string(),
            side,
            quantity,
            reduce_only,
        })
    }
}

#[async_trait]
impl MarketGateway for PaperGateway {
    async fn get_equity(&self) -> Result<Decimal> {
        let mut state = self.lock();
        state.account_calls += 1;
        if state.offline {
            return Err(BotError::Connectivity("paper gateway offline".into()));
        }
        Ok(state.equity)
    }

    async fn get_open_position(&self, _instrument: &str) -> Result<Option<LivePosition>> {
        let mut state = self.lock();
        state.account_calls += 1;
        if state.offline {
            return Err(BotError::Connectivity("paper gateway offline".into()));
        }
        Ok(state.position.clone())
    }

    async fn place_reduce_order(
        &self,
        instrument: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderReceipt> {
        self.submit(instrument, side, quantity, true)
    }

    async fn place_entry_order(
        &self,
        instrument: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderReceipt> {
        self.submit(instrument, side, quantity, false)
    }

    fn round_to_tradable_precision(&self, _instrument: &str, quantity: Decimal) -> Decimal {
        if self.size_step.is_zero() {
            return quantity;
        }
        (quantity / self.size_step).trunc() * self.size_step
    }
}

#[async_trait]
impl MarketData for PaperGateway {
    async fn fetch_candles(
        &self,
        _instrument: &str,
        _timeframe: Timeframe,
        end_time: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let state = self.lock();
        let eligible: Vec<Candle> = state
            .candles
            .iter()
            .filter(|c| c.timestamp <= end_time)
            .cloned()
            .collect();
        let skip = eligible.len().saturating_sub(limit);
        Ok(eligible.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_entry_then_partial_reduce() {
        let gateway = PaperGateway::new(dec!(1000));

        gateway
            .place_entry_order("SOLUSDT", OrderSide::Buy, dec!(10))
            .await
            .unwrap();
        assert_eq!(
            gateway.position(),
            Some(LivePosition {
                side: Side::Long,
                quantity: dec!(10)
            })
        );

        let receipt = gateway
            .place_reduce_order("SOLUSDT", OrderSide::Sell, dec!(2.5))
            .await
            .unwrap();
        assert!(receipt.reduce_only);
        assert_eq!(gateway.position().unwrap().quantity, dec!(7.5));

        gateway
            .place_reduce_order("SOLUSDT", OrderSide::Sell, dec!(7.5))
            .await
            .unwrap();
        assert!(gateway.position().is_none());
        assert_eq!(gateway.orders().len(), 3);
    }

    #[tokio::test]
    async fn test_reduce_in_wrong_direction_is_rejected() {
        let gateway = PaperGateway::new(dec!(1000)).with_position(Side::Short, dec!(4));

        let result = gateway
            .place_reduce_order("SOLUSDT", OrderSide::Sell, dec!(1))
            .await;

        assert!(matches!(result, Err(BotError::OrderRejected { .. })));
        assert_eq!(gateway.position().unwrap().quantity, dec!(4));
    }

    #[tokio::test]
    async fn test_scripted_rejection_leaves_position() {
        let gateway = PaperGateway::new(dec!(1000)).with_position(Side::Long, dec!(4));
        gateway.script_orders([Some("insufficient margin".to_string())]);

        let result = gateway
            .place_reduce_order("SOLUSDT", OrderSide::Sell, dec!(1))
            .await;

        assert!(matches!(result, Err(BotError::OrderRejected { .. })));
        assert_eq!(gateway.position().unwrap().quantity, dec!(4));
        assert!(gateway.orders().is_empty());
    }

    #[test]
    fn test_rounds_down_to_size_step() {
        let gateway = PaperGateway::new(dec!(1000)).with_size_step(dec!(0.1));
        assert_eq!(
            gateway.round_to_tradable_precision("SOLUSDT", dec!(2.4999)),
            dec!(2.4)
        );
        assert_eq!(
            gateway.round_to_tradable_precision("SOLUSDT", dec!(0.05)),
            dec!(0)
        );
    }
}
