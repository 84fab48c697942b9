// Exchange connectivity module
pub mod bitget;
pub mod paper;

pub use bitget::{BitgetClient, Credentials};
pub use paper::PaperGateway;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use rust_decimal::Decimal;

use crate::models::{Candle, LivePosition, OrderReceipt, OrderSide, Timeframe};
use crate::Result;

/// Candles requested per page when assembling history
pub const HISTORY_PAGE_SIZE: usize = 100;

/// Account operations the trading core needs from an exchange
#[async_trait]
pub trait MarketGateway: Send + Sync {
    /// Total account equity in the margin coin
    async fn get_equity(&self) -> Result<Decimal>;

    /// Open position for `instrument`, `None` when flat
    async fn get_open_position(&self, instrument: &str) -> Result<Option<LivePosition>>;

    /// Reduce-only market order
    async fn place_reduce_order(
        &self,
        instrument: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderReceipt>;

    /// Market order that opens a position
    async fn place_entry_order(
        &self,
        instrument: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderReceipt>;

    /// Truncate `quantity` to the instrument's tradable size step
    fn round_to_tradable_precision(&self, instrument: &str, quantity: Decimal) -> Decimal;
}

/// Read-only market data
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Up to `limit` candles closing at or before `end_time`, oldest first
    async fn fetch_candles(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        end_time: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>>;
}

/// Fetch the last `limit` candles ending at `now`
///
/// Pages of `HISTORY_PAGE_SIZE` are requested concurrently, at most
/// `max_parallel` at a time, then merged, sorted by timestamp and de-duplicated.
/// Any failed page fails the whole fetch.
pub async fn fetch_history(
    source: &dyn MarketData,
    instrument: &str,
    timeframe: Timeframe,
    limit: usize,
    max_parallel: usize,
    now: DateTime<Utc>,
) -> Result<Vec<Candle>> {
    let pages = limit.div_ceil(HISTORY_PAGE_SIZE);
    let page_span = timeframe.duration() * HISTORY_PAGE_SIZE as i32;

    let chunks: Vec<Vec<Candle>> = futures::stream::iter(0..pages)
        .map(|page| {
            let end_time = now - page_span * page as i32;
            source.fetch_candles(instrument, timeframe, end_time, HISTORY_PAGE_SIZE)
        })
        .buffer_unordered(max_parallel.max(1))
        .try_collect()
        .await?;

    let mut candles: Vec<Candle> = chunks.into_iter().flatten().collect();
    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);

    if candles.len() > limit {
        candles.drain(..candles.len() - limit);
    }

    tracing::debug!(
        instrument,
        pages,
        candles = candles.len(),
        "Fetched candle history"
    );

    Ok(candles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::paper::PaperGateway;
    use rust_decimal_macros::dec;

    fn minute_candles(count: usize, now: DateTime<Utc>) -> Vec<Candle> {
        (0..count)
            .map(|i| Candle {
                instrument: "SOLUSDT".to_string(),
                timestamp: now - chrono::Duration::minutes((count - i) as i64),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0 + i as f64,
                volume: 10.0,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_fetch_history_merges_pages_in_order() {
        let now = Utc::now();
        let gateway = PaperGateway::new(dec!(1000)).with_candles(minute_candles(350, now));

        let candles = fetch_history(&gateway, "SOLUSDT", Timeframe::M1, 250, 4, now)
            .await
            .unwrap();

        assert_eq!(candles.len(), 250);
        assert!(candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        // Most recent candle is kept
        assert_eq!(candles.last().unwrap().close, 449.0);
    }

    #[tokio::test]
    async fn test_fetch_history_returns_what_exists() {
        let now = Utc::now();
        let gateway = PaperGateway::new(dec!(1000)).with_candles(minute_candles(50, now));

        let candles = fetch_history(&gateway, "SOLUSDT", Timeframe::M1, 1000, 4, now)
            .await
            .unwrap();

        assert_eq!(candles.len(), 50);
    }
}
