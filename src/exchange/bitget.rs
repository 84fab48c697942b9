use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use super::{MarketData, MarketGateway};
use crate::config::ExchangeConfig;
use crate::error::BotError;
use crate::models::{Candle, LivePosition, OrderReceipt, OrderSide, Side, Timeframe};
use crate::Result;

// Bitget v2 mix (futures) REST API
// Docs: https://www.bitget.com/api-doc/contract/intro
const CONTRACTS_PATH: &str = "/api/v2/mix/market/contracts";
const CANDLES_PATH: &str = "/api/v2/mix/market/candles";
const ACCOUNTS_PATH: &str = "/api/v2/mix/account/accounts";
const POSITION_PATH: &str = "/api/v2/mix/position/single-position";
const PLACE_ORDER_PATH: &str = "/api/v2/mix/order/place-order";

const SUCCESS_CODE: &str = "00000";
const MAX_RETRIES: u32 = 3;
const RETRY_BASE_MILLIS: u64 = 500;

type BitgetRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// API key material for signed endpoints
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl Credentials {
    /// Read `BITGET_API_KEY`, `BITGET_API_SECRET` and `BITGET_API_PASSPHRASE`
    ///
    /// Returns `None` unless all three are set and non-empty.
    pub fn from_env() -> Option<Self> {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Some(Self {
            api_key: read("BITGET_API_KEY")?,
            secret: read("BITGET_API_SECRET")?,
            passphrase: read("BITGET_API_PASSPHRASE")?,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Sizing rules for one contract
#[derive(Debug, Clone, PartialEq)]
struct ContractSpec {
    volume_place: u32,
    size_multiplier: Decimal,
    min_trade_num: Decimal,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractResponse {
    symbol: String,
    volume_place: String,
    size_multiplier: String,
    min_trade_num: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    margin_coin: String,
    account_equity: String,
    #[serde(default)]
    usdt_equity: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionResponse {
    symbol: String,
    hold_side: String,
    total: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: String,
    #[serde(default)]
    client_oid: Option<String>,
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map_err(|e| BotError::Decode(format!("{} '{}': {}", field, value, e)))
}

fn parse_f64(field: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|e| BotError::Decode(format!("{} '{}': {}", field, value, e)))
}

/// Base64 HMAC-SHA256 of `timestamp + METHOD + path[?query] + body`
fn sign(secret: &str, prehash: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| BotError::Config(format!("invalid API secret: {}", e)))?;
    mac.update(prehash.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

fn query_string(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Client for Bitget USDT-margined perpetual futures
///
/// Built without credentials it serves public market data only; account and
/// order calls then fail with `BotError::Unauthenticated` before any request.
pub struct BitgetClient {
    client: Client,
    base_url: String,
    product_type: String,
    margin_coin: String,
    margin_mode: String,
    credentials: Option<Credentials>,
    contracts: RwLock<HashMap<String, ContractSpec>>,
    rate_limiter: Arc<BitgetRateLimiter>,
}

impl BitgetClient {
    pub fn new(config: &ExchangeConfig, credentials: Option<Credentials>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;

        let per_second = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            BotError::Config("exchange.requests_per_second must be non-zero".into())
        })?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            product_type: config.product_type.clone(),
            margin_coin: config.margin_coin.clone(),
            margin_mode: config.margin_mode.clone(),
            credentials,
            contracts: RwLock::new(HashMap::new()),
            rate_limiter,
        })
    }

    /// Create the client and load sizing rules for `instrument`
    pub async fn connect(
        config: &ExchangeConfig,
        credentials: Option<Credentials>,
        instrument: &str,
    ) -> Result<Self> {
        let client = Self::new(config, credentials)?;
        client.load_contract(instrument).await?;

        tracing::info!(
            instrument,
            authenticated = client.is_authenticated(),
            "Connected to Bitget"
        );

        Ok(client)
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    /// Fetch and cache the contract's size precision
    pub async fn load_contract(&self, instrument: &str) -> Result<()> {
        let params = [
            ("productType", self.product_type.clone()),
            ("symbol", instrument.to_string()),
        ];
        let contracts: Vec<ContractResponse> =
            self.get(CONTRACTS_PATH, &params, false).await?;

        let raw = contracts
            .into_iter()
            .find(|c| c.symbol == instrument)
            .ok_or_else(|| BotError::Config(format!("unknown contract {}", instrument)))?;

        let spec = ContractSpec {
            volume_place: raw
                .volume_place
                .parse()
                .map_err(|e| BotError::Decode(format!("volumePlace: {}", e)))?,
            size_multiplier: parse_decimal("sizeMultiplier", &raw.size_multiplier)?,
            min_trade_num: parse_decimal("minTradeNum", &raw.min_trade_num)?,
        };

        tracing::debug!(instrument, ?spec, "Loaded contract spec");

        self.contracts
            .write()
            .map_err(|e| BotError::Store(e.to_string()))?
            .insert(instrument.to_string(), spec);

        Ok(())
    }

    fn credentials(&self, operation: &'static str) -> Result<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or(BotError::Unauthenticated(operation))
    }

    fn signed(
        &self,
        builder: RequestBuilder,
        credentials: &Credentials,
        method: &Method,
        path_and_query: &str,
        body: &str,
    ) -> Result<RequestBuilder> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let prehash = format!("{}{}{}{}", timestamp, method.as_str(), path_and_query, body);
        let signature = sign(&credentials.secret, &prehash)?;

        Ok(builder
            .header("ACCESS-KEY", &credentials.api_key)
            .header("ACCESS-SIGN", signature)
            .header("ACCESS-TIMESTAMP", timestamp)
            .header("ACCESS-PASSPHRASE", &credentials.passphrase)
            .header("locale", "en-US"))
    }

    /// Rate-limited GET with retry on 429, 5xx and network errors
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        authenticated: bool,
    ) -> Result<T> {
        let path_and_query = if params.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, query_string(params))
        };
        let url = format!("{}{}", self.base_url, path_and_query);
        let credentials = if authenticated {
            Some(self.credentials("signed request")?)
        } else {
            None
        };

        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            let mut builder = self.client.get(&url);
            if let Some(credentials) = credentials {
                builder = self.signed(builder, credentials, &Method::GET, &path_and_query, "")?;
            }

            let backoff = std::time::Duration::from_millis(RETRY_BASE_MILLIS * 2u64.pow(attempt));

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        if attempt < MAX_RETRIES {
                            tracing::warn!(
                                "Bitget returned {} for {}, retrying in {:?} (attempt {}/{})",
                                status,
                                path,
                                backoff,
                                attempt,
                                MAX_RETRIES
                            );
                            tokio::time::sleep(backoff).await;
                            continue;
                        }
                        return Err(BotError::Connectivity(format!(
                            "Bitget {} after {} attempts: {}",
                            path, MAX_RETRIES, status
                        )));
                    }

                    let text = response.text().await?;
                    return Self::unwrap_read(path, status, &text);
                }
                Err(e) if attempt < MAX_RETRIES => {
                    tracing::warn!(
                        "Network error on {}: {}, retrying in {:?} (attempt {}/{})",
                        path,
                        e,
                        backoff,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(BotError::Connectivity(format!(
            "Bitget {} failed after {} attempts",
            path, MAX_RETRIES
        )))
    }

    fn unwrap_read<T: DeserializeOwned>(path: &str, status: StatusCode, text: &str) -> Result<T> {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BotError::Connectivity(format!(
                "Bitget authentication failed on {}: {}",
                path, text
            )));
        }

        let envelope: Envelope<T> = serde_json::from_str(text).map_err(|e| {
            BotError::Decode(format!("{} ({}): {}", path, status, e))
        })?;

        if envelope.code != SUCCESS_CODE {
            return Err(BotError::Connectivity(format!(
                "Bitget {} error {}: {}",
                path, envelope.code, envelope.msg
            )));
        }

        envelope
            .data
            .ok_or_else(|| BotError::Decode(format!("{}: missing data", path)))
    }

    /// Signed market order, sent exactly once
    async fn place_order(
        &self,
        instrument: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<OrderReceipt> {
        let credentials = self.credentials("place_order")?;

        let size = self.round_to_tradable_precision(instrument, quantity);
        if size <= Decimal::ZERO {
            return Err(BotError::OrderRejected {
                code: "local".to_string(),
                message: format!("order size {} rounds to zero", quantity),
            });
        }

        let client_oid = Uuid::new_v4().to_string();
        let body = serde_json::json!({
            "symbol": instrument,
            "productType": self.product_type,
            "marginMode": self.margin_mode,
            "marginCoin": self.margin_coin,
            "size": size.normalize().to_string(),
            "side": side.to_string(),
            "orderType": "market",
            "reduceOnly": if reduce_only { "YES" } else { "NO" },
            "clientOid": client_oid,
        })
        .to_string();

        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, PLACE_ORDER_PATH);
        let builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body.clone());
        let builder = self.signed(builder, credentials, &Method::POST, PLACE_ORDER_PATH, &body)?;

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_server_error() {
            return Err(BotError::Connectivity(format!(
                "Bitget order endpoint returned {}: {}",
                status, text
            )));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BotError::Connectivity(format!(
                "Bitget authentication failed on order: {}",
                text
            )));
        }

        let envelope: Envelope<OrderResponse> = serde_json::from_str(&text)
            .map_err(|e| BotError::Decode(format!("place-order ({}): {}", status, e)))?;

        if envelope.code != SUCCESS_CODE {
            return Err(BotError::OrderRejected {
                code: envelope.code,
                message: envelope.msg,
            });
        }

        let ack = envelope
            .data
            .ok_or_else(|| BotError::Decode("place-order: missing data".into()))?;

        tracing::info!(
            instrument,
            %side,
            size = %size,
            reduce_only,
            order_id = %ack.order_id,
            "Order accepted"
        );

        Ok(OrderReceipt {
            order_id: ack.order_id,
            client_order_id: ack.client_oid.unwrap_or(client_oid),
            side,
            quantity: size,
            reduce_only,
        })
    }

    fn contract(&self, instrument: &str) -> Option<ContractSpec> {
        self.contracts
            .read()
            .ok()
            .and_then(|contracts| contracts.get(instrument).cloned())
    }
}

#[async_trait]
impl MarketGateway for BitgetClient {
    async fn get_equity(&self) -> Result<Decimal> {
        self.credentials("get_equity")?;
        let params = [("productType", self.product_type.clone())];
        let accounts: Vec<AccountResponse> = self.get(ACCOUNTS_PATH, &params, true).await?;

        let account = accounts
            .into_iter()
            .find(|a| a.margin_coin.eq_ignore_ascii_case(&self.margin_coin))
            .ok_or_else(|| {
                BotError::Decode(format!("no {} margin account returned", self.margin_coin))
            })?;

        let equity = account.usdt_equity.as_deref().unwrap_or(&account.account_equity);
        parse_decimal("usdtEquity", equity)
    }

    async fn get_open_position(&self, instrument: &str) -> Result<Option<LivePosition>> {
        self.credentials("get_open_position")?;
        let params = [
            ("symbol", instrument.to_string()),
            ("productType", self.product_type.clone()),
            ("marginCoin", self.margin_coin.clone()),
        ];
        let positions: Vec<PositionResponse> = self.get(POSITION_PATH, &params, true).await?;

        for raw in positions.into_iter().filter(|p| p.symbol == instrument) {
            let quantity = parse_decimal("total", &raw.total)?;
            if quantity <= Decimal::ZERO {
                continue;
            }
            let side = match raw.hold_side.as_str() {
                "long" => Side::Long,
                "short" => Side::Short,
                other => {
                    return Err(BotError::Decode(format!("unknown holdSide '{}'", other)));
                }
            };
            return Ok(Some(LivePosition { side, quantity }));
        }

        Ok(None)
    }

    async fn place_reduce_order(
        &self,
        instrument: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderReceipt> {
        self.place_order(instrument, side, quantity, true).await
    }

    async fn place_entry_order(
        &self,
        instrument: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderReceipt> {
        self.place_order(instrument, side, quantity, false).await
    }

    fn round_to_tradable_precision(&self, instrument: &str, quantity: Decimal) -> Decimal {
        let Some(spec) = self.contract(instrument) else {
            tracing::warn!(instrument, "No contract spec loaded, quantity left unrounded");
            return quantity;
        };

        let mut rounded =
            quantity.round_dp_with_strategy(spec.volume_place, RoundingStrategy::ToZero);
        if spec.size_multiplier > Decimal::ZERO {
            rounded = (rounded / spec.size_multiplier).trunc() * spec.size_multiplier;
        }
        if rounded < spec.min_trade_num {
            return Decimal::ZERO;
        }
        rounded
    }
}

#[async_trait]
impl MarketData for BitgetClient {
    async fn fetch_candles(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        end_time: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let params = [
            ("symbol", instrument.to_string()),
            ("productType", self.product_type.clone()),
            ("granularity", timeframe.bitget_granularity().to_string()),
            ("endTime", end_time.timestamp_millis().to_string()),
            ("limit", limit.to_string()),
        ];
        let rows: Vec<Vec<String>> = self.get(CANDLES_PATH, &params, false).await?;

        let mut candles = rows
            .iter()
            .map(|row| {
                if row.len() < 6 {
                    return Err(BotError::Decode(format!("candle row too short: {:?}", row)));
                }
                let millis: i64 = row[0]
                    .parse()
                    .map_err(|e| BotError::Decode(format!("candle timestamp: {}", e)))?;
                let timestamp = Utc
                    .timestamp_millis_opt(millis)
                    .single()
                    .ok_or_else(|| BotError::Decode(format!("candle timestamp {}", millis)))?;

                Ok(Candle {
                    instrument: instrument.to_string(),
                    timestamp,
                    open: parse_f64("open", &row[1])?,
                    high: parse_f64("high", &row[2])?,
                    low: parse_f64("low", &row[3])?,
                    close: parse_f64("close", &row[4])?,
                    volume: parse_f64("volume", &row[5])?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }
}
