/// live.rs - Binance spot REST gateway
///
/// Implements `ExecutionGateway` over the Binance spot API.
/// Testnet vs mainnet is only a matter of `base_url`.
///
/// SIGNED REQUEST FLOW:
///   1. Build query string with required params
///   2. Append recvWindow + server-synced timestamp
///   3. Sign the query string with HMAC-SHA256 using the API secret
///   4. Send with the X-MBX-APIKEY header
///
/// ORDER TYPES USED:
///   LIMIT (GTC) - when the signal price is forwarded
///   MARKET      - when the order carries no price
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::{error, info};

use crate::error::GatewayError;
use crate::gateway::{Credentials, ExecutionGateway, GatewayConnector, GatewayHandle};
use crate::models::{AssetBalance, Candle, OrderAck, OrderRequest};
use crate::time_sync::TimeSync;

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW_MS: u64 = 5_000;

// ── Response types ────────────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id:     i64,
    symbol:       String,
    status:       String,
    #[serde(default)]
    executed_qty: String,
}

#[derive(Deserialize, Debug)]
struct BinanceError {
    code: i64,
    msg:  String,
}

#[derive(Deserialize, Debug)]
struct AccountResponse {
    balances: Vec<RawBalance>,
}

#[derive(Deserialize, Debug)]
struct RawBalance {
    asset:  String,
    free:   String,
    locked: String,
}

// ── Gateway ───────────────────────────────────────────────────────────────

pub struct BinanceSpotGateway {
    client:     Client,
    api_key:    String,
    api_secret: String,
    base_url:   String,
    time_sync:  TimeSync,
    closed:     AtomicBool,
    owner_id:   Option<u64>,
}

impl BinanceSpotGateway {
    /// Authenticated session.  No network traffic happens here.
    pub fn new(credentials: &Credentials, base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let mut gw = Self::public(base_url, timeout)?;
        gw.api_key    = credentials.api_key.clone();
        gw.api_secret = credentials.secret_key.clone();
        gw.owner_id   = Some(credentials.owner_id);
        Ok(gw)
    }

    /// Market-data-only session (klines need no key).
    pub fn public(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key:    String::new(),
            api_secret: String::new(),
            base_url:   base_url.trim_end_matches('/').to_owned(),
            time_sync:  TimeSync::new(),
            closed:     AtomicBool::new(false),
            owner_id:   None,
        })
    }

    /// Sign a query string with HMAC-SHA256.
    fn sign(&self, query: &str) -> Result<String, GatewayError> {
        sign_query(&self.api_secret, query)
    }

    fn ensure_open(&self) -> Result<(), GatewayError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::Closed);
        }
        Ok(())
    }

    /// Connectivity check (`GET /api/v3/ping`).
    pub async fn ping(&self) -> Result<(), GatewayError> {
        self.public_get("/api/v3/ping", "").await.map(|_| ())
    }

    /// Sync signing timestamps with the exchange clock.
    pub async fn sync_time(&self) -> Result<(), GatewayError> {
        self.time_sync.sync(&self.client, &self.base_url).await
    }

    async fn public_get(&self, path: &str, query: &str) -> Result<String, GatewayError> {
        self.ensure_open()?;
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        check_response(status.as_u16(), body)
    }

    async fn signed(&self, method: Method, path: &str, params: &str) -> Result<String, GatewayError> {
        self.ensure_open()?;
        let query = if params.is_empty() {
            format!("recvWindow={}&timestamp={}", RECV_WINDOW_MS, self.time_sync.timestamp_ms())
        } else {
            format!("{}&recvWindow={}&timestamp={}", params, RECV_WINDOW_MS, self.time_sync.timestamp_ms())
        };
        let signature = self.sign(&query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let resp = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        check_response(status.as_u16(), body)
    }
}

#[async_trait]
impl ExecutionGateway for BinanceSpotGateway {
    async fn get_candles(
        &self,
        symbol:   &str,
        interval: &str,
        limit:    usize,
    ) -> Result<Vec<Candle>, GatewayError> {
        let query = format!(
            "symbol={}&interval={}&limit={}",
            normalize_symbol(symbol), interval, limit
        );
        let body = self.public_get("/api/v3/klines", &query).await?;
        parse_klines(&body)
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, GatewayError> {
        let symbol = normalize_symbol(&order.symbol);
        let qty = format_decimal(order.quantity);

        let params = match order.price {
            Some(price) => format!(
                "symbol={}&side={}&type=LIMIT&timeInForce=GTC&quantity={}&price={}",
                symbol, order.side, qty, format_decimal(price)
            ),
            None => format!("symbol={}&side={}&type=MARKET&quantity={}", symbol, order.side, qty),
        };

        info!(
            "Placing {} {} {} @ {}",
            order.side, qty, symbol,
            order.price.map_or_else(|| "MARKET".to_owned(), format_decimal)
        );

        let body = self.signed(Method::POST, "/api/v3/order", &params).await?;
        let resp: OrderResponse = serde_json::from_str(&body)?;

        info!("Order placed: id={} {} {} status={}", resp.order_id, order.side, resp.symbol, resp.status);
        Ok(OrderAck {
            order_id:     resp.order_id,
            status:       resp.status,
            executed_qty: resp.executed_qty.parse().unwrap_or(0.0),
            profit:       None,
        })
    }

    async fn get_account_balance(&self) -> Result<Vec<AssetBalance>, GatewayError> {
        let body = self.signed(Method::GET, "/api/v3/account", "").await?;
        let account: AccountResponse = serde_json::from_str(&body)?;
        parse_balances(account)
    }

    async fn close(&self) -> Result<(), GatewayError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("Binance gateway closed (owner {:?})", self.owner_id);
        }
        Ok(())
    }
}

// ── Connector ─────────────────────────────────────────────────────────────

/// Opens a `BinanceSpotGateway` per bot and proves the credentials work:
/// ping, clock sync, then a signed account read.
#[derive(Debug, Clone)]
pub struct BinanceConnector {
    base_url: String,
    timeout:  Duration,
}

impl BinanceConnector {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self { base_url: base_url.to_owned(), timeout }
    }
}

#[async_trait]
impl GatewayConnector for BinanceConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<GatewayHandle, GatewayError> {
        let gateway = BinanceSpotGateway::new(credentials, &self.base_url, self.timeout)?;

        let checked = async {
            gateway.ping().await?;
            gateway.sync_time().await?;
            gateway.get_account_balance().await?;
            Ok::<_, GatewayError>(())
        }
        .await;

        if let Err(e) = checked {
            error!(
                "Failed to initialize Binance gateway for owner {} (credential {}): {e}",
                credentials.owner_id, credentials.credential_id
            );
            return Err(e);
        }

        info!("Binance gateway initialized for owner {}", credentials.owner_id);
        Ok(Arc::new(gateway))
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────

fn sign_query(secret: &str, query: &str) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Other(format!("HMAC key error: {e}")))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Map a non-2xx response to the exchange error payload when there is one.
fn check_response(status: u16, body: String) -> Result<String, GatewayError> {
    if (200..300).contains(&status) {
        return Ok(body);
    }
    match serde_json::from_str::<BinanceError>(&body) {
        Ok(e) => {
            error!("Binance API error {}: {}", e.code, e.msg);
            Err(GatewayError::Api { code: e.code, msg: e.msg })
        }
        Err(_) => {
            error!("HTTP {} - body: {}", status, body);
            Err(GatewayError::Status(status, body))
        }
    }
}

/// "BTC/USDT" → "BTCUSDT"
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.replace('/', "").to_uppercase()
}

/// Plain decimal without exponent or trailing zeros (max 8 dp).
fn format_decimal(v: f64) -> String {
    let s = format!("{:.8}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" { "0".to_owned() } else { s.to_owned() }
}

/// Binance kline rows: [openTime, "open", "high", "low", "close", "volume", ...]
fn parse_klines(body: &str) -> Result<Vec<Candle>, GatewayError> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body)?;
    rows.iter()
        .map(|row| {
            let num = |i: usize| -> Result<f64, GatewayError> {
                let v = row
                    .get(i)
                    .ok_or_else(|| GatewayError::Decode(format!("kline row missing field {i}")))?;
                match v {
                    Value::String(s) => s
                        .parse::<f64>()
                        .map_err(|e| GatewayError::Decode(format!("kline field {i}: {e}"))),
                    Value::Number(n) => n
                        .as_f64()
                        .ok_or_else(|| GatewayError::Decode(format!("kline field {i} out of range"))),
                    other => Err(GatewayError::Decode(format!("kline field {i}: unexpected {other}"))),
                }
            };
            let open_time = row
                .first()
                .and_then(Value::as_i64)
                .ok_or_else(|| GatewayError::Decode("kline row missing open time".into()))?;

            Ok(Candle {
                open_time,
                open:   num(1)?,
                high:   num(2)?,
                low:    num(3)?,
                close:  num(4)?,
                volume: num(5)?,
            })
        })
        .collect()
}

fn parse_balances(account: AccountResponse) -> Result<Vec<AssetBalance>, GatewayError> {
    let mut out = Vec::new();
    for b in account.balances {
        let free: f64 = b
            .free
            .parse()
            .map_err(|e| GatewayError::Decode(format!("balance {}: {e}", b.asset)))?;
        let locked: f64 = b
            .locked
            .parse()
            .map_err(|e| GatewayError::Decode(format!("balance {}: {e}", b.asset)))?;
        if free > 0.0 || locked > 0.0 {
            out.push(AssetBalance { asset: b.asset, free, locked });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_binance_docs() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_query(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn klines_parse() {
        let body = r#"[
            [1499040000000,"0.01634790","0.80000000","0.01575800","0.01577100","148976.11427815",1499644799999,"2434.19055334",308,"1756.87402397","28.46694368","0"],
            [1499040900000,"0.01577100","0.01600000","0.01500000","0.01590000","10.5",1499041799999,"0",1,"0","0","0"]
        ]"#;
        let candles = parse_klines(body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, 1499040000000);
        assert!((candles[0].high - 0.8).abs() < 1e-12);
        assert!((candles[1].close - 0.0159).abs() < 1e-12);
        assert!(candles[0].open_time < candles[1].open_time);
    }

    #[test]
    fn klines_reject_garbage() {
        assert!(matches!(parse_klines(r#"[[1, "x"]]"#), Err(GatewayError::Decode(_))));
        assert!(parse_klines("{}").is_err());
    }

    #[test]
    fn error_payload_maps_to_api_error() {
        let err = check_response(400, r#"{"code":-2010,"msg":"Account has insufficient balance"}"#.into())
            .unwrap_err();
        assert!(matches!(err, GatewayError::Api { code: -2010, .. }));

        let err = check_response(502, "Bad Gateway".into()).unwrap_err();
        assert!(matches!(err, GatewayError::Status(502, _)));

        assert_eq!(check_response(200, "{}".into()).unwrap(), "{}");
    }

    #[test]
    fn symbols_and_decimals() {
        assert_eq!(normalize_symbol("btc/usdt"), "BTCUSDT");
        assert_eq!(format_decimal(0.001), "0.001");
        assert_eq!(format_decimal(25000.0), "25000");
        assert_eq!(format_decimal(0.0), "0");
    }

    #[test]
    fn zero_balances_are_dropped() {
        let account: AccountResponse = serde_json::from_str(
            r#"{"balances":[{"asset":"BTC","free":"0.5","locked":"0.1"},{"asset":"ETH","free":"0.0","locked":"0.0"}]}"#,
        )
        .unwrap();
        let balances = parse_balances(account).unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].asset, "BTC");
        assert!((balances[0].total() - 0.6).abs() < 1e-12);
    }

    #[tokio::test]
    async fn closed_gateway_refuses_calls() {
        let gw = BinanceSpotGateway::public("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        gw.close().await.unwrap();
        gw.close().await.unwrap();
        let err = gw.get_candles("BTCUSDT", "15m", 10).await.unwrap_err();
        assert!(matches!(err, GatewayError::Closed));
    }
}
