/// config.rs - Centralised configuration loaded from .env
///
/// `AppConfig` is everything the binaries need; `EngineConfig` is the
/// subset the bot manager consumes, so tests can build it directly.
use std::env;
use std::time::Duration;

use anyhow::Result;

/// Pause after a failed iteration before the loop tries again.
pub const DEFAULT_ERROR_BACKOFF_SECS: u64 = 5;
pub const DEFAULT_TRADE_AMOUNT:       f64 = 10.0;
pub const DEFAULT_MAX_CONCURRENT_BOTS: usize = 10;

pub const MAINNET_REST_URL: &str = "https://api.binance.com";
pub const TESTNET_REST_URL: &str = "https://testnet.binance.vision";

#[derive(Debug, Clone)]
pub struct AppConfig {
    // ── Binance ──────────────────────────────────────────────────────
    pub use_testnet: bool,
    pub rest_url:    String,
    pub http_timeout_secs: u64,

    // ── Engine ───────────────────────────────────────────────────────
    /// Used when a start request does not carry an amount
    pub default_trade_amount: f64,
    /// 0 = unlimited
    pub max_concurrent_bots:  usize,
    pub error_backoff_secs:   u64,
    /// Submit market orders instead of GTC limits at the signal price
    pub market_orders:        bool,

    // ── Runner (single bot from env) ─────────────────────────────────
    pub api_key:           String,
    pub api_secret:        String,
    pub bot_owner_id:      u64,
    pub bot_credential_id: u64,
    pub bot_strategy:      String,
    pub bot_symbol:        String,
    pub bot_trade_amount:  Option<f64>,
}

impl AppConfig {
    /// Load configuration from environment variables (after dotenv).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // ignore missing .env

        let use_testnet = parse_bool("BINANCE_USE_TESTNET", true);
        let rest_url = env::var("BINANCE_REST_URL").unwrap_or_else(|_| {
            if use_testnet { TESTNET_REST_URL.into() } else { MAINNET_REST_URL.into() }
        });

        let bot_trade_amount = match env::var("BOT_TRADE_AMOUNT") {
            Ok(v) => Some(
                v.parse::<f64>()
                    .map_err(|e| anyhow::anyhow!("Config key BOT_TRADE_AMOUNT: {e}"))?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            use_testnet,
            rest_url,
            http_timeout_secs: parse_env("HTTP_TIMEOUT_SECS", 10u64)?,

            default_trade_amount: parse_env("DEFAULT_TRADE_AMOUNT", DEFAULT_TRADE_AMOUNT)?,
            max_concurrent_bots:  parse_env("MAX_CONCURRENT_BOTS", DEFAULT_MAX_CONCURRENT_BOTS)?,
            error_backoff_secs:   parse_env("ERROR_BACKOFF_SECS", DEFAULT_ERROR_BACKOFF_SECS)?,
            market_orders:        parse_bool("MARKET_ORDERS", false),

            api_key:           env::var("BINANCE_API_KEY").unwrap_or_default(),
            api_secret:        env::var("BINANCE_API_SECRET").unwrap_or_default(),
            bot_owner_id:      parse_env("BOT_OWNER_ID", 1u64)?,
            bot_credential_id: parse_env("BOT_CREDENTIAL_ID", 1u64)?,
            bot_strategy: env::var("BOT_STRATEGY").unwrap_or_else(|_| "simple_moving_average".into()),
            bot_symbol:   env::var("BOT_SYMBOL").unwrap_or_else(|_| "BTCUSDT".into()),
            bot_trade_amount,
        })
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            max_concurrent_bots: (self.max_concurrent_bots > 0).then_some(self.max_concurrent_bots),
            error_backoff:       Duration::from_secs(self.error_backoff_secs),
            market_orders:       self.market_orders,
        }
    }
}

/// Settings the bot manager and loops run with.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `None` = unlimited
    pub max_concurrent_bots: Option<usize>,
    pub error_backoff:       Duration,
    pub market_orders:       bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_bots: Some(DEFAULT_MAX_CONCURRENT_BOTS),
            error_backoff:       Duration::from_secs(DEFAULT_ERROR_BACKOFF_SECS),
            market_orders:       false,
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Config key {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_default_and_override() {
        assert_eq!(parse_env("BOT_ENGINE_TEST_UNSET_KEY", 7u64).unwrap(), 7);

        env::set_var("BOT_ENGINE_TEST_NUM", " 42 ");
        assert_eq!(parse_env("BOT_ENGINE_TEST_NUM", 0u64).unwrap(), 42);

        env::set_var("BOT_ENGINE_TEST_BAD", "forty");
        let err = parse_env("BOT_ENGINE_TEST_BAD", 0u64).unwrap_err();
        assert!(err.to_string().contains("BOT_ENGINE_TEST_BAD"));
    }

    #[test]
    fn parse_bool_values() {
        env::set_var("BOT_ENGINE_TEST_FLAG", "TRUE");
        assert!(parse_bool("BOT_ENGINE_TEST_FLAG", false));
        env::set_var("BOT_ENGINE_TEST_FLAG_OFF", "no");
        assert!(!parse_bool("BOT_ENGINE_TEST_FLAG_OFF", true));
        assert!(parse_bool("BOT_ENGINE_TEST_FLAG_UNSET", true));
    }

    #[test]
    fn zero_limit_means_unlimited() {
        let mut cfg = AppConfig {
            use_testnet: true,
            rest_url: TESTNET_REST_URL.into(),
            http_timeout_secs: 10,
            default_trade_amount: DEFAULT_TRADE_AMOUNT,
            max_concurrent_bots: 0,
            error_backoff_secs: 5,
            market_orders: false,
            api_key: String::new(),
            api_secret: String::new(),
            bot_owner_id: 1,
            bot_credential_id: 1,
            bot_strategy: "rsi".into(),
            bot_symbol: "BTCUSDT".into(),
            bot_trade_amount: None,
        };
        assert_eq!(cfg.engine().max_concurrent_bots, None);
        cfg.max_concurrent_bots = 3;
        assert_eq!(cfg.engine().max_concurrent_bots, Some(3));
    }
}
