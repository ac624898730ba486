/// main.rs - Bot runner entry point
///
/// Starts one bot from environment configuration and keeps it running
/// until Ctrl-C.
///
/// FLOW:
///   1. Load config from .env (BINANCE_API_KEY, BOT_STRATEGY, ...)
///   2. Build the bot manager over the Binance spot connector
///   3. Start the configured bot (gateway ping + time sync + account check)
///   4. Log a status line every minute
///   5. On Ctrl-C: stop every bot and exit
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::{interval, Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bot_engine::config::AppConfig;
use bot_engine::live::BinanceConnector;
use bot_engine::{BotManager, Credentials, StartRequest, StrategyParams};

const STATUS_EVERY_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════╗");
    info!("║        BOT ENGINE  -  BINANCE SPOT RUNNER    ║");
    info!("╚══════════════════════════════════════════════╝");

    let cfg = AppConfig::from_env()?;
    if cfg.use_testnet {
        info!("TESTNET active - no real funds at risk ({})", cfg.rest_url);
    } else {
        warn!("⚠️  LIVE MODE - REAL MONEY - ensure all parameters are correct!");
    }
    if cfg.api_key.is_empty() || cfg.api_secret.is_empty() {
        anyhow::bail!("BINANCE_API_KEY and BINANCE_API_SECRET must be set");
    }

    let connector = BinanceConnector::new(&cfg.rest_url, Duration::from_secs(cfg.http_timeout_secs));
    let manager = BotManager::new(Arc::new(connector), cfg.engine());

    let request = StartRequest {
        credentials: Credentials {
            owner_id:      cfg.bot_owner_id,
            credential_id: cfg.bot_credential_id,
            api_key:       cfg.api_key.clone(),
            secret_key:    cfg.api_secret.clone(),
        },
        strategy:     cfg.bot_strategy.clone(),
        params:       StrategyParams::default(),
        symbol:       cfg.bot_symbol.clone(),
        trade_amount: cfg.bot_trade_amount.unwrap_or(cfg.default_trade_amount),
    };

    let bot_id = manager
        .start(request)
        .await
        .with_context(|| format!("starting {} on {}", cfg.bot_strategy, cfg.bot_symbol))?;
    info!("Bot {} running - Ctrl-C to stop", bot_id);

    let mut ticker = interval(Duration::from_secs(STATUS_EVERY_SECS));
    ticker.tick().await;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("listening for Ctrl-C")?;
                break;
            }
            _ = ticker.tick() => {
                if let Some(s) = manager.status(cfg.bot_owner_id, &bot_id) {
                    info!(
                        "Status: {:?}  trades={} ok={} failed={} profit={:.4}",
                        s.status,
                        s.stats.total_trades,
                        s.stats.successful_trades,
                        s.stats.failed_trades,
                        s.stats.total_profit
                    );
                }
            }
        }
    }

    info!("Shutting down {} bot(s)...", manager.active_count());
    manager.shutdown().await;
    info!("Done");
    Ok(())
}
