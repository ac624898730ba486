/// bot.rs - Bot instance state and the per-bot execution loop
///
/// LOOP (one task per bot, strictly sequential):
///
///   ┌──────────────────────────────────────────────────────────┐
///   │ get_candles ─▶ strategy.analyze ─▶ [place_order] ─▶ sleep │
///   │      │                                                  │
///   │      └─ gateway error ─▶ failed += 1 ─▶ sleep(backoff)   │
///   └──────────────────────────────────────────────────────────┘
///
/// Every suspension point (fetch, order, sleep) races the shutdown
/// channel, so a stop request is observed at the next await at the latest.
///
/// The loop runs as a worker task under a supervisor.  The supervisor turns
/// a worker panic into status `Error` and closes the gateway on every exit
/// path (normal, cancelled, panicked).
///
/// The loop is the only writer of the counters; readers get the latest
/// published `BotSnapshot` through a `watch` channel.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::EngineConfig;
use crate::error::GatewayError;
use crate::gateway::{ExecutionGateway, GatewayHandle};
use crate::models::OrderRequest;
use crate::strategy::{StrategyEngine, StrategyKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Initializing,
    Running,
    Stopped,
    /// Loop died on an unrecoverable fault; record kept for inspection
    Error,
    /// Gateway could not be initialised; loop never scheduled
    Failed,
}

/// Trade accounting.  Counts never decrease.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotStats {
    pub total_trades:      u64,
    pub successful_trades: u64,
    pub failed_trades:     u64,
    pub total_profit:      f64,
}

/// Point-in-time view of a bot, safe to hand to any reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotSnapshot {
    pub bot_id:        String,
    pub owner_id:      u64,
    pub credential_id: u64,
    pub strategy:      StrategyKind,
    pub symbol:        String,
    pub trade_amount:  f64,
    pub status:        BotStatus,
    /// True while the execution loop is alive
    pub running:       bool,
    pub created_at:    DateTime<Utc>,
    pub last_update:   DateTime<Utc>,
    pub stats:         BotStats,
}

impl BotSnapshot {
    pub fn new(
        bot_id:        String,
        owner_id:      u64,
        credential_id: u64,
        strategy:      StrategyKind,
        symbol:        String,
        trade_amount:  f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            bot_id,
            owner_id,
            credential_id,
            strategy,
            symbol,
            trade_amount,
            status: BotStatus::Initializing,
            running: false,
            created_at: now,
            last_update: now,
            stats: BotStats::default(),
        }
    }
}

/// Everything one bot loop owns.
pub(crate) struct BotTask {
    pub snapshot: Arc<watch::Sender<BotSnapshot>>,
    pub strategy: StrategyEngine,
    pub gateway:  GatewayHandle,
    pub symbol:   String,
    pub config:   EngineConfig,
    pub shutdown: watch::Receiver<bool>,
}

/// Run a bot to completion: worker loop, fault capture, gateway release.
pub(crate) async fn supervise(task: BotTask) {
    let snapshot = Arc::clone(&task.snapshot);
    let gateway  = Arc::clone(&task.gateway);
    let bot_id   = snapshot.borrow().bot_id.clone();
    let span = info_span!("bot", bot_id = %bot_id, symbol = %task.symbol);

    let worker = tokio::spawn(run_loop(task).instrument(span.clone()));

    async move {
        match worker.await {
            Ok(()) => info!("loop ended"),
            Err(e) if e.is_panic() => {
                error!("fatal error in bot loop: {e}");
                snapshot.send_modify(|s| s.status = BotStatus::Error);
            }
            Err(e) => warn!("loop task cancelled: {e}"),
        }
        snapshot.send_modify(|s| s.running = false);

        if let Err(e) = gateway.close().await {
            warn!("gateway close failed: {e}");
        }
    }
    .instrument(span)
    .await
}

async fn run_loop(task: BotTask) {
    let BotTask { snapshot, mut strategy, gateway, symbol, config, mut shutdown } = task;
    let mut stats = snapshot.borrow().stats.clone();

    info!(
        "loop started: strategy={} interval={} poll={}s",
        strategy.kind(),
        strategy.candle_interval(),
        strategy.polling_interval().as_secs()
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let outcome = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            r = iterate(&mut strategy, gateway.as_ref(), &symbol, &config, &mut stats) => r,
        };

        let pause = match outcome {
            Ok(()) => {
                snapshot.send_modify(|s| {
                    s.stats = stats.clone();
                    s.last_update = Utc::now();
                });
                strategy.polling_interval()
            }
            Err(e) => {
                error!("iteration failed: {e}");
                stats.failed_trades += 1;
                snapshot.send_modify(|s| s.stats = stats.clone());
                config.error_backoff
            }
        };

        if !sleep_or_shutdown(pause, &mut shutdown).await {
            break;
        }
    }

    info!("loop cancelled");
}

/// One poll → analyse → act cycle.  Order failures are counted here and
/// are not errors; anything returned as `Err` goes through the backoff path.
async fn iterate(
    strategy: &mut StrategyEngine,
    gateway:  &dyn ExecutionGateway,
    symbol:   &str,
    config:   &EngineConfig,
    stats:    &mut BotStats,
) -> Result<(), GatewayError> {
    let candles = gateway
        .get_candles(symbol, strategy.candle_interval(), strategy.window_size())
        .await?;

    let Some((side, intent)) = strategy.analyze(&candles).into_order() else {
        debug!("no signal ({} candles)", candles.len());
        return Ok(());
    };

    let order = OrderRequest {
        symbol:   symbol.to_owned(),
        side,
        quantity: intent.quantity,
        price:    (!config.market_orders).then_some(intent.price),
    };
    info!(
        "executing {} {} qty={} price={:?}: {}",
        side, symbol, order.quantity, order.price, intent.reason
    );

    stats.total_trades += 1;
    match gateway.place_order(&order).await {
        Ok(ack) => {
            info!("order {} accepted ({})", ack.order_id, ack.status);
            stats.successful_trades += 1;
            stats.total_profit += ack.profit.unwrap_or(0.0);
        }
        Err(e) => {
            error!("order failed: {e}");
            stats.failed_trades += 1;
        }
    }
    Ok(())
}

/// Sleep for `pause` unless shutdown arrives first.  `false` = shut down.
async fn sleep_or_shutdown(pause: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.changed() => false,
        _ = tokio::time::sleep(pause) => true,
    }
}
