use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;

use bot_engine::{
    AssetBalance, BotManager, BotSnapshot, BotStatus, Candle, Credentials, EngineConfig,
    ExecutionGateway, GatewayConnector, GatewayError, GatewayHandle, ManagerError, OrderAck,
    OrderRequest, Side, StartRequest, StrategyParams,
};

// ── Scripted gateway ──────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct Script {
    candles:        Vec<Candle>,
    fail_candles:   bool,
    fail_orders:    bool,
    panic_on_fetch: bool,
    profit:         Option<f64>,
}

#[derive(Default)]
struct Probe {
    connects: AtomicUsize,
    closes:   AtomicUsize,
    orders:   Mutex<Vec<OrderRequest>>,
}

struct MockGateway {
    script: Script,
    probe:  Arc<Probe>,
}

#[async_trait]
impl ExecutionGateway for MockGateway {
    async fn get_candles(
        &self,
        _symbol:   &str,
        _interval: &str,
        limit:     usize,
    ) -> Result<Vec<Candle>, GatewayError> {
        if self.script.panic_on_fetch {
            panic!("exchange adapter blew up");
        }
        if self.script.fail_candles {
            return Err(GatewayError::Status(503, "unavailable".into()));
        }
        let skip = self.script.candles.len().saturating_sub(limit);
        Ok(self.script.candles[skip..].to_vec())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, GatewayError> {
        self.probe.orders.lock().unwrap().push(order.clone());
        if self.script.fail_orders {
            return Err(GatewayError::Api { code: -2010, msg: "insufficient balance".into() });
        }
        Ok(OrderAck {
            order_id:     42,
            status:       "NEW".into(),
            executed_qty: 0.0,
            profit:       self.script.profit,
        })
    }

    async fn get_account_balance(&self) -> Result<Vec<AssetBalance>, GatewayError> {
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockConnector {
    script:       Script,
    fail_connect: bool,
    probe:        Arc<Probe>,
}

#[async_trait]
impl GatewayConnector for MockConnector {
    async fn connect(&self, _credentials: &Credentials) -> Result<GatewayHandle, GatewayError> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(GatewayError::Api { code: -2015, msg: "Invalid API-key".into() });
        }
        Ok(Arc::new(MockGateway { script: self.script.clone(), probe: Arc::clone(&self.probe) }))
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────

fn engine_config(limit: Option<usize>) -> EngineConfig {
    EngineConfig {
        max_concurrent_bots: limit,
        error_backoff:       Duration::from_secs(5),
        market_orders:       false,
    }
}

fn manager_with(script: Script, fail_connect: bool, limit: Option<usize>) -> (BotManager, Arc<Probe>) {
    let probe = Arc::new(Probe::default());
    let connector = MockConnector { script, fail_connect, probe: Arc::clone(&probe) };
    (BotManager::new(Arc::new(connector), engine_config(limit)), probe)
}

fn manager(script: Script) -> (BotManager, Arc<Probe>) {
    manager_with(script, false, None)
}

fn request(owner_id: u64, strategy: &str) -> StartRequest {
    StartRequest {
        credentials: Credentials {
            owner_id,
            credential_id: owner_id * 10,
            api_key:    "key".into(),
            secret_key: "secret".into(),
        },
        strategy:     strategy.into(),
        params:       StrategyParams::default(),
        symbol:       "BTCUSDT".into(),
        trade_amount: 2.0,
    }
}

/// 34 strictly falling closes, 200 → 167: RSI(14) = 0
fn falling_candles() -> Vec<Candle> {
    (0..34)
        .map(|i| {
            let c = 200.0 - i as f64;
            Candle { open_time: i * 900_000, open: c, high: c, low: c, close: c, volume: 1.0 }
        })
        .collect()
}

async fn wait_for(
    manager:   &BotManager,
    owner_id:  u64,
    bot_id:    &str,
    predicate: impl FnMut(&BotSnapshot) -> bool,
) -> BotSnapshot {
    let mut rx = manager.subscribe(owner_id, bot_id).expect("bot registered");
    let snapshot = tokio::time::timeout(Duration::from_secs(3600), rx.wait_for(predicate))
        .await
        .expect("condition reached before timeout")
        .expect("snapshot channel open")
        .clone();
    snapshot
}

// ── Start validation ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unknown_strategy_is_rejected_without_registering() {
    let (manager, probe) = manager(Script::default());

    let err = manager.start(request(1, "macd")).await.unwrap_err();
    match err {
        ManagerError::UnknownStrategy { name, available } => {
            assert_eq!(name, "macd");
            assert!(available.contains("simple_moving_average"));
            assert!(available.contains("ema_rsi"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(manager.active_count(), 0);
    assert!(manager.list_for_owner(1).is_empty());
    assert_eq!(probe.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn invalid_params_are_rejected() {
    let (manager, _probe) = manager(Script::default());

    let mut req = request(1, "sma");
    req.params.short_period = 30;
    req.params.long_period = 10;
    assert!(matches!(manager.start(req).await, Err(ManagerError::InvalidParams(_))));

    let mut req = request(1, "rsi");
    req.trade_amount = 0.0;
    assert!(matches!(manager.start(req).await, Err(ManagerError::InvalidParams(_))));
    assert_eq!(manager.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_initialization_is_not_registered() {
    let (manager, probe) = manager_with(Script::default(), true, Some(1));

    let err = manager.start(request(1, "rsi")).await.unwrap_err();
    assert!(matches!(err, ManagerError::Initialization(GatewayError::Api { code: -2015, .. })));
    assert_eq!(manager.active_count(), 0);
    assert!(manager.list_for_owner(1).is_empty());
    assert!(manager.list_active().is_empty());
    assert_eq!(probe.connects.load(Ordering::SeqCst), 1);

    // The reserved slot was handed back
    let err = manager.start(request(1, "rsi")).await.unwrap_err();
    assert!(matches!(err, ManagerError::Initialization(_)));
}

// ── Lifecycle ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn start_then_stop() {
    let (manager, probe) = manager(Script::default());

    let id = manager.start(request(1, "simple_moving_average")).await.unwrap();
    assert!(id.starts_with("bot_1_"));

    let snap = manager.status(1, &id).expect("owner sees own bot");
    assert_eq!(snap.status, BotStatus::Running);
    assert!(snap.running);
    assert_eq!(snap.owner_id, 1);
    assert_eq!(snap.credential_id, 10);
    assert_eq!(snap.symbol, "BTCUSDT");
    assert_eq!(manager.active_count(), 1);
    assert_eq!(manager.list_for_owner(1).len(), 1);
    assert_eq!(manager.list_active().len(), 1);

    assert!(manager.stop(1, &id).await.unwrap());

    let snap = manager.status(1, &id).expect("stopped bot stays queryable");
    assert_eq!(snap.status, BotStatus::Stopped);
    assert!(!snap.running);
    assert_eq!(manager.active_count(), 0);
    assert!(manager.list_for_owner(1).is_empty());
    assert!(manager.list_active().is_empty());
    assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_is_owner_checked_and_idempotent() {
    let script = Script { candles: falling_candles(), profit: Some(1.0), ..Default::default() };
    let (manager, probe) = manager(script);
    let id = manager.start(request(1, "rsi")).await.unwrap();
    let before = wait_for(&manager, 1, &id, |s| s.stats.total_trades >= 1).await;

    assert!(matches!(
        manager.stop(2, &id).await,
        Err(ManagerError::PermissionDenied { bot_id }) if bot_id == id
    ));
    assert!(manager.status(2, &id).is_none());
    assert!(manager.subscribe(2, &id).is_none());

    let after = manager.status(1, &id).unwrap();
    assert_eq!(after.status, BotStatus::Running);
    assert!(after.running);
    assert_eq!(after.stats, before.stats);
    assert_eq!(after.stats.successful_trades, 1);
    assert_eq!(manager.list_for_owner(1).len(), 1);

    assert!(!manager.stop(1, "bot_1_nope").await.unwrap());

    assert!(manager.stop(1, &id).await.unwrap());
    assert!(!manager.stop(1, &id).await.unwrap());
    assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_completes_when_caller_gives_up() {
    let (manager, probe) = manager(Script::default());
    let id = manager.start(request(1, "rsi")).await.unwrap();

    // Caller is dropped while waiting for the loop to exit
    let _ = tokio::time::timeout(Duration::ZERO, manager.stop(1, &id)).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let snap = manager.status(1, &id).expect("record kept");
    assert_eq!(snap.status, BotStatus::Stopped);
    assert!(!snap.running);
    assert_eq!(manager.active_count(), 0);
    assert!(manager.list_active().is_empty());
    assert!(manager.list_for_owner(1).is_empty());
    assert_eq!(probe.closes.load(Ordering::SeqCst), 1);

    assert!(!manager.stop(1, &id).await.unwrap());
    assert!(manager.purge(1, &id).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn cancelled_stop_frees_capacity() {
    let (manager, _probe) = manager_with(Script::default(), false, Some(1));
    let id = manager.start(request(1, "rsi")).await.unwrap();

    let _ = tokio::time::timeout(Duration::ZERO, manager.stop(1, &id)).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(manager.start(request(2, "rsi")).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn purge_removes_only_stopped_bots() {
    let (manager, _probe) = manager(Script::default());
    let id = manager.start(request(1, "rsi")).await.unwrap();

    assert!(!manager.purge(1, &id).await.unwrap());
    assert!(matches!(manager.purge(2, &id).await, Err(ManagerError::PermissionDenied { .. })));

    manager.stop(1, &id).await.unwrap();
    assert!(manager.purge(1, &id).await.unwrap());
    assert!(manager.status(1, &id).is_none());
    assert!(!manager.purge(1, &id).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn concurrent_starts_get_distinct_bots() {
    let script = Script { candles: falling_candles(), profit: Some(0.5), ..Default::default() };
    let (manager, _probe) = manager(script);
    let manager = Arc::new(manager);

    let mut set = JoinSet::new();
    for _ in 0..5 {
        let manager = Arc::clone(&manager);
        set.spawn(async move { manager.start(request(7, "rsi")).await });
    }
    let mut ids = Vec::new();
    while let Some(res) = set.join_next().await {
        ids.push(res.unwrap().unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);
    assert_eq!(manager.active_count(), 5);
    assert_eq!(manager.list_for_owner(7).len(), 5);

    let mut before = Vec::new();
    for id in &ids {
        before.push(wait_for(&manager, 7, id, |s| s.stats.total_trades >= 1).await);
    }

    assert!(manager.stop(7, &ids[0]).await.unwrap());
    assert_eq!(manager.active_count(), 4);
    assert_eq!(manager.status(7, &ids[0]).unwrap().status, BotStatus::Stopped);
    for (id, prev) in ids.iter().zip(&before).skip(1) {
        let now = manager.status(7, id).unwrap();
        assert_eq!(now.status, BotStatus::Running);
        assert!(now.running);
        assert_eq!(now.stats, prev.stats);
        assert_eq!(now.stats.total_trades, 1);
    }

    manager.shutdown().await;
    assert_eq!(manager.active_count(), 0);
    assert!(manager.list_for_owner(7).is_empty());
}

#[tokio::test(start_paused = true)]
async fn capacity_limit_is_enforced() {
    let (manager, _probe) = manager_with(Script::default(), false, Some(2));

    let a = manager.start(request(1, "rsi")).await.unwrap();
    let _b = manager.start(request(2, "rsi")).await.unwrap();
    assert!(matches!(
        manager.start(request(3, "rsi")).await,
        Err(ManagerError::CapacityExceeded { limit: 2 })
    ));

    manager.stop(1, &a).await.unwrap();
    assert!(manager.start(request(3, "rsi")).await.is_ok());
}

// ── Execution loop ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn successful_order_updates_counters() {
    let script = Script { candles: falling_candles(), profit: Some(2.5), ..Default::default() };
    let (manager, probe) = manager(script);
    let id = manager.start(request(1, "rsi")).await.unwrap();

    let snap = wait_for(&manager, 1, &id, |s| s.stats.total_trades >= 1).await;
    assert_eq!(snap.stats.total_trades, 1);
    assert_eq!(snap.stats.successful_trades, 1);
    assert_eq!(snap.stats.failed_trades, 0);
    assert!((snap.stats.total_profit - 2.5).abs() < 1e-12);

    let orders = probe.orders.lock().unwrap().clone();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, Side::Buy);
    assert_eq!(orders[0].symbol, "BTCUSDT");
    assert_eq!(orders[0].quantity, 2.0);
    assert_eq!(orders[0].price, Some(167.0));

    manager.stop(1, &id).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn rejected_order_counts_as_failed_trade() {
    let script = Script { candles: falling_candles(), fail_orders: true, ..Default::default() };
    let (manager, _probe) = manager(script);
    let id = manager.start(request(1, "rsi")).await.unwrap();

    let snap = wait_for(&manager, 1, &id, |s| s.stats.total_trades >= 1).await;
    assert_eq!(snap.stats.total_trades, 1);
    assert_eq!(snap.stats.successful_trades, 0);
    assert_eq!(snap.stats.failed_trades, 1);
    assert_eq!(snap.stats.total_profit, 0.0);
    assert_eq!(snap.status, BotStatus::Running);

    manager.stop(1, &id).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn fetch_failures_back_off_and_keep_running() {
    let script = Script { fail_candles: true, ..Default::default() };
    let (manager, _probe) = manager(script);
    let id = manager.start(request(1, "sma")).await.unwrap();

    let snap = wait_for(&manager, 1, &id, |s| s.stats.failed_trades >= 2).await;
    assert_eq!(snap.stats.total_trades, 0);
    assert_eq!(snap.status, BotStatus::Running);
    assert!(snap.running);

    assert!(manager.stop(1, &id).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn short_history_produces_no_orders() {
    let script = Script { candles: falling_candles()[..5].to_vec(), ..Default::default() };
    let (manager, probe) = manager(script);
    let id = manager.start(request(1, "ema_rsi")).await.unwrap();

    // Two full polling cycles
    tokio::time::sleep(Duration::from_secs(601)).await;
    let snap = manager.status(1, &id).unwrap();
    assert_eq!(snap.stats.total_trades, 0);
    assert_eq!(snap.stats.failed_trades, 0);
    assert!(probe.orders.lock().unwrap().is_empty());

    manager.stop(1, &id).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn panicking_loop_is_marked_error() {
    let script = Script { panic_on_fetch: true, ..Default::default() };
    let (manager, probe) = manager(script);
    let id = manager.start(request(1, "rsi")).await.unwrap();

    let snap = wait_for(&manager, 1, &id, |s| s.status == BotStatus::Error && !s.running).await;
    assert_eq!(snap.status, BotStatus::Error);
    assert_eq!(manager.active_count(), 0);
    assert!(manager.list_active().is_empty());
    // Still listed for its owner until stopped
    assert_eq!(manager.list_for_owner(1).len(), 1);

    assert!(manager.stop(1, &id).await.unwrap());
    assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
    assert!(manager.list_for_owner(1).is_empty());
}
