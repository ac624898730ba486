/// manager.rs - Bot registry and lifecycle
///
/// REGISTRY
///   bots   : bot_id   → entry (owner, snapshot channel, shutdown, task)
///   owners : owner_id → [bot_id]   (bots not yet stopped)
///
/// Both maps are `DashMap`s; no guard is ever held across an `.await`.
/// A stopped bot leaves the owner's list but its record stays queryable
/// until `purge`.
///
/// LIFECYCLE
///   start : validate strategy → reserve slot → connect gateway
///           ─ fail ─▶ Failed (not registered, error returned)
///           ─ ok ───▶ spawn loop → Running → register
///   stop  : ownership check → signal shutdown → finalizer task awaits the
///           loop (gateway is closed by the loop's supervisor) → Stopped →
///           unlist
///
/// The finalizer is a detached task holding the bot's stop lock, so the
/// terminal bookkeeping completes even if the caller of `stop` is dropped
/// mid-await.
use std::sync::Arc;

use ahash::RandomState;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{watch, Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bot::{supervise, BotSnapshot, BotStatus, BotTask};
use crate::config::EngineConfig;
use crate::error::ManagerError;
use crate::gateway::{Credentials, GatewayConnector};
use crate::strategy::{StrategyEngine, StrategyKind, StrategyParams};

pub type BotId = String;

/// Everything needed to start a bot.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub credentials:  Credentials,
    pub strategy:     String,
    pub params:       StrategyParams,
    pub symbol:       String,
    pub trade_amount: f64,
}

/// Live part of a registered bot; gone once stopped.
struct LoopHandle {
    task:   JoinHandle<()>,
    _permit: Option<OwnedSemaphorePermit>,
}

struct BotEntry {
    owner_id: u64,
    snapshot: Arc<watch::Sender<BotSnapshot>>,
    shutdown: watch::Sender<bool>,
    /// Held until a stop is fully recorded, so concurrent stops serialise.
    running:  Arc<Mutex<Option<LoopHandle>>>,
}

impl BotEntry {
    fn current(&self) -> BotSnapshot {
        self.snapshot.borrow().clone()
    }
}

pub struct BotManager {
    connector: Arc<dyn GatewayConnector>,
    config:    EngineConfig,
    slots:     Option<Arc<Semaphore>>,
    bots:      DashMap<BotId, Arc<BotEntry>, RandomState>,
    owners:    Arc<Owners>,
}

type Owners = DashMap<u64, Vec<BotId>, RandomState>;

impl BotManager {
    pub fn new(connector: Arc<dyn GatewayConnector>, config: EngineConfig) -> Self {
        let slots = config.max_concurrent_bots.map(|n| Arc::new(Semaphore::new(n)));
        Self {
            connector,
            config,
            slots,
            bots:   DashMap::with_hasher(RandomState::new()),
            owners: Arc::new(DashMap::with_hasher(RandomState::new())),
        }
    }

    /// Start a bot and return its id.
    pub async fn start(&self, request: StartRequest) -> Result<BotId, ManagerError> {
        let StartRequest { credentials, strategy, params, symbol, trade_amount } = request;
        let owner_id = credentials.owner_id;

        let kind: StrategyKind = strategy.parse()?;
        let engine = StrategyEngine::build(kind, &params, trade_amount)?;

        let permit = match &self.slots {
            Some(slots) => Some(Arc::clone(slots).try_acquire_owned().map_err(|_| {
                ManagerError::CapacityExceeded {
                    limit: self.config.max_concurrent_bots.unwrap_or_default(),
                }
            })?),
            None => None,
        };

        let bot_id = format!("bot_{}_{}", owner_id, Uuid::new_v4().simple());
        let (snapshot_tx, _) = watch::channel(BotSnapshot::new(
            bot_id.clone(),
            owner_id,
            credentials.credential_id,
            kind,
            symbol.clone(),
            trade_amount,
        ));
        let snapshot = Arc::new(snapshot_tx);

        let gateway = match self.connector.connect(&credentials).await {
            Ok(g) => g,
            Err(e) => {
                snapshot.send_modify(|s| s.status = BotStatus::Failed);
                error!(bot_id = %bot_id, owner_id, "failed to start bot: {e}");
                return Err(ManagerError::Initialization(e));
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        snapshot.send_modify(|s| {
            s.status = BotStatus::Running;
            s.running = true;
            s.last_update = Utc::now();
        });

        let task = tokio::spawn(supervise(BotTask {
            snapshot: Arc::clone(&snapshot),
            strategy: engine,
            gateway,
            symbol: symbol.clone(),
            config: self.config.clone(),
            shutdown: shutdown_rx,
        }));

        let entry = Arc::new(BotEntry {
            owner_id,
            snapshot,
            shutdown: shutdown_tx,
            running: Arc::new(Mutex::new(Some(LoopHandle { task, _permit: permit }))),
        });
        self.bots.insert(bot_id.clone(), entry);
        self.owners.entry(owner_id).or_default().push(bot_id.clone());

        info!(bot_id = %bot_id, owner_id, "bot started: {} on {}", kind, symbol);
        Ok(bot_id)
    }

    /// Stop a bot.  `Ok(false)` when the id is unknown or already stopped.
    pub async fn stop(&self, owner_id: u64, bot_id: &str) -> Result<bool, ManagerError> {
        let Some(entry) = self.entry(bot_id) else {
            return Ok(false);
        };
        if entry.owner_id != owner_id {
            return Err(ManagerError::PermissionDenied { bot_id: bot_id.to_owned() });
        }

        let mut running = Arc::clone(&entry.running).lock_owned().await;
        let Some(handle) = running.take() else {
            return Ok(false);
        };

        // Receiver is gone only if the loop already ended
        let _ = entry.shutdown.send(true);
        let finalizer = tokio::spawn(finish_stop(
            Arc::clone(&entry),
            running,
            handle,
            Arc::clone(&self.owners),
            bot_id.to_owned(),
        ));

        if let Err(e) = finalizer.await {
            warn!(bot_id = %bot_id, "stop finalizer ended abnormally: {e}");
        }
        Ok(true)
    }

    /// Drop the record of a stopped bot.  `Ok(false)` when unknown or not
    /// stopped yet.
    pub async fn purge(&self, owner_id: u64, bot_id: &str) -> Result<bool, ManagerError> {
        let Some(entry) = self.entry(bot_id) else {
            return Ok(false);
        };
        if entry.owner_id != owner_id {
            return Err(ManagerError::PermissionDenied { bot_id: bot_id.to_owned() });
        }
        if entry.running.lock().await.is_some() {
            return Ok(false);
        }
        Ok(self.bots.remove(bot_id).is_some())
    }

    /// Snapshot of a bot owned by `owner_id`.
    pub fn status(&self, owner_id: u64, bot_id: &str) -> Option<BotSnapshot> {
        self.owned(owner_id, bot_id).map(|e| e.current())
    }

    /// Follow a bot's snapshots as the loop publishes them.
    pub fn subscribe(&self, owner_id: u64, bot_id: &str) -> Option<watch::Receiver<BotSnapshot>> {
        self.owned(owner_id, bot_id).map(|e| e.snapshot.subscribe())
    }

    /// Bots of `owner_id` that have not been stopped.
    pub fn list_for_owner(&self, owner_id: u64) -> Vec<BotSnapshot> {
        let ids = self
            .owners
            .get(&owner_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();

        ids.iter()
            .filter_map(|id| self.entry(id))
            .map(|e| e.current())
            .collect()
    }

    /// Running bots across all owners.
    pub fn list_active(&self) -> Vec<BotSnapshot> {
        self.bots
            .iter()
            .map(|e| e.current())
            .filter(|s| s.status == BotStatus::Running)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.bots
            .iter()
            .filter(|e| e.current().status == BotStatus::Running)
            .count()
    }

    /// Stop every bot that is still running.
    pub async fn shutdown(&self) {
        let targets: Vec<(u64, BotId)> = self
            .bots
            .iter()
            .map(|e| (e.owner_id, e.key().clone()))
            .collect();

        for (owner_id, bot_id) in targets {
            if let Err(e) = self.stop(owner_id, &bot_id).await {
                warn!(bot_id = %bot_id, "stop during shutdown failed: {e}");
            }
        }
    }

    fn entry(&self, bot_id: &str) -> Option<Arc<BotEntry>> {
        self.bots.get(bot_id).map(|e| Arc::clone(e.value()))
    }

    fn owned(&self, owner_id: u64, bot_id: &str) -> Option<Arc<BotEntry>> {
        self.entry(bot_id).filter(|e| e.owner_id == owner_id)
    }

}

/// Await the loop's exit and record the stop.  Runs detached from the
/// caller of `stop`; `_running` keeps other stops/purges waiting until the
/// record is final.
async fn finish_stop(
    entry:    Arc<BotEntry>,
    _running: OwnedMutexGuard<Option<LoopHandle>>,
    handle:   LoopHandle,
    owners:   Arc<Owners>,
    bot_id:   BotId,
) {
    let LoopHandle { task, _permit: permit } = handle;
    if let Err(e) = task.await {
        warn!(bot_id = %bot_id, "bot supervisor ended abnormally: {e}");
    }
    drop(permit);

    entry.snapshot.send_modify(|s| {
        s.status = BotStatus::Stopped;
        s.running = false;
        s.last_update = Utc::now();
    });
    unlist(&owners, entry.owner_id, &bot_id);

    info!(bot_id = %bot_id, owner_id = entry.owner_id, "bot stopped");
}

fn unlist(owners: &Owners, owner_id: u64, bot_id: &str) {
    if let Some(mut ids) = owners.get_mut(&owner_id) {
        ids.retain(|id| id != bot_id);
    }
    owners.remove_if(&owner_id, |_, ids| ids.is_empty());
}
