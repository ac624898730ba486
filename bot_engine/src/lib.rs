pub mod backtest;
pub mod bot;
pub mod config;
pub mod error;
pub mod gateway;
pub mod indicators;
pub mod live;
pub mod manager;
pub mod models;
pub mod strategy;
pub mod time_sync;

pub use bot::{BotSnapshot, BotStats, BotStatus};
pub use config::{AppConfig, EngineConfig};
pub use error::{GatewayError, ManagerError, StrategyError};
pub use gateway::{Credentials, ExecutionGateway, GatewayConnector, GatewayHandle};
pub use manager::{BotId, BotManager, StartRequest};
pub use models::*;
pub use strategy::{StrategyEngine, StrategyKind, StrategyParams};
