//! Error types for the gateway, strategies and the bot manager.

use thiserror::Error;

/// Failures talking to an execution gateway.
///
/// Any of these during a bot iteration is recoverable: the loop counts a
/// failure, backs off and carries on.  Only a failure while connecting
/// (`GatewayConnector::connect`) is fatal for the bot.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-level failure (DNS, TLS, timeout, ...).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The exchange rejected the request with an error payload.
    #[error("exchange error {code}: {msg}")]
    Api { code: i64, msg: String },

    /// Non-success status without a parseable error payload.
    #[error("unexpected status {0}: {1}")]
    Status(u16, String),

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Gateway was used after `close()`.
    #[error("gateway closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Decode(e.to_string())
    }
}

/// Failures selecting or configuring a strategy.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StrategyError {
    #[error("unknown strategy: {0}")]
    Unknown(String),

    #[error("invalid strategy parameters: {0}")]
    InvalidParams(String),
}

/// Errors surfaced by `BotManager` operations.
///
/// An unknown bot id is not an error: `stop` answers `Ok(false)` and
/// `status` answers `None`.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Nothing was registered.
    #[error("unknown strategy: {name} (available: {available})")]
    UnknownStrategy { name: String, available: String },

    /// Nothing was registered.
    #[error("invalid strategy parameters: {0}")]
    InvalidParams(String),

    /// Gateway authentication/connectivity failed; the bot never ran.
    #[error("initialization failed: {0}")]
    Initialization(#[source] GatewayError),

    #[error("bot {bot_id} does not belong to this owner")]
    PermissionDenied { bot_id: String },

    #[error("concurrent bot limit reached ({limit})")]
    CapacityExceeded { limit: usize },
}

impl From<StrategyError> for ManagerError {
    fn from(e: StrategyError) -> Self {
        match e {
            StrategyError::Unknown(name) => ManagerError::UnknownStrategy {
                name,
                available: crate::strategy::StrategyKind::available().join(", "),
            },
            StrategyError::InvalidParams(msg) => ManagerError::InvalidParams(msg),
        }
    }
}
