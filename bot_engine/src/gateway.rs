//! Execution gateway contract.
//!
//! The bot engine only talks to an exchange through these two traits.
//! `GatewayConnector::connect` is the per-bot `initialize(credentials)`
//! step; the returned handle is owned by exactly one bot loop and is
//! released with `close()` when that loop ends.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::models::{AssetBalance, Candle, OrderAck, OrderRequest};

/// API credentials a bot trades with.
#[derive(Clone)]
pub struct Credentials {
    pub owner_id:      u64,
    pub credential_id: u64,
    pub api_key:       String,
    pub secret_key:    String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("owner_id", &self.owner_id)
            .field("credential_id", &self.credential_id)
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Market data and order placement for one authenticated session.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Up to `limit` klines for `symbol`, ascending by open time.
    async fn get_candles(
        &self,
        symbol:   &str,
        interval: &str,
        limit:    usize,
    ) -> Result<Vec<Candle>, GatewayError>;

    /// Submit an order; `order.price == None` is a market order.
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, GatewayError>;

    /// Non-zero balances.
    async fn get_account_balance(&self) -> Result<Vec<AssetBalance>, GatewayError>;

    /// Release resources.  Must be idempotent.
    async fn close(&self) -> Result<(), GatewayError>;
}

/// Shared gateway handle.
pub type GatewayHandle = Arc<dyn ExecutionGateway>;

/// Opens an authenticated gateway session for a set of credentials.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> Result<GatewayHandle, GatewayError>;
}
