use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::GatewayError;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTimeResponse {
    server_time: i64,
}

/// Offset between local clock and exchange clock, applied to signed
/// request timestamps.
#[derive(Debug, Default)]
pub struct TimeSync {
    offset_ms: AtomicI64,
}

impl TimeSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sync with Binance server time (`GET /api/v3/time`).
    pub async fn sync(&self, client: &Client, base_url: &str) -> Result<(), GatewayError> {
        let url = format!("{}/api/v3/time", base_url);

        // Measure round-trip time
        let local_before = Utc::now().timestamp_millis();
        let response: ServerTimeResponse = client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let local_after = Utc::now().timestamp_millis();

        // offset = server_time − estimated local time at the server's reply
        let round_trip = local_after - local_before;
        let estimated_local = local_before + round_trip / 2;
        let offset = response.server_time - estimated_local;
        self.offset_ms.store(offset, Ordering::Relaxed);

        debug!("Time sync: offset {}ms (rtt {}ms)", offset, round_trip);
        Ok(())
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }

    /// Server-synced timestamp in milliseconds.
    pub fn timestamp_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.offset_ms()
    }
}
