//! Upstream polling.
//!
//! Two independent loops feed the hub: the block loop (new heads, logs,
//! receipts and gas price) and the sync-check loop. Upstream failures are
//! logged, counted and retried on the next tick.

use chrono::Utc;
use hlgate_common::utils::metrics::{
    BLOCKS_PROCESSED_TOTAL, UPSTREAM_ERRORS_TOTAL, UPSTREAM_REQUESTS_TOTAL,
};
use hlgate_rpc::{
    models::parse_hex_u64, BlockHeader, BlockReceipts, GasPriceInfo, SyncStatus, UpstreamError,
    UpstreamResult, UpstreamRpc,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::hub::ConnectionHub;
use crate::registry::SubscriptionKind;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub sync_check_interval: Duration,
    /// Hard limit on one sync check; shorter than the interval
    pub sync_check_timeout: Duration,
    /// Blocks older than this mean the node is out of sync
    pub sync_threshold: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            sync_check_interval: Duration::from_secs(1),
            sync_check_timeout: Duration::from_millis(750),
            sync_threshold: Duration::from_secs(10),
        }
    }
}

/// State carried between block-loop ticks
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BlockCursor {
    pub last_block: Option<String>,
    pub last_gas_price: Option<String>,
}

pub struct EventPoller {
    upstream: Arc<dyn UpstreamRpc>,
    hub: Arc<ConnectionHub>,
    config: PollerConfig,
}

fn record<T>(result: UpstreamResult<T>) -> UpstreamResult<T> {
    match &result {
        Ok(_) => UPSTREAM_REQUESTS_TOTAL.inc(),
        Err(_) => UPSTREAM_ERRORS_TOTAL.inc(),
    }
    result
}

impl EventPoller {
    pub fn new(upstream: Arc<dyn UpstreamRpc>, hub: Arc<ConnectionHub>, config: PollerConfig) -> Self {
        Self { upstream, hub, config }
    }

    /// Spawn both loops; they stop when `shutdown` flips or its sender is dropped
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let blocks = {
            let poller = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { poller.run_block_loop(shutdown).await })
        };
        let sync = tokio::spawn(async move { self.run_sync_loop(shutdown).await });
        vec![blocks, sync]
    }

    pub async fn run_block_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cursor = BlockCursor::default();

        info!("Block poller started (interval: {:?})", self.config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_blocks_once(&mut cursor).await,
                _ = shutdown.changed() => break,
            }
        }
        info!("Block poller stopped");
    }

    pub async fn run_sync_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.sync_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Sync checker started (interval: {:?})", self.config.sync_check_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(status) = self.check_sync_once().await {
                        self.hub.broadcast_syncing(&status).await;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Sync checker stopped");
    }

    /// One block-loop tick
    pub async fn poll_blocks_once(&self, cursor: &mut BlockCursor) {
        let block_number = match record(self.upstream.block_number().await) {
            Ok(number) => number,
            Err(e) => {
                error!("Failed to fetch block number: {}", e);
                return;
            }
        };

        let registry = self.hub.registry();
        if registry.has_subscribers(SubscriptionKind::GasPrice).await {
            self.poll_gas_price(&block_number, cursor).await;
        }

        if block_number.is_empty() || cursor.last_block.as_deref() == Some(block_number.as_str()) {
            return;
        }

        let header = match record(self.upstream.full_block(&block_number).await) {
            Ok(Some(header)) => header,
            Ok(None) => {
                debug!("Block {} not available yet", block_number);
                return;
            }
            Err(e) => {
                error!("Failed to fetch block {}: {}", block_number, e);
                return;
            }
        };

        info!(
            "Block: {} ({})",
            header.number,
            parse_hex_u64(&header.number).unwrap_or_default()
        );
        BLOCKS_PROCESSED_TOTAL.inc();
        self.hub.broadcast_new_head(&header).await;

        match record(self.upstream.block_logs(&block_number).await) {
            Ok(logs) => {
                for log in &logs {
                    self.hub.broadcast_log(log).await;
                }
            }
            Err(e) => warn!("Failed to fetch logs for block {}: {}", block_number, e),
        }

        if registry.has_subscribers(SubscriptionKind::BlockReceipts).await {
            match record(self.upstream.block_receipts(&block_number).await) {
                Ok(receipts) => {
                    let receipts = BlockReceipts {
                        block_number: header.number.clone(),
                        block_hash: header.hash.clone(),
                        receipts,
                    };
                    self.hub.broadcast_block_receipts(&receipts).await;
                }
                Err(e) => warn!("Failed to fetch receipts for block {}: {}", block_number, e),
            }
        }

        cursor.last_block = Some(block_number);
    }

    async fn poll_gas_price(&self, block_number: &str, cursor: &mut BlockCursor) {
        let gas_price = match record(self.upstream.gas_price().await) {
            Ok(price) => price,
            Err(e) => {
                warn!("Failed to fetch gas price: {}", e);
                return;
            }
        };

        if cursor.last_gas_price.as_deref() == Some(gas_price.as_str()) {
            return;
        }

        let big_block_gas_price = match record(self.upstream.big_block_gas_price().await) {
            Ok(price) => price,
            Err(e) => {
                debug!("Big block gas price unavailable: {}", e);
                None
            }
        };

        let info = GasPriceInfo {
            gas_price: gas_price.clone(),
            big_block_gas_price,
            block_number: block_number.to_string(),
        };
        self.hub.broadcast_gas_price(&info).await;
        cursor.last_gas_price = Some(gas_price);
    }

    /// One sync check. `None` when nobody is subscribed to `syncing`.
    pub async fn check_sync_once(&self) -> Option<SyncStatus> {
        if !self.hub.registry().has_subscribers(SubscriptionKind::Syncing).await {
            return None;
        }

        let limit = self.config.sync_check_timeout;
        let latest = match timeout(limit, self.latest_header()).await {
            Ok(result) => record(result),
            Err(_) => record(Err(UpstreamError::Timeout(limit))),
        };

        let status = match latest {
            Ok(header) => evaluate_sync(&header, Utc::now().timestamp(), self.config.sync_threshold),
            Err(e) => {
                warn!("Sync check failed: {}", e);
                SyncStatus {
                    syncing: true,
                    ..Default::default()
                }
            }
        };

        if status.syncing {
            if let Some(age) = status.block_age_seconds {
                warn!(
                    "Node out of sync: block {} is {}s old (threshold: {:?})",
                    status.current_block.as_deref().unwrap_or_default(),
                    age,
                    self.config.sync_threshold
                );
            }
        }
        Some(status)
    }

    async fn latest_header(&self) -> UpstreamResult<BlockHeader> {
        let number = self.upstream.block_number().await?;
        self.upstream
            .full_block(&number)
            .await?
            .ok_or(UpstreamError::EmptyResult("eth_getBlockByNumber"))
    }
}

/// Sync status from the latest header and the wall clock (unix seconds).
///
/// A missing, malformed or zero timestamp counts as out of sync.
pub fn evaluate_sync(header: &BlockHeader, now_secs: i64, threshold: Duration) -> SyncStatus {
    let timestamp = match header.timestamp_secs() {
        Some(ts) if ts > 0 => ts,
        _ => {
            return SyncStatus {
                syncing: true,
                current_block: Some(header.number.clone()),
                block_age_seconds: None,
            }
        }
    };

    let age = u64::try_from(now_secs).unwrap_or_default().saturating_sub(timestamp);
    if age > threshold.as_secs() {
        SyncStatus {
            syncing: true,
            current_block: Some(header.number.clone()),
            block_age_seconds: Some(age),
        }
    } else {
        SyncStatus::in_sync()
    }
}
