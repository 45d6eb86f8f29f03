//! Chain data carried in subscription notifications.
//!
//! Quantities stay as the upstream's hex strings; they are forwarded to
//! clients untouched and only parsed where the gateway needs a number.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub block_number: String,
    #[serde(default)]
    pub block_hash: String,
    #[serde(default)]
    pub transaction_hash: String,
    #[serde(default)]
    pub transaction_index: String,
    #[serde(default)]
    pub log_index: String,
    #[serde(default)]
    pub removed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_timestamp: Option<String>,
}

/// Block header pushed to `newHeads` subscribers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub number: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub parent_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default)]
    pub sha3_uncles: String,
    #[serde(default)]
    pub logs_bloom: String,
    #[serde(default)]
    pub transactions_root: String,
    #[serde(default)]
    pub state_root: String,
    #[serde(default)]
    pub receipts_root: String,
    #[serde(default)]
    pub miner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_difficulty: Option<String>,
    #[serde(default)]
    pub extra_data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default)]
    pub gas_limit: String,
    #[serde(default)]
    pub gas_used: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mix_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawals_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_gas_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excess_blob_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_beacon_block_root: Option<String>,
}

impl BlockHeader {
    /// Block timestamp in seconds; `None` when missing or malformed
    pub fn timestamp_secs(&self) -> Option<u64> {
        parse_hex_u64(&self.timestamp)
    }
}

/// Gas price notification payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPriceInfo {
    pub gas_price: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub big_block_gas_price: Option<String>,
    pub block_number: String,
}

/// Receipts of one block, pushed to `blockReceipts` subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockReceipts {
    pub block_number: String,
    pub block_hash: String,
    pub receipts: Vec<Value>,
}

/// Sync state of the upstream node.
///
/// On the wire an in-sync node is reported as the literal `false`;
/// see [`SyncStatus::to_payload`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub syncing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_block: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_age_seconds: Option<u64>,
}

impl SyncStatus {
    pub fn in_sync() -> Self {
        Self::default()
    }

    /// Notification payload: `false` when in sync, the status object otherwise
    pub fn to_payload(&self) -> Value {
        if self.syncing {
            serde_json::to_value(self).unwrap_or(Value::Bool(true))
        } else {
            Value::Bool(false)
        }
    }
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}
