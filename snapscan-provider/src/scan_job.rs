//! Scan job configuration.
//!
//! A `ScanJobConfig` is built once by the caller and never mutated. Every
//! remote resource a backend creates for the job is named from
//! `scan_metadata.asset_scan_id`, so the same config always addresses the
//! same resources across retries and restarts.

use serde::{Deserialize, Serialize};

use crate::asset::Asset;

/// Identifiers of the scan this job belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanMetadata {
    #[serde(rename = "scanID")]
    pub scan_id: String,
    #[serde(rename = "assetScanID")]
    pub asset_scan_id: String,
    #[serde(rename = "assetID")]
    pub asset_id: String,
}

/// Per-backend options for creating the scanner instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerInstanceCreationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_max_attempts: Option<i32>,
    #[serde(default)]
    pub use_spot_instances: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanJobConfig {
    /// Container image with the scanner CLI and its tools.
    pub scanner_image: String,
    /// Scanner CLI config (families config yaml).
    #[serde(rename = "scannerCLIConfig")]
    pub scanner_cli_config: String,
    /// Backend address the scanner reports results to.
    #[serde(rename = "vmClarityAddress")]
    pub vmclarity_address: String,
    pub scan_metadata: ScanMetadata,
    #[serde(default)]
    pub scanner_instance_creation_config: ScannerInstanceCreationConfig,
    pub asset: Asset,
}

impl ScanJobConfig {
    pub fn asset_scan_id(&self) -> &str {
        &self.scan_metadata.asset_scan_id
    }

    /// Name of the blob the target snapshot is copied into.
    pub fn blob_name(&self) -> String {
        format!("{}.vhd", self.asset_scan_id())
    }

    pub fn snapshot_name(&self) -> String {
        format!("snapshot-{}", self.asset_scan_id())
    }

    pub fn disk_name(&self) -> String {
        format!("disk-{}", self.asset_scan_id())
    }

    pub fn scanner_vm_name(&self) -> String {
        format!("scanner-{}", self.asset_scan_id())
    }
}
