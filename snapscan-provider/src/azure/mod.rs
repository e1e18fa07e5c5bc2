//! Azure backend.
//!
//! Scanning an Azure VM takes five resources, all named from the asset scan id:
//! a snapshot of the target's OS disk, a VHD blob copy of that snapshot (only
//! when the target lives outside the scanner location), a managed disk, the
//! scanner VM and the disk attachment. Each has its own ensure function; the
//! provider entry points chain them and stop at the first one that is not done.

pub mod api;
mod blob;
mod cloud_init;
mod discover;
mod disk;
pub mod memory;
mod snapshot;
mod vm;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::asset::{Asset, CloudProvider};
use crate::error::{ProviderError, Result};
use crate::provider::{DiscoverScope, Provider};
use crate::scan_job::ScanJobConfig;
use crate::timings::ReconcileTimings;

use api::{BlobApi, DisksApi, SnapshotsApi, VirtualMachinesApi};

pub use cloud_init::render_user_data;

/// Tag put on scanner VMs so discovery never offers them as targets.
pub const SCANNER_TAG_KEY: &str = "snapscan-scanner";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureConfig {
    pub subscription_id: String,
    pub scanner_location: String,
    pub scanner_resource_group: String,
    pub scanner_subnet_id: String,
    #[serde(default)]
    pub scanner_public_key: Option<String>,
    pub scanner_vm_size: String,
    /// Marketplace image URN for the scanner VM.
    pub scanner_image: String,
    pub scanner_storage_account_name: String,
    pub scanner_storage_container_name: String,
    #[serde(default)]
    pub timings: ReconcileTimings,
}

/// Remote services the Azure backend talks to.
#[derive(Clone)]
pub struct AzureServices {
    pub snapshots: Arc<dyn SnapshotsApi>,
    pub blobs: Arc<dyn BlobApi>,
    pub disks: Arc<dyn DisksApi>,
    pub vms: Arc<dyn VirtualMachinesApi>,
}

impl AzureServices {
    /// Use one backend object for every service.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: SnapshotsApi + BlobApi + DisksApi + VirtualMachinesApi + 'static,
    {
        Self {
            snapshots: backend.clone(),
            blobs: backend.clone(),
            disks: backend.clone(),
            vms: backend,
        }
    }
}

pub struct AzureProvider {
    config: AzureConfig,
    services: AzureServices,
}

impl AzureProvider {
    pub fn new(config: AzureConfig, services: AzureServices) -> Self {
        Self { config, services }
    }

    pub fn config(&self) -> &AzureConfig {
        &self.config
    }

    fn timings(&self) -> &ReconcileTimings {
        &self.config.timings
    }
}

#[async_trait]
impl Provider for AzureProvider {
    fn kind(&self) -> CloudProvider {
        CloudProvider::Azure
    }

    async fn discover_assets(&self, scope: &DiscoverScope) -> Result<Vec<Asset>> {
        self.discover_vms(scope).await
    }

    async fn ensure_scan_infrastructure(&self, config: &ScanJobConfig) -> Result<()> {
        let vm_info = config.asset.info()?.as_vm_info()?;
        debug!(asset_scan = %config.asset_scan_id(), target = %vm_info.instance_id, "Reconciling scan infrastructure");

        let snapshot = self
            .ensure_snapshot_for_vm_root_volume(config, vm_info)
            .await?;

        let disk = if snapshot.location == self.config.scanner_location {
            self.ensure_managed_disk_from_snapshot(config, &snapshot)
                .await?
        } else {
            let blob_url = self.ensure_blob_from_snapshot(config, &snapshot).await?;
            if snapshot.access_granted {
                // The call above revoked the grant; leave the disk to the next call.
                return Err(ProviderError::retryable(
                    Duration::ZERO,
                    format!("revoked SAS access to snapshot {}", snapshot.name),
                ));
            }
            self.ensure_managed_disk_from_blob(config, &blob_url).await?
        };

        let scanner = self.ensure_scanner_vm(config).await?;
        self.ensure_disk_attached_to_scanner_vm(&scanner, &disk)
            .await?;

        info!(asset_scan = %config.asset_scan_id(), scanner = %scanner.name, "Scan infrastructure ready");
        Ok(())
    }

    async fn ensure_scan_infrastructure_deleted(&self, config: &ScanJobConfig) -> Result<()> {
        debug!(asset_scan = %config.asset_scan_id(), "Reconciling scan infrastructure teardown");

        self.ensure_scanner_vm_deleted(config).await?;
        self.ensure_managed_disk_deleted(config).await?;
        self.ensure_blob_deleted(config).await?;
        self.ensure_snapshot_deleted(config).await?;

        info!(asset_scan = %config.asset_scan_id(), "Scan infrastructure removed");
        Ok(())
    }
}
