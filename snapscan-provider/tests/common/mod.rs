//! Fixtures for the Azure lifecycle tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::DateTime;
use snapscan_provider::azure::api::{ProvisioningState, VirtualMachine};
use snapscan_provider::azure::memory::InMemoryAzure;
use snapscan_provider::{
    Asset, AzureConfig, AzureProvider, AzureServices, ProviderError, ReconcileTimings, ScanJobConfig,
    ScanMetadata, ScannerInstanceCreationConfig, Tag, VmInfo,
};

pub const SCANNER_LOCATION: &str = "eastus";
pub const ASSET_SCAN_ID: &str = "as-7f3c";

pub fn azure_config() -> AzureConfig {
    AzureConfig {
        subscription_id: "00000000-0000-0000-0000-000000000001".to_string(),
        scanner_location: SCANNER_LOCATION.to_string(),
        scanner_resource_group: "snapscan-scanners".to_string(),
        scanner_subnet_id: "/subscriptions/x/resourceGroups/snapscan-scanners/providers/Microsoft.Network/virtualNetworks/scan/subnets/default".to_string(),
        scanner_public_key: None,
        scanner_vm_size: "Standard_D2s_v3".to_string(),
        scanner_image: "Canonical:0001-com-ubuntu-server-jammy:22_04-lts-gen2:latest".to_string(),
        scanner_storage_account_name: "scanstore".to_string(),
        scanner_storage_container_name: "snapshots".to_string(),
        timings: ReconcileTimings::default(),
    }
}

pub fn setup() -> (Arc<InMemoryAzure>, AzureProvider) {
    let azure = Arc::new(InMemoryAzure::new());
    let provider = AzureProvider::new(azure_config(), AzureServices::from_backend(azure.clone()));
    (azure, provider)
}

pub fn target_vm(name: &str, location: &str) -> VirtualMachine {
    VirtualMachine {
        name: name.to_string(),
        location: location.to_string(),
        image: "Canonical:ubuntu:22_04-lts:latest".to_string(),
        vm_size: "Standard_B2s".to_string(),
        platform: "Linux".to_string(),
        os_disk: format!("{}-osdisk", name),
        security_groups: vec!["nsg-web".to_string()],
        tags: vec![Tag::new("env", "prod")],
        launch_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        state: ProvisioningState::Succeeded,
    }
}

pub fn scan_job(target: &VirtualMachine) -> ScanJobConfig {
    ScanJobConfig {
        scanner_image: "ghcr.io/snapscan/scanner:latest".to_string(),
        scanner_cli_config: "analyzers:\n  - sbom\n".to_string(),
        vmclarity_address: "10.0.0.4:8888".to_string(),
        scan_metadata: ScanMetadata {
            scan_id: "scan-1".to_string(),
            asset_scan_id: ASSET_SCAN_ID.to_string(),
            asset_id: "asset-1".to_string(),
        },
        scanner_instance_creation_config: ScannerInstanceCreationConfig::default(),
        asset: Asset::new(VmInfo {
            instance_id: target.name.clone(),
            location: target.location.clone(),
            image: target.image.clone(),
            instance_type: target.vm_size.clone(),
            platform: target.platform.clone(),
            launch_time: target.launch_time,
            instance_provider: None,
            security_groups: None,
            tags: None,
        }),
    }
}

pub fn blob_url() -> String {
    format!(
        "https://scanstore.blob.core.windows.net/snapshots/{}.vhd",
        ASSET_SCAN_ID
    )
}

/// Call `step` until it succeeds, letting Azure settle after every retryable
/// result. Returns the number of calls made.
pub async fn converge<F, Fut>(azure: &InMemoryAzure, mut step: F) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ProviderError>>,
{
    for attempt in 1..=20 {
        match step().await {
            Ok(()) => return attempt,
            Err(ProviderError::Retryable { .. }) => azure.settle().await,
            Err(e) => panic!("reconcile failed on attempt {}: {}", attempt, e),
        }
    }
    panic!("reconcile did not converge in 20 attempts");
}
