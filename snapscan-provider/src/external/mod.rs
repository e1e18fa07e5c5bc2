//! External provider: a separate process that implements the
//! `provider.Provider` gRPC service for a cloud this crate has no backend for.

mod client;
pub mod convert;
pub mod proto;

use async_trait::async_trait;
use tonic::{Code, Status};
use tracing::{debug, warn};

use crate::asset::{Asset, AssetInfo, CloudProvider};
use crate::error::{ProviderError, Result};
use crate::provider::{DiscoverScope, Provider};
use crate::scan_job::ScanJobConfig;
use crate::timings::ReconcileTimings;

pub use client::{ExternalProviderApi, GrpcProviderClient};

/// Map a transport-level failure onto the taxonomy.
///
/// A request that outlives the channel timeout comes back as `Cancelled`;
/// like an unreachable plugin it is worth another attempt.
pub fn status_to_error(status: &Status, backoff: std::time::Duration) -> ProviderError {
    let message = format!("external provider call failed: {}", status.message());
    match status.code() {
        Code::Unavailable
        | Code::DeadlineExceeded
        | Code::Cancelled
        | Code::ResourceExhausted
        | Code::Aborted => ProviderError::retryable(backoff, message),
        _ => ProviderError::fatal(message),
    }
}

/// Provider backed by an external plugin.
pub struct ExternalProvider<C = GrpcProviderClient> {
    client: C,
    timings: ReconcileTimings,
}

impl<C: ExternalProviderApi> ExternalProvider<C> {
    pub fn new(client: C, timings: ReconcileTimings) -> Self {
        Self { client, timings }
    }

    fn scan_job_params(&self, config: &ScanJobConfig) -> Result<proto::ScanJobConfig> {
        Ok(convert::scan_job_config_to_wire(config)?)
    }
}

fn asset_in_scope(asset: &Asset, scope: &DiscoverScope) -> bool {
    match &asset.asset_info {
        Some(AssetInfo::Vm(info)) => {
            scope.matches(&info.location, info.tags.as_deref().unwrap_or_default())
        }
        Some(AssetInfo::Dir(info)) => {
            scope.matches(info.location.as_deref().unwrap_or_default(), &[])
        }
        Some(AssetInfo::Pod(info)) => {
            scope.matches(info.location.as_deref().unwrap_or_default(), &[])
        }
        None => false,
    }
}

#[async_trait]
impl<C: ExternalProviderApi> Provider for ExternalProvider<C> {
    fn kind(&self) -> CloudProvider {
        CloudProvider::External
    }

    async fn discover_assets(&self, scope: &DiscoverScope) -> Result<Vec<Asset>> {
        let result = self
            .client
            .discover_assets()
            .await
            .map_err(|s| status_to_error(&s, self.timings.api_backoff))?;

        let total = result.assets.len();
        let mut assets = Vec::with_capacity(total);
        for wire in result.assets {
            let asset = convert::asset_from_wire(Some(wire)).map_err(|e| {
                ProviderError::fatal(format!("invalid asset from external provider: {}", e))
            })?;
            if asset_in_scope(&asset, scope) {
                assets.push(asset);
            }
        }

        debug!(total, matched = assets.len(), "Discovered external assets");
        Ok(assets)
    }

    async fn ensure_scan_infrastructure(&self, config: &ScanJobConfig) -> Result<()> {
        let params = proto::RunAssetScanParams {
            scan_job_config: Some(self.scan_job_params(config)?),
        };
        let result = self
            .client
            .run_asset_scan(params)
            .await
            .map_err(|s| status_to_error(&s, self.timings.api_backoff))?;

        convert::result_from_wire(result.err).inspect_err(|e| {
            if e.is_fatal() {
                warn!(asset_scan_id = %config.asset_scan_id(), error = %e, "External provider failed scan setup");
            }
        })
    }

    async fn ensure_scan_infrastructure_deleted(&self, config: &ScanJobConfig) -> Result<()> {
        let params = proto::RemoveAssetScanParams {
            scan_job_config: Some(self.scan_job_params(config)?),
        };
        let result = self
            .client
            .remove_asset_scan(params)
            .await
            .map_err(|s| status_to_error(&s, self.timings.api_backoff))?;

        convert::result_from_wire(result.err).inspect_err(|e| {
            if e.is_fatal() {
                warn!(asset_scan_id = %config.asset_scan_id(), error = %e, "External provider failed scan teardown");
            }
        })
    }
}
