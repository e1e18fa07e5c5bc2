//! Client side of the `provider.Provider` gRPC service.

use std::time::Duration;

use async_trait::async_trait;
use tonic::Status;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use super::proto;
use super::proto::provider_client::ProviderClient;
use crate::error::{ProviderError, Result};

/// Raw calls to an external provider. Implemented over gRPC by
/// [`GrpcProviderClient`]; tests substitute their own.
#[async_trait]
pub trait ExternalProviderApi: Send + Sync {
    async fn discover_assets(&self) -> std::result::Result<proto::DiscoverAssetsResult, Status>;

    async fn run_asset_scan(
        &self,
        params: proto::RunAssetScanParams,
    ) -> std::result::Result<proto::RunAssetScanResult, Status>;

    async fn remove_asset_scan(
        &self,
        params: proto::RemoveAssetScanParams,
    ) -> std::result::Result<proto::RemoveAssetScanResult, Status>;
}

/// gRPC client for a provider plugin listening at `endpoint`.
#[derive(Debug, Clone)]
pub struct GrpcProviderClient {
    endpoint: String,
    inner: ProviderClient<Channel>,
}

impl GrpcProviderClient {
    /// Create a client that connects on first use. Connection failures then
    /// surface per call as `Unavailable`, an expired `timeout` as `Cancelled`.
    pub fn connect_lazy(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into();
        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| ProviderError::fatal(format!("invalid endpoint {}: {}", endpoint, e)))?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect_lazy();

        debug!(endpoint = %endpoint, "Created external provider client");
        Ok(Self {
            endpoint,
            inner: ProviderClient::new(channel),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ExternalProviderApi for GrpcProviderClient {
    async fn discover_assets(&self) -> std::result::Result<proto::DiscoverAssetsResult, Status> {
        let mut client = self.inner.clone();
        let response = client
            .discover_assets(proto::DiscoverAssetsParams {})
            .await?;
        Ok(response.into_inner())
    }

    async fn run_asset_scan(
        &self,
        params: proto::RunAssetScanParams,
    ) -> std::result::Result<proto::RunAssetScanResult, Status> {
        let mut client = self.inner.clone();
        Ok(client.run_asset_scan(params).await?.into_inner())
    }

    async fn remove_asset_scan(
        &self,
        params: proto::RemoveAssetScanParams,
    ) -> std::result::Result<proto::RemoveAssetScanResult, Status> {
        let mut client = self.inner.clone();
        Ok(client.remove_asset_scan(params).await?.into_inner())
    }
}
