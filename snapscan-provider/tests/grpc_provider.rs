//! External provider over a real gRPC channel.
//!
//! A plugin built on the generated server trait listens on a loopback port;
//! the provider talks to it through `GrpcProviderClient`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::DateTime;
use snapscan_provider::external::convert;
use snapscan_provider::external::proto::provider_server::{
    Provider as ProviderService, ProviderServer,
};
use snapscan_provider::external::proto::{
    self, DiscoverAssetsParams, DiscoverAssetsResult, RemoveAssetScanParams,
    RemoveAssetScanResult, RunAssetScanParams, RunAssetScanResult,
};
use snapscan_provider::{
    Asset, CloudProvider, DiscoverScope, ExternalProvider, GrpcProviderClient, PodInfo,
    Provider, ProviderError, ReconcileTimings, ScanJobConfig, ScanMetadata,
    ScannerInstanceCreationConfig, Tag, VmInfo,
};
use tokio::net::{TcpListener, TcpStream};
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// Allocate an unused port.
fn allocate_port() -> u16 {
    portpicker::pick_unused_port().expect("No available port")
}

/// Plugin whose answer to RunAssetScan depends on the asset scan id.
#[derive(Clone, Default)]
struct TestPlugin {
    seen: Arc<Mutex<Vec<ScanJobConfig>>>,
}

impl TestPlugin {
    fn record(&self, config: Option<proto::ScanJobConfig>) -> Result<ScanJobConfig, Status> {
        let config = config.ok_or_else(|| Status::invalid_argument("missing scan job config"))?;
        let config = convert::scan_job_config_from_wire(config)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        self.seen.lock().unwrap().push(config.clone());
        Ok(config)
    }
}

#[tonic::async_trait]
impl ProviderService for TestPlugin {
    async fn discover_assets(
        &self,
        _request: Request<DiscoverAssetsParams>,
    ) -> Result<Response<DiscoverAssetsResult>, Status> {
        let vm = Asset::new(VmInfo {
            instance_id: "vm-1".to_string(),
            location: "eastus".to_string(),
            image: "ubuntu-22.04".to_string(),
            instance_type: "m5.large".to_string(),
            platform: "Linux".to_string(),
            launch_time: DateTime::from_timestamp(1_712_345_678, 0).unwrap(),
            instance_provider: None,
            security_groups: None,
            tags: Some(vec![Tag::new("env", "prod")]),
        });
        let pod = Asset::new(PodInfo {
            pod_name: Some("web".to_string()),
            location: Some("cluster-a".to_string()),
        });

        let assets = [vm, pod]
            .iter()
            .map(|a| convert::asset_to_wire(Some(a)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(DiscoverAssetsResult { assets }))
    }

    async fn run_asset_scan(
        &self,
        request: Request<RunAssetScanParams>,
    ) -> Result<Response<RunAssetScanResult>, Status> {
        let config = self.record(request.into_inner().scan_job_config)?;
        let result = match config.asset_scan_id() {
            "as-pending" => Err(ProviderError::retryable(
                Duration::from_secs(30),
                "scanner vm is starting",
            )),
            "as-denied" => Err(ProviderError::fatal("quota exceeded")),
            "as-hang" => std::future::pending().await,
            _ => Ok(()),
        };
        Ok(Response::new(RunAssetScanResult {
            err: convert::result_to_wire(&result),
        }))
    }

    async fn remove_asset_scan(
        &self,
        request: Request<RemoveAssetScanParams>,
    ) -> Result<Response<RemoveAssetScanResult>, Status> {
        self.record(request.into_inner().scan_job_config)?;
        Ok(Response::new(RemoveAssetScanResult { err: None }))
    }
}

async fn wait_for_listener(addr: SocketAddr) {
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("plugin did not start listening on {}", addr);
}

async fn spawn_plugin(plugin: TestPlugin) -> String {
    let addr: SocketAddr = format!("127.0.0.1:{}", allocate_port()).parse().unwrap();
    tokio::spawn(
        Server::builder()
            .add_service(ProviderServer::new(plugin))
            .serve(addr),
    );
    wait_for_listener(addr).await;
    format!("http://{}", addr)
}

fn connect(endpoint: String, timeout: Duration) -> ExternalProvider {
    let client = GrpcProviderClient::connect_lazy(endpoint, timeout).unwrap();
    let timings = ReconcileTimings {
        request_timeout: timeout,
        ..Default::default()
    };
    ExternalProvider::new(client, timings)
}

fn scan_job(asset_scan_id: &str) -> ScanJobConfig {
    ScanJobConfig {
        scanner_image: "ghcr.io/openclarity/vmclarity-cli:latest".to_string(),
        scanner_cli_config: "analyzers: [syft]".to_string(),
        vmclarity_address: "10.0.0.1:8888".to_string(),
        scan_metadata: ScanMetadata {
            scan_id: "scan-1".to_string(),
            asset_scan_id: asset_scan_id.to_string(),
            asset_id: "asset-1".to_string(),
        },
        scanner_instance_creation_config: ScannerInstanceCreationConfig {
            max_price: Some("0.5".to_string()),
            retry_max_attempts: Some(3),
            use_spot_instances: true,
        },
        asset: Asset::new(PodInfo {
            pod_name: Some("web".to_string()),
            location: Some("cluster-a".to_string()),
        }),
    }
}

#[tokio::test]
async fn test_discover_over_grpc() {
    let endpoint = spawn_plugin(TestPlugin::default()).await;
    let provider = connect(endpoint, Duration::from_secs(5));

    let all = provider.discover_assets(&DiscoverScope::default()).await.unwrap();
    assert_eq!(all.len(), 2);

    let scope = DiscoverScope {
        locations: vec!["eastus".to_string()],
        ..Default::default()
    };
    let assets = provider.discover_assets(&scope).await.unwrap();
    assert_eq!(assets.len(), 1);

    let vm = assets[0].info().unwrap().as_vm_info().unwrap();
    assert_eq!(vm.instance_id, "vm-1");
    assert_eq!(vm.instance_provider, Some(CloudProvider::External));
    assert_eq!(vm.tags, Some(vec![Tag::new("env", "prod")]));
    assert_eq!(vm.launch_time.timestamp(), 1_712_345_678);
}

#[tokio::test]
async fn test_run_scan_over_grpc() {
    let plugin = TestPlugin::default();
    let endpoint = spawn_plugin(plugin.clone()).await;
    let provider = connect(endpoint, Duration::from_secs(5));

    provider
        .ensure_scan_infrastructure(&scan_job("as-ready"))
        .await
        .unwrap();

    let err = provider
        .ensure_scan_infrastructure(&scan_job("as-pending"))
        .await
        .unwrap_err();
    assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    assert_eq!(err.message(), "scanner vm is starting");

    let err = provider
        .ensure_scan_infrastructure(&scan_job("as-denied"))
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.message(), "quota exceeded");

    // The plugin sees the job exactly as sent.
    let seen = plugin.seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0], scan_job("as-ready"));
}

#[tokio::test]
async fn test_remove_scan_over_grpc() {
    let plugin = TestPlugin::default();
    let endpoint = spawn_plugin(plugin.clone()).await;
    let provider = connect(endpoint, Duration::from_secs(5));

    provider
        .ensure_scan_infrastructure_deleted(&scan_job("as-ready"))
        .await
        .unwrap();
    assert_eq!(plugin.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_slow_plugin_is_retryable() {
    let endpoint = spawn_plugin(TestPlugin::default()).await;
    let provider = connect(endpoint, Duration::from_millis(200));

    let err = provider
        .ensure_scan_infrastructure(&scan_job("as-hang"))
        .await
        .unwrap_err();
    assert_eq!(
        err.retry_after(),
        Some(ReconcileTimings::default().api_backoff)
    );
}

#[tokio::test]
async fn test_silent_peer_is_retryable() {
    // Accepts connections and never speaks.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let provider = connect(format!("http://{}", addr), Duration::from_millis(200));
    let err = provider
        .ensure_scan_infrastructure(&scan_job("as-ready"))
        .await
        .unwrap_err();
    assert!(err.is_retryable(), "{}", err);
}

#[tokio::test]
async fn test_unreachable_plugin_is_retryable() {
    let endpoint = format!("http://127.0.0.1:{}", allocate_port());
    let provider = connect(endpoint, Duration::from_secs(1));

    let err = provider
        .discover_assets(&DiscoverScope::default())
        .await
        .unwrap_err();
    assert!(err.is_retryable(), "{}", err);
}
