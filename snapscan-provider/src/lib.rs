//! Scan infrastructure providers.
//!
//! A provider discovers scannable assets in one cloud and, for a given
//! [`ScanJobConfig`], converges the ephemeral resources a scanner needs
//! (snapshot, disk, scanner VM) toward "ready" or "gone" one idempotent step
//! per call.

pub mod asset;
pub mod azure;
pub mod error;
pub mod external;
pub mod provider;
pub mod scan_job;
pub mod timings;

pub use asset::{Asset, AssetInfo, CloudProvider, DirInfo, PodInfo, SecurityGroup, Tag, VmInfo};
pub use azure::{AzureConfig, AzureProvider, AzureServices};
pub use error::{ConversionError, ProviderError, Result};
pub use external::{ExternalProvider, ExternalProviderApi, GrpcProviderClient};
pub use provider::{DiscoverScope, Provider};
pub use scan_job::{ScanJobConfig, ScanMetadata, ScannerInstanceCreationConfig};
pub use timings::ReconcileTimings;
