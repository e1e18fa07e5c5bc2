//! Provider contract implemented by every backend.

use async_trait::async_trait;

use crate::asset::{Asset, CloudProvider, Tag};
use crate::error::Result;
use crate::scan_job::ScanJobConfig;

/// Filter for asset discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoverScope {
    /// Only assets in these locations. Empty means every location.
    pub locations: Vec<String>,
    /// An asset must carry all of these tags.
    pub include_tags: Vec<Tag>,
    /// An asset carrying any of these tags is skipped.
    pub exclude_tags: Vec<Tag>,
}

impl DiscoverScope {
    pub fn matches(&self, location: &str, tags: &[Tag]) -> bool {
        if !self.locations.is_empty() && !self.locations.iter().any(|l| l == location) {
            return false;
        }
        if !self.include_tags.iter().all(|t| tags.contains(t)) {
            return false;
        }
        !self.exclude_tags.iter().any(|t| tags.contains(t))
    }
}

/// A scan backend.
///
/// The `ensure_*` methods are reconciliation steps: each call moves the scan
/// infrastructure at most one step closer to its target and returns
/// `Ok(())` once it is there. They hold no state between calls, so they may be
/// called repeatedly for the same config (one call at a time) and
/// concurrently for different configs.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> CloudProvider;

    /// List scannable assets matching `scope`. Any listing failure fails the call.
    async fn discover_assets(&self, scope: &DiscoverScope) -> Result<Vec<Asset>>;

    /// Provision everything needed to scan `config.asset`.
    async fn ensure_scan_infrastructure(&self, config: &ScanJobConfig) -> Result<()>;

    /// Tear down everything `ensure_scan_infrastructure` created.
    async fn ensure_scan_infrastructure_deleted(&self, config: &ScanJobConfig) -> Result<()>;
}
