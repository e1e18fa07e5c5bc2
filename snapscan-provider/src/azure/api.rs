//! Azure control-plane and data-plane seams.
//!
//! The ensure functions only talk to Azure through these traits. A production
//! deployment backs them with SDK clients; tests use [`super::memory::InMemoryAzure`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::asset::Tag;
use crate::error::ProviderError;

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("throttled (retry after {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// 4xx other than 404/409/429: bad request, authorization, quota.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Map a remote failure into the provider taxonomy.
///
/// Callers that treat "not found" as a state must check
/// [`ApiError::is_not_found`] first; reaching here with it is Fatal.
pub fn handle_api_error(err: ApiError, backoff: Duration, action: fmt::Arguments<'_>) -> ProviderError {
    match err {
        ApiError::Throttled { retry_after } => ProviderError::retryable(
            retry_after.unwrap_or(backoff),
            format!("throttled while {}", action),
        ),
        ApiError::Conflict(msg) => {
            ProviderError::retryable(backoff, format!("conflict while {}: {}", action, msg))
        }
        ApiError::Unavailable(msg) => ProviderError::retryable(
            backoff,
            format!("service unavailable while {}: {}", action, msg),
        ),
        ApiError::Timeout(after) => ProviderError::retryable(
            backoff,
            format!("timed out after {:?} while {}", after, action),
        ),
        ApiError::NotFound(msg) => {
            ProviderError::fatal(format!("not found while {}: {}", action, msg))
        }
        ApiError::Rejected { status, message } => ProviderError::fatal(format!(
            "request rejected ({}) while {}: {}",
            status, action, message
        )),
        ApiError::Unexpected(msg) => {
            ProviderError::fatal(format!("unexpected error while {}: {}", action, msg))
        }
    }
}

/// Bound a remote call. Elapsing maps to [`ApiError::Timeout`]; the next
/// reconcile re-reads remote state, so the side effect is never lost.
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> ApiResult<T>
where
    F: Future<Output = ApiResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            debug!(?timeout, "Remote call timed out");
            Err(ApiError::Timeout(timeout))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Creating,
    Succeeded,
    Failed,
    Deleting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub name: String,
    pub location: String,
    pub source_disk: String,
    pub state: ProvisioningState,
    /// A read grant is currently active.
    pub access_granted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    pub name: String,
    pub location: String,
    pub source_disk: String,
}

/// Time-boxed read URL for a snapshot.
///
/// Azure discloses the URL exactly once, so it is not `Clone` and can only be
/// consumed by moving it into the call that uses it.
pub struct AccessGrant {
    url: String,
}

impl AccessGrant {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn into_url(self) -> String {
        self.url
    }
}

impl fmt::Debug for AccessGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessGrant(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStatus {
    Pending,
    Success,
    Aborted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    pub copy_id: String,
    pub copy_status: CopyStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskSource {
    Snapshot { name: String },
    /// Import of a VHD blob, for snapshots in another location.
    Blob { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskAttachment {
    Detached,
    Attaching { vm: String },
    Attached { vm: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedDisk {
    pub name: String,
    pub location: String,
    pub state: ProvisioningState,
    pub attachment: DiskAttachment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRequest {
    pub name: String,
    pub location: String,
    pub source: DiskSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMachine {
    pub name: String,
    pub location: String,
    pub image: String,
    pub vm_size: String,
    pub platform: String,
    pub os_disk: String,
    pub security_groups: Vec<String>,
    pub tags: Vec<Tag>,
    pub launch_time: DateTime<Utc>,
    pub state: ProvisioningState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpotOptions {
    /// Price ceiling per hour; `None` caps at the on-demand price.
    pub max_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VmRequest {
    pub name: String,
    pub location: String,
    pub image: String,
    pub vm_size: String,
    pub subnet_id: String,
    pub user_data: String,
    pub ssh_public_key: Option<String>,
    pub spot: Option<SpotOptions>,
    pub tags: Vec<Tag>,
}

#[async_trait]
pub trait SnapshotsApi: Send + Sync {
    async fn get(&self, name: &str) -> ApiResult<Snapshot>;
    async fn create(&self, request: SnapshotRequest) -> ApiResult<()>;
    async fn grant_access(&self, name: &str, duration: Duration) -> ApiResult<AccessGrant>;
    async fn revoke_access(&self, name: &str) -> ApiResult<()>;
    async fn delete(&self, name: &str) -> ApiResult<()>;
}

#[async_trait]
pub trait BlobApi: Send + Sync {
    async fn get_properties(&self, url: &str) -> ApiResult<BlobProperties>;
    /// Start a server-side copy into `url`. Returns the copy id.
    async fn start_copy_from_url(&self, url: &str, source: AccessGrant) -> ApiResult<String>;
    async fn abort_copy(&self, url: &str, copy_id: &str) -> ApiResult<()>;
    async fn delete(&self, url: &str) -> ApiResult<()>;
}

#[async_trait]
pub trait DisksApi: Send + Sync {
    async fn get(&self, name: &str) -> ApiResult<ManagedDisk>;
    async fn create(&self, request: DiskRequest) -> ApiResult<()>;
    async fn delete(&self, name: &str) -> ApiResult<()>;
}

#[async_trait]
pub trait VirtualMachinesApi: Send + Sync {
    async fn get(&self, name: &str) -> ApiResult<VirtualMachine>;
    /// Every VM in the subscription. Paging is the implementation's concern.
    async fn list(&self) -> ApiResult<Vec<VirtualMachine>>;
    async fn create(&self, request: VmRequest) -> ApiResult<()>;
    async fn attach_disk(&self, vm: &str, disk: &str) -> ApiResult<()>;
    async fn delete(&self, name: &str) -> ApiResult<()>;
}
