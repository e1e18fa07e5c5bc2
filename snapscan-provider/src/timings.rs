//! Estimated durations used to pace retries.
//!
//! These are hints handed back in `ProviderError::Retryable`; they never
//! block. All values are in seconds in the serialized form.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcileTimings {
    #[serde(with = "secs")]
    pub snapshot_create: Duration,
    #[serde(with = "secs")]
    pub snapshot_delete: Duration,
    #[serde(with = "secs")]
    pub blob_copy: Duration,
    #[serde(with = "secs")]
    pub blob_abort: Duration,
    #[serde(with = "secs")]
    pub blob_delete: Duration,
    #[serde(with = "secs")]
    pub disk_create: Duration,
    #[serde(with = "secs")]
    pub disk_delete: Duration,
    #[serde(with = "secs")]
    pub vm_create: Duration,
    #[serde(with = "secs")]
    pub vm_delete: Duration,
    #[serde(with = "secs")]
    pub disk_attach: Duration,
    /// Backoff for transient API failures (throttling, 5xx, timeouts).
    #[serde(with = "secs")]
    pub api_backoff: Duration,
    /// Lifetime of the read grant on a snapshot.
    #[serde(with = "secs")]
    pub snapshot_access: Duration,
    /// Upper bound on a single remote call.
    #[serde(with = "secs")]
    pub request_timeout: Duration,
}

impl Default for ReconcileTimings {
    fn default() -> Self {
        Self {
            snapshot_create: Duration::from_secs(60),
            snapshot_delete: Duration::from_secs(60),
            blob_copy: Duration::from_secs(120),
            blob_abort: Duration::from_secs(120),
            blob_delete: Duration::from_secs(120),
            disk_create: Duration::from_secs(60),
            disk_delete: Duration::from_secs(60),
            vm_create: Duration::from_secs(120),
            vm_delete: Duration::from_secs(120),
            disk_attach: Duration::from_secs(30),
            api_backoff: Duration::from_secs(10),
            snapshot_access: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl ReconcileTimings {
    /// The same duration for every estimate. Handy in tests.
    pub fn uniform(estimate: Duration) -> Self {
        Self {
            snapshot_create: estimate,
            snapshot_delete: estimate,
            blob_copy: estimate,
            blob_abort: estimate,
            blob_delete: estimate,
            disk_create: estimate,
            disk_delete: estimate,
            vm_create: estimate,
            vm_delete: estimate,
            disk_attach: estimate,
            api_backoff: estimate,
            ..Self::default()
        }
    }
}

mod secs {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
