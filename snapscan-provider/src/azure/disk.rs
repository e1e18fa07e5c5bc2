use tracing::{debug, info};

use super::AzureProvider;
use super::api::{
    DiskRequest, DiskSource, ManagedDisk, ProvisioningState, Snapshot, handle_api_error,
    with_timeout,
};
use crate::error::{ProviderError, Result};
use crate::scan_job::ScanJobConfig;

impl AzureProvider {
    /// Managed disk from a snapshot in the scanner location.
    pub async fn ensure_managed_disk_from_snapshot(
        &self,
        config: &ScanJobConfig,
        snapshot: &Snapshot,
    ) -> Result<ManagedDisk> {
        self.ensure_managed_disk(
            config,
            DiskSource::Snapshot {
                name: snapshot.name.clone(),
            },
        )
        .await
    }

    /// Managed disk imported from a VHD blob, for targets in another location.
    pub async fn ensure_managed_disk_from_blob(
        &self,
        config: &ScanJobConfig,
        blob_url: &str,
    ) -> Result<ManagedDisk> {
        self.ensure_managed_disk(
            config,
            DiskSource::Blob {
                url: blob_url.to_string(),
            },
        )
        .await
    }

    async fn ensure_managed_disk(
        &self,
        config: &ScanJobConfig,
        source: DiskSource,
    ) -> Result<ManagedDisk> {
        let timings = self.timings();
        let name = config.disk_name();

        match with_timeout(timings.request_timeout, self.services.disks.get(&name)).await {
            Ok(disk) => {
                return match disk.state {
                    ProvisioningState::Succeeded => Ok(disk),
                    ProvisioningState::Creating => {
                        debug!(disk = %name, "Disk is still being created");
                        Err(ProviderError::retryable(
                            timings.disk_create,
                            format!("disk {} is still being created", name),
                        ))
                    }
                    ProvisioningState::Failed => Err(ProviderError::fatal(format!(
                        "disk {} failed to provision",
                        name
                    ))),
                    ProvisioningState::Deleting => Err(ProviderError::fatal(format!(
                        "disk {} is being deleted",
                        name
                    ))),
                };
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(handle_api_error(
                    e,
                    timings.api_backoff,
                    format_args!("getting disk {}", name),
                ));
            }
        }

        info!(disk = %name, source = ?source, "Creating managed disk");
        with_timeout(
            timings.request_timeout,
            self.services.disks.create(DiskRequest {
                name: name.clone(),
                location: self.config.scanner_location.clone(),
                source,
            }),
        )
        .await
        .map_err(|e| {
            handle_api_error(
                e,
                timings.api_backoff,
                format_args!("creating disk {}", name),
            )
        })?;

        Err(ProviderError::retryable(
            timings.disk_create,
            format!("disk {} creation started", name),
        ))
    }

    pub async fn ensure_managed_disk_deleted(&self, config: &ScanJobConfig) -> Result<()> {
        let timings = self.timings();
        let name = config.disk_name();

        match with_timeout(timings.request_timeout, self.services.disks.get(&name)).await {
            Ok(disk) if disk.state == ProvisioningState::Deleting => {
                return Err(ProviderError::retryable(
                    timings.disk_delete,
                    format!("disk {} is being deleted", name),
                ));
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                return Err(handle_api_error(
                    e,
                    timings.api_backoff,
                    format_args!("getting disk {}", name),
                ));
            }
        }

        info!(disk = %name, "Deleting managed disk");
        match with_timeout(timings.request_timeout, self.services.disks.delete(&name)).await {
            Ok(()) => Err(ProviderError::retryable(
                timings.disk_delete,
                format!("disk {} delete started", name),
            )),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(handle_api_error(
                e,
                timings.api_backoff,
                format_args!("deleting disk {}", name),
            )),
        }
    }
}
