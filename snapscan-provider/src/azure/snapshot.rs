use tracing::{debug, info};

use super::AzureProvider;
use super::api::{ProvisioningState, Snapshot, SnapshotRequest, handle_api_error, with_timeout};
use crate::asset::VmInfo;
use crate::error::{ProviderError, Result};
use crate::scan_job::ScanJobConfig;

impl AzureProvider {
    /// Snapshot the target VM's OS disk, in the target's location.
    pub async fn ensure_snapshot_for_vm_root_volume(
        &self,
        config: &ScanJobConfig,
        target: &VmInfo,
    ) -> Result<Snapshot> {
        let timings = self.timings();
        let name = config.snapshot_name();

        match with_timeout(timings.request_timeout, self.services.snapshots.get(&name)).await {
            Ok(snapshot) => {
                return match snapshot.state {
                    ProvisioningState::Succeeded => Ok(snapshot),
                    ProvisioningState::Creating => {
                        debug!(snapshot = %name, "Snapshot is still being created");
                        Err(ProviderError::retryable(
                            timings.snapshot_create,
                            format!("snapshot {} is still being created", name),
                        ))
                    }
                    ProvisioningState::Failed => Err(ProviderError::fatal(format!(
                        "snapshot {} failed to provision",
                        name
                    ))),
                    ProvisioningState::Deleting => Err(ProviderError::fatal(format!(
                        "snapshot {} is being deleted",
                        name
                    ))),
                };
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(handle_api_error(
                    e,
                    timings.api_backoff,
                    format_args!("getting snapshot {}", name),
                ));
            }
        }

        let vm = with_timeout(
            timings.request_timeout,
            self.services.vms.get(&target.instance_id),
        )
        .await
        .map_err(|e| {
            handle_api_error(
                e,
                timings.api_backoff,
                format_args!("getting target VM {}", target.instance_id),
            )
        })?;

        info!(snapshot = %name, vm = %vm.name, disk = %vm.os_disk, "Creating snapshot of target OS disk");
        with_timeout(
            timings.request_timeout,
            self.services.snapshots.create(SnapshotRequest {
                name: name.clone(),
                location: vm.location.clone(),
                source_disk: vm.os_disk.clone(),
            }),
        )
        .await
        .map_err(|e| {
            handle_api_error(
                e,
                timings.api_backoff,
                format_args!("creating snapshot {}", name),
            )
        })?;

        Err(ProviderError::retryable(
            timings.snapshot_create,
            format!("snapshot {} creation started", name),
        ))
    }

    pub async fn ensure_snapshot_deleted(&self, config: &ScanJobConfig) -> Result<()> {
        let timings = self.timings();
        let name = config.snapshot_name();

        match with_timeout(timings.request_timeout, self.services.snapshots.get(&name)).await {
            Ok(snapshot) if snapshot.state == ProvisioningState::Deleting => {
                return Err(ProviderError::retryable(
                    timings.snapshot_delete,
                    format!("snapshot {} is being deleted", name),
                ));
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                return Err(handle_api_error(
                    e,
                    timings.api_backoff,
                    format_args!("getting snapshot {}", name),
                ));
            }
        }

        info!(snapshot = %name, "Deleting snapshot");
        match with_timeout(timings.request_timeout, self.services.snapshots.delete(&name)).await {
            Ok(()) => Err(ProviderError::retryable(
                timings.snapshot_delete,
                format!("snapshot {} delete started", name),
            )),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(handle_api_error(
                e,
                timings.api_backoff,
                format_args!("deleting snapshot {}", name),
            )),
        }
    }
}
