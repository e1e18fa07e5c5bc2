use tracing::{debug, info};

use super::api::{
    DiskAttachment, ManagedDisk, ProvisioningState, SpotOptions, VirtualMachine, VmRequest,
    handle_api_error, with_timeout,
};
use super::{AzureProvider, SCANNER_TAG_KEY, render_user_data};
use crate::asset::Tag;
use crate::error::{ConversionError, ProviderError, Result};
use crate::scan_job::{ScanJobConfig, ScannerInstanceCreationConfig};

/// Spot settings from the creation config. An empty max price means no cap.
fn spot_options(creation: &ScannerInstanceCreationConfig) -> Result<Option<SpotOptions>> {
    if !creation.use_spot_instances {
        return Ok(None);
    }
    let max_price = match creation.max_price.as_deref() {
        None | Some("") => None,
        Some(price) => Some(
            price
                .parse::<f64>()
                .map_err(|_| ConversionError::InvalidMaxPrice(price.to_string()))?,
        ),
    };
    Ok(Some(SpotOptions { max_price }))
}

impl AzureProvider {
    pub async fn ensure_scanner_vm(&self, config: &ScanJobConfig) -> Result<VirtualMachine> {
        let timings = self.timings();
        let name = config.scanner_vm_name();

        match with_timeout(timings.request_timeout, self.services.vms.get(&name)).await {
            Ok(vm) => {
                return match vm.state {
                    ProvisioningState::Succeeded => Ok(vm),
                    ProvisioningState::Creating => {
                        debug!(vm = %name, "Scanner VM is still being created");
                        Err(ProviderError::retryable(
                            timings.vm_create,
                            format!("scanner VM {} is still being created", name),
                        ))
                    }
                    ProvisioningState::Failed => Err(ProviderError::fatal(format!(
                        "scanner VM {} failed to provision",
                        name
                    ))),
                    ProvisioningState::Deleting => Err(ProviderError::fatal(format!(
                        "scanner VM {} is being deleted",
                        name
                    ))),
                };
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(handle_api_error(
                    e,
                    timings.api_backoff,
                    format_args!("getting scanner VM {}", name),
                ));
            }
        }

        let request = VmRequest {
            name: name.clone(),
            location: self.config.scanner_location.clone(),
            image: self.config.scanner_image.clone(),
            vm_size: self.config.scanner_vm_size.clone(),
            subnet_id: self.config.scanner_subnet_id.clone(),
            user_data: render_user_data(config),
            ssh_public_key: self.config.scanner_public_key.clone(),
            spot: spot_options(&config.scanner_instance_creation_config)?,
            tags: vec![
                Tag::new(SCANNER_TAG_KEY, "true"),
                Tag::new("snapscan-asset-scan-id", config.asset_scan_id()),
            ],
        };

        info!(vm = %name, spot = request.spot.is_some(), "Creating scanner VM");
        with_timeout(timings.request_timeout, self.services.vms.create(request))
            .await
            .map_err(|e| {
                handle_api_error(
                    e,
                    timings.api_backoff,
                    format_args!("creating scanner VM {}", name),
                )
            })?;

        Err(ProviderError::retryable(
            timings.vm_create,
            format!("scanner VM {} creation started", name),
        ))
    }

    pub async fn ensure_disk_attached_to_scanner_vm(
        &self,
        vm: &VirtualMachine,
        disk: &ManagedDisk,
    ) -> Result<()> {
        let timings = self.timings();

        match &disk.attachment {
            DiskAttachment::Attached { vm: owner } if *owner == vm.name => Ok(()),
            DiskAttachment::Attaching { vm: owner } if *owner == vm.name => {
                Err(ProviderError::retryable(
                    timings.disk_attach,
                    format!("disk {} is attaching to {}", disk.name, vm.name),
                ))
            }
            DiskAttachment::Attached { vm: owner } | DiskAttachment::Attaching { vm: owner } => {
                Err(ProviderError::fatal(format!(
                    "disk {} is attached to unexpected VM {}",
                    disk.name, owner
                )))
            }
            DiskAttachment::Detached => {
                info!(vm = %vm.name, disk = %disk.name, "Attaching disk to scanner VM");
                with_timeout(
                    timings.request_timeout,
                    self.services.vms.attach_disk(&vm.name, &disk.name),
                )
                .await
                .map_err(|e| {
                    handle_api_error(
                        e,
                        timings.api_backoff,
                        format_args!("attaching disk {} to VM {}", disk.name, vm.name),
                    )
                })?;
                Err(ProviderError::retryable(
                    timings.disk_attach,
                    format!("disk {} attach to {} started", disk.name, vm.name),
                ))
            }
        }
    }

    pub async fn ensure_scanner_vm_deleted(&self, config: &ScanJobConfig) -> Result<()> {
        let timings = self.timings();
        let name = config.scanner_vm_name();

        match with_timeout(timings.request_timeout, self.services.vms.get(&name)).await {
            Ok(vm) if vm.state == ProvisioningState::Deleting => {
                return Err(ProviderError::retryable(
                    timings.vm_delete,
                    format!("scanner VM {} is being deleted", name),
                ));
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                return Err(handle_api_error(
                    e,
                    timings.api_backoff,
                    format_args!("getting scanner VM {}", name),
                ));
            }
        }

        info!(vm = %name, "Deleting scanner VM");
        match with_timeout(timings.request_timeout, self.services.vms.delete(&name)).await {
            Ok(()) => Err(ProviderError::retryable(
                timings.vm_delete,
                format!("scanner VM {} delete started", name),
            )),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(handle_api_error(
                e,
                timings.api_backoff,
                format_args!("deleting scanner VM {}", name),
            )),
        }
    }
}
