use tracing::{debug, info};

use super::api::{VirtualMachine, handle_api_error, with_timeout};
use super::{AzureProvider, SCANNER_TAG_KEY};
use crate::asset::{Asset, CloudProvider, SecurityGroup, VmInfo, normalize_tags};
use crate::error::Result;
use crate::provider::DiscoverScope;

fn vm_info_from_vm(vm: VirtualMachine) -> VmInfo {
    VmInfo {
        instance_id: vm.name,
        location: vm.location,
        image: vm.image,
        instance_type: vm.vm_size,
        platform: vm.platform,
        launch_time: vm.launch_time,
        instance_provider: Some(CloudProvider::Azure),
        security_groups: Some(
            vm.security_groups
                .into_iter()
                .map(|id| SecurityGroup { id })
                .collect(),
        ),
        tags: normalize_tags(vm.tags),
    }
}

impl AzureProvider {
    pub(crate) async fn discover_vms(&self, scope: &DiscoverScope) -> Result<Vec<Asset>> {
        let timings = self.timings();

        let vms = with_timeout(timings.request_timeout, self.services.vms.list())
            .await
            .map_err(|e| {
                handle_api_error(e, timings.api_backoff, format_args!("listing VMs"))
            })?;

        let total = vms.len();
        let assets: Vec<Asset> = vms
            .into_iter()
            .filter(|vm| {
                if vm.tags.iter().any(|t| t.key == SCANNER_TAG_KEY) {
                    debug!(vm = %vm.name, "Skipping scanner VM");
                    return false;
                }
                scope.matches(&vm.location, &vm.tags)
            })
            .map(|vm| Asset::new(vm_info_from_vm(vm)))
            .collect();

        info!(total, matched = assets.len(), "Discovered Azure VMs");
        Ok(assets)
    }
}
