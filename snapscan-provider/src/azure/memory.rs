//! In-memory Azure.
//!
//! Every mutating call is recorded in [`CallCounts`] and leaves the resource in
//! its transitional state (`Creating`, copy `Pending`, `Deleting`, attaching).
//! [`InMemoryAzure::settle`] completes all outstanding transitions, standing in
//! for time passing on the Azure side. One-shot failures can be injected per
//! operation with [`InMemoryAzure::fail_next`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::api::{
    AccessGrant, ApiError, ApiResult, BlobApi, BlobProperties, CopyStatus, DiskAttachment,
    DiskRequest, DiskSource, DisksApi, ManagedDisk, ProvisioningState, Snapshot, SnapshotRequest,
    SnapshotsApi, VirtualMachine, VirtualMachinesApi, VmRequest,
};

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetSnapshot,
    CreateSnapshot,
    GrantAccess,
    RevokeAccess,
    DeleteSnapshot,
    GetBlob,
    StartCopy,
    AbortCopy,
    DeleteBlob,
    GetDisk,
    CreateDisk,
    DeleteDisk,
    GetVm,
    ListVms,
    CreateVm,
    AttachDisk,
    DeleteVm,
}

/// Number of calls per remote operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub reads: u32,
    pub snapshot_create: u32,
    pub grant_access: u32,
    pub revoke_access: u32,
    pub snapshot_delete: u32,
    pub blob_copy: u32,
    pub blob_abort: u32,
    pub blob_delete: u32,
    pub disk_create: u32,
    pub disk_delete: u32,
    pub vm_create: u32,
    pub disk_attach: u32,
    pub vm_delete: u32,
}

impl CallCounts {
    /// Calls that changed remote state.
    pub fn mutations(&self) -> u32 {
        self.snapshot_create
            + self.grant_access
            + self.revoke_access
            + self.snapshot_delete
            + self.blob_copy
            + self.blob_abort
            + self.blob_delete
            + self.disk_create
            + self.disk_delete
            + self.vm_create
            + self.disk_attach
            + self.vm_delete
    }
}

#[derive(Debug, Clone)]
struct Blob {
    props: BlobProperties,
    source_url: String,
}

#[derive(Default)]
struct State {
    snapshots: HashMap<String, Snapshot>,
    blobs: HashMap<String, Blob>,
    disks: HashMap<String, ManagedDisk>,
    vms: HashMap<String, VirtualMachine>,
    calls: CallCounts,
    failures: HashMap<Operation, ApiError>,
}

impl State {
    fn check(&mut self, op: Operation) -> ApiResult<()> {
        match self.failures.remove(&op) {
            Some(err) => {
                debug!(?op, error = %err, "Injected failure");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct InMemoryAzure {
    state: Mutex<State>,
}

impl InMemoryAzure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with `err`.
    pub async fn fail_next(&self, op: Operation, err: ApiError) {
        self.state.lock().await.failures.insert(op, err);
    }

    pub async fn calls(&self) -> CallCounts {
        self.state.lock().await.calls.clone()
    }

    pub async fn add_vm(&self, vm: VirtualMachine) {
        self.state.lock().await.vms.insert(vm.name.clone(), vm);
    }

    pub async fn add_snapshot(&self, snapshot: Snapshot) {
        self.state
            .lock()
            .await
            .snapshots
            .insert(snapshot.name.clone(), snapshot);
    }

    pub async fn add_blob(&self, url: &str, copy_status: CopyStatus) {
        self.state.lock().await.blobs.insert(
            url.to_string(),
            Blob {
                props: BlobProperties {
                    copy_id: Uuid::new_v4().to_string(),
                    copy_status,
                },
                source_url: String::new(),
            },
        );
    }

    pub async fn snapshot(&self, name: &str) -> Option<Snapshot> {
        self.state.lock().await.snapshots.get(name).cloned()
    }

    pub async fn blob(&self, url: &str) -> Option<BlobProperties> {
        self.state
            .lock()
            .await
            .blobs
            .get(url)
            .map(|b| b.props.clone())
    }

    /// URL the blob was copied from, if it was created by a copy.
    pub async fn blob_source(&self, url: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .blobs
            .get(url)
            .map(|b| b.source_url.clone())
    }

    pub async fn disk(&self, name: &str) -> Option<ManagedDisk> {
        self.state.lock().await.disks.get(name).cloned()
    }

    pub async fn vm(&self, name: &str) -> Option<VirtualMachine> {
        self.state.lock().await.vms.get(name).cloned()
    }

    /// Set the copy status of a blob directly.
    pub async fn set_copy_status(&self, url: &str, status: CopyStatus) {
        if let Some(blob) = self.state.lock().await.blobs.get_mut(url) {
            blob.props.copy_status = status;
        }
    }

    /// Finish every in-flight operation.
    pub async fn settle(&self) {
        let mut state = self.state.lock().await;

        state.snapshots.retain(|_, s| s.state != ProvisioningState::Deleting);
        for snapshot in state.snapshots.values_mut() {
            if snapshot.state == ProvisioningState::Creating {
                snapshot.state = ProvisioningState::Succeeded;
            }
        }

        for blob in state.blobs.values_mut() {
            if blob.props.copy_status == CopyStatus::Pending {
                blob.props.copy_status = CopyStatus::Success;
            }
        }

        let deleted_vms: Vec<String> = state
            .vms
            .values()
            .filter(|vm| vm.state == ProvisioningState::Deleting)
            .map(|vm| vm.name.clone())
            .collect();
        state.vms.retain(|_, vm| vm.state != ProvisioningState::Deleting);
        for vm in state.vms.values_mut() {
            if vm.state == ProvisioningState::Creating {
                vm.state = ProvisioningState::Succeeded;
            }
        }

        state.disks.retain(|_, d| d.state != ProvisioningState::Deleting);
        for disk in state.disks.values_mut() {
            if disk.state == ProvisioningState::Creating {
                disk.state = ProvisioningState::Succeeded;
            }
            disk.attachment = match std::mem::replace(&mut disk.attachment, DiskAttachment::Detached)
            {
                DiskAttachment::Attaching { vm } | DiskAttachment::Attached { vm }
                    if deleted_vms.contains(&vm) =>
                {
                    DiskAttachment::Detached
                }
                DiskAttachment::Attaching { vm } => DiskAttachment::Attached { vm },
                other => other,
            };
        }
    }
}

#[async_trait]
impl SnapshotsApi for InMemoryAzure {
    async fn get(&self, name: &str) -> ApiResult<Snapshot> {
        let mut state = self.state.lock().await;
        state.calls.reads += 1;
        state.check(Operation::GetSnapshot)?;
        state
            .snapshots
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("snapshot {}", name)))
    }

    async fn create(&self, request: SnapshotRequest) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.calls.snapshot_create += 1;
        state.check(Operation::CreateSnapshot)?;
        if state.snapshots.contains_key(&request.name) {
            return Err(ApiError::Conflict(format!(
                "snapshot {} already exists",
                request.name
            )));
        }
        state.snapshots.insert(
            request.name.clone(),
            Snapshot {
                name: request.name,
                location: request.location,
                source_disk: request.source_disk,
                state: ProvisioningState::Creating,
                access_granted: false,
            },
        );
        Ok(())
    }

    async fn grant_access(&self, name: &str, _duration: Duration) -> ApiResult<AccessGrant> {
        let mut state = self.state.lock().await;
        state.calls.grant_access += 1;
        state.check(Operation::GrantAccess)?;
        let snapshot = state
            .snapshots
            .get_mut(name)
            .ok_or_else(|| ApiError::NotFound(format!("snapshot {}", name)))?;
        if snapshot.state != ProvisioningState::Succeeded {
            return Err(ApiError::Conflict(format!("snapshot {} is not ready", name)));
        }
        snapshot.access_granted = true;
        Ok(AccessGrant::new(format!(
            "https://md-{}.blob.core.windows.net/abcd/{}?sig={}",
            Uuid::new_v4().simple(),
            name,
            Uuid::new_v4().simple()
        )))
    }

    async fn revoke_access(&self, name: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.calls.revoke_access += 1;
        state.check(Operation::RevokeAccess)?;
        let snapshot = state
            .snapshots
            .get_mut(name)
            .ok_or_else(|| ApiError::NotFound(format!("snapshot {}", name)))?;
        snapshot.access_granted = false;
        Ok(())
    }

    async fn delete(&self, name: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.calls.snapshot_delete += 1;
        state.check(Operation::DeleteSnapshot)?;
        let snapshot = state
            .snapshots
            .get_mut(name)
            .ok_or_else(|| ApiError::NotFound(format!("snapshot {}", name)))?;
        snapshot.state = ProvisioningState::Deleting;
        Ok(())
    }
}

#[async_trait]
impl BlobApi for InMemoryAzure {
    async fn get_properties(&self, url: &str) -> ApiResult<BlobProperties> {
        let mut state = self.state.lock().await;
        state.calls.reads += 1;
        state.check(Operation::GetBlob)?;
        state
            .blobs
            .get(url)
            .map(|b| b.props.clone())
            .ok_or_else(|| ApiError::NotFound(format!("blob {}", url)))
    }

    async fn start_copy_from_url(&self, url: &str, source: AccessGrant) -> ApiResult<String> {
        let mut state = self.state.lock().await;
        state.calls.blob_copy += 1;
        state.check(Operation::StartCopy)?;
        if let Some(blob) = state.blobs.get(url) {
            if blob.props.copy_status == CopyStatus::Pending {
                return Err(ApiError::Conflict(format!(
                    "blob {} has a pending copy operation",
                    url
                )));
            }
        }
        let copy_id = Uuid::new_v4().to_string();
        state.blobs.insert(
            url.to_string(),
            Blob {
                props: BlobProperties {
                    copy_id: copy_id.clone(),
                    copy_status: CopyStatus::Pending,
                },
                source_url: source.into_url(),
            },
        );
        Ok(copy_id)
    }

    async fn abort_copy(&self, url: &str, copy_id: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.calls.blob_abort += 1;
        state.check(Operation::AbortCopy)?;
        let blob = state
            .blobs
            .get_mut(url)
            .ok_or_else(|| ApiError::NotFound(format!("blob {}", url)))?;
        if blob.props.copy_id != copy_id || blob.props.copy_status != CopyStatus::Pending {
            return Err(ApiError::Conflict(format!(
                "no pending copy {} on blob {}",
                copy_id, url
            )));
        }
        blob.props.copy_status = CopyStatus::Aborted;
        Ok(())
    }

    async fn delete(&self, url: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.calls.blob_delete += 1;
        state.check(Operation::DeleteBlob)?;
        state
            .blobs
            .remove(url)
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(format!("blob {}", url)))
    }
}

#[async_trait]
impl DisksApi for InMemoryAzure {
    async fn get(&self, name: &str) -> ApiResult<ManagedDisk> {
        let mut state = self.state.lock().await;
        state.calls.reads += 1;
        state.check(Operation::GetDisk)?;
        state
            .disks
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("disk {}", name)))
    }

    async fn create(&self, request: DiskRequest) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.calls.disk_create += 1;
        state.check(Operation::CreateDisk)?;
        if state.disks.contains_key(&request.name) {
            return Err(ApiError::Conflict(format!(
                "disk {} already exists",
                request.name
            )));
        }
        match &request.source {
            DiskSource::Snapshot { name } => {
                let ready = state
                    .snapshots
                    .get(name)
                    .is_some_and(|s| s.state == ProvisioningState::Succeeded);
                if !ready {
                    return Err(ApiError::Rejected {
                        status: 400,
                        message: format!("source snapshot {} is not available", name),
                    });
                }
            }
            DiskSource::Blob { url } => {
                let ready = state
                    .blobs
                    .get(url)
                    .is_some_and(|b| b.props.copy_status == CopyStatus::Success);
                if !ready {
                    return Err(ApiError::Rejected {
                        status: 400,
                        message: format!("source blob {} is not available", url),
                    });
                }
            }
        }
        state.disks.insert(
            request.name.clone(),
            ManagedDisk {
                name: request.name,
                location: request.location,
                state: ProvisioningState::Creating,
                attachment: DiskAttachment::Detached,
            },
        );
        Ok(())
    }

    async fn delete(&self, name: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.calls.disk_delete += 1;
        state.check(Operation::DeleteDisk)?;
        let disk = state
            .disks
            .get_mut(name)
            .ok_or_else(|| ApiError::NotFound(format!("disk {}", name)))?;
        if disk.attachment != DiskAttachment::Detached {
            return Err(ApiError::Conflict(format!("disk {} is attached", name)));
        }
        disk.state = ProvisioningState::Deleting;
        Ok(())
    }
}

#[async_trait]
impl VirtualMachinesApi for InMemoryAzure {
    async fn get(&self, name: &str) -> ApiResult<VirtualMachine> {
        let mut state = self.state.lock().await;
        state.calls.reads += 1;
        state.check(Operation::GetVm)?;
        state
            .vms
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("vm {}", name)))
    }

    async fn list(&self) -> ApiResult<Vec<VirtualMachine>> {
        let mut state = self.state.lock().await;
        state.calls.reads += 1;
        state.check(Operation::ListVms)?;
        let mut vms: Vec<VirtualMachine> = state.vms.values().cloned().collect();
        vms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(vms)
    }

    async fn create(&self, request: VmRequest) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.calls.vm_create += 1;
        state.check(Operation::CreateVm)?;
        if state.vms.contains_key(&request.name) {
            return Err(ApiError::Conflict(format!(
                "vm {} already exists",
                request.name
            )));
        }
        state.vms.insert(
            request.name.clone(),
            VirtualMachine {
                os_disk: format!("{}-osdisk", request.name),
                name: request.name,
                location: request.location,
                image: request.image,
                vm_size: request.vm_size,
                platform: "Linux".to_string(),
                security_groups: vec![],
                tags: request.tags,
                launch_time: Utc::now(),
                state: ProvisioningState::Creating,
            },
        );
        Ok(())
    }

    async fn attach_disk(&self, vm: &str, disk: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.calls.disk_attach += 1;
        state.check(Operation::AttachDisk)?;
        if !state.vms.contains_key(vm) {
            return Err(ApiError::NotFound(format!("vm {}", vm)));
        }
        let disk = state
            .disks
            .get_mut(disk)
            .ok_or_else(|| ApiError::NotFound(format!("disk {}", disk)))?;
        if disk.attachment != DiskAttachment::Detached {
            return Err(ApiError::Conflict(format!("disk {} is attached", disk.name)));
        }
        disk.attachment = DiskAttachment::Attaching { vm: vm.to_string() };
        Ok(())
    }

    async fn delete(&self, name: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.calls.vm_delete += 1;
        state.check(Operation::DeleteVm)?;
        let vm = state
            .vms
            .get_mut(name)
            .ok_or_else(|| ApiError::NotFound(format!("vm {}", name)))?;
        vm.state = ProvisioningState::Deleting;
        Ok(())
    }
}
