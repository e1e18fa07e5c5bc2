use tracing::{debug, info};

use super::AzureProvider;
use super::api::{CopyStatus, Snapshot, handle_api_error, with_timeout};
use crate::error::{ProviderError, Result};
use crate::scan_job::ScanJobConfig;

impl AzureProvider {
    pub fn blob_url(&self, blob_name: &str) -> String {
        format!(
            "https://{}.blob.core.windows.net/{}/{}",
            self.config.scanner_storage_account_name,
            self.config.scanner_storage_container_name,
            blob_name
        )
    }

    /// Copy `snapshot` into a VHD blob in the scanner storage account.
    ///
    /// Returns the blob URL once the copy has succeeded. The read grant on
    /// the snapshot is revoked on that same call.
    pub async fn ensure_blob_from_snapshot(
        &self,
        config: &ScanJobConfig,
        snapshot: &Snapshot,
    ) -> Result<String> {
        let timings = self.timings();
        let blob_name = config.blob_name();
        let blob_url = self.blob_url(&blob_name);

        match with_timeout(
            timings.request_timeout,
            self.services.blobs.get_properties(&blob_url),
        )
        .await
        {
            Ok(props) => {
                match props.copy_status {
                    CopyStatus::Success => {}
                    CopyStatus::Pending => {
                        debug!(blob = %blob_name, "Blob is still copying");
                        return Err(ProviderError::retryable(
                            timings.blob_copy,
                            format!("blob {} is still copying", blob_name),
                        ));
                    }
                    status @ (CopyStatus::Aborted | CopyStatus::Failed) => {
                        return Err(ProviderError::fatal(format!(
                            "copy into blob {} ended with status {:?}",
                            blob_name, status
                        )));
                    }
                }

                if snapshot.access_granted {
                    info!(snapshot = %snapshot.name, "Revoking SAS access to snapshot");
                    with_timeout(
                        timings.request_timeout,
                        self.services.snapshots.revoke_access(&snapshot.name),
                    )
                    .await
                    .map_err(|e| {
                        handle_api_error(
                            e,
                            timings.api_backoff,
                            format_args!("revoking SAS access for snapshot {}", snapshot.name),
                        )
                    })?;
                }

                return Ok(blob_url);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(handle_api_error(
                    e,
                    timings.api_backoff,
                    format_args!("getting blob {}", blob_name),
                ));
            }
        }

        // The grant URL is disclosed exactly once, so it is consumed by the
        // copy in the same call and never stored.
        let grant = with_timeout(
            timings.request_timeout,
            self.services
                .snapshots
                .grant_access(&snapshot.name, timings.snapshot_access),
        )
        .await
        .map_err(|e| {
            handle_api_error(
                e,
                timings.api_backoff,
                format_args!("granting SAS access to snapshot {}", snapshot.name),
            )
        })?;

        let copy_id = with_timeout(
            timings.request_timeout,
            self.services.blobs.start_copy_from_url(&blob_url, grant),
        )
        .await
        .map_err(|e| {
            handle_api_error(
                e,
                timings.api_backoff,
                format_args!("starting copy from URL operation for blob {}", blob_name),
            )
        })?;

        info!(blob = %blob_name, snapshot = %snapshot.name, copy_id = %copy_id, "Started blob copy from snapshot");
        Err(ProviderError::retryable(
            timings.blob_copy,
            format!("blob {} copy from url started", blob_name),
        ))
    }

    pub async fn ensure_blob_deleted(&self, config: &ScanJobConfig) -> Result<()> {
        let timings = self.timings();
        let blob_name = config.blob_name();
        let blob_url = self.blob_url(&blob_name);

        let props = match with_timeout(
            timings.request_timeout,
            self.services.blobs.get_properties(&blob_url),
        )
        .await
        {
            Ok(props) => props,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                return Err(handle_api_error(
                    e,
                    timings.api_backoff,
                    format_args!("getting blob {}", blob_name),
                ));
            }
        };

        // A pending copy is always aborted, however close it is to finishing.
        if props.copy_status == CopyStatus::Pending {
            info!(blob = %blob_name, copy_id = %props.copy_id, "Aborting blob copy");
            with_timeout(
                timings.request_timeout,
                self.services.blobs.abort_copy(&blob_url, &props.copy_id),
            )
            .await
            .map_err(|e| {
                handle_api_error(
                    e,
                    timings.api_backoff,
                    format_args!("aborting copy from url for blob {}", blob_name),
                )
            })?;
            return Err(ProviderError::retryable(
                timings.blob_abort,
                format!("blob {} copy aborting", blob_name),
            ));
        }

        info!(blob = %blob_name, "Deleting blob");
        match with_timeout(timings.request_timeout, self.services.blobs.delete(&blob_url)).await {
            Ok(()) => Err(ProviderError::retryable(
                timings.blob_delete,
                format!("blob {} delete started", blob_name),
            )),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(handle_api_error(
                e,
                timings.api_backoff,
                format_args!("deleting blob {}", blob_name),
            )),
        }
    }
}
