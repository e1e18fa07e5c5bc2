//! Scan infrastructure lifecycle against the in-memory Azure backend.

mod common;

use std::time::Duration;

use common::*;
use snapscan_provider::azure::api::{
    ApiError, CopyStatus, DiskAttachment, ProvisioningState, Snapshot,
};
use snapscan_provider::azure::memory::{CallCounts, Operation};
use snapscan_provider::{Asset, DirInfo, DiscoverScope, Provider, Tag};

fn ready_snapshot(location: &str) -> Snapshot {
    Snapshot {
        name: format!("snapshot-{}", ASSET_SCAN_ID),
        location: location.to_string(),
        source_disk: "web-1-osdisk".to_string(),
        state: ProvisioningState::Succeeded,
        access_granted: false,
    }
}

#[tokio::test]
async fn test_blob_copy_starts_when_absent() {
    let (azure, provider) = setup();
    let target = target_vm("web-1", "westus");
    let config = scan_job(&target);
    azure.add_snapshot(ready_snapshot("westus")).await;

    let err = provider
        .ensure_blob_from_snapshot(&config, &ready_snapshot("westus"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let blob = azure.blob(&blob_url()).await.unwrap();
    assert_eq!(blob.copy_status, CopyStatus::Pending);
    let source = azure.blob_source(&blob_url()).await.unwrap();
    assert!(source.contains("snapshot-as-7f3c"));

    let calls = azure.calls().await;
    assert_eq!(calls.grant_access, 1);
    assert_eq!(calls.blob_copy, 1);
}

#[tokio::test]
async fn test_blob_copy_in_progress_is_not_restarted() {
    let (azure, provider) = setup();
    let config = scan_job(&target_vm("web-1", "westus"));
    azure.add_snapshot(ready_snapshot("westus")).await;

    let _ = provider
        .ensure_blob_from_snapshot(&config, &ready_snapshot("westus"))
        .await;
    let snapshot = azure.snapshot("snapshot-as-7f3c").await.unwrap();

    for _ in 0..3 {
        let err = provider
            .ensure_blob_from_snapshot(&config, &snapshot)
            .await
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(120)));
    }

    let calls = azure.calls().await;
    assert_eq!(calls.grant_access, 1);
    assert_eq!(calls.blob_copy, 1);
}

#[tokio::test]
async fn test_blob_copy_success_revokes_access_once() {
    let (azure, provider) = setup();
    let config = scan_job(&target_vm("web-1", "westus"));
    azure.add_snapshot(ready_snapshot("westus")).await;

    let _ = provider
        .ensure_blob_from_snapshot(&config, &ready_snapshot("westus"))
        .await;
    azure.set_copy_status(&blob_url(), CopyStatus::Success).await;

    let snapshot = azure.snapshot("snapshot-as-7f3c").await.unwrap();
    assert!(snapshot.access_granted);
    let url = provider
        .ensure_blob_from_snapshot(&config, &snapshot)
        .await
        .unwrap();
    assert_eq!(url, blob_url());

    let snapshot = azure.snapshot("snapshot-as-7f3c").await.unwrap();
    assert!(!snapshot.access_granted);
    provider
        .ensure_blob_from_snapshot(&config, &snapshot)
        .await
        .unwrap();

    assert_eq!(azure.calls().await.revoke_access, 1);
}

#[tokio::test]
async fn test_failed_blob_copy_is_fatal() {
    let (azure, provider) = setup();
    let config = scan_job(&target_vm("web-1", "westus"));
    azure.add_blob(&blob_url(), CopyStatus::Failed).await;

    let err = provider
        .ensure_blob_from_snapshot(&config, &ready_snapshot("westus"))
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(azure.calls().await.mutations(), 0);
}

#[tokio::test]
async fn test_blob_deleted_when_absent_only_reads() {
    let (azure, provider) = setup();
    let config = scan_job(&target_vm("web-1", "westus"));

    provider.ensure_blob_deleted(&config).await.unwrap();

    let calls = azure.calls().await;
    assert_eq!(calls.reads, 1);
    assert_eq!(calls.mutations(), 0);
}

#[tokio::test]
async fn test_blob_deleted_aborts_pending_copy() {
    let (azure, provider) = setup();
    let config = scan_job(&target_vm("web-1", "westus"));
    azure.add_blob(&blob_url(), CopyStatus::Pending).await;

    let err = provider.ensure_blob_deleted(&config).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(
        azure.blob(&blob_url()).await.unwrap().copy_status,
        CopyStatus::Aborted
    );
    assert_eq!(azure.calls().await.blob_delete, 0);

    let err = provider.ensure_blob_deleted(&config).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(azure.blob(&blob_url()).await.is_none());

    provider.ensure_blob_deleted(&config).await.unwrap();
    let calls = azure.calls().await;
    assert_eq!(calls.blob_abort, 1);
    assert_eq!(calls.blob_delete, 1);
}

#[tokio::test]
async fn test_blob_deleted_after_finished_copy() {
    let (azure, provider) = setup();
    let config = scan_job(&target_vm("web-1", "westus"));
    azure.add_blob(&blob_url(), CopyStatus::Success).await;

    let err = provider.ensure_blob_deleted(&config).await.unwrap_err();
    assert_eq!(err.retry_after(), Some(Duration::from_secs(120)));
    let calls = azure.calls().await;
    assert_eq!(calls.blob_abort, 0);
    assert_eq!(calls.blob_delete, 1);

    provider.ensure_blob_deleted(&config).await.unwrap();
    assert_eq!(azure.calls().await.blob_delete, 1);
}

#[tokio::test]
async fn test_delete_racing_remote_removal_succeeds() {
    let (azure, provider) = setup();
    let config = scan_job(&target_vm("web-1", "westus"));
    azure.add_blob(&blob_url(), CopyStatus::Success).await;
    azure
        .fail_next(Operation::DeleteBlob, ApiError::NotFound("blob".to_string()))
        .await;

    provider.ensure_blob_deleted(&config).await.unwrap();
}

#[tokio::test]
async fn test_remote_errors_are_classified() {
    let (azure, provider) = setup();
    let config = scan_job(&target_vm("web-1", "westus"));

    azure
        .fail_next(
            Operation::GetBlob,
            ApiError::Throttled {
                retry_after: Some(Duration::from_secs(7)),
            },
        )
        .await;
    let err = provider.ensure_blob_deleted(&config).await.unwrap_err();
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

    azure
        .fail_next(
            Operation::GetBlob,
            ApiError::Rejected {
                status: 403,
                message: "AuthorizationFailed".to_string(),
            },
        )
        .await;
    let err = provider.ensure_blob_deleted(&config).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(err.message().contains("AuthorizationFailed"));
}

#[tokio::test]
async fn test_cross_region_scan_lifecycle() {
    let (azure, provider) = setup();
    let target = target_vm("web-1", "westus");
    azure.add_vm(target.clone()).await;
    let config = scan_job(&target);

    let attempts = converge(&azure, || provider.ensure_scan_infrastructure(&config)).await;
    assert_eq!(attempts, 7);

    let disk = azure.disk("disk-as-7f3c").await.unwrap();
    assert_eq!(disk.location, SCANNER_LOCATION);
    assert_eq!(
        disk.attachment,
        DiskAttachment::Attached {
            vm: "scanner-as-7f3c".to_string()
        }
    );
    let scanner = azure.vm("scanner-as-7f3c").await.unwrap();
    assert_eq!(scanner.location, SCANNER_LOCATION);
    assert!(scanner.tags.contains(&Tag::new("snapscan-scanner", "true")));

    let calls = azure.calls().await;
    assert_eq!(calls.snapshot_create, 1);
    assert_eq!(calls.grant_access, 1);
    assert_eq!(calls.revoke_access, 1);
    assert_eq!(calls.blob_copy, 1);
    assert_eq!(calls.disk_create, 1);
    assert_eq!(calls.vm_create, 1);
    assert_eq!(calls.disk_attach, 1);

    // Converged: further calls change nothing.
    let before = calls.mutations();
    provider.ensure_scan_infrastructure(&config).await.unwrap();
    assert_eq!(azure.calls().await.mutations(), before);

    converge(&azure, || provider.ensure_scan_infrastructure_deleted(&config)).await;
    assert!(azure.vm("scanner-as-7f3c").await.is_none());
    assert!(azure.disk("disk-as-7f3c").await.is_none());
    assert!(azure.blob(&blob_url()).await.is_none());
    assert!(azure.snapshot("snapshot-as-7f3c").await.is_none());
    assert!(azure.vm("web-1").await.is_some());

    let before = azure.calls().await.mutations();
    provider
        .ensure_scan_infrastructure_deleted(&config)
        .await
        .unwrap();
    assert_eq!(azure.calls().await.mutations(), before);
}

#[tokio::test]
async fn test_each_setup_call_mutates_at_most_once() {
    let (azure, provider) = setup();
    let target = target_vm("web-1", "westus");
    azure.add_vm(target.clone()).await;
    let config = scan_job(&target);

    // A read grant is only usable by the copy started in the same call, so
    // it does not count on its own.
    let changes = |calls: CallCounts| {
        calls.mutations() - calls.grant_access
    };
    for attempt in 1..=20 {
        let before = changes(azure.calls().await);
        let result = provider.ensure_scan_infrastructure(&config).await;
        let made = changes(azure.calls().await) - before;
        assert!(made <= 1, "attempt {} made {} mutations", attempt, made);
        match result {
            Ok(()) => return,
            Err(e) => assert!(e.is_retryable(), "{}", e),
        }
        azure.settle().await;
    }
    panic!("reconcile did not converge in 20 attempts");
}

#[tokio::test]
async fn test_same_region_scan_skips_blob_copy() {
    let (azure, provider) = setup();
    let target = target_vm("web-1", SCANNER_LOCATION);
    azure.add_vm(target.clone()).await;
    let config = scan_job(&target);

    let attempts = converge(&azure, || provider.ensure_scan_infrastructure(&config)).await;
    assert_eq!(attempts, 5);

    let calls = azure.calls().await;
    assert_eq!(calls.grant_access, 0);
    assert_eq!(calls.blob_copy, 0);
    assert!(azure.blob(&blob_url()).await.is_none());

    converge(&azure, || provider.ensure_scan_infrastructure_deleted(&config)).await;
    assert!(azure.snapshot("snapshot-as-7f3c").await.is_none());
}

#[tokio::test]
async fn test_teardown_mid_copy() {
    let (azure, provider) = setup();
    let target = target_vm("web-1", "westus");
    azure.add_vm(target.clone()).await;
    let config = scan_job(&target);

    // Snapshot, then copy start.
    for _ in 0..2 {
        assert!(
            provider
                .ensure_scan_infrastructure(&config)
                .await
                .unwrap_err()
                .is_retryable()
        );
        if azure.blob(&blob_url()).await.is_none() {
            azure.settle().await;
        }
    }
    assert_eq!(
        azure.blob(&blob_url()).await.unwrap().copy_status,
        CopyStatus::Pending
    );

    converge(&azure, || provider.ensure_scan_infrastructure_deleted(&config)).await;
    let calls = azure.calls().await;
    assert_eq!(calls.blob_abort, 1);
    assert!(azure.blob(&blob_url()).await.is_none());
    assert!(azure.snapshot("snapshot-as-7f3c").await.is_none());
}

#[tokio::test]
async fn test_missing_target_vm_is_fatal() {
    let (azure, provider) = setup();
    let config = scan_job(&target_vm("gone-1", "westus"));

    let err = provider
        .ensure_scan_infrastructure(&config)
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(azure.calls().await.mutations(), 0);
}

#[tokio::test]
async fn test_non_vm_asset_is_rejected() {
    let (azure, provider) = setup();
    let mut config = scan_job(&target_vm("web-1", "westus"));
    config.asset = Asset::new(DirInfo {
        dir_name: Some("/srv".to_string()),
        location: None,
    });

    let err = provider
        .ensure_scan_infrastructure(&config)
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(azure.calls().await, Default::default());
}

#[tokio::test]
async fn test_discover_skips_scanner_vms() {
    let (azure, provider) = setup();
    azure.add_vm(target_vm("web-1", "westus")).await;
    azure.add_vm(target_vm("db-1", SCANNER_LOCATION)).await;
    let mut scanner = target_vm("scanner-as-1", SCANNER_LOCATION);
    scanner.tags = vec![Tag::new("snapscan-scanner", "true")];
    azure.add_vm(scanner).await;

    let assets = provider
        .discover_assets(&DiscoverScope::default())
        .await
        .unwrap();
    let ids: Vec<&str> = assets
        .iter()
        .map(|a| a.info().unwrap().as_vm_info().unwrap().instance_id.as_str())
        .collect();
    assert_eq!(ids, vec!["db-1", "web-1"]);

    let scoped = provider
        .discover_assets(&DiscoverScope {
            locations: vec!["westus".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);
}

#[tokio::test]
async fn test_discover_failure_fails_the_call() {
    let (azure, provider) = setup();
    azure
        .fail_next(Operation::ListVms, ApiError::Unavailable("503".to_string()))
        .await;

    let err = provider
        .discover_assets(&DiscoverScope::default())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}
