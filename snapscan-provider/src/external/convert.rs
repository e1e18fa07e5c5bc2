//! Conversions between the canonical model and the `provider.Provider` wire messages.
//!
//! Optional scalars travel as the wire format's zero value (`""`, `0`) and come
//! back as `None`. Tag lists travel in order; an empty list comes back as `None`.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::proto;
use crate::asset::{Asset, AssetInfo, CloudProvider, DirInfo, PodInfo, Tag, VmInfo, normalize_tags};
use crate::error::{ConversionError, ProviderError};
use crate::scan_job::{ScanJobConfig, ScanMetadata, ScannerInstanceCreationConfig};

type Result<T> = std::result::Result<T, ConversionError>;

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

pub fn timestamp_to_wire(time: &DateTime<Utc>) -> prost_types::Timestamp {
    // chrono reports a leap second as nanos >= 1e9; the wire format has no leap seconds.
    let nanos = time.timestamp_subsec_nanos().min(999_999_999);
    prost_types::Timestamp {
        seconds: time.timestamp(),
        nanos: nanos as i32,
    }
}

pub fn timestamp_from_wire(ts: &prost_types::Timestamp) -> Result<DateTime<Utc>> {
    let invalid = || ConversionError::InvalidTimestamp {
        seconds: ts.seconds,
        nanos: ts.nanos,
    };
    let nanos = u32::try_from(ts.nanos).map_err(|_| invalid())?;
    if nanos >= 1_000_000_000 {
        return Err(invalid());
    }
    DateTime::from_timestamp(ts.seconds, nanos).ok_or_else(invalid)
}

pub fn tags_to_wire(tags: Option<&[Tag]>) -> Vec<proto::Tag> {
    tags.unwrap_or_default()
        .iter()
        .map(|t| proto::Tag {
            key: t.key.clone(),
            val: t.value.clone(),
        })
        .collect()
}

pub fn tags_from_wire(tags: Vec<proto::Tag>) -> Option<Vec<Tag>> {
    normalize_tags(
        tags.into_iter()
            .map(|t| Tag {
                key: t.key,
                value: t.val,
            })
            .collect(),
    )
}

fn vm_info_to_wire(info: &VmInfo) -> proto::VmInfo {
    proto::VmInfo {
        id: info.instance_id.clone(),
        location: info.location.clone(),
        image: info.image.clone(),
        instance_type: info.instance_type.clone(),
        platform: info.platform.clone(),
        tags: tags_to_wire(info.tags.as_deref()),
        launch_time: Some(timestamp_to_wire(&info.launch_time)),
    }
}

fn vm_info_from_wire(info: proto::VmInfo) -> Result<VmInfo> {
    let launch_time = match &info.launch_time {
        Some(ts) => timestamp_from_wire(ts)?,
        None => DateTime::<Utc>::UNIX_EPOCH,
    };
    Ok(VmInfo {
        instance_id: info.id,
        location: info.location,
        image: info.image,
        instance_type: info.instance_type,
        platform: info.platform,
        launch_time,
        instance_provider: Some(CloudProvider::External),
        security_groups: Some(vec![]),
        tags: tags_from_wire(info.tags),
    })
}

/// Encode an asset. Absent input is invalid; an asset with no variant is unsupported.
pub fn asset_to_wire(asset: Option<&Asset>) -> Result<proto::Asset> {
    let asset = asset.ok_or_else(|| ConversionError::InvalidInput("asset is nil".to_string()))?;

    let asset_type = match asset.info()? {
        AssetInfo::Vm(info) => proto::asset::AssetType::Vminfo(vm_info_to_wire(info)),
        AssetInfo::Dir(info) => proto::asset::AssetType::Dirinfo(proto::DirInfo {
            dir_name: info.dir_name.clone().unwrap_or_default(),
            location: info.location.clone().unwrap_or_default(),
        }),
        AssetInfo::Pod(info) => proto::asset::AssetType::Podinfo(proto::PodInfo {
            pod_name: info.pod_name.clone().unwrap_or_default(),
            location: info.location.clone().unwrap_or_default(),
        }),
    };

    Ok(proto::Asset {
        asset_type: Some(asset_type),
    })
}

/// Decode an asset. Absent input is invalid; an unset variant is unsupported.
pub fn asset_from_wire(asset: Option<proto::Asset>) -> Result<Asset> {
    let asset = asset.ok_or_else(|| ConversionError::InvalidInput("asset is nil".to_string()))?;

    let info = match asset.asset_type {
        Some(proto::asset::AssetType::Vminfo(info)) => AssetInfo::Vm(vm_info_from_wire(info)?),
        Some(proto::asset::AssetType::Dirinfo(info)) => AssetInfo::Dir(DirInfo {
            dir_name: non_empty(info.dir_name),
            location: non_empty(info.location),
        }),
        Some(proto::asset::AssetType::Podinfo(info)) => AssetInfo::Pod(PodInfo {
            pod_name: non_empty(info.pod_name),
            location: non_empty(info.location),
        }),
        None => return Err(ConversionError::UnsupportedAssetType),
    };

    Ok(Asset::new(info))
}

pub fn scan_job_config_to_wire(config: &ScanJobConfig) -> Result<proto::ScanJobConfig> {
    let creation = &config.scanner_instance_creation_config;

    Ok(proto::ScanJobConfig {
        scanner_image: config.scanner_image.clone(),
        scanner_cli_config: config.scanner_cli_config.clone(),
        vm_clarity_address: config.vmclarity_address.clone(),
        scan_metadata: Some(proto::ScanMetadata {
            scan_id: config.scan_metadata.scan_id.clone(),
            asset_scan_id: config.scan_metadata.asset_scan_id.clone(),
            asset_id: config.scan_metadata.asset_id.clone(),
        }),
        scanner_instance_creation_config: Some(proto::ScannerInstanceCreationConfig {
            max_price: creation.max_price.clone().unwrap_or_default(),
            retry_max_attempts: creation.retry_max_attempts.unwrap_or_default(),
            use_spot_instances: creation.use_spot_instances,
        }),
        asset: Some(asset_to_wire(Some(&config.asset))?),
    })
}

pub fn scan_job_config_from_wire(config: proto::ScanJobConfig) -> Result<ScanJobConfig> {
    let metadata = config.scan_metadata.ok_or_else(|| {
        ConversionError::InvalidInput("scan job config has no scan metadata".to_string())
    })?;
    let creation = config.scanner_instance_creation_config.unwrap_or_default();

    Ok(ScanJobConfig {
        scanner_image: config.scanner_image,
        scanner_cli_config: config.scanner_cli_config,
        vmclarity_address: config.vm_clarity_address,
        scan_metadata: ScanMetadata {
            scan_id: metadata.scan_id,
            asset_scan_id: metadata.asset_scan_id,
            asset_id: metadata.asset_id,
        },
        scanner_instance_creation_config: ScannerInstanceCreationConfig {
            max_price: non_empty(creation.max_price),
            retry_max_attempts: (creation.retry_max_attempts != 0)
                .then_some(creation.retry_max_attempts),
            use_spot_instances: creation.use_spot_instances,
        },
        asset: asset_from_wire(config.asset)?,
    })
}

/// Map a wire result error onto the taxonomy. No error means done.
pub fn result_from_wire(err: Option<proto::Error>) -> crate::error::Result<()> {
    let Some(err) = err else {
        return Ok(());
    };
    match err.error_type {
        Some(proto::error::ErrorType::ErrRetryable(e)) => Err(ProviderError::retryable(
            Duration::from_secs(u64::from(e.after)),
            e.err,
        )),
        Some(proto::error::ErrorType::ErrFatal(e)) => Err(ProviderError::fatal(e.err)),
        None => Err(ProviderError::fatal(
            "protocol error: result error has no error type",
        )),
    }
}

/// Encode a provider outcome for the wire. Retry delays round up to whole seconds.
pub fn result_to_wire(result: &crate::error::Result<()>) -> Option<proto::Error> {
    let error_type = match result {
        Ok(()) => return None,
        Err(ProviderError::Retryable { after, message }) => {
            let secs = after.as_secs() + u64::from(after.subsec_nanos() > 0);
            proto::error::ErrorType::ErrRetryable(proto::ErrRetryable {
                err: message.clone(),
                after: u32::try_from(secs).unwrap_or(u32::MAX),
            })
        }
        Err(ProviderError::Fatal { message }) => {
            proto::error::ErrorType::ErrFatal(proto::ErrFatal {
                err: message.clone(),
            })
        }
    };
    Some(proto::Error {
        error_type: Some(error_type),
    })
}
