//! Canonical asset model shared by every provider backend.
//!
//! The JSON form matches the REST model: `AssetInfo` is discriminated by an
//! `objectType` field.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConversionError;

/// Backend that owns an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloudProvider {
    #[serde(rename = "AWS")]
    Aws,
    Azure,
    #[serde(rename = "GCP")]
    Gcp,
    Docker,
    External,
    Kubernetes,
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloudProvider::Aws => "AWS",
            CloudProvider::Azure => "Azure",
            CloudProvider::Gcp => "GCP",
            CloudProvider::Docker => "Docker",
            CloudProvider::External => "External",
            CloudProvider::Kubernetes => "Kubernetes",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Collapse an empty tag list to `None`. Order is preserved otherwise.
pub fn normalize_tags(tags: Vec<Tag>) -> Option<Vec<Tag>> {
    if tags.is_empty() { None } else { Some(tags) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmInfo {
    #[serde(rename = "instanceID")]
    pub instance_id: String,
    pub location: String,
    pub image: String,
    pub instance_type: String,
    pub platform: String,
    pub launch_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_provider: Option<CloudProvider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_groups: Option<Vec<SecurityGroup>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// A scannable location. Exactly one arm is ever set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "objectType")]
pub enum AssetInfo {
    #[serde(rename = "VMInfo")]
    Vm(VmInfo),
    #[serde(rename = "DirInfo")]
    Dir(DirInfo),
    #[serde(rename = "PodInfo")]
    Pod(PodInfo),
}

impl AssetInfo {
    /// Discriminator value used in the JSON form.
    pub fn object_type(&self) -> &'static str {
        match self {
            AssetInfo::Vm(_) => "VMInfo",
            AssetInfo::Dir(_) => "DirInfo",
            AssetInfo::Pod(_) => "PodInfo",
        }
    }

    pub fn as_vm_info(&self) -> Result<&VmInfo, ConversionError> {
        match self {
            AssetInfo::Vm(info) => Ok(info),
            _ => Err(ConversionError::WrongAssetType { expected: "VMInfo" }),
        }
    }

    pub fn as_dir_info(&self) -> Result<&DirInfo, ConversionError> {
        match self {
            AssetInfo::Dir(info) => Ok(info),
            _ => Err(ConversionError::WrongAssetType {
                expected: "DirInfo",
            }),
        }
    }

    pub fn as_pod_info(&self) -> Result<&PodInfo, ConversionError> {
        match self {
            AssetInfo::Pod(info) => Ok(info),
            _ => Err(ConversionError::WrongAssetType {
                expected: "PodInfo",
            }),
        }
    }
}

impl From<VmInfo> for AssetInfo {
    fn from(info: VmInfo) -> Self {
        AssetInfo::Vm(info)
    }
}

impl From<DirInfo> for AssetInfo {
    fn from(info: DirInfo) -> Self {
        AssetInfo::Dir(info)
    }
}

impl From<PodInfo> for AssetInfo {
    fn from(info: PodInfo) -> Self {
        AssetInfo::Pod(info)
    }
}

/// A discovered or targeted scannable entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_info: Option<AssetInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_on: Option<DateTime<Utc>>,
}

impl Asset {
    pub fn new(info: impl Into<AssetInfo>) -> Self {
        Self {
            asset_info: Some(info.into()),
            ..Default::default()
        }
    }

    /// The populated variant. An asset without one is unsupported.
    pub fn info(&self) -> Result<&AssetInfo, ConversionError> {
        self.asset_info
            .as_ref()
            .ok_or(ConversionError::UnsupportedAssetType)
    }
}
