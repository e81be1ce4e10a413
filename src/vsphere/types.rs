// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Hypervisor configuration document types.
//!
//! These mirror the subset of the hypervisor's ConfigSpec the operator reads and
//! writes. They serialize as camelCase JSON, which is also the format accepted in
//! a `VirtualMachineClass` raw override (after base64 decoding).

use serde::{Deserialize, Serialize};

/// Hardware configuration document with an ordered device-change list.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub annotation: String,

    #[serde(default)]
    pub num_cpus: i64,

    #[serde(default)]
    pub memory_mb: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_allocation: Option<ResourceAllocation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_allocation: Option<ResourceAllocation>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_config: Vec<OptionValue>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_change: Vec<DeviceConfigSpec>,
}

impl ConfigSpec {
    /// True when applying this spec as a reconfigure would change nothing.
    #[must_use]
    pub fn is_empty_change(&self) -> bool {
        self.num_cpus == 0
            && self.memory_mb == 0
            && self.cpu_allocation.is_none()
            && self.memory_allocation.is_none()
            && self.extra_config.is_empty()
            && self.device_change.is_empty()
    }
}

/// Reservation, limit and shares for CPU (MHz) or memory (MB).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAllocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<i32>,
}

/// A single extra config key/value pair.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct OptionValue {
    pub key: String,
    pub value: String,
}

impl OptionValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceOperation {
    Add,
    Edit,
    Remove,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileOperation {
    Create,
    Destroy,
    Replace,
}

/// Storage policy attached to a device.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSpec {
    pub profile_id: String,
}

/// One entry of a device-change list.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfigSpec {
    pub operation: DeviceOperation,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_operation: Option<FileOperation>,

    pub device: VirtualDevice,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profile: Vec<ProfileSpec>,
}

/// Devices the operator understands; anything else is carried as [`GenericDevice`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum VirtualDevice {
    Disk(VirtualDisk),
    EthernetCard(VirtualEthernetCard),
    Other(GenericDevice),
}

impl VirtualDevice {
    #[must_use]
    pub fn key(&self) -> i32 {
        match self {
            VirtualDevice::Disk(d) => d.key,
            VirtualDevice::EthernetCard(n) => n.key,
            VirtualDevice::Other(o) => o.key,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDisk {
    pub key: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_key: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_number: Option<i32>,

    pub capacity_in_bytes: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thin_provisioned: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Where a NIC is plugged in.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkBacking {
    /// Managed-object ID of the network or distributed port group
    pub network: String,

    pub device_name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualEthernetCard {
    pub key: i32,

    /// Adapter model (e.g., `vmxnet3`, `e1000e`)
    #[serde(default)]
    pub adapter_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_key: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_number: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backing: Option<NetworkBacking>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// Device the operator does not interpret, kept as-is.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenericDevice {
    pub key: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_key: Option<i32>,
}
