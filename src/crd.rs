// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for virtual machine convergence.
//!
//! This module defines the Kubernetes Custom Resource Definitions the operator
//! watches and reads while converging VMs onto the hypervisor.
//!
//! # Resource Types
//!
//! - [`VirtualMachine`] - Desired state of one VM plus the reconciler-owned status
//! - [`VirtualMachineClass`] - Hardware template (CPU, memory, raw ConfigSpec, instance storage)
//! - [`Zone`] - A fault domain and the resource pools it contributes to placement
//! - [`VirtualMachineSetResourcePolicy`] - Cluster module groups used for anti-affinity
//!
//! Instance storage claims are plain `PersistentVolumeClaim` objects.
//!
//! # Example: Declaring a VM
//!
//! ```rust,no_run
//! use vmconverge::crd::{NetworkInterface, PowerState, VirtualMachineSpec};
//!
//! let spec = VirtualMachineSpec {
//!     class_name: "best-effort-small".to_string(),
//!     image_name: "ubuntu-22.04".to_string(),
//!     storage_class: "wcp-storage".to_string(),
//!     power_state: PowerState::PoweredOn,
//!     network_interfaces: vec![NetworkInterface {
//!         name: "eth0".to_string(),
//!         network_name: "primary".to_string(),
//!         network_type: None,
//!     }],
//!     ..Default::default()
//! };
//! ```

use crate::labels::{INSTANCE_STORAGE_LABEL, ZONE_LABEL};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition represents an observation of a resource's current state.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition. Common types include: Ready, VirtualMachinePlaced.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

// ============================================================================
// VirtualMachine
// ============================================================================

/// Requested or observed power state of a VM.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum PowerState {
    #[default]
    PoweredOn,
    PoweredOff,
    Suspended,
}

impl PowerState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PowerState::PoweredOn => "PoweredOn",
            PowerState::PoweredOff => "PoweredOff",
            PowerState::Suspended => "Suspended",
        }
    }
}

/// Lifecycle phase reported in `VirtualMachine` status.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum VmPhase {
    /// Waiting on placement or instance storage
    Pending,
    /// Remote VM exists
    Created,
    /// Last reconcile failed with a terminal error
    Error,
}

/// One network interface of the VM.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Interface name inside the guest (e.g., `eth0`)
    pub name: String,

    /// Name of the network the interface attaches to
    pub network_name: String,

    /// Network provider type, when several are installed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_type: Option<String>,
}

/// Instance storage volume template carried by a claim-backed volume.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceVolumeClaim {
    /// Storage class the claim is provisioned from
    pub storage_class: String,

    /// Requested size as a Kubernetes quantity (e.g., `256Gi`)
    pub size: String,
}

/// A volume backed by a `PersistentVolumeClaim`.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimSource {
    pub claim_name: String,

    #[serde(default)]
    pub read_only: bool,

    /// Set only on volumes generated for instance storage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_volume_claim: Option<InstanceVolumeClaim>,
}

/// A disk owned directly by the hypervisor, e.g. the boot disk cloned from the image.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VsphereVolumeSource {
    /// Desired capacity as a Kubernetes quantity. Only growth is applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<String>,

    /// Device key of the existing disk this entry resizes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_key: Option<i32>,
}

/// A volume declared on the VM. Exactly one source is expected to be set.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineVolume {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PersistentVolumeClaimSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vsphere_volume: Option<VsphereVolumeSource>,
}

impl VirtualMachineVolume {
    /// True when this volume was generated from a class instance storage template.
    #[must_use]
    pub fn is_instance_storage(&self) -> bool {
        self.persistent_volume_claim
            .as_ref()
            .is_some_and(|pvc| pvc.instance_volume_claim.is_some())
    }

    #[must_use]
    pub fn is_claim_backed(&self) -> bool {
        self.persistent_volume_claim.is_some()
    }
}

/// Advanced hardware options.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedOptions {
    /// Provision new disks thin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thin_provisioned: Option<bool>,
}

/// How VM metadata reaches the guest.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MetadataTransport {
    /// `guestinfo.*` keys are copied into extra config
    ExtraConfig,
    OvfEnv,
    CloudInit,
}

/// Reference to a ConfigMap holding guest metadata.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmMetadata {
    pub config_map_name: String,
    pub transport: MetadataTransport,
}

/// `VirtualMachine` describes the desired configuration of a VM on the hypervisor.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "vmconverge.io",
    version = "v1alpha1",
    kind = "VirtualMachine",
    namespaced,
    shortname = "vm",
    doc = "VirtualMachine declares the desired state of a virtual machine. The operator places it in a zone, creates it on the hypervisor and keeps hardware and power state converged."
)]
#[kube(status = "VirtualMachineStatus")]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Power","type":"string","jsonPath":".status.powerState"}"#)]
#[kube(printcolumn = r#"{"name":"Zone","type":"string","jsonPath":".status.zone"}"#)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// Name of the cluster-scoped `VirtualMachineClass`
    pub class_name: String,

    /// Image or template the VM is cloned from
    pub image_name: String,

    /// Storage class used for the VM home and boot disk
    #[serde(default)]
    pub storage_class: String,

    #[serde(default)]
    pub power_state: PowerState,

    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,

    #[serde(default)]
    pub volumes: Vec<VirtualMachineVolume>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced_options: Option<AdvancedOptions>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_metadata: Option<VmMetadata>,

    /// Name of a `VirtualMachineSetResourcePolicy` in the same namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_policy_name: Option<String>,
}

/// Attachment state of one volume, written by the volume controller.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStatus {
    pub name: String,

    #[serde(default)]
    pub attached: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_uuid: Option<String>,
}

/// `VirtualMachine` status. Everything except `volumes` is owned by the reconciler.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<VmPhase>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_state: Option<PowerState>,

    /// Hypervisor managed-object ID of the remote VM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_uuid: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bios_uuid: Option<String>,

    #[serde(default)]
    pub volumes: Vec<VolumeStatus>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl VirtualMachine {
    /// Zone the VM is bound to, if the label has been written.
    #[must_use]
    pub fn zone_label(&self) -> Option<&str> {
        self.labels()
            .get(ZONE_LABEL)
            .map(String::as_str)
            .filter(|z| !z.is_empty())
    }

    /// Volumes generated from the class instance storage templates.
    pub fn instance_storage_volumes(&self) -> impl Iterator<Item = &VirtualMachineVolume> {
        self.spec
            .volumes
            .iter()
            .filter(|v| v.is_instance_storage())
    }

    #[must_use]
    pub fn has_instance_storage(&self) -> bool {
        self.instance_storage_volumes().next().is_some()
    }

    #[must_use]
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations().get(key).map(String::as_str)
    }
}

// ============================================================================
// VirtualMachineClass
// ============================================================================

/// One instance storage volume template.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStorageVolume {
    /// Size as a Kubernetes quantity
    pub size: String,
}

/// Instance storage declared by a class.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStorage {
    pub storage_class: String,

    #[serde(default)]
    pub volumes: Vec<InstanceStorageVolume>,
}

/// `VirtualMachineClass` describes a hardware template.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "vmconverge.io",
    version = "v1alpha1",
    kind = "VirtualMachineClass",
    shortname = "vmclass",
    doc = "VirtualMachineClass is a cluster-scoped hardware template referenced by VirtualMachines."
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineClassSpec {
    pub cpus: i64,

    /// Memory as a Kubernetes quantity (e.g., `4Gi`)
    pub memory: String,

    /// Base64 encoded JSON ConfigSpec merged under the synthesized hardware
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_spec: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_storage: Option<InstanceStorage>,
}

// ============================================================================
// Zone
// ============================================================================

/// `Zone` is a fault domain contributing resource pools to placement.
///
/// A zone whose `metadata.deletionTimestamp` is set is never bound to new VMs.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "vmconverge.io",
    version = "v1alpha1",
    kind = "Zone",
    namespaced,
    doc = "Zone maps a fault domain to the hypervisor resource pools a namespace may place VMs in."
)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSpec {
    /// Managed-object IDs of resource pools, in preference order
    #[serde(default)]
    pub resource_pools: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

impl Zone {
    #[must_use]
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

// ============================================================================
// VirtualMachineSetResourcePolicy
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterModuleSpec {
    pub group_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterModuleStatus {
    pub group_name: String,
    pub module_uuid: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePolicyStatus {
    #[serde(default)]
    pub cluster_modules: Vec<ClusterModuleStatus>,
}

/// `VirtualMachineSetResourcePolicy` groups VMs into cluster modules.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "vmconverge.io",
    version = "v1alpha1",
    kind = "VirtualMachineSetResourcePolicy",
    namespaced,
    doc = "VirtualMachineSetResourcePolicy declares cluster module groups VMs can join."
)]
#[kube(status = "ResourcePolicyStatus")]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSetResourcePolicySpec {
    #[serde(default)]
    pub cluster_modules: Vec<ClusterModuleSpec>,
}

impl VirtualMachineSetResourcePolicy {
    /// UUID of a realized cluster module, if the group exists and has been created.
    #[must_use]
    pub fn module_uuid(&self, group_name: &str) -> Option<&str> {
        if !self
            .spec
            .cluster_modules
            .iter()
            .any(|m| m.group_name == group_name)
        {
            return None;
        }
        self.status.as_ref().and_then(|s| {
            s.cluster_modules
                .iter()
                .find(|m| m.group_name == group_name)
                .map(|m| m.module_uuid.as_str())
        })
    }
}

/// True when an object's labels carry the instance storage marker.
#[must_use]
pub fn has_instance_storage_label(
    labels: Option<&std::collections::BTreeMap<String, String>>,
) -> bool {
    labels.is_some_and(|l| l.contains_key(INSTANCE_STORAGE_LABEL))
}
