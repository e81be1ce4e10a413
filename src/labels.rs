// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across the reconciler and webhooks.
//!
//! This module defines standard Kubernetes labels and vmconverge-specific labels/annotations
//! to ensure the controller and the admission layer agree on key names.

// ============================================================================
// Kubernetes Standard Labels
// ============================================================================

/// Well-known topology label holding the zone a VM is bound to
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value for `app.kubernetes.io/managed-by` on objects the controller creates
pub const MANAGED_BY_VMCONVERGE: &str = "vmconverge";

// ============================================================================
// Instance Storage Labels and Annotations
// ============================================================================

/// Marker label placed on claims backing instance storage. Only the system may set it.
pub const INSTANCE_STORAGE_LABEL: &str = "vmconverge.io/instance-storage-resource";

/// Annotation carrying the host selected during placement
pub const SELECTED_NODE_ANNOTATION: &str = "vmconverge.io/instance-storage-selected-node";

/// Annotation carrying the managed-object ID of the host selected during placement
pub const SELECTED_NODE_MOID_ANNOTATION: &str =
    "vmconverge.io/instance-storage-selected-node-moid";

/// Annotation written by the volume controller once every instance claim is bound
pub const PVCS_BOUND_ANNOTATION: &str = "vmconverge.io/instance-storage-pvcs-bound";

/// Label tying an instance storage claim back to its VM (claim holds VM name)
pub const OWNER_VM_LABEL: &str = "vmconverge.io/virtual-machine";

// ============================================================================
// Other Annotations
// ============================================================================

/// JSON list of topology maps requested for a claim
pub const REQUESTED_TOPOLOGY_ANNOTATION: &str = "csi.vmconverge.io/volume-requested-topology";

/// Cluster module group a VM should be placed in
pub const CLUSTER_MODULE_GROUP_ANNOTATION: &str = "vsphere-cluster-module-group";

/// Kubernetes annotation recording the node a claim should bind on
pub const K8S_SELECTED_NODE_ANNOTATION: &str = "volume.kubernetes.io/selected-node";
