// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the vmconverge operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all vmconverge CRDs
pub const API_GROUP: &str = "vmconverge.io";

/// Kind name for `VirtualMachine` resource
pub const KIND_VIRTUAL_MACHINE: &str = "VirtualMachine";

/// Kind name for core `PersistentVolumeClaim`
pub const KIND_PERSISTENT_VOLUME_CLAIM: &str = "PersistentVolumeClaim";

/// Finalizer placed on every `VirtualMachine` so the remote VM is torn down first
pub const VM_FINALIZER: &str = "virtualmachine.vmconverge.io/finalizer";

// ============================================================================
// Kubernetes Controller Constants
// ============================================================================

/// Requeue interval for VMs that have fully converged (5 minutes)
pub const REQUEUE_WHEN_READY_SECS: u64 = 300;

/// Maximum number of reconciles running at once across all VMs
pub const DEFAULT_RECONCILE_CONCURRENCY: u16 = 16;

/// Attempts made when a status or metadata write hits a resourceVersion conflict
pub const MAX_CONFLICT_RETRIES: u32 = 5;

// ============================================================================
// Hypervisor RPC Constants
// ============================================================================

/// Default bound on a single hypervisor call (seconds)
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 60;

/// Storage class parameter holding the hypervisor storage policy ID
pub const STORAGE_POLICY_ID_PARAMETER: &str = "storagePolicyID";

/// Extra config key prefix that is forwarded from VM metadata ConfigMaps
pub const GUESTINFO_PREFIX: &str = "guestinfo.";

/// Extra config default that exposes disk UUIDs to the guest
pub const EXTRA_CONFIG_ENABLE_UUID: &str = "disk.enableUUID";

/// Extra config default that lets customization run without tools checks
pub const EXTRA_CONFIG_IGNORE_TOOLS_CHECK: &str = "vmware.tools.gosc.ignoretoolscheck";

/// Value used for boolean extra config defaults
pub const EXTRA_CONFIG_TRUE: &str = "TRUE";

/// Annotation written into every synthesized ConfigSpec
pub const CONFIG_SPEC_ANNOTATION: &str = "managed by vmconverge";

// ============================================================================
// Size Constants
// ============================================================================

/// Bytes per mebibyte
pub const BYTES_PER_MIB: i64 = 1 << 20;

/// Bytes per gibibyte
pub const BYTES_PER_GIB: i64 = 1 << 30;

// ============================================================================
// Webhook Constants
// ============================================================================

/// Default bind address for the admission webhook server
pub const DEFAULT_WEBHOOK_ADDR: &str = "0.0.0.0:9878";

/// Path serving PVC admission reviews
pub const PVC_VALIDATION_PATH: &str = "/validate/persistentvolumeclaims";

/// Path serving VirtualMachine admission reviews
pub const VM_VALIDATION_PATH: &str = "/validate/virtualmachines";

/// Path serving Prometheus metrics
pub const METRICS_PATH: &str = "/metrics";

/// Path serving liveness checks
pub const HEALTH_PATH: &str = "/healthz";

/// Service account the operator runs as
pub const OPERATOR_SERVICE_ACCOUNT: &str =
    "system:serviceaccount:vmconverge-system:vmconverge-controller-manager";

/// Cluster administrator identity
pub const KUBE_ADMIN_USER: &str = "kubernetes-admin";
