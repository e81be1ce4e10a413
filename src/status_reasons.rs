// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Standard Kubernetes status condition reasons for `VirtualMachine` resources.
//!
//! Reasons are programmatic identifiers in CamelCase that explain why a condition has
//! a particular status. Every `VirtualMachine` carries one encompassing `type: Ready`
//! condition plus a few sub-conditions describing the gates the reconciler passes.
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   phase: Pending
//!   conditions:
//!     - type: Ready
//!       status: "False"
//!       reason: InstanceStorageNotReady
//!       message: "instance storage PVCs are not bound yet"
//!     - type: VirtualMachinePlaced
//!       status: "True"
//!       reason: Placed
//!       message: "placed in zone zone-a"
//! ```

// ============================================================================
// Condition Types
// ============================================================================

/// Encompassing condition summarizing the operational state of the VM.
pub const CONDITION_TYPE_READY: &str = "Ready";

/// Placement finished and a zone was bound.
pub const CONDITION_TYPE_PLACED: &str = "VirtualMachinePlaced";

/// Instance storage claims are bound and attached.
pub const CONDITION_TYPE_INSTANCE_STORAGE_READY: &str = "InstanceStorageReady";

// ============================================================================
// Common Reasons
// ============================================================================

/// Remote VM exists and matches the desired configuration.
pub const REASON_READY: &str = "Ready";

/// Remote VM is being created or reconfigured.
pub const REASON_PROGRESSING: &str = "Progressing";

/// Remote VM is being torn down.
pub const REASON_DELETING: &str = "Deleting";

// ============================================================================
// Placement Reasons
// ============================================================================

/// A zone and resource pool were selected.
pub const REASON_PLACED: &str = "Placed";

/// No candidate zone could host the VM, or the recommendation call failed.
pub const REASON_PLACEMENT_FAILED: &str = "PlacementFailed";

/// The bound zone is being deleted.
pub const REASON_ZONE_UNAVAILABLE: &str = "ZoneUnavailable";

// ============================================================================
// Instance Storage Reasons
// ============================================================================

/// Claims were created and are waiting for binding or attachment.
///
/// The message carries the exact gate error, e.g.
/// `instance storage PVCs are not bound yet`.
pub const REASON_INSTANCE_STORAGE_NOT_READY: &str = "InstanceStorageNotReady";

/// Every instance storage volume reports attached.
pub const REASON_INSTANCE_STORAGE_READY: &str = "InstanceStorageReady";

/// A claim-backed volume has not been attached yet.
pub const REASON_VOLUME_NOT_ATTACHED: &str = "VolumeNotAttached";

// ============================================================================
// Terminal Reasons
// ============================================================================

/// The spec cannot be satisfied until the user changes it (missing field, bad reference).
pub const REASON_CONFIGURATION_INVALID: &str = "ConfigurationInvalid";

/// The hypervisor reported a fault.
pub const REASON_HYPERVISOR_ERROR: &str = "HypervisorError";

/// The hypervisor call timed out.
pub const REASON_HYPERVISOR_TIMEOUT: &str = "HypervisorTimeout";
