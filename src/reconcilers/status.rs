// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers and the `VirtualMachine` status updater.
//!
//! Conditions follow the standard Kubernetes format:
//! - `type`: The aspect being reported (e.g., "Ready", "VirtualMachinePlaced")
//! - `status`: "True", "False", or "Unknown"
//! - `reason`: A programmatic identifier (CamelCase)
//! - `message`: A human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp when the status last flipped
//!
//! # Example
//!
//! ```rust,no_run
//! use vmconverge::reconcilers::status::create_condition;
//!
//! let condition = create_condition(
//!     "Ready",
//!     "True",
//!     "VirtualMachineReady",
//!     "VM is created and powered on"
//! );
//! ```

use crate::crd::{Condition, PowerState, VirtualMachine, VirtualMachineStatus, VmPhase};
use crate::provider::ObservedVm;
use crate::store::{owned_status_eq, write_status_with_retry, ClusterStore};
use crate::vm_errors::StoreError;
use chrono::Utc;
use kube::ResourceExt;
use tracing::debug;

/// A condition whose transition time is now.
///
/// ```rust,no_run
/// # use vmconverge::reconcilers::status::create_condition;
/// let placed = create_condition("VirtualMachinePlaced", "True", "Placed", "zone-a/rp-a");
/// assert_eq!(placed.status, "True");
/// ```
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.into(),
        status: status.into(),
        reason: Some(reason.into()),
        message: Some(message.into()),
        last_transition_time: Some(now()),
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Set `condition_type` in place, appending it if absent.
///
/// `lastTransitionTime` only moves when `status` flips, so reporting the same
/// state on every pass leaves the condition unchanged.
pub fn upsert_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition_type) else {
        conditions.push(create_condition(condition_type, status, reason, message));
        return;
    };

    if existing.status != status || existing.last_transition_time.is_none() {
        existing.last_transition_time = Some(now());
    }
    existing.status = status.into();
    existing.reason = Some(reason.into());
    existing.message = Some(message.into());
}

/// Same set of conditions by type, status, reason and message.
#[must_use]
pub fn conditions_equal(current: &[Condition], new: &[Condition]) -> bool {
    let same = |a: &Condition, b: &Condition| {
        (&a.status, &a.reason, &a.message) == (&b.status, &b.reason, &b.message)
    };
    current.len() == new.len()
        && new
            .iter()
            .all(|n| find_condition(current, &n.r#type).is_some_and(|c| same(c, n)))
}

/// Collects status changes during one reconcile and writes them once at the end.
///
/// Status is written even when the reconcile fails part way, so it always holds
/// the best-known truth. Writes are skipped when nothing the reconciler owns has
/// changed, which keeps a converged VM from generating watch events.
pub struct VirtualMachineStatusUpdater {
    namespace: String,
    name: String,
    current_status: Option<VirtualMachineStatus>,
    new_status: VirtualMachineStatus,
}

impl VirtualMachineStatusUpdater {
    #[must_use]
    pub fn new(vm: &VirtualMachine) -> Self {
        let current_status = vm.status.clone();
        let new_status = current_status.clone().unwrap_or_default();

        Self {
            namespace: vm.namespace().unwrap_or_default(),
            name: vm.name_any(),
            current_status,
            new_status,
        }
    }

    pub fn set_phase(&mut self, phase: VmPhase) {
        self.new_status.phase = Some(phase);
    }

    /// Phase to `Pending` unless the VM already exists remotely.
    pub fn set_pending_unless_created(&mut self) {
        if self.new_status.phase != Some(VmPhase::Created) {
            self.new_status.phase = Some(VmPhase::Pending);
        }
    }

    pub fn set_power_state(&mut self, power_state: PowerState) {
        self.new_status.power_state = Some(power_state);
    }

    pub fn set_zone(&mut self, zone: Option<String>) {
        if zone.is_some() {
            self.new_status.zone = zone;
        }
    }

    /// Record the identity and placement of the live VM.
    pub fn set_observed(&mut self, observed: &ObservedVm) {
        self.new_status.phase = Some(VmPhase::Created);
        self.new_status.unique_id = Some(observed.moid.clone());
        self.new_status.power_state = Some(observed.power_state);
        if !observed.host.is_empty() {
            self.new_status.host = Some(observed.host.clone());
        }
        if !observed.instance_uuid.is_empty() {
            self.new_status.instance_uuid = Some(observed.instance_uuid.clone());
        }
        if !observed.bios_uuid.is_empty() {
            self.new_status.bios_uuid = Some(observed.bios_uuid.clone());
        }
    }

    /// The remote VM is gone; drop everything that pointed at it.
    pub fn clear_observed(&mut self) {
        self.new_status.unique_id = None;
        self.new_status.host = None;
        self.new_status.instance_uuid = None;
        self.new_status.bios_uuid = None;
        self.new_status.power_state = None;
        if self.new_status.phase == Some(VmPhase::Created) {
            self.new_status.phase = Some(VmPhase::Pending);
        }
    }

    pub fn set_condition(
        &mut self,
        condition_type: &str,
        status: &str,
        reason: &str,
        message: &str,
    ) {
        upsert_condition(
            &mut self.new_status.conditions,
            condition_type,
            status,
            reason,
            message,
        );
    }

    pub fn set_observed_generation(&mut self, generation: Option<i64>) {
        self.new_status.observed_generation = generation;
    }

    #[must_use]
    pub fn status(&self) -> &VirtualMachineStatus {
        &self.new_status
    }

    /// True when the pending status differs from what the VM carried at the start.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        match &self.current_status {
            None => true,
            Some(current) => !owned_status_eq(current, &self.new_status),
        }
    }

    /// Write the collected status, re-reading the latest VM on conflict.
    ///
    /// # Errors
    ///
    /// Returns the store error if the write keeps failing.
    pub async fn apply(&self, store: &dyn ClusterStore) -> Result<(), StoreError> {
        if !self.has_changes() {
            debug!(
                "VirtualMachine {}/{} status unchanged, skipping update",
                self.namespace, self.name
            );
            return Ok(());
        }

        let written =
            write_status_with_retry(store, &self.namespace, &self.name, &self.new_status).await?;

        debug!(
            "Updated VirtualMachine {}/{} status: phase={:?} power={:?} written={}",
            self.namespace,
            self.name,
            self.new_status.phase,
            self.new_status.power_state,
            written
        );
        Ok(())
    }
}
