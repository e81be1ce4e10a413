// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `VirtualMachine` reconciliation.
//!
//! One pass reads the declarative VM, looks up the live VM on the hypervisor and
//! issues the smallest set of remote operations that closes the gap:
//!
//! - **absent** - place, configure instance storage, synthesize and create ([`create`])
//! - **present** - restore the zone label, grow disks, fix NICs and extra config ([`update`])
//! - **deleting** - power off, destroy, release the finalizer
//!
//! Power is always converged last and never before every claim-backed volume
//! reports attached. Status is written on every pass, failed ones included.

pub mod create;
pub mod hardware;
pub mod update;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::constants::{KIND_VIRTUAL_MACHINE, REQUEUE_WHEN_READY_SECS, VM_FINALIZER};
use crate::context::Context;
use crate::crd::{PowerState, VirtualMachine, VirtualMachineClassSpec, VmPhase};
use crate::metrics;
use crate::provider::{ObservedVm, PowerOp, VmLookup};
use crate::reconcilers::finalizers::{ensure_finalizer, has_finalizer, remove_finalizer};
use crate::reconcilers::instance_storage;
use crate::reconcilers::status::VirtualMachineStatusUpdater;
use crate::status_reasons::{
    CONDITION_TYPE_INSTANCE_STORAGE_READY, CONDITION_TYPE_READY, REASON_CONFIGURATION_INVALID,
    REASON_DELETING, REASON_HYPERVISOR_ERROR, REASON_HYPERVISOR_TIMEOUT,
    REASON_INSTANCE_STORAGE_NOT_READY, REASON_INSTANCE_STORAGE_READY, REASON_PLACEMENT_FAILED,
    REASON_PROGRESSING, REASON_READY, REASON_VOLUME_NOT_ATTACHED, REASON_ZONE_UNAVAILABLE,
};
use crate::store::EventType;
use crate::vm_errors::{
    ConvergeError, ErrorKind, PlacementError, ProviderError, StorageGateError,
};
use crate::vsphere::extra_config::build_extra_config;
use crate::vsphere::{decode_class_config_spec, OptionValue, ResolvedNetwork};

const STATUS_TRUE: &str = "True";
const STATUS_FALSE: &str = "False";

/// Reconcile one `VirtualMachine`.
///
/// # Errors
///
/// Returns the first error of the pass. Its [`ErrorKind`] decides how the
/// controller requeues; see [`error_action`].
pub async fn reconcile_virtualmachine(
    ctx: &Context,
    mut vm: VirtualMachine,
) -> Result<(), ConvergeError> {
    let start = Instant::now();
    let namespace = vm.namespace().unwrap_or_default();
    let name = vm.name_any();

    info!(namespace = %namespace, name = %name, "Reconciling VirtualMachine");

    let mut status = VirtualMachineStatusUpdater::new(&vm);

    let result = if vm.is_being_deleted() {
        delete(ctx, &mut vm, &mut status).await
    } else {
        let result = converge(ctx, &mut vm, &mut status).await;
        record_outcome(ctx, &vm, &mut status, &result).await;
        status.set_observed_generation(vm.metadata.generation);

        if let Err(e) = status.apply(ctx.store.as_ref()).await {
            warn!(namespace = %namespace, name = %name, error = %e, "Failed to write VM status");
            if result.is_ok() {
                return Err(e.into());
            }
        }
        result
    };

    match &result {
        Ok(()) => {
            debug!(namespace = %namespace, name = %name, elapsed = ?start.elapsed(), "VM converged");
            metrics::record_reconciliation_success(KIND_VIRTUAL_MACHINE, start.elapsed());
        }
        Err(e) => {
            error!(namespace = %namespace, name = %name, error = %e, "Failed to converge VM");
            metrics::record_reconciliation_error(
                KIND_VIRTUAL_MACHINE,
                error_kind_label(e.kind()),
                start.elapsed(),
            );
        }
    }

    result
}

/// Requeue after a successful pass, resetting the VM's backoff.
pub fn success_action(ctx: &Context, vm: &VirtualMachine) -> Action {
    ctx.requeue.reset(&requeue_key(vm));
    Action::requeue(Duration::from_secs(REQUEUE_WHEN_READY_SECS))
}

/// Retriable errors back off exponentially; terminal ones wait for the next spec change.
pub fn error_action(ctx: &Context, vm: &VirtualMachine, err: &ConvergeError) -> Action {
    match err.kind() {
        ErrorKind::Retriable => {
            let delay = ctx.requeue.next_delay(&requeue_key(vm));
            metrics::record_reconciliation_requeue(KIND_VIRTUAL_MACHINE, "retriable");
            Action::requeue(delay)
        }
        ErrorKind::Terminal => {
            metrics::record_reconciliation_requeue(KIND_VIRTUAL_MACHINE, "terminal");
            Action::await_change()
        }
        ErrorKind::AlreadySatisfied => success_action(ctx, vm),
    }
}

fn requeue_key(vm: &VirtualMachine) -> String {
    format!("{}/{}", vm.namespace().unwrap_or_default(), vm.name_any())
}

fn error_kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Retriable => "retriable",
        ErrorKind::Terminal => "terminal",
        ErrorKind::AlreadySatisfied => "already_satisfied",
    }
}

async fn converge(
    ctx: &Context,
    vm: &mut VirtualMachine,
    status: &mut VirtualMachineStatusUpdater,
) -> Result<(), ConvergeError> {
    ensure_finalizer(ctx.store.as_ref(), vm, VM_FINALIZER).await?;

    match find_vm(ctx, vm, status).await? {
        None => {
            // Nothing on the hypervisor answers to the recorded identity any more.
            status.clear_observed();
            create::create_vm(ctx, vm, status).await
        }
        Some(observed) => update::update_vm(ctx, vm, status, observed).await,
    }
}

/// Look the VM up by the managed-object ID in status, falling back to its name.
async fn find_vm(
    ctx: &Context,
    vm: &VirtualMachine,
    status: &VirtualMachineStatusUpdater,
) -> Result<Option<ObservedVm>, ProviderError> {
    let mut lookup = VmLookup {
        namespace: vm.namespace().unwrap_or_default(),
        name: vm.name_any(),
        unique_id: status.status().unique_id.clone().filter(|id| !id.is_empty()),
    };

    if let Some(observed) = ctx.provider.lookup_vm(&lookup).await? {
        return Ok(Some(observed));
    }
    if lookup.unique_id.take().is_none() {
        return Ok(None);
    }
    ctx.provider.lookup_vm(&lookup).await
}

/// Power off and destroy the remote VM, then release the finalizer.
async fn delete(
    ctx: &Context,
    vm: &mut VirtualMachine,
    status: &mut VirtualMachineStatusUpdater,
) -> Result<(), ConvergeError> {
    if !has_finalizer(vm, VM_FINALIZER) {
        return Ok(());
    }
    let namespace = vm.namespace().unwrap_or_default();
    let name = vm.name_any();

    if let Some(observed) = find_vm(ctx, vm, status).await? {
        if observed.power_state == PowerState::PoweredOn {
            info!(namespace = %namespace, name = %name, moid = %observed.moid, "Powering off VM before deletion");
            match ctx.provider.power_op(&observed.moid, PowerOp::PowerOff).await {
                Err(e) if !e.is_not_found() => return Err(e.into()),
                _ => {}
            }
        }

        info!(namespace = %namespace, name = %name, moid = %observed.moid, "Deleting VM");
        match ctx.provider.delete_vm(&observed.moid).await {
            Err(e) if !e.is_not_found() => return Err(e.into()),
            _ => {}
        }
        metrics::record_resource_deleted(KIND_VIRTUAL_MACHINE);
        ctx.store
            .record_event(vm, EventType::Normal, "Deleted", &format!("Deleted VM {}", observed.moid))
            .await;
    } else {
        debug!(namespace = %namespace, name = %name, "VM already absent from hypervisor");
    }

    status.clear_observed();
    status.set_condition(
        CONDITION_TYPE_READY,
        STATUS_FALSE,
        REASON_DELETING,
        "VM has been deleted",
    );
    // Written while the finalizer still holds the object
    if let Err(e) = status.apply(ctx.store.as_ref()).await {
        warn!(namespace = %namespace, name = %name, error = %e, "Failed to write VM status during deletion");
    }

    remove_finalizer(ctx.store.as_ref(), vm, VM_FINALIZER).await?;
    Ok(())
}

/// Translate the pass result into phase, conditions and events.
async fn record_outcome(
    ctx: &Context,
    vm: &VirtualMachine,
    status: &mut VirtualMachineStatusUpdater,
    result: &Result<(), ConvergeError>,
) {
    if vm.has_instance_storage() {
        let gate_error = match result {
            Err(ConvergeError::StorageGate(e)) => Some(e),
            _ => None,
        };
        match gate_error {
            Some(e) => status.set_condition(
                CONDITION_TYPE_INSTANCE_STORAGE_READY,
                STATUS_FALSE,
                storage_gate_reason(e),
                &e.to_string(),
            ),
            None if status.status().phase == Some(VmPhase::Created) => status.set_condition(
                CONDITION_TYPE_INSTANCE_STORAGE_READY,
                STATUS_TRUE,
                REASON_INSTANCE_STORAGE_READY,
                "instance storage volumes are attached",
            ),
            None => {}
        }
    }

    let err = match result {
        Ok(()) => {
            status.set_condition(CONDITION_TYPE_READY, STATUS_TRUE, REASON_READY, "VM is converged");
            return;
        }
        Err(e) => e,
    };

    let reason = condition_reason(err);
    let message = err.to_string();
    status.set_condition(CONDITION_TYPE_READY, STATUS_FALSE, reason, &message);

    match err {
        ConvergeError::StorageGate(_) => status.set_pending_unless_created(),
        ConvergeError::Provider(ProviderError::InvalidRequest { .. })
            if status.status().phase != Some(VmPhase::Created) =>
        {
            status.set_phase(VmPhase::Error);
        }
        _ => {}
    }

    if err.kind() == ErrorKind::Terminal {
        ctx.store
            .record_event(vm, EventType::Warning, reason, &message)
            .await;
    }
}

fn storage_gate_reason(err: &StorageGateError) -> &'static str {
    match err {
        StorageGateError::NotAttached { .. } => REASON_VOLUME_NOT_ATTACHED,
        StorageGateError::NotBound | StorageGateError::StatusPending { .. } => {
            REASON_INSTANCE_STORAGE_NOT_READY
        }
    }
}

/// Ready-condition reason for a failed pass.
#[must_use]
pub fn condition_reason(err: &ConvergeError) -> &'static str {
    match err {
        ConvergeError::MissingStorageClass
        | ConvergeError::ClusterModuleNotFound(_)
        | ConvergeError::ClassNotFound(_)
        | ConvergeError::ConfigSpec(_) => REASON_CONFIGURATION_INVALID,
        ConvergeError::Placement(PlacementError::ZoneUnavailable { .. }) => REASON_ZONE_UNAVAILABLE,
        ConvergeError::Placement(_) => REASON_PLACEMENT_FAILED,
        ConvergeError::StorageGate(e) => storage_gate_reason(e),
        ConvergeError::Provider(ProviderError::Timeout { .. }) => REASON_HYPERVISOR_TIMEOUT,
        ConvergeError::Provider(_) => REASON_HYPERVISOR_ERROR,
        ConvergeError::Store(_) => REASON_PROGRESSING,
    }
}

async fn get_class(ctx: &Context, name: &str) -> Result<VirtualMachineClassSpec, ConvergeError> {
    ctx.store
        .get_vm_class(name)
        .await?
        .map(|class| class.spec)
        .ok_or_else(|| ConvergeError::ClassNotFound(name.to_string()))
}

/// Extra config carried by the class raw ConfigSpec, if it has one.
fn class_extra_config(
    class_name: &str,
    class: &VirtualMachineClassSpec,
) -> Result<Vec<OptionValue>, ConvergeError> {
    match class.config_spec.as_deref() {
        Some(encoded) if !encoded.trim().is_empty() => {
            Ok(decode_class_config_spec(class_name, encoded)?.extra_config)
        }
        _ => Ok(Vec::new()),
    }
}

/// Full desired extra config: class layer, defaults, VM metadata, operator-wide keys.
async fn desired_extra_config(
    ctx: &Context,
    vm: &VirtualMachine,
    class_extra: &[OptionValue],
) -> Result<BTreeMap<String, String>, ConvergeError> {
    let metadata = vm.spec.vm_metadata.as_ref();
    let metadata_data = match metadata {
        Some(m) => {
            let namespace = vm.namespace().unwrap_or_default();
            match ctx.store.get_config_map_data(&namespace, &m.config_map_name).await? {
                Some(data) => data,
                None => {
                    warn!(
                        namespace = %namespace,
                        config_map = %m.config_map_name,
                        "VM metadata ConfigMap not found, no guestinfo keys will be set"
                    );
                    BTreeMap::new()
                }
            }
        }
        None => BTreeMap::new(),
    };

    Ok(build_extra_config(
        class_extra,
        metadata,
        &metadata_data,
        &ctx.settings.global_extra_config,
    ))
}

async fn resolve_networks<'a>(
    ctx: &Context,
    vm: &VirtualMachine,
    interfaces: impl IntoIterator<Item = &'a crate::crd::NetworkInterface>,
) -> Result<Vec<ResolvedNetwork>, ConvergeError> {
    let namespace = vm.namespace().unwrap_or_default();
    let mut resolved = Vec::new();
    for iface in interfaces {
        resolved.push(ctx.provider.resolve_network(&namespace, iface).await?);
    }
    Ok(resolved)
}

/// Bring the power state to the declared intent.
///
/// Powering on waits for every claim-backed volume to report attached. A VM that
/// is powered off cannot be suspended and is left as it is.
async fn converge_power(
    ctx: &Context,
    vm: &VirtualMachine,
    status: &mut VirtualMachineStatusUpdater,
    moid: &str,
    current: PowerState,
) -> Result<(), ConvergeError> {
    let op = match (vm.spec.power_state, current) {
        (desired, current) if desired == current => None,
        (PowerState::PoweredOn, _) => Some(PowerOp::PowerOn),
        (PowerState::PoweredOff, _) => Some(PowerOp::PowerOff),
        (PowerState::Suspended, PowerState::PoweredOn) => Some(PowerOp::Suspend),
        (PowerState::Suspended, _) => None,
    };
    let Some(op) = op else {
        return Ok(());
    };

    if op == PowerOp::PowerOn {
        instance_storage::check_attached(vm, vm.spec.volumes.iter().filter(|v| v.is_claim_backed()))?;
    }

    info!(
        namespace = ?vm.namespace(),
        name = %vm.name_any(),
        moid = %moid,
        op = ?op,
        "Changing VM power state"
    );
    ctx.provider.power_op(moid, op).await?;
    status.set_power_state(op.resulting_state());
    Ok(())
}
