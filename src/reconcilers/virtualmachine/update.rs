// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Update path: the VM exists on the hypervisor.

use kube::ResourceExt;
use tracing::{debug, info};

use super::create::placed_message;
use super::hardware::{disk_resize_changes, nic_changes, plan_nics, reconfigure_delta};
use super::{
    class_extra_config, converge_power, desired_extra_config, get_class, resolve_networks,
    STATUS_TRUE,
};
use crate::context::Context;
use crate::crd::{PowerState, VirtualMachine};
use crate::labels::ZONE_LABEL;
use crate::provider::ObservedVm;
use crate::reconcilers::instance_storage;
use crate::reconcilers::placement::zone_for_resource_pool;
use crate::reconcilers::status::VirtualMachineStatusUpdater;
use crate::status_reasons::{CONDITION_TYPE_PLACED, REASON_PLACED};
use crate::store::update_vm_with_retry;
use crate::vm_errors::ConvergeError;
use crate::vsphere::{DeviceKeyAllocator, VirtualDevice};

/// Converge an existing VM: zone label, power-off intent, hardware, then power.
///
/// # Errors
///
/// Returns [`ConvergeError::StorageGate`] when a powered-off VM with instance
/// storage is not ready to start, and store, class, synthesis or hypervisor
/// errors as they occur.
pub async fn update_vm(
    ctx: &Context,
    vm: &mut VirtualMachine,
    status: &mut VirtualMachineStatusUpdater,
    observed: ObservedVm,
) -> Result<(), ConvergeError> {
    status.set_observed(&observed);
    restore_zone(ctx, vm, status, &observed).await?;
    if !observed.resource_pool.is_empty() {
        status.set_condition(
            CONDITION_TYPE_PLACED,
            STATUS_TRUE,
            REASON_PLACED,
            &placed_message(&observed.resource_pool),
        );
    }

    let mut power_state = observed.power_state;
    if vm.spec.power_state == PowerState::PoweredOff && power_state != PowerState::PoweredOff {
        converge_power(ctx, vm, status, &observed.moid, power_state).await?;
        power_state = PowerState::PoweredOff;
    }

    // Hardware is left alone until instance storage is ready to start with it.
    if vm.has_instance_storage()
        && vm.spec.power_state == PowerState::PoweredOn
        && power_state != PowerState::PoweredOn
    {
        instance_storage::check_bound(vm)?;
        instance_storage::check_attached(vm, vm.instance_storage_volumes())?;
    }

    let class_name = vm.spec.class_name.clone();
    let class = get_class(ctx, &class_name).await?;

    let mut device_change = disk_resize_changes(&vm.spec.volumes, &observed)?;

    let plan = plan_nics(&vm.spec.network_interfaces, &observed);
    if !plan.is_empty() {
        let networks = resolve_networks(ctx, vm, plan.interfaces_to_resolve()).await?;
        let mut allocator = DeviceKeyAllocator::new(observed.devices.iter().map(VirtualDevice::key));
        device_change.extend(nic_changes(plan, &networks, &mut allocator));
    }

    let class_extra = class_extra_config(&class_name, &class)?;
    let extra_config = desired_extra_config(ctx, vm, &class_extra).await?;

    let delta = reconfigure_delta(&observed, device_change, &extra_config);
    if delta.is_empty_change() {
        debug!(namespace = ?vm.namespace(), name = %vm.name_any(), "VM hardware converged");
    } else {
        info!(
            namespace = ?vm.namespace(),
            name = %vm.name_any(),
            moid = %observed.moid,
            device_changes = delta.device_change.len(),
            extra_config_changes = delta.extra_config.len(),
            "Reconfiguring VM"
        );
        ctx.provider.reconfigure(&observed.moid, &delta).await?;
    }

    converge_power(ctx, vm, status, &observed.moid, power_state).await
}

/// Put back a zone label lost from the VM, using the zone that owns its resource pool.
async fn restore_zone(
    ctx: &Context,
    vm: &mut VirtualMachine,
    status: &mut VirtualMachineStatusUpdater,
    observed: &ObservedVm,
) -> Result<(), ConvergeError> {
    if let Some(zone) = vm.zone_label() {
        status.set_zone(Some(zone.to_string()));
        return Ok(());
    }

    let namespace = vm.namespace().unwrap_or_default();
    let Some(zone) =
        zone_for_resource_pool(ctx.store.as_ref(), &namespace, &observed.resource_pool).await?
    else {
        return Ok(());
    };

    if ctx.settings.features.fault_domains {
        info!(namespace = %namespace, name = %vm.name_any(), zone = %zone, "Restoring zone label from resource pool");
        update_vm_with_retry(ctx.store.as_ref(), vm, |vm| {
            let labels = vm.metadata.labels.get_or_insert_with(Default::default);
            if labels.get(ZONE_LABEL).is_some_and(|z| !z.is_empty()) {
                return false;
            }
            labels.insert(ZONE_LABEL.to_string(), zone.clone());
            true
        })
        .await?;
    }

    status.set_zone(vm.zone_label().map(str::to_string).or(Some(zone)));
    Ok(())
}
