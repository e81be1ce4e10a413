// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Create path: the VM does not exist on the hypervisor yet.

use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{
    class_extra_config, converge_power, desired_extra_config, get_class, resolve_networks,
    STATUS_TRUE,
};
use crate::constants::KIND_VIRTUAL_MACHINE;
use crate::context::Context;
use crate::crd::{InstanceVolumeClaim, VirtualMachine};
use crate::labels::CLUSTER_MODULE_GROUP_ANNOTATION;
use crate::metrics;
use crate::provider::CreateVmRequest;
use crate::reconcilers::instance_storage;
use crate::reconcilers::placement::place_vm;
use crate::reconcilers::status::VirtualMachineStatusUpdater;
use crate::status_reasons::{CONDITION_TYPE_PLACED, REASON_PLACED};
use crate::store::EventType;
use crate::vm_errors::{ConfigSpecError, ConvergeError};
use crate::vsphere::{
    apply_networks, set_extra_config, synthesize, DeviceKeyAllocator, SynthesisInput,
};

/// Message of the placed condition, shared with the update path so a converged
/// VM keeps an identical condition.
pub(super) fn placed_message(resource_pool: &str) -> String {
    format!("VM placed in resource pool {resource_pool}")
}

/// Create the VM, then converge its power state.
///
/// # Errors
///
/// - [`ConvergeError::MissingStorageClass`] when the VM names no storage class
/// - [`ConvergeError::ClusterModuleNotFound`] when the module group has no UUID yet
/// - [`ConvergeError::ClassNotFound`] when the class does not exist
/// - [`ConvergeError::StorageGate`] while instance storage is not bound or attached
/// - placement, synthesis, store and hypervisor errors as they occur
pub async fn create_vm(
    ctx: &Context,
    vm: &mut VirtualMachine,
    status: &mut VirtualMachineStatusUpdater,
) -> Result<(), ConvergeError> {
    let namespace = vm.namespace().unwrap_or_default();
    let name = vm.name_any();
    status.set_pending_unless_created();

    if vm.spec.storage_class.trim().is_empty() {
        return Err(ConvergeError::MissingStorageClass);
    }
    let cluster_module_uuid = cluster_module_uuid(ctx, vm).await?;
    let class_name = vm.spec.class_name.clone();
    let class = get_class(ctx, &class_name).await?;

    let instance_volumes = if ctx.settings.features.instance_storage {
        instance_storage::desired_instance_volumes(vm, &class)
    } else {
        Vec::new()
    };
    let storage_policies = storage_policies(ctx, &instance_volumes).await?;
    let storage_profile_id = ctx
        .store
        .storage_policy_id(&vm.spec.storage_class)
        .await?
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ConfigSpecError::UnknownStorageClass {
            storage_class: vm.spec.storage_class.clone(),
        })?;

    let placement_spec = synthesize(
        &SynthesisInput {
            vm_name: &name,
            class_name: &class_name,
            class: &class,
            advanced_options: vm.spec.advanced_options.as_ref(),
            instance_volumes: &instance_volumes,
            storage_policies: &storage_policies,
        },
        &mut DeviceKeyAllocator::new(std::iter::empty()),
    )?;

    let need_host = !instance_volumes.is_empty();
    let placement = place_vm(ctx, vm, &placement_spec, need_host).await?;
    status.set_zone(placement.zone.clone());
    status.set_condition(
        CONDITION_TYPE_PLACED,
        STATUS_TRUE,
        REASON_PLACED,
        &placed_message(&placement.resource_pool),
    );

    if need_host {
        instance_storage::configure(ctx, vm, &class).await?;
        instance_storage::check_bound(vm)?;
    }

    // The VM now lists its instance volumes; build the create document from them.
    let instance_volumes = if need_host {
        instance_storage::desired_instance_volumes(vm, &class)
    } else {
        Vec::new()
    };
    let mut allocator = DeviceKeyAllocator::new(std::iter::empty());
    let mut config_spec = synthesize(
        &SynthesisInput {
            vm_name: &name,
            class_name: &class_name,
            class: &class,
            advanced_options: vm.spec.advanced_options.as_ref(),
            instance_volumes: &instance_volumes,
            storage_policies: &storage_policies,
        },
        &mut allocator,
    )?;

    let networks = resolve_networks(ctx, vm, &vm.spec.network_interfaces).await?;
    apply_networks(&mut config_spec, &networks, &mut allocator);

    let class_extra = class_extra_config(&class_name, &class)?;
    let extra_config = desired_extra_config(ctx, vm, &class_extra).await?;
    set_extra_config(&mut config_spec, extra_config);

    let request = CreateVmRequest {
        namespace: namespace.clone(),
        name: name.clone(),
        image_name: vm.spec.image_name.clone(),
        resource_pool: placement.resource_pool.clone(),
        folder: placement.folder.clone(),
        host: if need_host { placement.host.clone() } else { None },
        datastores: placement.datastores.clone(),
        storage_profile_id,
        cluster_module_uuid,
        config_spec,
    };

    info!(
        namespace = %namespace,
        name = %name,
        resource_pool = %request.resource_pool,
        zone = ?placement.zone,
        "Creating VM"
    );
    let observed = ctx.provider.create_vm(&request).await?;
    metrics::record_resource_created(KIND_VIRTUAL_MACHINE);
    ctx.store
        .record_event(
            vm,
            EventType::Normal,
            "Created",
            &format!("Created VM {}", observed.moid),
        )
        .await;

    status.set_observed(&observed);
    converge_power(ctx, vm, status, &observed.moid, observed.power_state).await
}

/// Module UUID for the VM's cluster-module group, when it names one.
async fn cluster_module_uuid(
    ctx: &Context,
    vm: &VirtualMachine,
) -> Result<Option<String>, ConvergeError> {
    let Some(group) = vm
        .annotation(CLUSTER_MODULE_GROUP_ANNOTATION)
        .filter(|g| !g.is_empty())
    else {
        return Ok(None);
    };
    let not_found = || ConvergeError::ClusterModuleNotFound(group.to_string());

    let policy_name = vm.spec.resource_policy_name.as_deref().ok_or_else(not_found)?;
    let namespace = vm.namespace().unwrap_or_default();
    let policy = ctx
        .store
        .get_resource_policy(&namespace, policy_name)
        .await?
        .ok_or_else(not_found)?;

    let uuid = policy.module_uuid(group).ok_or_else(not_found)?;
    debug!(group = %group, module_uuid = %uuid, "Resolved cluster module");
    Ok(Some(uuid.to_string()))
}

/// Storage policy IDs for the storage classes of the instance volumes.
///
/// Classes without a policy are left out; synthesis reports them.
async fn storage_policies(
    ctx: &Context,
    volumes: &[InstanceVolumeClaim],
) -> Result<BTreeMap<String, String>, ConvergeError> {
    let mut policies = BTreeMap::new();
    for volume in volumes {
        if policies.contains_key(&volume.storage_class) {
            continue;
        }
        if let Some(id) = ctx.store.storage_policy_id(&volume.storage_class).await? {
            policies.insert(volume.storage_class.clone(), id);
        }
    }
    Ok(policies)
}
