// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Zone and resource pool selection for new VMs.
//!
//! Placement runs only while the remote VM does not exist. A VM that already
//! carries the zone label is placed in that zone; otherwise the hypervisor ranks
//! the resource pools of every zone that is not being deleted and the top
//! recommendation wins. The resolved zone is written back as a label, first write
//! wins, so later reconciles and concurrent workers agree on one zone.

use kube::ResourceExt;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::context::Context;
use crate::crd::{VirtualMachine, Zone};
use crate::labels::{SELECTED_NODE_ANNOTATION, SELECTED_NODE_MOID_ANNOTATION, ZONE_LABEL};
use crate::provider::{PlacementRequest, Recommendation};
use crate::store::{update_vm_with_retry, ClusterStore};
use crate::vm_errors::{ConvergeError, PlacementError, ProviderError};
use crate::vsphere::ConfigSpec;

/// Where a new VM goes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlacementResult {
    /// `None` only when the VM was placed without zones
    pub zone: Option<String>,
    pub resource_pool: String,
    pub folder: Option<String>,
    pub datastores: Vec<String>,
    pub host: Option<String>,
    pub host_moid: Option<String>,
}

/// Resolve a zone and resource pool for `vm` and record the choice on it.
///
/// `placement_spec` must include instance storage disks; `need_host` asks the
/// hypervisor for a concrete host, which the volume controller later binds
/// instance storage claims to.
///
/// # Errors
///
/// Returns [`PlacementError::ZoneUnavailable`] or [`PlacementError::ZoneNotFound`] for a
/// bad zone label, and [`PlacementError::PlacementFailed`] when nothing can be selected.
/// A timed out recommendation call surfaces as [`ProviderError::Timeout`].
pub async fn place_vm(
    ctx: &Context,
    vm: &mut VirtualMachine,
    placement_spec: &ConfigSpec,
    need_host: bool,
) -> Result<PlacementResult, ConvergeError> {
    let namespace = vm.namespace().unwrap_or_default();

    let mut result = match vm.zone_label().map(str::to_string) {
        Some(zone_name) => place_in_zone(ctx, &namespace, &zone_name, placement_spec, need_host).await?,
        None => place_across_zones(ctx, &namespace, placement_spec, need_host).await?,
    };

    if ctx.settings.features.fault_domains {
        // A concurrent writer may have bound a different zone first; follow it.
        if let Some(bound) = bind_zone_label(ctx, vm, result.zone.as_deref()).await? {
            info!(
                namespace = %namespace,
                name = %vm.name_any(),
                selected = ?result.zone,
                bound = %bound,
                "Zone label already set by another writer, using it"
            );
            result = place_in_zone(ctx, &namespace, &bound, placement_spec, need_host).await?;
        }
    }

    if need_host {
        // Only written once the zone is settled, so the host always belongs to it.
        record_selected_host(ctx, vm, &result).await?;
        result.host = vm.annotation(SELECTED_NODE_ANNOTATION).map(str::to_string);
        result.host_moid = vm
            .annotation(SELECTED_NODE_MOID_ANNOTATION)
            .map(str::to_string);
    }

    Ok(result)
}

/// Write `zone` as the zone label unless one is already stored.
///
/// Returns the stored label when it names a different zone.
async fn bind_zone_label(
    ctx: &Context,
    vm: &mut VirtualMachine,
    zone: Option<&str>,
) -> Result<Option<String>, ConvergeError> {
    let Some(zone) = zone else {
        return Ok(None);
    };

    update_vm_with_retry(ctx.store.as_ref(), vm, |vm| {
        let labels = vm.metadata.labels.get_or_insert_with(Default::default);
        if labels.get(ZONE_LABEL).is_some_and(|bound| !bound.is_empty()) {
            return false;
        }
        labels.insert(ZONE_LABEL.to_string(), zone.to_string());
        true
    })
    .await?;

    Ok(vm
        .zone_label()
        .filter(|bound| *bound != zone)
        .map(str::to_string))
}

/// Store the selected host annotations; existing values win.
async fn record_selected_host(
    ctx: &Context,
    vm: &mut VirtualMachine,
    result: &PlacementResult,
) -> Result<(), ConvergeError> {
    let host = result.host.clone();
    let host_moid = result.host_moid.clone();

    update_vm_with_retry(ctx.store.as_ref(), vm, |vm| {
        let annotations = vm.metadata.annotations.get_or_insert_with(Default::default);
        let mut changed = false;
        for (key, value) in [
            (SELECTED_NODE_ANNOTATION, host.as_ref()),
            (SELECTED_NODE_MOID_ANNOTATION, host_moid.as_ref()),
        ] {
            if let Some(value) = value {
                if !annotations.contains_key(key) {
                    annotations.insert(key.to_string(), value.clone());
                    changed = true;
                }
            }
        }
        changed
    })
    .await?;
    Ok(())
}

/// Place in an already-chosen zone.
async fn place_in_zone(
    ctx: &Context,
    namespace: &str,
    zone_name: &str,
    placement_spec: &ConfigSpec,
    need_host: bool,
) -> Result<PlacementResult, ConvergeError> {
    let zone = ctx
        .store
        .get_zone(namespace, zone_name)
        .await?
        .ok_or_else(|| PlacementError::ZoneNotFound {
            zone: zone_name.to_string(),
        })?;
    if zone.is_being_deleted() {
        return Err(PlacementError::ZoneUnavailable {
            zone: zone_name.to_string(),
        }
        .into());
    }

    let pools = zone.spec.resource_pools.clone();
    let Some(first_pool) = pools.first().cloned() else {
        return Err(PlacementError::PlacementFailed {
            reason: format!("zone '{zone_name}' has no resource pools"),
        }
        .into());
    };

    if !need_host {
        debug!(zone = zone_name, pool = %first_pool, "Using resource pool of labeled zone");
        return Ok(PlacementResult {
            zone: Some(zone_name.to_string()),
            resource_pool: first_pool,
            folder: zone.spec.folder.clone(),
            ..Default::default()
        });
    }

    let rec = recommend(ctx, placement_spec, pools, true).await?;
    Ok(from_recommendation(rec, &zone))
}

/// Let the hypervisor choose among the pools of every zone not being deleted.
async fn place_across_zones(
    ctx: &Context,
    namespace: &str,
    placement_spec: &ConfigSpec,
    need_host: bool,
) -> Result<PlacementResult, ConvergeError> {
    let zones: Vec<Zone> = ctx
        .store
        .list_zones(namespace)
        .await?
        .into_iter()
        .filter(|z| !z.is_being_deleted())
        .collect();

    let mut pool_to_zone: HashMap<String, usize> = HashMap::new();
    let mut candidate_pools = Vec::new();
    for (idx, zone) in zones.iter().enumerate() {
        for pool in &zone.spec.resource_pools {
            if pool_to_zone.insert(pool.clone(), idx).is_none() {
                candidate_pools.push(pool.clone());
            }
        }
    }

    if candidate_pools.is_empty() {
        return Err(PlacementError::PlacementFailed {
            reason: "no placement candidates available".to_string(),
        }
        .into());
    }

    if candidate_pools.len() == 1 && !need_host {
        let pool = candidate_pools.remove(0);
        let zone = &zones[pool_to_zone[&pool]];
        debug!(zone = %zone.name_any(), pool = %pool, "Single placement candidate, skipping recommendation");
        return Ok(PlacementResult {
            zone: Some(zone.name_any()),
            resource_pool: pool,
            folder: zone.spec.folder.clone(),
            ..Default::default()
        });
    }

    let rec = recommend(ctx, placement_spec, candidate_pools, need_host).await?;
    let zone = pool_to_zone
        .get(&rec.resource_pool)
        .map(|idx| &zones[*idx])
        .ok_or_else(|| PlacementError::PlacementFailed {
            reason: format!(
                "recommended resource pool '{}' does not belong to any zone",
                rec.resource_pool
            ),
        })?;
    Ok(from_recommendation(rec, zone))
}

async fn recommend(
    ctx: &Context,
    placement_spec: &ConfigSpec,
    candidate_pools: Vec<String>,
    need_host: bool,
) -> Result<Recommendation, ConvergeError> {
    let request = PlacementRequest {
        config_spec: placement_spec.clone(),
        candidate_pools,
        need_host,
    };
    let recommendations = ctx.provider.recommend(&request).await.map_err(|e| match e {
        ProviderError::Timeout { .. } => ConvergeError::Provider(e),
        e => PlacementError::PlacementFailed {
            reason: e.to_string(),
        }
        .into(),
    })?;

    Ok(recommendations
        .into_iter()
        .next()
        .ok_or_else(|| PlacementError::PlacementFailed {
            reason: "no placement recommendations".to_string(),
        })?)
}

fn from_recommendation(rec: Recommendation, zone: &Zone) -> PlacementResult {
    PlacementResult {
        zone: Some(zone.name_any()),
        resource_pool: rec.resource_pool,
        folder: zone.spec.folder.clone(),
        datastores: rec.datastores,
        host: rec.host,
        host_moid: rec.host_moid,
    }
}

/// Name of the zone that owns `resource_pool`, used to restore a lost zone label.
///
/// # Errors
///
/// Returns the store error when zones cannot be listed.
pub async fn zone_for_resource_pool(
    store: &dyn ClusterStore,
    namespace: &str,
    resource_pool: &str,
) -> Result<Option<String>, ConvergeError> {
    if resource_pool.is_empty() {
        return Ok(None);
    }
    Ok(store
        .list_zones(namespace)
        .await?
        .into_iter()
        .find(|z| z.spec.resource_pools.iter().any(|p| p == resource_pool))
        .map(|z| z.name_any()))
}

#[cfg(test)]
#[path = "placement_tests.rs"]
mod placement_tests;
