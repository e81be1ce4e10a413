// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Finalizer management for `VirtualMachine` resources.
//!
//! The VM finalizer keeps the declarative object around until the remote VM has
//! been powered off and destroyed. Finalizer edits go through the store with the
//! same conflict-retry as every other metadata write.
//!
//! # Example
//!
//! ```rust,ignore
//! use vmconverge::constants::VM_FINALIZER;
//! use vmconverge::reconcilers::finalizers::{ensure_finalizer, remove_finalizer};
//!
//! async fn reconcile(store: &dyn ClusterStore, vm: &mut VirtualMachine) -> Result<(), StoreError> {
//!     if vm.is_being_deleted() {
//!         // destroy the remote VM, then:
//!         return remove_finalizer(store, vm, VM_FINALIZER).await;
//!     }
//!     ensure_finalizer(store, vm, VM_FINALIZER).await
//! }
//! ```

use kube::ResourceExt;
use tracing::info;

use crate::crd::VirtualMachine;
use crate::store::{update_vm_with_retry, ClusterStore};
use crate::vm_errors::StoreError;

#[must_use]
pub fn has_finalizer(vm: &VirtualMachine, finalizer: &str) -> bool {
    vm.finalizers().iter().any(|f| f == finalizer)
}

/// Add a finalizer to a VM if not already present.
///
/// Idempotent: calling it on a VM that already carries the finalizer writes nothing.
///
/// # Errors
///
/// Returns the store error if the update fails.
pub async fn ensure_finalizer(
    store: &dyn ClusterStore,
    vm: &mut VirtualMachine,
    finalizer: &str,
) -> Result<(), StoreError> {
    if has_finalizer(vm, finalizer) {
        return Ok(());
    }

    info!(
        "Adding finalizer {} to {}/{} VirtualMachine",
        finalizer,
        vm.namespace().unwrap_or_default(),
        vm.name_any()
    );

    update_vm_with_retry(store, vm, |vm| {
        if has_finalizer(vm, finalizer) || vm.is_being_deleted() {
            return false;
        }
        vm.finalizers_mut().push(finalizer.to_string());
        true
    })
    .await
}

/// Remove a finalizer from a VM.
///
/// Idempotent: a VM without the finalizer is left untouched. A VM that disappears
/// while the finalizer is removed counts as success.
///
/// # Errors
///
/// Returns the store error if the update fails.
pub async fn remove_finalizer(
    store: &dyn ClusterStore,
    vm: &mut VirtualMachine,
    finalizer: &str,
) -> Result<(), StoreError> {
    if !has_finalizer(vm, finalizer) {
        return Ok(());
    }

    info!(
        "Removing finalizer {} from {}/{} VirtualMachine",
        finalizer,
        vm.namespace().unwrap_or_default(),
        vm.name_any()
    );

    match update_vm_with_retry(store, vm, |vm| {
        let before = vm.finalizers().len();
        vm.finalizers_mut().retain(|f| f != finalizer);
        vm.finalizers().len() != before
    })
    .await
    {
        Err(StoreError::NotFound { .. }) => Ok(()),
        other => other,
    }
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
