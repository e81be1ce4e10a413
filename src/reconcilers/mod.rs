// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes reconciliation for `VirtualMachine` resources.
//!
//! The controller watches `VirtualMachine` objects and drives the hypervisor
//! toward their spec. Supporting pieces live in their own modules:
//!
//! - [`virtualmachine`] - the convergence pass (create, update, delete)
//! - [`placement`] - zone and resource-pool selection
//! - [`instance_storage`] - instance storage claims and the power-on barrier
//! - [`status`] - condition helpers and the batched status updater
//! - [`finalizers`] - finalizer add/remove through the store
//! - [`retry`] - API-call retries and per-object requeue backoff
//!
//! # Example: Using the Reconciler
//!
//! ```rust,no_run
//! use vmconverge::context::Context;
//! use vmconverge::crd::VirtualMachine;
//! use vmconverge::reconcilers::reconcile_virtualmachine;
//!
//! async fn converge_one(ctx: &Context, vm: VirtualMachine) -> Result<(), vmconverge::vm_errors::ConvergeError> {
//!     reconcile_virtualmachine(ctx, vm).await
//! }
//! ```

pub mod finalizers;
pub mod instance_storage;
pub mod placement;
pub mod retry;
pub mod status;
pub mod virtualmachine;

#[cfg(test)]
mod status_tests;

pub use virtualmachine::{error_action, reconcile_virtualmachine, success_action};
