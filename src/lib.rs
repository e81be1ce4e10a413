// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # vmconverge - Virtual machine convergence operator for Kubernetes
//!
//! vmconverge converges `VirtualMachine` resources onto a remote hypervisor and
//! gates writes to them through validating admission webhooks.
//!
//! ## Overview
//!
//! A reconcile pass for one VM runs, in order:
//!
//! - placement: pick a zone and resource pool (creation only)
//! - the instance storage gate: claims bound and attached before power-on
//! - ConfigSpec synthesis from the VM class
//! - the minimal set of hypervisor calls, then a status write-back
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`reconcilers`] - The convergence state machine and its stages
//! - [`vsphere`] - ConfigSpec documents and their synthesis
//! - [`provider`] - Hypervisor client trait, HTTP transport and test double
//! - [`store`] - Cluster store trait, API server and in-memory implementations
//! - [`webhooks`] - Admission validation for claims and VMs
//! - [`config`] - Command line and environment configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use vmconverge::crd::{PowerState, VirtualMachine, VirtualMachineSpec};
//!
//! let vm = VirtualMachine::new(
//!     "web-1",
//!     VirtualMachineSpec {
//!         class_name: "best-effort-small".to_string(),
//!         image_name: "ubuntu-22.04".to_string(),
//!         storage_class: "wcp-storage".to_string(),
//!         power_state: PowerState::PoweredOn,
//!         ..Default::default()
//!     },
//! );
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod labels;
pub mod metrics;
pub mod provider;
pub mod quantity;
pub mod reconcilers;
pub mod status_reasons;
pub mod store;
pub mod vm_errors;
pub mod vsphere;
pub mod webhooks;

#[cfg(test)]
mod status_reasons_tests;
#[cfg(test)]
pub(crate) mod test_support;
