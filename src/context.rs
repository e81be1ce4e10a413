// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for the VM controller.
//!
//! The controller receives an `Arc<Context>` holding:
//! - the declarative store ([`ClusterStore`])
//! - the hypervisor client ([`VmProvider`])
//! - runtime settings (feature gates, global extra config)
//! - per-VM requeue backoff state
//!
//! Nothing in here is mutated by a reconcile except the requeue tracker, which is
//! keyed by VM identity.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::provider::VmProvider;
use crate::reconcilers::retry::RequeueTracker;
use crate::store::ClusterStore;

/// Feature gates toggled at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureGates {
    /// Provision claim-backed instance storage declared by VM classes
    pub instance_storage: bool,

    /// Bind VMs to zones by writing the zone label
    pub fault_domains: bool,

    /// Check requested-topology zones on claims at admission
    pub workload_domain_isolation: bool,
}

impl Default for FeatureGates {
    fn default() -> Self {
        Self {
            instance_storage: true,
            fault_domains: true,
            workload_domain_isolation: true,
        }
    }
}

/// Settings that shape every reconcile.
#[derive(Clone, Debug, Default)]
pub struct Settings {
    pub features: FeatureGates,

    /// Extra config merged last into every created VM
    pub global_extra_config: BTreeMap<String, String>,
}

/// Shared context passed to the VM controller.
pub struct Context {
    pub store: Arc<dyn ClusterStore>,
    pub provider: Arc<dyn VmProvider>,
    pub settings: Settings,
    pub requeue: RequeueTracker,
}

impl Context {
    #[must_use]
    pub fn new(
        store: Arc<dyn ClusterStore>,
        provider: Arc<dyn VmProvider>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
            requeue: RequeueTracker::new(),
        }
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
