// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Hypervisor RPC client abstraction.
//!
//! The reconciler talks to the hypervisor only through [`VmProvider`]. Two
//! implementations ship with the crate:
//!
//! - [`http::HttpVmProvider`] - JSON over HTTP against the hypervisor gateway
//! - [`mock::MockVmProvider`] - in-memory hypervisor used by tests
//!
//! [`TimeoutProvider`] bounds every call; a timeout surfaces as the retriable
//! [`ProviderError::Timeout`].

pub mod http;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::crd::{NetworkInterface, PowerState};
use crate::metrics;
use crate::vm_errors::ProviderError;
use crate::vsphere::{ConfigSpec, OptionValue, ResolvedNetwork, VirtualDevice};

/// How to find a VM on the hypervisor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmLookup {
    pub namespace: String,
    pub name: String,
    /// Managed-object ID recorded in status, preferred when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
}

/// Live hypervisor-side view of a VM. Never cached across reconciles.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedVm {
    /// Managed-object ID
    pub moid: String,
    pub name: String,
    pub power_state: PowerState,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub resource_pool: String,
    #[serde(default)]
    pub instance_uuid: String,
    #[serde(default)]
    pub bios_uuid: String,
    #[serde(default)]
    pub devices: Vec<VirtualDevice>,
    #[serde(default)]
    pub extra_config: Vec<OptionValue>,
}

/// Everything needed to create a VM.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVmRequest {
    pub namespace: String,
    pub name: String,
    pub image_name: String,
    pub resource_pool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default)]
    pub datastores: Vec<String>,
    /// Storage policy for the VM home and boot disk
    pub storage_profile_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_module_uuid: Option<String>,
    pub config_spec: ConfigSpec,
}

/// A placement-only request across candidate pools.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementRequest {
    pub config_spec: ConfigSpec,
    pub candidate_pools: Vec<String>,
    /// Ask for a host, needed when instance storage is declared
    #[serde(default)]
    pub need_host: bool,
}

/// One ranked placement recommendation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub resource_pool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_moid: Option<String>,
    #[serde(default)]
    pub datastores: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerOp {
    PowerOn,
    PowerOff,
    Suspend,
}

impl PowerOp {
    #[must_use]
    pub fn resulting_state(self) -> PowerState {
        match self {
            PowerOp::PowerOn => PowerState::PoweredOn,
            PowerOp::PowerOff => PowerState::PoweredOff,
            PowerOp::Suspend => PowerState::Suspended,
        }
    }
}

/// Remote VM client.
///
/// Every method maps to one hypervisor call and may return the distinguished
/// [`ProviderError::NotFound`] and [`ProviderError::Timeout`] kinds.
#[async_trait]
pub trait VmProvider: Send + Sync {
    /// Fetch the live VM, `None` when it does not exist.
    async fn lookup_vm(&self, lookup: &VmLookup) -> Result<Option<ObservedVm>, ProviderError>;

    async fn create_vm(&self, request: &CreateVmRequest) -> Result<ObservedVm, ProviderError>;

    /// Apply a ConfigSpec delta to an existing VM.
    async fn reconfigure(&self, moid: &str, spec: &ConfigSpec) -> Result<(), ProviderError>;

    async fn power_op(&self, moid: &str, op: PowerOp) -> Result<(), ProviderError>;

    async fn delete_vm(&self, moid: &str) -> Result<(), ProviderError>;

    /// Ranked placement recommendations, best first.
    async fn recommend(
        &self,
        request: &PlacementRequest,
    ) -> Result<Vec<Recommendation>, ProviderError>;

    /// Backing and MAC for one declared interface.
    async fn resolve_network(
        &self,
        namespace: &str,
        interface: &NetworkInterface,
    ) -> Result<ResolvedNetwork, ProviderError>;
}

/// Run one hypervisor call with a deadline and record its outcome.
///
/// # Errors
///
/// Returns [`ProviderError::Timeout`] when `timeout` elapses, otherwise the
/// call's own result.
pub async fn with_timeout<T, F>(
    operation: &str,
    timeout: Duration,
    call: F,
) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    let start = Instant::now();
    let result = match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            operation: operation.to_string(),
            seconds: timeout.as_secs(),
        }),
    };

    let outcome = match &result {
        Ok(_) => "success",
        Err(ProviderError::NotFound(_)) => "not_found",
        Err(ProviderError::Timeout { .. }) => "timeout",
        Err(_) => "error",
    };
    debug!(operation, outcome, elapsed = ?start.elapsed(), "Hypervisor call finished");
    metrics::record_hypervisor_call(operation, outcome, start.elapsed());

    result
}

/// Decorator bounding every call of the wrapped provider.
pub struct TimeoutProvider<P> {
    inner: P,
    timeout: Duration,
}

impl<P: VmProvider> TimeoutProvider<P> {
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<P: VmProvider> VmProvider for TimeoutProvider<P> {
    async fn lookup_vm(&self, lookup: &VmLookup) -> Result<Option<ObservedVm>, ProviderError> {
        with_timeout("lookup_vm", self.timeout, self.inner.lookup_vm(lookup)).await
    }

    async fn create_vm(&self, request: &CreateVmRequest) -> Result<ObservedVm, ProviderError> {
        with_timeout("create_vm", self.timeout, self.inner.create_vm(request)).await
    }

    async fn reconfigure(&self, moid: &str, spec: &ConfigSpec) -> Result<(), ProviderError> {
        with_timeout("reconfigure", self.timeout, self.inner.reconfigure(moid, spec)).await
    }

    async fn power_op(&self, moid: &str, op: PowerOp) -> Result<(), ProviderError> {
        with_timeout("power_op", self.timeout, self.inner.power_op(moid, op)).await
    }

    async fn delete_vm(&self, moid: &str) -> Result<(), ProviderError> {
        with_timeout("delete_vm", self.timeout, self.inner.delete_vm(moid)).await
    }

    async fn recommend(
        &self,
        request: &PlacementRequest,
    ) -> Result<Vec<Recommendation>, ProviderError> {
        with_timeout("recommend", self.timeout, self.inner.recommend(request)).await
    }

    async fn resolve_network(
        &self,
        namespace: &str,
        interface: &NetworkInterface,
    ) -> Result<ResolvedNetwork, ProviderError> {
        with_timeout(
            "resolve_network",
            self.timeout,
            self.inner.resolve_network(namespace, interface),
        )
        .await
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
