// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operator configuration.
//!
//! Every option can be given as a flag or through its `VMCONVERGE_*` environment
//! variable, so the same binary runs from a shell or a Deployment manifest.

use anyhow::{Context as _, Result};
use clap::{ArgAction, Parser};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::constants::{DEFAULT_RECONCILE_CONCURRENCY, DEFAULT_RPC_TIMEOUT_SECS, DEFAULT_WEBHOOK_ADDR};
use crate::context::{FeatureGates, Settings};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "vmconverge",
    version,
    about = "Converges VirtualMachine resources onto a hypervisor and validates writes to them"
)]
pub struct OperatorConfig {
    /// Base URL of the hypervisor gateway
    #[arg(long, env = "VMCONVERGE_HYPERVISOR_URL")]
    pub hypervisor_url: String,

    /// Bearer token for the hypervisor gateway
    #[arg(long, env = "VMCONVERGE_HYPERVISOR_TOKEN", hide_env_values = true)]
    pub hypervisor_token: Option<String>,

    /// Bound on a single hypervisor call, in seconds
    #[arg(long, env = "VMCONVERGE_RPC_TIMEOUT_SECS", default_value_t = DEFAULT_RPC_TIMEOUT_SECS)]
    pub rpc_timeout_secs: u64,

    /// Address the admission webhook server binds to
    #[arg(long, env = "VMCONVERGE_WEBHOOK_ADDR", default_value = DEFAULT_WEBHOOK_ADDR)]
    pub webhook_addr: String,

    /// Identities that bypass the instance storage admission rules, comma separated
    #[arg(
        long = "privileged-identity",
        env = "VMCONVERGE_PRIVILEGED_IDENTITIES",
        value_delimiter = ','
    )]
    pub privileged_identities: Vec<String>,

    /// Provision claim-backed instance storage declared by VM classes
    #[arg(long, env = "VMCONVERGE_FSS_INSTANCE_STORAGE", default_value_t = true, action = ArgAction::Set)]
    pub instance_storage: bool,

    /// Bind VMs to zones through the zone label
    #[arg(long, env = "VMCONVERGE_FSS_FAULT_DOMAINS", default_value_t = true, action = ArgAction::Set)]
    pub fault_domains: bool,

    /// Check zones requested by claims at admission
    #[arg(long, env = "VMCONVERGE_FSS_WORKLOAD_DOMAIN_ISOLATION", default_value_t = true, action = ArgAction::Set)]
    pub workload_domain_isolation: bool,

    /// JSON object of extra config merged into every created VM
    #[arg(long, env = "VMCONVERGE_GLOBAL_EXTRA_CONFIG")]
    pub global_extra_config: Option<String>,

    /// Deny admission requests that cannot be evaluated
    #[arg(long, env = "VMCONVERGE_STRICT_ADMISSION", default_value_t = true, action = ArgAction::Set)]
    pub strict_admission: bool,

    /// Maximum number of VMs reconciled at once
    #[arg(long, env = "VMCONVERGE_CONCURRENCY", default_value_t = DEFAULT_RECONCILE_CONCURRENCY)]
    pub concurrency: u16,
}

impl OperatorConfig {
    #[must_use]
    pub fn feature_gates(&self) -> FeatureGates {
        FeatureGates {
            instance_storage: self.instance_storage,
            fault_domains: self.fault_domains,
            workload_domain_isolation: self.workload_domain_isolation,
        }
    }

    #[must_use]
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Parse the global extra config. Unset or blank means none.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a JSON object of strings.
    pub fn global_extra_config(&self) -> Result<BTreeMap<String, String>> {
        match self.global_extra_config.as_deref().map(str::trim) {
            None | Some("") => Ok(BTreeMap::new()),
            Some(raw) => serde_json::from_str(raw)
                .context("global extra config must be a JSON object of string values"),
        }
    }

    /// Reconcile settings derived from this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the global extra config cannot be parsed.
    pub fn settings(&self) -> Result<Settings> {
        Ok(Settings {
            features: self.feature_gates(),
            global_extra_config: self.global_extra_config()?,
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
