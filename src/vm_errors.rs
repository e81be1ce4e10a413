// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for VM convergence.
//!
//! Every error the reconciler can hit carries an [`ErrorKind`] so the controller's
//! error policy can decide between requeue-with-backoff, waiting for a spec change,
//! and treating the outcome as success.
//!
//! The message strings of [`StorageGateError`] and [`ConvergeError::MissingStorageClass`]
//! are surfaced verbatim in status conditions and are matched by clients.

use thiserror::Error;

/// How the controller reacts to an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient: requeue with exponential backoff.
    Retriable,
    /// User input must change before another attempt can succeed.
    Terminal,
    /// The requested outcome already holds (e.g. deleting a VM that is gone).
    AlreadySatisfied,
}

/// Errors produced while synthesizing a hypervisor ConfigSpec.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigSpecError {
    /// The class raw ConfigSpec is not base64, or not a valid ConfigSpec document.
    #[error("invalid ConfigSpec in VirtualMachineClass '{class}': {reason}")]
    InvalidClassConfig { class: String, reason: String },

    /// No storage policy ID could be resolved for a storage class.
    #[error("storage class '{storage_class}' has no storage policy")]
    UnknownStorageClass { storage_class: String },

    /// A size or memory value is not a valid quantity.
    #[error("invalid quantity '{value}' for {field}: {reason}")]
    InvalidQuantity {
        field: String,
        value: String,
        reason: String,
    },
}

/// Errors returned by the hypervisor RPC client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The object does not exist on the hypervisor.
    #[error("hypervisor object not found: {0}")]
    NotFound(String),

    /// The call did not complete within the configured bound.
    #[error("hypervisor call '{operation}' timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// The hypervisor (or transport) reported a transient failure.
    #[error("hypervisor call '{operation}' failed: {message}")]
    Fault { operation: String, message: String },

    /// The hypervisor rejected the request as malformed.
    #[error("hypervisor rejected '{operation}': {message}")]
    InvalidRequest { operation: String, message: String },
}

impl ProviderError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::InvalidRequest { .. } => ErrorKind::Terminal,
            ProviderError::NotFound(_) | ProviderError::Timeout { .. } | ProviderError::Fault { .. } => {
                ErrorKind::Retriable
            }
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

/// Errors from the declarative store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Update lost an optimistic-concurrency race.
    #[error("conflict writing {kind} '{name}'")]
    Conflict { kind: String, name: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("store request failed: {0}")]
    Api(String),
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict {
                kind: resp.reason.clone(),
                name: resp.message.clone(),
            },
            kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound {
                kind: resp.reason.clone(),
                name: resp.message.clone(),
            },
            _ => StoreError::Api(err.to_string()),
        }
    }
}

/// Errors from zone selection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlacementError {
    /// The zone the VM is bound to is being deleted.
    #[error("zone '{zone}' is being deleted")]
    ZoneUnavailable { zone: String },

    /// The zone named by the VM's label does not exist.
    #[error("zone '{zone}' not found")]
    ZoneNotFound { zone: String },

    /// No eligible zone, or the recommendation call failed.
    #[error("placement failed: {reason}")]
    PlacementFailed { reason: String },
}

impl PlacementError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlacementError::PlacementFailed { .. } => ErrorKind::Retriable,
            PlacementError::ZoneUnavailable { .. } | PlacementError::ZoneNotFound { .. } => {
                ErrorKind::Terminal
            }
        }
    }
}

/// Why the instance storage gate is not open yet. All variants are retriable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageGateError {
    #[error("instance storage PVCs are not bound yet")]
    NotBound,

    #[error("status update pending for persistent volume: {name} on VM")]
    StatusPending { name: String },

    #[error("persistent volume: {name} not attached to VM")]
    NotAttached { name: String },
}

/// Top-level error of one convergence pass.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvergeError {
    #[error("storage class is required but not specified")]
    MissingStorageClass,

    #[error("ClusterModule {0} not found")]
    ClusterModuleNotFound(String),

    #[error("VirtualMachineClass {0} not found")]
    ClassNotFound(String),

    #[error(transparent)]
    ConfigSpec(#[from] ConfigSpecError),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    StorageGate(#[from] StorageGateError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ConvergeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvergeError::MissingStorageClass
            | ConvergeError::ClusterModuleNotFound(_)
            | ConvergeError::ClassNotFound(_)
            | ConvergeError::ConfigSpec(_) => ErrorKind::Terminal,
            ConvergeError::Placement(e) => e.kind(),
            ConvergeError::StorageGate(_) | ConvergeError::Store(_) => ErrorKind::Retriable,
            ConvergeError::Provider(e) => e.kind(),
        }
    }

    #[must_use]
    pub fn is_retriable(&self) -> bool {
        self.kind() == ErrorKind::Retriable
    }
}

/// Errors that keep the admission layer from reaching a decision.
///
/// These are not denials: the failure policy decides whether the request is
/// rejected or let through.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdmissionError {
    #[error("failed to decode {kind} from admission request: {reason}")]
    Decode { kind: String, reason: String },

    #[error("admission request for {kind} carries no object")]
    MissingObject { kind: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdmissionError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdmissionError::Decode { .. } | AdmissionError::MissingObject { .. } => {
                ErrorKind::Terminal
            }
            AdmissionError::Store(_) => ErrorKind::Retriable,
        }
    }
}

#[cfg(test)]
#[path = "vm_errors_tests.rs"]
mod vm_errors_tests;
