// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Validating admission webhooks.
//!
//! Every watched resource type has a validator implementing [`Validator`]. The HTTP
//! layer decodes an `AdmissionReview`, dispatches on [`AdmissionKind`] and turns the
//! validator's field errors into an allow/deny response.
//!
//! Validators never call into the reconciler. They only read the cluster store, so a
//! decision is reached within a single store round trip.
//!
//! ## Routes
//!
//! - `POST /validate/persistentvolumeclaims`
//! - `POST /validate/virtualmachines`
//! - `GET /healthz`
//! - `GET /metrics`

pub mod field_errors;
pub mod persistentvolumeclaim;
pub mod virtualmachine;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::constants::{
    HEALTH_PATH, KIND_PERSISTENT_VOLUME_CLAIM, KIND_VIRTUAL_MACHINE, KUBE_ADMIN_USER,
    METRICS_PATH, OPERATOR_SERVICE_ACCOUNT, PVC_VALIDATION_PATH, VM_VALIDATION_PATH,
};
use crate::context::FeatureGates;
use crate::metrics;
use crate::store::ClusterStore;
use crate::vm_errors::AdmissionError;

use field_errors::FieldErrorList;
use persistentvolumeclaim::PersistentVolumeClaimValidator;
use virtualmachine::VirtualMachineValidator;

/// Resource types with a validating webhook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdmissionKind {
    PersistentVolumeClaim,
    VirtualMachine,
}

impl AdmissionKind {
    pub const ALL: [AdmissionKind; 2] = [
        AdmissionKind::PersistentVolumeClaim,
        AdmissionKind::VirtualMachine,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AdmissionKind::PersistentVolumeClaim => KIND_PERSISTENT_VOLUME_CLAIM,
            AdmissionKind::VirtualMachine => KIND_VIRTUAL_MACHINE,
        }
    }

    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            AdmissionKind::PersistentVolumeClaim => PVC_VALIDATION_PATH,
            AdmissionKind::VirtualMachine => VM_VALIDATION_PATH,
        }
    }

    /// Look up the validator kind for a request's `kind.kind`.
    #[must_use]
    pub fn for_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }
}

/// Identities that bypass the instance storage rules.
///
/// `kubernetes-admin` and the operator's own service account are always present;
/// deployments add more through configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrivilegedIdentities(BTreeSet<String>);

impl PrivilegedIdentities {
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut identities: BTreeSet<String> = [KUBE_ADMIN_USER, OPERATOR_SERVICE_ACCOUNT]
            .into_iter()
            .map(str::to_string)
            .collect();
        identities.extend(
            extra
                .into_iter()
                .map(Into::into)
                .filter(|identity: &String| !identity.is_empty()),
        );
        Self(identities)
    }

    #[must_use]
    pub fn contains(&self, username: &str) -> bool {
        self.0.contains(username)
    }
}

impl Default for PrivilegedIdentities {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

/// A decoded admission request for one resource type.
#[derive(Clone, Debug)]
pub struct ValidationRequest<K> {
    pub operation: Operation,
    pub namespace: String,
    pub name: String,
    pub username: String,

    /// Caller is in [`PrivilegedIdentities`]
    pub privileged: bool,

    pub object: Option<K>,
    pub old_object: Option<K>,
}

impl<K> ValidationRequest<K> {
    /// The object being admitted: the incoming one, or the stored one on DELETE.
    pub fn current(&self) -> Option<&K> {
        self.object.as_ref().or(self.old_object.as_ref())
    }
}

/// Validation of one resource type, split by operation.
///
/// An empty [`FieldErrorList`] allows the request. An `Err` means no decision
/// could be reached and the failure policy applies.
#[async_trait]
pub trait Validator: Send + Sync {
    type Object: DeserializeOwned + Send + Sync;

    async fn validate_create(
        &self,
        request: &ValidationRequest<Self::Object>,
    ) -> Result<FieldErrorList, AdmissionError>;

    async fn validate_update(
        &self,
        request: &ValidationRequest<Self::Object>,
    ) -> Result<FieldErrorList, AdmissionError>;

    async fn validate_delete(
        &self,
        request: &ValidationRequest<Self::Object>,
    ) -> Result<FieldErrorList, AdmissionError>;
}

/// Shared state of the webhook server.
pub struct WebhookState {
    pub pvc: PersistentVolumeClaimValidator,
    pub vm: VirtualMachineValidator,
    pub privileged: PrivilegedIdentities,

    /// Deny when a request cannot be evaluated, instead of letting it through
    pub strict: bool,
}

impl WebhookState {
    #[must_use]
    pub fn new(
        store: Arc<dyn ClusterStore>,
        features: FeatureGates,
        privileged: PrivilegedIdentities,
        strict: bool,
    ) -> Self {
        Self {
            pvc: PersistentVolumeClaimValidator::new(
                store.clone(),
                features.workload_domain_isolation,
            ),
            vm: VirtualMachineValidator::new(store),
            privileged,
            strict,
        }
    }
}

/// Build the webhook router.
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(PVC_VALIDATION_PATH, post(validate_pvc_handler))
        .route(VM_VALIDATION_PATH, post(validate_vm_handler))
        .route(HEALTH_PATH, get(healthz_handler))
        .route(METRICS_PATH, get(metrics_handler))
        .with_state(state)
}

/// Serve the webhook router until the listener fails.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server stops.
pub async fn serve(addr: &str, state: Arc<WebhookState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Admission webhook server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn validate_pvc_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    review(&state, AdmissionKind::PersistentVolumeClaim, body).await
}

async fn validate_vm_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    review(&state, AdmissionKind::VirtualMachine, body).await
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn review(
    state: &WebhookState,
    kind: AdmissionKind,
    body: AdmissionReview<DynamicObject>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(admit(state, kind, &request).await.into_review())
}

/// Decide one admission request for the resource type served on this route.
pub async fn admit(
    state: &WebhookState,
    kind: AdmissionKind,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let start = Instant::now();
    let operation = operation_name(&request.operation);

    if AdmissionKind::for_kind(&request.kind.kind) != Some(kind) {
        warn!(
            uid = %request.uid,
            expected = kind.as_str(),
            got = %request.kind.kind,
            "Admission request routed to the wrong validator"
        );
        return AdmissionResponse::invalid(format!(
            "{} webhook cannot validate kind {}",
            kind.as_str(),
            request.kind.kind
        ));
    }

    let outcome = match kind {
        AdmissionKind::PersistentVolumeClaim => {
            run(&state.pvc, kind, &state.privileged, request).await
        }
        AdmissionKind::VirtualMachine => run(&state.vm, kind, &state.privileged, request).await,
    };

    let response = AdmissionResponse::from(request);
    let response = match outcome {
        Ok(errors) if errors.is_empty() => response,
        Ok(errors) => {
            info!(
                uid = %request.uid,
                kind = kind.as_str(),
                operation,
                namespace = ?request.namespace,
                name = %request.name,
                reasons = %errors,
                "Denied admission request"
            );
            response.deny(errors.to_string())
        }
        Err(err) if state.strict => {
            warn!(uid = %request.uid, kind = kind.as_str(), error = %err, "Denying request that could not be evaluated");
            response.deny(err.to_string())
        }
        Err(err) => {
            warn!(uid = %request.uid, kind = kind.as_str(), error = %err, "Allowing request that could not be evaluated");
            response
        }
    };

    debug!(
        uid = %request.uid,
        allowed = response.allowed,
        elapsed_ms = start.elapsed().as_millis(),
        "Admission decision"
    );
    metrics::record_admission(kind.as_str(), operation, response.allowed);
    response
}

async fn run<V: Validator>(
    validator: &V,
    kind: AdmissionKind,
    privileged: &PrivilegedIdentities,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<FieldErrorList, AdmissionError> {
    let username = request.user_info.username.clone().unwrap_or_default();
    let request = ValidationRequest {
        operation: request.operation.clone(),
        namespace: request.namespace.clone().unwrap_or_default(),
        name: request.name.clone(),
        privileged: privileged.contains(&username),
        username,
        object: decode(kind, request.object.as_ref())?,
        old_object: decode(kind, request.old_object.as_ref())?,
    };

    match request.operation {
        Operation::Create => validator.validate_create(&request).await,
        Operation::Update => validator.validate_update(&request).await,
        Operation::Delete => validator.validate_delete(&request).await,
        Operation::Connect => Ok(FieldErrorList::new()),
    }
}

fn decode<K: DeserializeOwned>(
    kind: AdmissionKind,
    object: Option<&DynamicObject>,
) -> Result<Option<K>, AdmissionError> {
    object
        .map(|obj| serde_json::to_value(obj).and_then(serde_json::from_value))
        .transpose()
        .map_err(|e| AdmissionError::Decode {
            kind: kind.as_str().to_string(),
            reason: e.to_string(),
        })
}

fn operation_name(operation: &Operation) -> &'static str {
    match operation {
        Operation::Create => "CREATE",
        Operation::Update => "UPDATE",
        Operation::Delete => "DELETE",
        Operation::Connect => "CONNECT",
    }
}
