// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Admission rules for `PersistentVolumeClaim`.
//!
//! Claims carrying the instance storage marker label are created and owned by the
//! operator. Nobody else may create them, touch them or delete them, and the marker
//! can never be added to an existing claim. Claims may also name zones in the
//! requested-topology annotation; a zone that is being deleted is rejected.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use tracing::debug;

use super::field_errors::{FieldError, FieldErrorList, FieldPath};
use super::{ValidationRequest, Validator};
use crate::constants::KIND_PERSISTENT_VOLUME_CLAIM;
use crate::crd::has_instance_storage_label;
use crate::labels::{INSTANCE_STORAGE_LABEL, REQUESTED_TOPOLOGY_ANNOTATION, ZONE_LABEL};
use crate::store::ClusterStore;
use crate::vm_errors::AdmissionError;

pub const ADDING_INSTANCE_STORAGE_LABEL_NOT_ALLOWED: &str =
    "adding instance storage label is not allowed";

pub const ZONE_BEING_DELETED: &str = "cannot use zone that is being deleted";

/// System service accounts that manage claims on behalf of the cluster.
pub const CLAIM_SYSTEM_ACCOUNTS: [&str; 5] = [
    "system:serviceaccount:kube-system:persistent-volume-binder",
    "system:serviceaccount:kube-system:pvc-protection-controller",
    "system:serviceaccount:kube-system:generic-garbage-collector",
    "system:serviceaccount:kube-system:namespace-controller",
    "system:serviceaccount:vmware-system-csi:vsphere-csi-controller",
];

/// `<OP> operation on PVC with instance storage label is not allowed`
#[must_use]
pub fn operation_not_allowed(operation: &str) -> String {
    format!("{operation} operation on PVC with instance storage label is not allowed")
}

fn label_path() -> FieldPath {
    FieldPath::new("metadata")
        .child("labels")
        .key(INSTANCE_STORAGE_LABEL)
}

fn annotation_path() -> FieldPath {
    FieldPath::new("metadata")
        .child("annotations")
        .key(REQUESTED_TOPOLOGY_ANNOTATION)
}

pub struct PersistentVolumeClaimValidator {
    store: Arc<dyn ClusterStore>,
    check_requested_zones: bool,
}

impl PersistentVolumeClaimValidator {
    #[must_use]
    pub fn new(store: Arc<dyn ClusterStore>, check_requested_zones: bool) -> Self {
        Self {
            store,
            check_requested_zones,
        }
    }

    /// Reject zones named in the requested-topology annotation that are being deleted.
    async fn validate_requested_zones(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<FieldErrorList, AdmissionError> {
        let mut errors = FieldErrorList::new();
        let topologies = match requested_topologies(claim) {
            Ok(topologies) => topologies,
            Err(reason) => {
                errors.push(FieldError::invalid(annotation_path(), reason));
                return Ok(errors);
            }
        };

        for zone_name in topologies.iter().filter_map(|t| t.get(ZONE_LABEL)) {
            match self.store.get_zone(namespace, zone_name).await? {
                None => {
                    errors.push(FieldError::invalid(
                        annotation_path(),
                        format!("zone '{zone_name}' not found"),
                    ));
                    return Ok(errors);
                }
                Some(zone) if zone.is_being_deleted() => {
                    debug!(zone = %zone_name, claim = %claim.name_any(), "Claim requests a deleting zone");
                    errors.push(FieldError::invalid(annotation_path(), ZONE_BEING_DELETED));
                    return Ok(errors);
                }
                Some(_) => {}
            }
        }
        Ok(errors)
    }
}

/// Caller may manage instance storage claims.
fn is_privileged(request: &ValidationRequest<PersistentVolumeClaim>) -> bool {
    request.privileged || CLAIM_SYSTEM_ACCOUNTS.contains(&request.username.as_str())
}

fn carries_marker(claim: Option<&PersistentVolumeClaim>) -> bool {
    claim.is_some_and(|c| has_instance_storage_label(c.metadata.labels.as_ref()))
}

/// Parse the requested-topology annotation. Absent or empty means no topology.
///
/// # Errors
///
/// Returns the reason the annotation could not be parsed.
pub fn requested_topologies(
    claim: &PersistentVolumeClaim,
) -> Result<Vec<BTreeMap<String, String>>, String> {
    let Some(raw) = claim
        .annotations()
        .get(REQUESTED_TOPOLOGY_ANNOTATION)
        .filter(|v| !v.is_empty())
    else {
        return Ok(Vec::new());
    };
    serde_json::from_str(raw).map_err(|e| {
        format!(
            "failed to parse annotation {REQUESTED_TOPOLOGY_ANNOTATION} value {raw} from the claim {}/{}: {e}",
            claim.namespace().unwrap_or_default(),
            claim.name_any(),
        )
    })
}

#[async_trait]
impl Validator for PersistentVolumeClaimValidator {
    type Object = PersistentVolumeClaim;

    async fn validate_create(
        &self,
        request: &ValidationRequest<PersistentVolumeClaim>,
    ) -> Result<FieldErrorList, AdmissionError> {
        if is_privileged(request) {
            return Ok(FieldErrorList::new());
        }

        let mut errors = FieldErrorList::new();
        if carries_marker(request.object.as_ref()) {
            errors.push(FieldError::forbidden(
                label_path(),
                operation_not_allowed("CREATE"),
            ));
        }
        if self.check_requested_zones {
            let claim = request
                .object
                .as_ref()
                .ok_or_else(|| AdmissionError::MissingObject {
                    kind: KIND_PERSISTENT_VOLUME_CLAIM.to_string(),
                })?;
            errors.extend(
                self.validate_requested_zones(&request.namespace, claim)
                    .await?,
            );
        }
        Ok(errors)
    }

    async fn validate_update(
        &self,
        request: &ValidationRequest<PersistentVolumeClaim>,
    ) -> Result<FieldErrorList, AdmissionError> {
        if is_privileged(request) {
            return Ok(FieldErrorList::new());
        }

        let mut errors = FieldErrorList::new();
        if carries_marker(request.old_object.as_ref()) {
            errors.push(FieldError::forbidden(
                label_path(),
                operation_not_allowed("UPDATE"),
            ));
        } else if carries_marker(request.object.as_ref()) {
            errors.push(FieldError::forbidden(
                label_path(),
                ADDING_INSTANCE_STORAGE_LABEL_NOT_ALLOWED,
            ));
        }
        Ok(errors)
    }

    async fn validate_delete(
        &self,
        request: &ValidationRequest<PersistentVolumeClaim>,
    ) -> Result<FieldErrorList, AdmissionError> {
        if is_privileged(request) {
            return Ok(FieldErrorList::new());
        }

        let mut errors = FieldErrorList::new();
        if carries_marker(request.current()) {
            errors.push(FieldError::forbidden(
                label_path(),
                operation_not_allowed("DELETE"),
            ));
        }
        Ok(errors)
    }
}

#[cfg(test)]
#[path = "persistentvolumeclaim_tests.rs"]
mod persistentvolumeclaim_tests;
