// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! [`ClusterStore`] backed by the Kubernetes API server.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Event, ObjectReference, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{ClusterStore, EventType};
use crate::constants::STORAGE_POLICY_ID_PARAMETER;
use crate::crd::{
    VirtualMachine, VirtualMachineClass, VirtualMachineSetResourcePolicy, VirtualMachineStatus,
    Zone,
};
use crate::reconcilers::retry::retry_api_call;
use crate::vm_errors::StoreError;

/// Field manager used for status patches.
const FIELD_MANAGER: &str = "vmconverge-controller";

/// Optional status keys written only by the reconciler; absent ones are sent as `null`.
const OWNED_OPTIONAL_STATUS_KEYS: [&str; 8] = [
    "phase",
    "powerState",
    "uniqueId",
    "host",
    "zone",
    "instanceUuid",
    "biosUuid",
    "observedGeneration",
];

#[derive(Clone)]
pub struct KubeClusterStore {
    client: Client,
}

impl KubeClusterStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Status fields owned by the reconciler, as a merge-patch body.
///
/// `volumes` is removed so the volume controller's entries are left untouched.
/// Unset owned fields become explicit `null`s, which a merge patch needs to clear them.
pub(crate) fn owned_status_patch(
    resource_version: Option<&str>,
    status: &VirtualMachineStatus,
) -> Result<serde_json::Value, StoreError> {
    let mut body =
        serde_json::to_value(status).map_err(|e| StoreError::Api(format!("encode status: {e}")))?;
    if let Some(fields) = body.as_object_mut() {
        fields.remove("volumes");
        for key in OWNED_OPTIONAL_STATUS_KEYS {
            fields.entry(key).or_insert(serde_json::Value::Null);
        }
    }

    let mut patch = json!({ "status": body });
    if let Some(rv) = resource_version {
        patch["metadata"] = json!({ "resourceVersion": rv });
    }
    Ok(patch)
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    async fn get_vm(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachine>, StoreError> {
        let api: Api<VirtualMachine> = Api::namespaced(self.client.clone(), namespace);
        Ok(retry_api_call(|| api.get_opt(name), "get VirtualMachine").await?)
    }

    async fn update_vm(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError> {
        let namespace = vm.namespace().unwrap_or_default();
        let name = vm.name_any();
        let api: Api<VirtualMachine> = Api::namespaced(self.client.clone(), &namespace);

        debug!(namespace = %namespace, name = %name, "Replacing VirtualMachine");
        api.replace(&name, &PostParams::default(), vm)
            .await
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict { .. } => StoreError::Conflict {
                    kind: "VirtualMachine".to_string(),
                    name: name.clone(),
                },
                other => other,
            })
    }

    async fn patch_vm_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        status: &VirtualMachineStatus,
    ) -> Result<(), StoreError> {
        let api: Api<VirtualMachine> = Api::namespaced(self.client.clone(), namespace);
        let patch = owned_status_patch(resource_version, status)?;

        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
        .map(|_| ())
        .map_err(|e| match StoreError::from(e) {
            StoreError::Conflict { .. } => StoreError::Conflict {
                kind: "VirtualMachine".to_string(),
                name: name.to_string(),
            },
            other => other,
        })
    }

    async fn get_vm_class(&self, name: &str) -> Result<Option<VirtualMachineClass>, StoreError> {
        let api: Api<VirtualMachineClass> = Api::all(self.client.clone());
        Ok(retry_api_call(|| api.get_opt(name), "get VirtualMachineClass").await?)
    }

    async fn get_zone(&self, namespace: &str, name: &str) -> Result<Option<Zone>, StoreError> {
        let api: Api<Zone> = Api::namespaced(self.client.clone(), namespace);
        Ok(retry_api_call(|| api.get_opt(name), "get Zone").await?)
    }

    async fn list_zones(&self, namespace: &str) -> Result<Vec<Zone>, StoreError> {
        let api: Api<Zone> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default();
        let list = retry_api_call(|| api.list(&lp), "list Zones").await?;
        Ok(list.items)
    }

    async fn storage_policy_id(&self, storage_class: &str) -> Result<Option<String>, StoreError> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        let sc = retry_api_call(|| api.get_opt(storage_class), "get StorageClass").await?;
        Ok(sc
            .and_then(|sc| sc.parameters)
            .and_then(|mut p| p.remove(STORAGE_POLICY_ID_PARAMETER)))
    }

    async fn get_resource_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachineSetResourcePolicy>, StoreError> {
        let api: Api<VirtualMachineSetResourcePolicy> =
            Api::namespaced(self.client.clone(), namespace);
        Ok(retry_api_call(|| api.get_opt(name), "get VirtualMachineSetResourcePolicy").await?)
    }

    async fn get_config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let cm = retry_api_call(|| api.get_opt(name), "get ConfigMap").await?;
        Ok(cm.map(|cm| cm.data.unwrap_or_default()))
    }

    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, StoreError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(retry_api_call(|| api.get_opt(name), "get PersistentVolumeClaim").await?)
    }

    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<(), StoreError> {
        let namespace = claim.namespace().unwrap_or_default();
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &namespace);

        match api.create(&PostParams::default(), claim).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                debug!(namespace = %namespace, name = %claim.name_any(), "Claim already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn record_event(
        &self,
        vm: &VirtualMachine,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        let namespace = vm.namespace().unwrap_or_default();
        let name = vm.name_any();
        let event_api: Api<Event> = Api::namespaced(self.client.clone(), &namespace);

        let now = Time(k8s_openapi::jiff::Timestamp::now());
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{name}-")),
                namespace: Some(namespace.clone()),
                ..Default::default()
            },
            involved_object: ObjectReference {
                api_version: Some(VirtualMachine::api_version(&()).to_string()),
                kind: Some(VirtualMachine::kind(&()).to_string()),
                name: Some(name.clone()),
                namespace: Some(namespace),
                uid: vm.meta().uid.clone(),
                ..Default::default()
            },
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            type_: Some(event_type.as_str().to_string()),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            count: Some(1),
            ..Default::default()
        };

        if let Err(e) = event_api.create(&PostParams::default(), &event).await {
            warn!("Failed to create event for VirtualMachine {}: {}", name, e);
        }
    }
}
