// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-process lifecycle tests for the vmconverge operator
//!
//! These wire the reconciler and the admission webhooks to the in-memory
//! cluster store and the mock hypervisor, so they need no cluster.

use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionReview};
use kube::ResourceExt;
use serde_json::{json, Value};
use std::sync::Arc;
use vmconverge::context::{Context, FeatureGates, Settings};
use vmconverge::crd::{
    InstanceStorage, InstanceStorageVolume, NetworkInterface, PowerState, VirtualMachine,
    VirtualMachineClass, VirtualMachineClassSpec, VirtualMachineSpec, VmPhase, VolumeStatus, Zone,
    ZoneSpec,
};
use vmconverge::labels::{INSTANCE_STORAGE_LABEL, PVCS_BOUND_ANNOTATION, ZONE_LABEL};
use vmconverge::provider::mock::MockVmProvider;
use vmconverge::provider::{PowerOp, Recommendation};
use vmconverge::reconcilers::reconcile_virtualmachine;
use vmconverge::store::memory::InMemoryClusterStore;
use vmconverge::store::ClusterStore;
use vmconverge::vm_errors::{ConvergeError, StorageGateError};
use vmconverge::webhooks::{admit, AdmissionKind, PrivilegedIdentities, WebhookState};

const NAMESPACE: &str = "tenant-a";
const CLASS: &str = "best-effort-large";

struct Harness {
    store: InMemoryClusterStore,
    provider: MockVmProvider,
    ctx: Arc<Context>,
    webhooks: WebhookState,
}

impl Harness {
    fn new(instance_storage: Option<Vec<&str>>) -> Self {
        let store = InMemoryClusterStore::new();
        let provider = MockVmProvider::new();

        store.set_storage_policy("wcp-storage", "policy-wcp");
        store.set_storage_policy("instance-storage", "policy-instance");
        store.insert_class(VirtualMachineClass::new(
            CLASS,
            VirtualMachineClassSpec {
                cpus: 4,
                memory: "8Gi".to_string(),
                config_spec: None,
                instance_storage: instance_storage.map(|sizes| InstanceStorage {
                    storage_class: "instance-storage".to_string(),
                    volumes: sizes
                        .into_iter()
                        .map(|size| InstanceStorageVolume {
                            size: size.to_string(),
                        })
                        .collect(),
                }),
            },
        ));
        let mut zone = Zone::new(
            "zone-a",
            ZoneSpec {
                resource_pools: vec!["rp-a".to_string()],
                folder: Some("folder-a".to_string()),
            },
        );
        zone.metadata.namespace = Some(NAMESPACE.to_string());
        store.insert_zone(zone);
        provider.add_network("primary", "dvpg-primary");

        let ctx = Arc::new(Context::new(
            Arc::new(store.clone()),
            Arc::new(provider.clone()),
            Settings::default(),
        ));
        let webhooks = WebhookState::new(
            Arc::new(store.clone()),
            FeatureGates::default(),
            PrivilegedIdentities::default(),
            true,
        );

        Self {
            store,
            provider,
            ctx,
            webhooks,
        }
    }

    fn vm(&self, name: &str) -> VirtualMachine {
        self.store.vm(NAMESPACE, name).expect("VM in store")
    }

    async fn reconcile(&self, name: &str) -> Result<(), ConvergeError> {
        reconcile_virtualmachine(&self.ctx, self.vm(name)).await
    }
}

fn new_vm(name: &str) -> VirtualMachine {
    let mut vm = VirtualMachine::new(
        name,
        VirtualMachineSpec {
            class_name: CLASS.to_string(),
            image_name: "ubuntu-22.04".to_string(),
            storage_class: "wcp-storage".to_string(),
            power_state: PowerState::PoweredOn,
            network_interfaces: vec![NetworkInterface {
                name: "eth0".to_string(),
                network_name: "primary".to_string(),
                network_type: None,
            }],
            ..Default::default()
        },
    );
    vm.metadata.namespace = Some(NAMESPACE.to_string());
    vm.metadata.uid = Some(format!("uid-{name}"));
    vm
}

fn admission_request(
    kind: &str,
    operation: &str,
    username: &str,
    object: Option<Value>,
    old_object: Option<Value>,
) -> AdmissionRequest<DynamicObject> {
    let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "7d2a4c1e-93b0-4f7e-a1d2-5f0c9e3b6a10",
            "kind": {"group": "", "version": "v1", "kind": kind},
            "resource": {"group": "", "version": "v1", "resource": "objects"},
            "namespace": NAMESPACE,
            "operation": operation,
            "userInfo": {"username": username},
            "object": object,
            "oldObject": old_object,
            "dryRun": false
        }
    }))
    .expect("valid review");
    review.try_into().expect("review carries a request")
}

#[tokio::test]
async fn test_vm_converges_and_is_torn_down() {
    let h = Harness::new(None);
    h.store.insert_vm(new_vm("web-1"));

    h.reconcile("web-1").await.expect("first pass converges");

    let vm = h.vm("web-1");
    let status = vm.status.clone().expect("status written");
    assert_eq!(status.phase, Some(VmPhase::Created));
    assert_eq!(status.power_state, Some(PowerState::PoweredOn));
    assert_eq!(vm.labels().get(ZONE_LABEL).map(String::as_str), Some("zone-a"));
    assert_eq!(h.provider.calls().create, 1);

    // A second pass against an unchanged world is a no-op.
    let mutating = h.provider.calls().mutating();
    h.reconcile("web-1").await.expect("steady state");
    assert_eq!(h.provider.calls().mutating(), mutating);

    let mut vm = h.vm("web-1");
    vm.metadata.deletion_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
        k8s_openapi::jiff::Timestamp::now(),
    ));
    reconcile_virtualmachine(&h.ctx, vm).await.expect("teardown");

    assert_eq!(h.provider.power_ops(), vec![PowerOp::PowerOn, PowerOp::PowerOff]);
    assert!(h.provider.vm_by_name(NAMESPACE, "web-1").is_none());
    assert!(h.vm("web-1").finalizers().is_empty());
}

#[tokio::test]
async fn test_instance_storage_claims_gate_power_on_and_resist_deletion() {
    let h = Harness::new(Some(vec!["128Gi"]));
    h.provider.set_recommendations(vec![Recommendation {
        resource_pool: "rp-a".into(),
        host: Some("esx-3.local".into()),
        host_moid: Some("host-3".into()),
        datastores: vec!["ds-local-3".into()],
    }]);
    h.store.insert_vm(new_vm("db-1"));

    let err = h.reconcile("db-1").await.unwrap_err();
    assert_eq!(err, ConvergeError::StorageGate(StorageGateError::NotBound));
    assert_eq!(h.provider.calls().create, 0);

    let claims = h.store.claims();
    assert_eq!(claims.len(), 1);
    let claim = &claims[0];
    assert!(claim.labels().contains_key(INSTANCE_STORAGE_LABEL));

    // A tenant cannot delete the claim out from under the VM.
    let request = admission_request(
        "PersistentVolumeClaim",
        "DELETE",
        "alice@example.com",
        None,
        Some(serde_json::to_value(claim).unwrap()),
    );
    let response = admit(&h.webhooks, AdmissionKind::PersistentVolumeClaim, &request).await;
    assert!(!response.allowed);

    // The volume controller binds the claims, then reports them attached.
    let mut vm = h.vm("db-1");
    vm.annotations_mut()
        .insert(PVCS_BOUND_ANNOTATION.to_string(), String::new());
    h.store.update_vm(&vm).await.unwrap();

    assert!(h.reconcile("db-1").await.is_err());
    let status = h.vm("db-1").status.expect("status written");
    assert_eq!(status.phase, Some(VmPhase::Created));
    assert_eq!(status.power_state, Some(PowerState::PoweredOff));

    h.store.set_volume_status(
        NAMESPACE,
        "db-1",
        vec![VolumeStatus {
            name: "instance-storage-0".into(),
            attached: true,
            ..Default::default()
        }],
    );
    h.reconcile("db-1").await.expect("attached storage lets the VM start");
    assert_eq!(
        h.vm("db-1").status.unwrap().power_state,
        Some(PowerState::PoweredOn)
    );
}

#[tokio::test]
async fn test_vm_admission_rejects_class_change() {
    let h = Harness::new(None);
    let old = new_vm("web-2");
    let mut new = old.clone();
    new.spec.class_name = "guaranteed-xlarge".to_string();

    let request = admission_request(
        "VirtualMachine",
        "UPDATE",
        "alice@example.com",
        Some(serde_json::to_value(&new).unwrap()),
        Some(serde_json::to_value(&old).unwrap()),
    );
    let response = admit(&h.webhooks, AdmissionKind::VirtualMachine, &request).await;

    assert!(!response.allowed);
    assert!(response.result.message.contains("spec.className"));
}
