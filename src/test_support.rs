// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Fixtures shared by reconciler and webhook tests.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::{Context, Settings};
use crate::crd::{
    ClusterModuleSpec, ClusterModuleStatus, InstanceStorage, InstanceStorageVolume,
    NetworkInterface, PowerState, ResourcePolicyStatus, VirtualMachine, VirtualMachineClass,
    VirtualMachineClassSpec, VirtualMachineSetResourcePolicy, VirtualMachineSetResourcePolicySpec,
    VirtualMachineSpec, Zone, ZoneSpec,
};
use crate::provider::mock::MockVmProvider;
use crate::store::memory::InMemoryClusterStore;

pub const NAMESPACE: &str = "test-ns";
pub const CLASS: &str = "best-effort-small";
pub const STORAGE_CLASS: &str = "wcp-storage";
pub const POLICY_ID: &str = "policy-wcp";
pub const INSTANCE_STORAGE_CLASS: &str = "instance-storage";
pub const INSTANCE_POLICY_ID: &str = "policy-instance";

/// A store and hypervisor wired into a context, with handles kept for assertions.
pub struct Fixture {
    pub store: InMemoryClusterStore,
    pub provider: MockVmProvider,
    pub ctx: Arc<Context>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let store = InMemoryClusterStore::new();
        let provider = MockVmProvider::new();
        let ctx = Arc::new(Context::new(
            Arc::new(store.clone()),
            Arc::new(provider.clone()),
            settings,
        ));
        store.set_storage_policy(STORAGE_CLASS, POLICY_ID);
        store.set_storage_policy(INSTANCE_STORAGE_CLASS, INSTANCE_POLICY_ID);
        store.insert_class(vm_class(CLASS, None));
        provider.add_network("primary", "dvpg-primary");
        Self {
            store,
            provider,
            ctx,
        }
    }

    /// Latest stored copy of a VM in the test namespace.
    pub fn vm(&self, name: &str) -> VirtualMachine {
        self.store
            .vm(NAMESPACE, name)
            .unwrap_or_else(|| panic!("VM {name} not in store"))
    }
}

pub fn test_vm(name: &str) -> VirtualMachine {
    let mut vm = VirtualMachine::new(
        name,
        VirtualMachineSpec {
            class_name: CLASS.to_string(),
            image_name: "ubuntu-22.04".to_string(),
            storage_class: STORAGE_CLASS.to_string(),
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

pub fn vm_class(name: &str, instance_storage: Option<Vec<&str>>) -> VirtualMachineClass {
    VirtualMachineClass::new(
        name,
        VirtualMachineClassSpec {
            cpus: 2,
            memory: "4Gi".to_string(),
            config_spec: None,
            instance_storage: instance_storage.map(|sizes| InstanceStorage {
                storage_class: INSTANCE_STORAGE_CLASS.to_string(),
                volumes: sizes
                    .into_iter()
                    .map(|size| InstanceStorageVolume {
                        size: size.to_string(),
                    })
                    .collect(),
            }),
        },
    )
}

pub fn zone(name: &str, pools: &[&str]) -> Zone {
    let mut zone = Zone::new(
        name,
        ZoneSpec {
            resource_pools: pools.iter().map(|p| (*p).to_string()).collect(),
            folder: Some(format!("folder-{name}")),
        },
    );
    zone.metadata.namespace = Some(NAMESPACE.to_string());
    zone
}

pub fn deleting_zone(name: &str, pools: &[&str]) -> Zone {
    let mut zone = zone(name, pools);
    zone.metadata.deletion_timestamp = Some(Time(k8s_openapi::jiff::Timestamp::now()));
    zone.metadata.finalizers = Some(vec!["zone.vmconverge.io/finalizer".to_string()]);
    zone
}

pub fn resource_policy(name: &str, group: &str, module_uuid: Option<&str>) -> VirtualMachineSetResourcePolicy {
    let mut policy = VirtualMachineSetResourcePolicy::new(
        name,
        VirtualMachineSetResourcePolicySpec {
            cluster_modules: vec![ClusterModuleSpec {
                group_name: group.to_string(),
            }],
        },
    );
    policy.metadata.namespace = Some(NAMESPACE.to_string());
    policy.status = module_uuid.map(|uuid| ResourcePolicyStatus {
        cluster_modules: vec![ClusterModuleStatus {
            group_name: group.to_string(),
            module_uuid: uuid.to_string(),
        }],
    });
    policy
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}
