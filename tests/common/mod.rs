// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

// Common test utilities for integration tests

use kube::{
    api::{Api, DeleteParams, PostParams},
    client::Client,
};
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;
use vmconverge::crd::{PowerState, VirtualMachine, VirtualMachineSpec, Zone, ZoneSpec};

/// Get a Kubernetes client or skip the test if not in a cluster
pub async fn get_kube_client_or_skip() -> Option<Client> {
    match Client::try_default().await {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("Skipping integration test: not running in Kubernetes cluster: {e}");
            None
        }
    }
}

/// Create a test namespace
pub async fn create_test_namespace(
    client: &Client,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let namespaces: Api<k8s_openapi::api::core::v1::Namespace> = Api::all(client.clone());

    let ns = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": name,
            "labels": {
                "test": "integration",
                "managed-by": "vmconverge-test"
            }
        }
    }))?;

    match namespaces.create(&PostParams::default(), &ns).await {
        Ok(_) => {
            println!("Created test namespace: {name}");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            println!("Test namespace already exists: {name}");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// Cleanup test namespace
pub async fn cleanup_test_namespace(
    client: &Client,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let namespaces: Api<k8s_openapi::api::core::v1::Namespace> = Api::all(client.clone());

    match namespaces.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            println!("Deleted test namespace: {name}");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            println!("Test namespace already deleted: {name}");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// Create a Zone backed by the given resource pools
pub async fn create_zone(
    client: &Client,
    namespace: &str,
    name: &str,
    resource_pools: &[&str],
) -> Result<Zone, Box<dyn std::error::Error>> {
    let zones: Api<Zone> = Api::namespaced(client.clone(), namespace);

    let zone = Zone::new(
        name,
        ZoneSpec {
            resource_pools: resource_pools.iter().map(|p| (*p).to_string()).collect(),
            folder: None,
        },
    );

    let created = zones.create(&PostParams::default(), &zone).await?;

    println!("Created Zone: {namespace}/{name}");
    Ok(created)
}

/// Create a VirtualMachine requesting the given power state
pub async fn create_virtual_machine(
    client: &Client,
    namespace: &str,
    name: &str,
    power_state: PowerState,
) -> Result<VirtualMachine, Box<dyn std::error::Error>> {
    let vms: Api<VirtualMachine> = Api::namespaced(client.clone(), namespace);

    let vm = VirtualMachine::new(
        name,
        VirtualMachineSpec {
            class_name: "best-effort-small".to_string(),
            image_name: "ubuntu-22.04".to_string(),
            storage_class: "wcp-storage".to_string(),
            power_state,
            ..Default::default()
        },
    );

    let created = vms.create(&PostParams::default(), &vm).await?;

    println!("Created VirtualMachine: {namespace}/{name}");
    Ok(created)
}

/// Wait for a resource to be ready
pub async fn wait_for_ready(duration: Duration) {
    println!("Waiting {} seconds for resources to be ready...", duration.as_secs());
    sleep(duration).await;
}
