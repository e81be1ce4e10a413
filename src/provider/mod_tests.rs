// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the provider abstraction and the in-memory mock

#[cfg(test)]
mod tests {
    use super::super::mock::MockVmProvider;
    use super::super::*;
    use crate::crd::{NetworkInterface, PowerState};
    use crate::vm_errors::{ErrorKind, ProviderError};
    use crate::vsphere::ConfigSpec;
    use std::time::Duration;

    fn create_request(name: &str) -> CreateVmRequest {
        CreateVmRequest {
            namespace: "ns".into(),
            name: name.into(),
            image_name: "ubuntu".into(),
            resource_pool: "rp-1".into(),
            folder: None,
            host: None,
            datastores: Vec::new(),
            storage_profile_id: "policy-1".into(),
            cluster_module_uuid: None,
            config_spec: ConfigSpec::default(),
        }
    }

    #[tokio::test]
    async fn test_with_timeout_maps_to_retriable_timeout() {
        let result: Result<(), ProviderError> = with_timeout(
            "create_vm",
            Duration::from_millis(10),
            std::future::pending(),
        )
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { .. }));
        assert_eq!(err.kind(), ErrorKind::Retriable);
    }

    #[tokio::test]
    async fn test_timeout_provider_passes_results_through() {
        let mock = MockVmProvider::new();
        let provider = TimeoutProvider::new(mock.clone(), Duration::from_secs(5));

        let vm = provider.create_vm(&create_request("a")).await.unwrap();
        let found = provider
            .lookup_vm(&VmLookup {
                namespace: "ns".into(),
                name: "a".into(),
                unique_id: None,
            })
            .await
            .unwrap();
        assert_eq!(found.map(|v| v.moid), Some(vm.moid));
        assert_eq!(mock.calls().create, 1);
    }

    #[tokio::test]
    async fn test_mock_refuses_to_delete_running_vm() {
        let mock = MockVmProvider::new();
        let vm = mock.create_vm(&create_request("a")).await.unwrap();
        mock.power_op(&vm.moid, PowerOp::PowerOn).await.unwrap();

        assert!(mock.delete_vm(&vm.moid).await.is_err());

        mock.power_op(&vm.moid, PowerOp::PowerOff).await.unwrap();
        mock.delete_vm(&vm.moid).await.unwrap();
        assert!(mock.delete_vm(&vm.moid).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_mock_resolves_known_networks_only() {
        let mock = MockVmProvider::new();
        mock.add_network("primary", "dvpg-10");

        let iface = NetworkInterface {
            name: "eth0".into(),
            network_name: "primary".into(),
            network_type: None,
        };
        let resolved = mock.resolve_network("ns", &iface).await.unwrap();
        assert_eq!(resolved.backing.network, "dvpg-10");

        let unknown = NetworkInterface {
            network_name: "nope".into(),
            ..iface
        };
        assert!(mock.resolve_network("ns", &unknown).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_fail_next_is_one_shot() {
        let mock = MockVmProvider::new();
        mock.fail_next("create_vm", ProviderError::Fault {
            operation: "create_vm".into(),
            message: "boom".into(),
        });
        assert!(mock.create_vm(&create_request("a")).await.is_err());
        assert!(mock.create_vm(&create_request("a")).await.is_ok());
    }

    #[test]
    fn test_power_op_resulting_state() {
        assert_eq!(PowerOp::PowerOn.resulting_state(), PowerState::PoweredOn);
        assert_eq!(PowerOp::PowerOff.resulting_state(), PowerState::PoweredOff);
        assert_eq!(PowerOp::Suspend.resulting_state(), PowerState::Suspended);
    }
}
