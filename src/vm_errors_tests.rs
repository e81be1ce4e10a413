// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for VM convergence error types.

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_storage_gate_messages() {
        assert_eq!(
            StorageGateError::NotBound.to_string(),
            "instance storage PVCs are not bound yet"
        );
        assert_eq!(
            StorageGateError::StatusPending {
                name: "instance-pvc-1".into()
            }
            .to_string(),
            "status update pending for persistent volume: instance-pvc-1 on VM"
        );
        assert_eq!(
            StorageGateError::NotAttached {
                name: "data".into()
            }
            .to_string(),
            "persistent volume: data not attached to VM"
        );
    }

    #[test]
    fn test_missing_storage_class_is_terminal() {
        let err = ConvergeError::MissingStorageClass;
        assert_eq!(err.to_string(), "storage class is required but not specified");
        assert_eq!(err.kind(), ErrorKind::Terminal);
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_cluster_module_not_found_message() {
        let err = ConvergeError::ClusterModuleNotFound("bogusClusterMod".into());
        assert_eq!(err.to_string(), "ClusterModule bogusClusterMod not found");
        assert_eq!(err.kind(), ErrorKind::Terminal);
    }

    #[test]
    fn test_gate_errors_are_retriable() {
        let err: ConvergeError = StorageGateError::NotBound.into();
        assert!(err.is_retriable());
        // transparent wrapper keeps the gate message intact
        assert_eq!(err.to_string(), "instance storage PVCs are not bound yet");
    }

    #[test]
    fn test_provider_error_kinds() {
        let timeout = ProviderError::Timeout {
            operation: "create_vm".into(),
            seconds: 60,
        };
        assert_eq!(timeout.kind(), ErrorKind::Retriable);
        assert!(ConvergeError::from(timeout).is_retriable());

        let invalid = ProviderError::InvalidRequest {
            operation: "reconfigure".into(),
            message: "bad device".into(),
        };
        assert_eq!(invalid.kind(), ErrorKind::Terminal);
        assert!(ProviderError::NotFound("vm-1".into()).is_not_found());
    }

    #[test]
    fn test_placement_error_kinds() {
        assert!(ConvergeError::from(PlacementError::PlacementFailed {
            reason: "no eligible zone".into()
        })
        .is_retriable());
        assert_eq!(
            PlacementError::ZoneUnavailable {
                zone: "zone-a".into()
            }
            .kind(),
            ErrorKind::Terminal
        );
    }

    #[test]
    fn test_store_conflict_from_kube_error() {
        let err = kube::Error::Api(Box::new(kube::error::ErrorResponse {
            status: Some(kube::core::response::StatusSummary::Failure),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
            metadata: None,
            details: None,
        }));
        assert!(matches!(StoreError::from(err), StoreError::Conflict { .. }));
    }

    #[test]
    fn test_admission_error_kinds() {
        let decode = AdmissionError::Decode {
            kind: "PersistentVolumeClaim".into(),
            reason: "missing field `metadata`".into(),
        };
        assert_eq!(decode.kind(), ErrorKind::Terminal);
        assert!(decode.to_string().starts_with("failed to decode PersistentVolumeClaim"));

        let store = AdmissionError::from(StoreError::Api("connection reset".into()));
        assert_eq!(store.kind(), ErrorKind::Retriable);
    }
}
