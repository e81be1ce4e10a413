// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the `PersistentVolumeClaim` admission rules.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::store::memory::InMemoryClusterStore;
    use crate::test_support::{deleting_zone, labels, zone, NAMESPACE};
    use crate::webhooks::PrivilegedIdentities;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::core::admission::Operation;

    const USER: &str = "alice@example.com";
    const PV_BINDER: &str = "system:serviceaccount:kube-system:persistent-volume-binder";

    fn claim(label_pairs: &[(&str, &str)], annotation_pairs: &[(&str, &str)]) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("claim-1".to_string()),
                namespace: Some(NAMESPACE.to_string()),
                labels: Some(labels(label_pairs)),
                annotations: Some(labels(annotation_pairs)),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn marked() -> PersistentVolumeClaim {
        claim(&[(INSTANCE_STORAGE_LABEL, "true")], &[])
    }

    fn plain() -> PersistentVolumeClaim {
        claim(&[], &[])
    }

    fn request(
        operation: Operation,
        username: &str,
        object: Option<PersistentVolumeClaim>,
        old_object: Option<PersistentVolumeClaim>,
    ) -> ValidationRequest<PersistentVolumeClaim> {
        ValidationRequest {
            operation,
            namespace: NAMESPACE.to_string(),
            name: "claim-1".to_string(),
            username: username.to_string(),
            privileged: PrivilegedIdentities::default().contains(username),
            object,
            old_object,
        }
    }

    fn validator(store: &InMemoryClusterStore) -> PersistentVolumeClaimValidator {
        PersistentVolumeClaimValidator::new(Arc::new(store.clone()), true)
    }

    fn topology(zone_name: &str) -> String {
        format!(r#"[{{"{ZONE_LABEL}":"{zone_name}"}}]"#)
    }

    #[tokio::test]
    async fn test_create_with_marker_is_forbidden() {
        let store = InMemoryClusterStore::new();
        let errors = validator(&store)
            .validate_create(&request(Operation::Create, USER, Some(marked()), None))
            .await
            .unwrap();

        assert_eq!(
            errors.reasons(),
            vec![format!(
                "metadata.labels[{INSTANCE_STORAGE_LABEL}]: Forbidden: CREATE operation on PVC with instance storage label is not allowed"
            )]
        );
    }

    #[tokio::test]
    async fn test_create_without_marker_is_allowed() {
        let store = InMemoryClusterStore::new();
        let errors = validator(&store)
            .validate_create(&request(Operation::Create, USER, Some(plain()), None))
            .await
            .unwrap();
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_privileged_callers_bypass_marker_rules() {
        let store = InMemoryClusterStore::new();
        let validator = validator(&store);

        for user in ["kubernetes-admin", PV_BINDER] {
            let create = request(Operation::Create, user, Some(marked()), None);
            assert!(validator.validate_create(&create).await.unwrap().is_empty());

            let update = request(Operation::Update, user, Some(plain()), Some(marked()));
            assert!(validator.validate_update(&update).await.unwrap().is_empty());

            let delete = request(Operation::Delete, user, None, Some(marked()));
            assert!(validator.validate_delete(&delete).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_update_of_marked_claim_is_forbidden_even_when_removing_marker() {
        let store = InMemoryClusterStore::new();
        let errors = validator(&store)
            .validate_update(&request(Operation::Update, USER, Some(plain()), Some(marked())))
            .await
            .unwrap();

        assert_eq!(errors.len(), 1);
        assert!(errors
            .to_string()
            .contains("UPDATE operation on PVC with instance storage label is not allowed"));
    }

    #[tokio::test]
    async fn test_adding_marker_is_forbidden() {
        let store = InMemoryClusterStore::new();
        let errors = validator(&store)
            .validate_update(&request(Operation::Update, USER, Some(marked()), Some(plain())))
            .await
            .unwrap();

        assert_eq!(
            errors.reasons(),
            vec![format!(
                "metadata.labels[{INSTANCE_STORAGE_LABEL}]: Forbidden: {ADDING_INSTANCE_STORAGE_LABEL_NOT_ALLOWED}"
            )]
        );
    }

    #[tokio::test]
    async fn test_update_of_plain_claim_is_allowed() {
        let store = InMemoryClusterStore::new();
        let updated = claim(&[("app", "db")], &[]);
        let errors = validator(&store)
            .validate_update(&request(Operation::Update, USER, Some(updated), Some(plain())))
            .await
            .unwrap();
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_delete_of_marked_claim_is_forbidden() {
        let store = InMemoryClusterStore::new();
        let errors = validator(&store)
            .validate_delete(&request(Operation::Delete, USER, None, Some(marked())))
            .await
            .unwrap();

        assert!(errors
            .to_string()
            .contains("DELETE operation on PVC with instance storage label is not allowed"));

        let errors = validator(&store)
            .validate_delete(&request(Operation::Delete, USER, None, Some(plain())))
            .await
            .unwrap();
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_requested_zone_being_deleted_is_rejected() {
        let store = InMemoryClusterStore::new();
        store.insert_zone(deleting_zone("zone-a", &["pool-a"]));
        let pvc = claim(&[], &[(REQUESTED_TOPOLOGY_ANNOTATION, &topology("zone-a"))]);

        let errors = validator(&store)
            .validate_create(&request(Operation::Create, USER, Some(pvc), None))
            .await
            .unwrap();

        assert_eq!(
            errors.reasons(),
            vec![format!(
                "metadata.annotations[{REQUESTED_TOPOLOGY_ANNOTATION}]: Invalid value: {ZONE_BEING_DELETED}"
            )]
        );
    }

    #[tokio::test]
    async fn test_requested_zone_that_is_healthy_is_allowed() {
        let store = InMemoryClusterStore::new();
        store.insert_zone(zone("zone-a", &["pool-a"]));
        let pvc = claim(&[], &[(REQUESTED_TOPOLOGY_ANNOTATION, &topology("zone-a"))]);

        let errors = validator(&store)
            .validate_create(&request(Operation::Create, USER, Some(pvc), None))
            .await
            .unwrap();
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_requested_zone_that_does_not_exist_is_rejected() {
        let store = InMemoryClusterStore::new();
        let pvc = claim(&[], &[(REQUESTED_TOPOLOGY_ANNOTATION, &topology("zone-x"))]);

        let errors = validator(&store)
            .validate_create(&request(Operation::Create, USER, Some(pvc), None))
            .await
            .unwrap();
        assert!(errors.to_string().contains("zone 'zone-x' not found"));
    }

    #[tokio::test]
    async fn test_malformed_requested_topology_is_invalid() {
        let store = InMemoryClusterStore::new();
        let pvc = claim(&[], &[(REQUESTED_TOPOLOGY_ANNOTATION, "{not json")]);

        let errors = validator(&store)
            .validate_create(&request(Operation::Create, USER, Some(pvc), None))
            .await
            .unwrap();

        let reasons = errors.reasons();
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].starts_with(&format!(
            "metadata.annotations[{REQUESTED_TOPOLOGY_ANNOTATION}]: Invalid value: failed to parse annotation"
        )));
    }

    #[tokio::test]
    async fn test_requested_zones_unchecked_when_gate_disabled() {
        let store = InMemoryClusterStore::new();
        store.insert_zone(deleting_zone("zone-a", &["pool-a"]));
        let pvc = claim(&[], &[(REQUESTED_TOPOLOGY_ANNOTATION, &topology("zone-a"))]);

        let validator = PersistentVolumeClaimValidator::new(Arc::new(store.clone()), false);
        let errors = validator
            .validate_create(&request(Operation::Create, USER, Some(pvc), None))
            .await
            .unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn test_requested_topologies_parsing() {
        assert!(requested_topologies(&plain()).unwrap().is_empty());

        let pvc = claim(
            &[],
            &[(
                REQUESTED_TOPOLOGY_ANNOTATION,
                r#"[{"topology.kubernetes.io/zone":"zone-a"},{"topology.kubernetes.io/zone":"zone-b"}]"#,
            )],
        );
        let topologies = requested_topologies(&pvc).unwrap();
        assert_eq!(topologies.len(), 2);
        assert_eq!(topologies[1].get(ZONE_LABEL).map(String::as_str), Some("zone-b"));
    }
}
