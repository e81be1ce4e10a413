// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{PowerState, VirtualMachineStatus, VmPhase, VolumeStatus};
    use crate::provider::ObservedVm;
    use crate::reconcilers::status::{
        conditions_equal, create_condition, find_condition, upsert_condition,
        VirtualMachineStatusUpdater,
    };
    use crate::store::memory::InMemoryClusterStore;
    use crate::test_support::{test_vm, NAMESPACE};

    const CONDITION_TYPE_READY: &str = "Ready";
    const STATUS_TRUE: &str = "True";
    const STATUS_FALSE: &str = "False";

    fn observed() -> ObservedVm {
        ObservedVm {
            moid: "vm-7".into(),
            name: "vm1".into(),
            power_state: PowerState::PoweredOn,
            host: "esx-1".into(),
            resource_pool: "rp-a".into(),
            instance_uuid: "iuuid".into(),
            bios_uuid: "buuid".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_condition_basic() {
        let condition = create_condition(CONDITION_TYPE_READY, STATUS_TRUE, "Ready", "ok");

        assert_eq!(condition.r#type, CONDITION_TYPE_READY);
        assert_eq!(condition.status, STATUS_TRUE);
        assert_eq!(condition.reason.as_deref(), Some("Ready"));
        assert_eq!(condition.message.as_deref(), Some("ok"));
        assert!(condition.last_transition_time.is_some());
    }

    #[test]
    fn test_update_condition_preserves_transition_time_when_status_same() {
        let mut conditions = vec![create_condition("Ready", STATUS_FALSE, "Progressing", "a")];
        conditions[0].last_transition_time = Some("2024-01-01T00:00:00Z".into());

        upsert_condition(&mut conditions, "Ready", STATUS_FALSE, "Progressing", "b");
        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        assert_eq!(conditions[0].message.as_deref(), Some("b"));

        upsert_condition(&mut conditions, "Ready", STATUS_TRUE, "Ready", "c");
        assert_ne!(
            conditions[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_update_condition_adds_new_type() {
        let mut conditions = Vec::new();
        upsert_condition(&mut conditions, "Ready", STATUS_TRUE, "Ready", "ok");
        upsert_condition(&mut conditions, "VirtualMachinePlaced", STATUS_TRUE, "Placed", "ok");
        assert_eq!(conditions.len(), 2);
        assert!(find_condition(&conditions, "VirtualMachinePlaced").is_some());
        assert!(find_condition(&conditions, "Missing").is_none());
    }

    #[test]
    fn test_conditions_equal_ignores_time_and_order() {
        let mut a = vec![
            create_condition("Ready", STATUS_TRUE, "Ready", "ok"),
            create_condition("VirtualMachinePlaced", STATUS_TRUE, "Placed", "ok"),
        ];
        let b = vec![a[1].clone(), a[0].clone()];
        a[0].last_transition_time = Some("2020-01-01T00:00:00Z".into());
        assert!(conditions_equal(&a, &b));

        a[0].message = Some("changed".into());
        assert!(!conditions_equal(&a, &b));
    }

    #[test]
    fn test_updater_records_observed_vm() {
        let vm = test_vm("vm1");
        let mut updater = VirtualMachineStatusUpdater::new(&vm);
        updater.set_observed(&observed());

        let status = updater.status();
        assert_eq!(status.phase, Some(VmPhase::Created));
        assert_eq!(status.unique_id.as_deref(), Some("vm-7"));
        assert_eq!(status.host.as_deref(), Some("esx-1"));
        assert_eq!(status.power_state, Some(PowerState::PoweredOn));
        assert!(updater.has_changes());
    }

    #[test]
    fn test_pending_does_not_downgrade_created() {
        let mut vm = test_vm("vm1");
        vm.status = Some(VirtualMachineStatus {
            phase: Some(VmPhase::Created),
            ..Default::default()
        });
        let mut updater = VirtualMachineStatusUpdater::new(&vm);
        updater.set_pending_unless_created();
        assert_eq!(updater.status().phase, Some(VmPhase::Created));
        assert!(!updater.has_changes());
    }

    #[test]
    fn test_clear_observed_drops_identity() {
        let mut vm = test_vm("vm1");
        let mut updater = VirtualMachineStatusUpdater::new(&vm);
        updater.set_observed(&observed());
        vm.status = Some(updater.status().clone());

        let mut updater = VirtualMachineStatusUpdater::new(&vm);
        updater.clear_observed();
        assert_eq!(updater.status().phase, Some(VmPhase::Pending));
        assert!(updater.status().unique_id.is_none());
    }

    #[tokio::test]
    async fn test_apply_skips_unchanged_status() {
        let store = InMemoryClusterStore::new();
        store.insert_vm(test_vm("vm1"));

        let mut updater = VirtualMachineStatusUpdater::new(&store.vm(NAMESPACE, "vm1").unwrap());
        updater.set_phase(VmPhase::Pending);
        updater.apply(&store).await.unwrap();
        assert_eq!(store.status_writes(), 1);

        let updater = VirtualMachineStatusUpdater::new(&store.vm(NAMESPACE, "vm1").unwrap());
        updater.apply(&store).await.unwrap();
        assert_eq!(store.status_writes(), 1);
    }

    #[tokio::test]
    async fn test_apply_keeps_volume_controller_entries() {
        let store = InMemoryClusterStore::new();
        store.insert_vm(test_vm("vm1"));
        let stale = store.vm(NAMESPACE, "vm1").unwrap();
        store.set_volume_status(
            NAMESPACE,
            "vm1",
            vec![VolumeStatus {
                name: "data".into(),
                attached: true,
                ..Default::default()
            }],
        );

        // Built from a copy read before the volume controller wrote.
        let mut updater = VirtualMachineStatusUpdater::new(&stale);
        updater.set_observed(&observed());
        updater.apply(&store).await.unwrap();

        let status = store.vm(NAMESPACE, "vm1").unwrap().status.unwrap();
        assert_eq!(status.unique_id.as_deref(), Some("vm-7"));
        assert_eq!(status.volumes.len(), 1);
    }
}
