// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status_reasons` module

#[cfg(test)]
mod tests {
    use crate::status_reasons::*;

    #[test]
    fn test_ready_condition_type() {
        assert_eq!(CONDITION_TYPE_READY, "Ready");
    }

    #[test]
    fn test_reasons_are_camel_case() {
        for reason in [
            REASON_READY,
            REASON_PROGRESSING,
            REASON_DELETING,
            REASON_PLACED,
            REASON_PLACEMENT_FAILED,
            REASON_ZONE_UNAVAILABLE,
            REASON_INSTANCE_STORAGE_NOT_READY,
            REASON_INSTANCE_STORAGE_READY,
            REASON_VOLUME_NOT_ATTACHED,
            REASON_CONFIGURATION_INVALID,
            REASON_HYPERVISOR_ERROR,
            REASON_HYPERVISOR_TIMEOUT,
        ] {
            assert!(
                reason.chars().next().is_some_and(char::is_uppercase),
                "{reason} should start uppercase"
            );
            assert!(!reason.contains(' '), "{reason} should not contain spaces");
        }
    }
}
