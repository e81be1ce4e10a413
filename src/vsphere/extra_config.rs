// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Extra config synthesis for the create ConfigSpec.

use std::collections::BTreeMap;

use crate::constants::{
    EXTRA_CONFIG_ENABLE_UUID, EXTRA_CONFIG_IGNORE_TOOLS_CHECK, EXTRA_CONFIG_TRUE, GUESTINFO_PREFIX,
};
use crate::crd::{MetadataTransport, VmMetadata};
use crate::vsphere::types::OptionValue;

/// Merge the extra config layers for a VM. Later layers win:
///
/// 1. extra config already present in the class raw ConfigSpec
/// 2. operator defaults (`disk.enableUUID`, `vmware.tools.gosc.ignoretoolscheck`)
/// 3. `guestinfo.*` keys from the VM metadata ConfigMap when transport is `ExtraConfig`
/// 4. the operator-wide JSON extra config
#[must_use]
pub fn build_extra_config(
    class_extra_config: &[OptionValue],
    metadata: Option<&VmMetadata>,
    metadata_data: &BTreeMap<String, String>,
    global_extra_config: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = class_extra_config
        .iter()
        .map(|ov| (ov.key.clone(), ov.value.clone()))
        .collect();

    merged.insert(
        EXTRA_CONFIG_ENABLE_UUID.to_string(),
        EXTRA_CONFIG_TRUE.to_string(),
    );
    merged.insert(
        EXTRA_CONFIG_IGNORE_TOOLS_CHECK.to_string(),
        EXTRA_CONFIG_TRUE.to_string(),
    );

    if metadata.is_some_and(|m| m.transport == MetadataTransport::ExtraConfig) {
        merged.extend(
            metadata_data
                .iter()
                .filter(|(k, _)| k.starts_with(GUESTINFO_PREFIX))
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }

    merged.extend(
        global_extra_config
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );

    merged
}

/// Entries of `desired` that are missing from or differ in `observed`.
#[must_use]
pub fn extra_config_delta(
    observed: &[OptionValue],
    desired: &BTreeMap<String, String>,
) -> Vec<OptionValue> {
    let observed: BTreeMap<&str, &str> = observed
        .iter()
        .map(|ov| (ov.key.as_str(), ov.value.as_str()))
        .collect();

    desired
        .iter()
        .filter(|(k, v)| observed.get(k.as_str()) != Some(&v.as_str()))
        .map(|(k, v)| OptionValue::new(k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
#[path = "extra_config_tests.rs"]
mod extra_config_tests;
