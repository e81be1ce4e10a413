// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Hypervisor configuration documents and their synthesis.
//!
//! - [`types`] - ConfigSpec, device changes and devices
//! - [`config_spec`] - class → ConfigSpec synthesis, device-key allocation, NIC rewriting
//! - [`extra_config`] - extra config layering and diffing

pub mod config_spec;
pub mod extra_config;
pub mod types;

pub use config_spec::{
    apply_networks, decode_class_config_spec, set_extra_config, synthesize, DeviceKeyAllocator,
    ResolvedNetwork, SynthesisInput,
};
pub use types::{
    ConfigSpec, DeviceConfigSpec, DeviceOperation, FileOperation, NetworkBacking, OptionValue,
    ProfileSpec, VirtualDevice, VirtualDisk, VirtualEthernetCard,
};
