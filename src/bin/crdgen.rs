// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Writes the CRD manifests in `deploy/crds/` from the types in `src/crd.rs`.
//!
//! Usage:
//!   cargo run --bin crdgen

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;
use std::fs;
use std::path::Path;
use vmconverge::crd::{VirtualMachine, VirtualMachineClass, VirtualMachineSetResourcePolicy, Zone};

const OUTPUT_DIR: &str = "deploy/crds";

const HEADER: &str = "# Copyright (c) 2025 Erick Bourgeois, firestoned
# SPDX-License-Identifier: MIT
#
# Generated by `cargo run --bin crdgen` from src/crd.rs. Do not edit.
";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let output_dir = Path::new(OUTPUT_DIR);
    fs::create_dir_all(output_dir)?;

    let crds: [CustomResourceDefinition; 4] = [
        VirtualMachine::crd(),
        VirtualMachineClass::crd(),
        Zone::crd(),
        VirtualMachineSetResourcePolicy::crd(),
    ];

    for crd in &crds {
        let file = output_dir.join(format!("{}.crd.yaml", crd.spec.names.plural));
        fs::write(&file, format!("{HEADER}{}", serde_yaml::to_string(crd)?))?;
        println!("wrote {}", file.display());
    }

    println!("Apply with: kubectl apply -f {OUTPUT_DIR}/");
    Ok(())
}
