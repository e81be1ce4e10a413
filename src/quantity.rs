// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes quantity parsing for memory and disk sizes.
//!
//! Supports integer quantities with binary (`Ki`, `Mi`, `Gi`, `Ti`, `Pi`, `Ei`) and
//! decimal (`k`, `M`, `G`, `T`, `P`, `E`) suffixes, or a bare byte count.

use anyhow::{bail, Context, Result};

use crate::constants::{BYTES_PER_GIB, BYTES_PER_MIB};

/// Parse a Kubernetes quantity string into bytes.
///
/// # Examples
///
/// ```
/// use vmconverge::quantity::parse_quantity;
///
/// assert_eq!(parse_quantity("256Gi").unwrap(), 256 * (1 << 30));
/// assert_eq!(parse_quantity("1G").unwrap(), 1_000_000_000);
/// assert_eq!(parse_quantity("4096").unwrap(), 4096);
/// assert!(parse_quantity("").is_err());
/// assert!(parse_quantity("10Xi").is_err());
/// ```
///
/// # Errors
///
/// Returns an error if the value is empty, not a non-negative integer, uses an
/// unknown suffix, or overflows `i64`.
pub fn parse_quantity(quantity: &str) -> Result<i64> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        bail!("Quantity cannot be empty");
    }

    let split_pos = quantity
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(quantity.len());
    let (value_str, suffix) = quantity.split_at(split_pos);

    if value_str.is_empty() {
        bail!("Quantity '{quantity}' must start with a number");
    }

    let value: i64 = value_str
        .parse()
        .with_context(|| format!("Quantity '{quantity}' has an invalid number"))?;

    let multiplier: i64 = match suffix {
        "" => 1,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        "Ei" => 1 << 60,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "E" => 1_000_000_000_000_000_000,
        _ => bail!("Unsupported quantity suffix '{suffix}' in '{quantity}'"),
    };

    value
        .checked_mul(multiplier)
        .with_context(|| format!("Quantity '{quantity}' is too large"))
}

/// Memory in MiB as the hypervisor expects it.
#[must_use]
pub fn bytes_to_mib(bytes: i64) -> i64 {
    bytes / BYTES_PER_MIB
}

/// Whole GiB, rounded down.
#[must_use]
pub fn bytes_to_gib(bytes: i64) -> i64 {
    bytes / BYTES_PER_GIB
}

#[cfg(test)]
#[path = "quantity_tests.rs"]
mod quantity_tests;
