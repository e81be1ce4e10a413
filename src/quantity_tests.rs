// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for quantity parsing

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_parse_binary_suffixes() {
        assert_eq!(parse_quantity("1Ki").unwrap(), 1024);
        assert_eq!(parse_quantity("512Mi").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_quantity("256Gi").unwrap(), 256 * (1_i64 << 30));
        assert_eq!(parse_quantity("4242Gi").unwrap(), 4242 * (1_i64 << 30));
        assert_eq!(parse_quantity("2Ti").unwrap(), 2 * (1_i64 << 40));
    }

    #[test]
    fn test_parse_decimal_suffixes() {
        assert_eq!(parse_quantity("1k").unwrap(), 1_000);
        assert_eq!(parse_quantity("3M").unwrap(), 3_000_000);
        assert_eq!(parse_quantity("1G").unwrap(), 1_000_000_000);
    }

    #[test]
    fn test_parse_plain_bytes() {
        assert_eq!(parse_quantity("4096").unwrap(), 4096);
        assert_eq!(parse_quantity(" 10 ").unwrap(), 10);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_quantity("").is_err());
        assert!(parse_quantity("Gi").is_err());
        assert!(parse_quantity("-1Gi").is_err());
        assert!(parse_quantity("1.5Gi").is_err());
        assert!(parse_quantity("10Xi").is_err());
    }

    #[test]
    fn test_parse_overflow() {
        let err = parse_quantity("100000Ei").unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(bytes_to_mib(parse_quantity("2Gi").unwrap()), 2048);
        assert_eq!(bytes_to_gib(parse_quantity("512Gi").unwrap()), 512);
        assert_eq!(bytes_to_gib(parse_quantity("1023Mi").unwrap()), 0);
    }
}
