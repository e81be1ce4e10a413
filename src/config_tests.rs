// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `config.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    fn parse(args: &[&str]) -> OperatorConfig {
        let mut argv = vec!["vmconverge", "--hypervisor-url", "https://gateway.example.com"];
        argv.extend_from_slice(args);
        OperatorConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.rpc_timeout(), Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS));
        assert_eq!(config.webhook_addr, DEFAULT_WEBHOOK_ADDR);
        assert_eq!(config.concurrency, DEFAULT_RECONCILE_CONCURRENCY);
        assert_eq!(config.feature_gates(), FeatureGates::default());
        assert!(config.strict_admission);
        assert!(config.privileged_identities.is_empty());
        assert!(config.global_extra_config().unwrap().is_empty());
    }

    #[test]
    fn test_hypervisor_url_is_required() {
        assert!(OperatorConfig::try_parse_from(["vmconverge"]).is_err());
    }

    #[test]
    fn test_feature_gates_can_be_disabled() {
        let config = parse(&["--fault-domains", "false", "--instance-storage", "false"]);
        let gates = config.feature_gates();
        assert!(!gates.fault_domains);
        assert!(!gates.instance_storage);
        assert!(gates.workload_domain_isolation);
    }

    #[test]
    fn test_privileged_identities_are_comma_separated() {
        let config = parse(&["--privileged-identity", "ops@example.com,system:serviceaccount:infra:janitor"]);
        assert_eq!(
            config.privileged_identities,
            vec!["ops@example.com", "system:serviceaccount:infra:janitor"]
        );
    }

    #[test]
    fn test_global_extra_config_is_parsed_into_settings() {
        let config = parse(&["--global-extra-config", r#"{"guestinfo.dns":"10.0.0.2"}"#]);
        let settings = config.settings().unwrap();
        assert_eq!(
            settings.global_extra_config.get("guestinfo.dns").map(String::as_str),
            Some("10.0.0.2")
        );
    }

    #[test]
    fn test_malformed_global_extra_config_is_an_error() {
        let config = parse(&["--global-extra-config", "[1, 2]"]);
        assert!(config.settings().is_err());
    }
}
