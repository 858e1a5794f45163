pub mod models;
pub mod validation;

pub use models::*;
pub use validation::*;

#[cfg(test)]
mod tests {
    use super::*;
    use figment::{
        Figment,
        providers::{Format, Serialized, Toml},
    };
    use garde::Validate;
    use std::io::Write;

    fn base_figment() -> Figment {
        Figment::new().merge(Serialized::defaults(ObservabilityConfig::default()))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ObservabilityConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.enabled);
        assert_eq!(config.sample_rate, 1.0);
        assert_eq!(config.metrics_prefix, "");
        assert_eq!(config.log_format, "json");
        assert_eq!(config.histogram_buckets.first(), Some(&0.005));
        assert_eq!(config.histogram_buckets.last(), Some(&10.0));
    }

    #[test]
    fn test_valid_config_loads() {
        let config_toml = r#"
            sample_rate = 0.25
            service_name = "orders-api"
            exclude_paths = ["/internal/"]
            metrics_prefix = "orders"
        "#;

        let provider = ConfigProvider::load(base_figment().merge(Toml::string(config_toml)))
            .expect("valid config should load");
        let config = provider.current();

        assert_eq!(config.sample_rate, 0.25);
        assert_eq!(config.service_name, "orders-api");
        assert_eq!(config.exclude_paths, vec!["/internal/".to_string()]);
        assert_eq!(config.metrics_prefix, "orders");
    }

    #[test]
    fn test_invalid_sample_rate_rejected() {
        let result = ConfigProvider::load(
            base_figment().merge(Toml::string("sample_rate = 1.5")),
        );
        let err = result.expect_err("out-of-range sample rate must fail");
        assert!(err.to_string().contains("sample_rate"));
    }

    #[test]
    fn test_unordered_buckets_rejected() {
        let result = ConfigProvider::load(
            base_figment().merge(Toml::string("histogram_buckets = [0.1, 0.05, 1.0]")),
        );
        let err = result.expect_err("descending buckets must fail");
        assert!(err.to_string().contains("histogram_buckets"));
    }

    #[test]
    fn test_invalid_log_format_rejected() {
        let result = ConfigProvider::load(
            base_figment().merge(Toml::string(r#"log_format = "xml""#)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_exclusion_is_prefix_match() {
        let config = ObservabilityConfig::default();
        assert!(config.is_excluded("/health/"));
        assert!(config.is_excluded("/health/ready"));
        assert!(config.is_excluded("/health"));
        assert!(config.is_excluded("/metrics"));
        assert!(config.is_excluded("/favicon.ico"));
        assert!(!config.is_excluded("/healthz"));
        assert!(!config.is_excluded("/api/users/"));
    }

    #[test]
    fn test_sensitive_header_match_is_case_insensitive() {
        let config = ObservabilityConfig::default();
        assert!(config.is_sensitive_header("Authorization"));
        assert!(config.is_sensitive_header("COOKIE"));
        assert!(!config.is_sensitive_header("accept"));
    }

    fn file_provider(path: &std::path::Path) -> ConfigProvider {
        let path = path.to_path_buf();
        ConfigProvider::with_source(move || base_figment().merge(Toml::file(&path)))
            .expect("initial load")
    }

    #[test]
    fn test_reload_swaps_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("observability.toml");
        std::fs::write(&path, "sample_rate = 1.0\n").expect("write config");

        let provider = file_provider(&path);
        assert_eq!(provider.current().sample_rate, 1.0);

        let mut file = std::fs::File::create(&path).expect("rewrite config");
        writeln!(file, "sample_rate = 0.5").expect("write");
        drop(file);

        let fresh = provider.reload().expect("reload");
        assert_eq!(fresh.sample_rate, 0.5);
        assert_eq!(provider.current().sample_rate, 0.5);
    }

    #[test]
    fn test_reload_failure_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("observability.toml");
        std::fs::write(&path, "sample_rate = 0.75\n").expect("write config");

        let provider = file_provider(&path);

        std::fs::write(&path, "sample_rate = 7.5\n").expect("rewrite config");
        assert!(provider.reload().is_err());
        assert_eq!(provider.current().sample_rate, 0.75);
    }

    #[test]
    fn test_in_flight_snapshot_survives_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("observability.toml");
        std::fs::write(&path, "service_name = \"before\"\n").expect("write config");

        let provider = file_provider(&path);
        let held = provider.current();

        std::fs::write(&path, "service_name = \"after\"\n").expect("rewrite config");
        provider.reload().expect("reload");

        assert_eq!(held.service_name, "before");
        assert_eq!(provider.current().service_name, "after");
    }
}
