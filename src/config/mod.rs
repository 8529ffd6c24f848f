pub mod models;
pub mod validation;

pub use models::*;
pub use validation::*;

#[cfg(test)]
mod tests {
    use super::*;
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };
    use garde::Validate;
    use std::io::Write;

    #[test]
    fn test_valid_config_loads() {
        let config_toml = r#"
            [server]
            port = 8989
            bind = "0.0.0.0"

            [logging]
            level = "info"
            format = "json"

            [metrics]
            additional_labels = ["debug", "dry_run"]
        "#;

        let config: AppConfig = Figment::new()
            .merge(Toml::string(config_toml))
            .extract()
            .expect("Should parse valid config");

        assert_eq!(config.server.port, 8989);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.metrics.additional_labels, vec!["debug", "dry_run"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .extract()
            .expect("Should load defaults");

        assert_eq!(config.server.port, 8989);
        assert_eq!(config.metrics.port, 1616);
        assert_eq!(config.telemetry.service_name, "myapp");
        assert_eq!(config.telemetry.service_namespace, "mynamespace");
        assert_eq!(config.telemetry.deployment_environment, "production");
        assert_eq!(config.telemetry.sampling_ratio, 1.0);
        assert_eq!(config.retry.strategy, BackoffKind::Exponential);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.retry.retryable_status_codes.is_empty());
        assert_eq!(config.sampler.period_secs, 5);
        assert!(!config.producer.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_rejected() {
        let config: AppConfig = Figment::new()
            .merge(Toml::string("[server]\nport = 80"))
            .extract()
            .expect("Should parse");

        let validation = config.validate();
        assert!(validation.is_err());
        assert!(validation.unwrap_err().to_string().contains("port"));
    }

    #[test]
    fn test_validation_catches_invalid_bind() {
        let config_toml = r#"
            [server]
            port = 8080
            bind = "invalid-ip-address"
        "#;

        let config: AppConfig = Figment::new()
            .merge(Toml::string(config_toml))
            .extract()
            .expect("Should parse");

        let validation = config.validate();
        assert!(validation.is_err());
        assert!(validation.unwrap_err().to_string().contains("bind"));
    }

    #[test]
    fn test_sampling_ratio_out_of_range_rejected() {
        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string("[telemetry]\nsampling_ratio = 1.5"))
            .extract()
            .expect("Should parse");

        let validation = config.validate();
        assert!(validation.is_err());
        assert!(validation.unwrap_err().to_string().contains("sampling_ratio"));
    }

    #[test]
    fn test_invalid_label_name_rejected() {
        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string("[metrics]\nadditional_labels = [\"has-dash\"]"))
            .extract()
            .expect("Should parse");

        let validation = config.validate();
        assert!(validation.is_err());
        assert!(validation.unwrap_err().to_string().contains("additional_labels"));
    }

    #[test]
    fn test_unknown_backoff_strategy_fails_to_parse() {
        let result: Result<AppConfig, _> = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string("[retry]\nstrategy = \"fibonacci\""))
            .extract();

        assert!(result.is_err());
    }

    #[test]
    fn test_config_hierarchy() {
        unsafe {
            std::env::set_var("APP_SERVER__PORT", "3000");
        }

        let default = "[server]\nport = 8080";
        let env_specific = "[server]\nport = 9090";

        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string(default))
            .merge(Toml::string(env_specific))
            .merge(Env::prefixed("APP_").split("__"))
            .extract()
            .expect("Should merge configs");

        assert_eq!(config.server.port, 3000);

        unsafe {
            std::env::remove_var("APP_SERVER__PORT");
        }
    }

    #[test]
    fn test_plain_telemetry_variables_are_mapped() {
        unsafe {
            std::env::set_var("SERVICE_NAME", "checkout");
            std::env::set_var("SAMPLING_RATIO", "0.25");
        }

        let config: AppConfig = with_environment(
            Figment::new().merge(Serialized::defaults(AppConfig::default())),
        )
        .extract()
        .expect("Should merge telemetry variables");

        assert_eq!(config.telemetry.service_name, "checkout");
        assert_eq!(config.telemetry.sampling_ratio, 0.25);
        assert_eq!(config.telemetry.service_namespace, "mynamespace");

        unsafe {
            std::env::remove_var("SERVICE_NAME");
            std::env::remove_var("SAMPLING_RATIO");
        }
    }

    #[test]
    fn test_load_config_reads_explicit_file_and_cli_overrides() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            "[server]\nport = 7000\n\n[retry]\nstrategy = \"linear\"\nbase_delay_ms = 500"
        )
        .expect("write config");

        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            port: Some(7100),
            metrics_port: Some(9200),
            produce: true,
            ..Cli::default()
        };

        let config = load_config(&cli).expect("Should load config");
        assert_eq!(config.server.port, 7100);
        assert_eq!(config.metrics.port, 9200);
        assert!(config.producer.enabled);
        assert_eq!(config.retry.strategy, BackoffKind::Linear);
        assert_eq!(config.retry.base_delay_ms, 500);
    }
}
