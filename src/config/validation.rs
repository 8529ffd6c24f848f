use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use garde::Validate;

use super::AppConfig;

/// Plain environment variables read into `[telemetry]` without a prefix
pub const TELEMETRY_ENV_KEYS: &[&str] = &[
    "SERVICE_NAME",
    "SERVICE_NAMESPACE",
    "DEPLOYMENT_ENVIRONMENT",
    "COLLECTOR_ENDPOINT",
    "SAMPLING_RATIO",
];

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "ot-prometheus", version, about = "Instrumented demo API")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, env = "APP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Server port
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Port of the dedicated Prometheus listener
    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// Environment name, selects `config/{environment}.toml`
    #[arg(long, env = "ENVIRONMENT")]
    pub environment: Option<String>,

    /// Start the background load producer
    #[arg(long)]
    pub produce: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

/// Assemble the configuration for this process.
///
/// Later sources override earlier ones: embedded defaults, `config/default.toml`,
/// `config/{environment}.toml`, an explicit `--config` file, `APP_` variables
/// (`__` separates sections), the plain telemetry variables, then CLI flags.
pub fn load_config(cli: &Cli) -> Result<AppConfig> {
    let env_name = cli
        .environment
        .clone()
        .unwrap_or_else(|| "production".to_string());

    let mut figment = Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file("config/default.toml"))
        .merge(Toml::file(format!("config/{}.toml", env_name)));

    if let Some(path) = &cli.config {
        figment = figment.merge(Toml::file(path));
    }

    let figment = apply_cli(with_environment(figment), cli);
    let config: AppConfig = figment.extract()?;

    config.validate()?;

    Ok(config)
}

/// Layer the environment variable providers on top of `figment`
pub fn with_environment(figment: Figment) -> Figment {
    figment
        .merge(Env::prefixed("APP_").split("__"))
        .merge(
            Env::raw()
                .only(TELEMETRY_ENV_KEYS)
                .map(|key| format!("telemetry.{}", key.as_str().to_ascii_lowercase()).into()),
        )
}

fn apply_cli(mut figment: Figment, cli: &Cli) -> Figment {
    if let Some(port) = cli.port {
        figment = figment.merge(Serialized::default("server.port", port));
    }
    if let Some(port) = cli.metrics_port {
        figment = figment.merge(Serialized::default("metrics.port", port));
    }
    if cli.produce {
        figment = figment.merge(Serialized::default("producer.enabled", true));
    }
    if cli.debug {
        figment = figment.merge(Serialized::default("logging.level", "debug"));
    }
    figment
}
