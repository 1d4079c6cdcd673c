//! CLI for the speedwarden bandwidth reconciler.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use speedwarden_core::clients::build_clients;
use speedwarden_core::config;
use speedwarden_core::engine::Engine;
use speedwarden_core::logging;
use speedwarden_core::modules::build_modules;

/// Top-level CLI for the speedwarden daemon.
#[derive(Debug, Parser)]
#[command(name = "speedwarden")]
#[command(
    about = "speedwarden: throttle torrent-client bandwidth from schedules and media-server activity",
    long_about = None
)]
pub struct Cli {
    /// Path to config.toml (defaults to the XDG config dir).
    #[arg(long, env = "SPEEDWARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    pub log_level: String,
}

impl Cli {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        cli.run().await
    }

    pub async fn run(self) -> Result<()> {
        let config_path = match self.config {
            Some(path) => path,
            None => config::default_config_path()?,
        };
        let cfg = config::load_config(&config_path)?;

        // Log to the configured file when possible, else stderr.
        match &cfg.logs_path {
            Some(path) => {
                if logging::init_logging(path, &self.log_level).is_err() {
                    logging::init_logging_stderr(&self.log_level);
                    tracing::warn!("could not open log file {}, using stderr", path.display());
                }
            }
            None => logging::init_logging_stderr(&self.log_level),
        }

        tracing::info!("starting speedwarden");
        tracing::debug!("loaded config from {}", config_path.display());

        let clients = build_clients(&cfg);
        let modules = build_modules(&cfg);
        let engine = Engine::new(cfg, modules, clients);
        let shutdown = engine.shutdown_token();

        let mut loop_handle = tokio::task::spawn_blocking(move || engine.run());
        tokio::select! {
            res = &mut loop_handle => {
                res.context("control loop join")?;
                return Ok(());
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                shutdown.store(true, Ordering::Relaxed);
            }
        }
        loop_handle.await.context("control loop join")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_path_and_log_level() {
        let cli = Cli::try_parse_from([
            "speedwarden",
            "--config",
            "/tmp/speedwarden.toml",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/speedwarden.toml")));
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn defaults_apply_without_flags() {
        let cli = Cli::try_parse_from(["speedwarden"]).unwrap();
        assert_eq!(cli.config, None);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn rejects_unknown_flags() {
        assert!(Cli::try_parse_from(["speedwarden", "--nope"]).is_err());
    }
}
