//! Configuration loaded once at startup from `config.toml`.
//!
//! All speed fields share the configured [`Units`]. The config is read-only
//! after load; the engine never mutates it.

use anyhow::{Context, Result};
use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};

use crate::speed::{ReductionAmount, TargetSpeed, Units};

/// Global configuration for the reconciler.
#[derive(Debug, Clone, Deserialize)]
pub struct SpeedwardenConfig {
    /// Maximum global upload speed, in `units`.
    pub max_upload: f64,
    /// Floor for the resolved upload speed, in `units`.
    #[serde(default)]
    pub min_upload: f64,
    /// Maximum global download speed, in `units`.
    pub max_download: f64,
    /// Floor for the resolved download speed, in `units`.
    #[serde(default)]
    pub min_download: f64,
    /// Unit every speed in this file is expressed in.
    #[serde(default)]
    pub units: Units,
    /// Split speeds by fixed configured shares instead of live activity.
    #[serde(default)]
    pub manual_speed_algorithm_share: bool,
    /// Compatibility switch: legacy releases fed a client's download_shares
    /// into its upload allocation (and vice versa). Off by default; enable
    /// only to reproduce that behavior.
    #[serde(default)]
    pub legacy_share_swap: bool,
    /// Optional log file path; logs also go to stderr.
    #[serde(default)]
    pub logs_path: Option<PathBuf>,
    /// Torrent-client backends to throttle, in order.
    pub clients: Vec<ClientConfig>,
    /// Enabled modules.
    #[serde(default)]
    pub modules: ModulesConfig,
}

/// One torrent-client backend entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the client's web API, e.g. `http://localhost:8080`.
    pub url: String,
    /// Backend kind.
    #[serde(rename = "type")]
    pub kind: ClientKind,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Weight for upload allocation under the manual-share policy.
    #[serde(default = "default_share")]
    pub upload_shares: f64,
    /// Weight for download allocation under the manual-share policy.
    #[serde(default = "default_share")]
    pub download_shares: f64,
}

fn default_share() -> f64 {
    1.0
}

/// Closed set of supported torrent-client backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    Qbittorrent,
    Transmission,
}

/// Module configuration. A module is enabled when its section is present
/// (schedule: at least one rule).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModulesConfig {
    #[serde(default)]
    pub schedule: Vec<ScheduleRule>,
    #[serde(default)]
    pub media_server: Option<MediaServerConfig>,
}

/// One schedule window. While active, its reductions apply. Windows may
/// cross midnight (`end` earlier than `start`).
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRule {
    /// Weekdays the window applies to (e.g. `["mon", "tue"]`). Empty = every
    /// day. For midnight-crossing windows the day of the window's start
    /// matters.
    #[serde(default, deserialize_with = "de_weekdays")]
    pub days: Vec<Weekday>,
    /// Window start, local time, `HH:MM`.
    #[serde(deserialize_with = "de_time")]
    pub start: NaiveTime,
    /// Window end, local time, `HH:MM`.
    #[serde(deserialize_with = "de_time")]
    pub end: NaiveTime,
    /// Upload reduction while active: amount in config units or "unlimited".
    #[serde(default = "zero_reduction")]
    pub upload: ReductionAmount,
    /// Download reduction while active.
    #[serde(default = "zero_reduction")]
    pub download: ReductionAmount,
}

fn zero_reduction() -> ReductionAmount {
    ReductionAmount::Amount(0.0)
}

/// Media-server module configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaServerConfig {
    /// Seconds between stream-count polls.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Upload reduction per active stream, in config units.
    #[serde(default)]
    pub upload_reduction_per_stream: f64,
    /// Download reduction per active stream, in config units.
    #[serde(default)]
    pub download_reduction_per_stream: f64,
    /// When set, any active stream switches upload to stream-based
    /// resolution with this absolute target instead of per-stream reductions.
    #[serde(default)]
    pub target_upload_speed: Option<TargetSpeed>,
    /// Media servers to poll; stream counts are summed across them.
    pub servers: Vec<MediaServerEntry>,
}

fn default_interval() -> u64 {
    30
}

/// One media server to poll for active streams.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaServerEntry {
    #[serde(rename = "type")]
    pub kind: ServerKind,
    /// Base URL, e.g. `http://localhost:32400`.
    pub url: String,
    /// API token (`X-Plex-Token` / `X-Emby-Token`).
    pub token: String,
}

/// Closed set of supported media-server backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Plex,
    Jellyfin,
}

fn de_weekdays<'de, D>(deserializer: D) -> Result<Vec<Weekday>, D::Error>
where
    D: Deserializer<'de>,
{
    let names: Vec<String> = Vec::deserialize(deserializer)?;
    names
        .iter()
        .map(|n| {
            n.parse::<Weekday>()
                .map_err(|_| serde::de::Error::custom(format!("unknown weekday: {:?}", n)))
        })
        .collect()
}

fn de_time<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    NaiveTime::parse_from_str(&s, "%H:%M")
        .map_err(|_| serde::de::Error::custom(format!("expected HH:MM, got {:?}", s)))
}

/// Default config location under the XDG config dir.
pub fn default_config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("speedwarden")?;
    Ok(xdg_dirs.get_config_home().join("config.toml"))
}

/// Load and validate configuration from `path`.
pub fn load_config(path: &Path) -> Result<SpeedwardenConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("read config file: {}", path.display()))?;
    let cfg: SpeedwardenConfig = toml::from_str(&data)
        .with_context(|| format!("parse config file: {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

impl SpeedwardenConfig {
    /// True when at least one module section is enabled.
    pub fn any_module_enabled(&self) -> bool {
        !self.modules.schedule.is_empty() || self.modules.media_server.is_some()
    }

    /// Startup validation. Failures here are fatal for the process.
    pub fn validate(&self) -> Result<()> {
        for (name, max, min) in [
            ("upload", self.max_upload, self.min_upload),
            ("download", self.max_download, self.min_download),
        ] {
            if !max.is_finite() || max <= 0.0 {
                anyhow::bail!("max_{} must be a positive finite number", name);
            }
            if !min.is_finite() || min < 0.0 {
                anyhow::bail!("min_{} must be a non-negative finite number", name);
            }
            if min > max {
                anyhow::bail!("min_{} exceeds max_{}", name, name);
            }
        }

        if self.clients.is_empty() {
            anyhow::bail!("no clients configured");
        }
        for client in &self.clients {
            url::Url::parse(&client.url)
                .with_context(|| format!("invalid client url: {}", client.url))?;
            if self.manual_speed_algorithm_share
                && (client.upload_shares <= 0.0 || client.download_shares <= 0.0)
            {
                anyhow::bail!(
                    "client {} must have positive shares under the manual-share policy",
                    client.url
                );
            }
        }

        if !self.any_module_enabled() {
            anyhow::bail!("no modules enabled");
        }
        if let Some(media) = &self.modules.media_server {
            if media.servers.is_empty() {
                anyhow::bail!("media_server module enabled but no servers listed");
            }
            if media.interval_secs == 0 {
                anyhow::bail!("media_server interval_secs must be at least 1");
            }
            for server in &media.servers {
                url::Url::parse(&server.url)
                    .with_context(|| format!("invalid media server url: {}", server.url))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        max_upload = 1000
        min_upload = 50
        max_download = 2000
        min_download = 100
        units = "mbps"
        manual_speed_algorithm_share = true

        [[clients]]
        url = "http://localhost:8080"
        type = "qbittorrent"
        username = "admin"
        password = "secret"
        upload_shares = 1
        download_shares = 3

        [[clients]]
        url = "http://localhost:9091"
        type = "transmission"

        [[modules.schedule]]
        days = ["mon", "tue"]
        start = "08:00"
        end = "17:30"
        upload = 200
        download = "unlimited"

        [modules.media_server]
        interval_secs = 15
        upload_reduction_per_stream = 100
        target_upload_speed = "50%"

        [[modules.media_server.servers]]
        type = "plex"
        url = "http://localhost:32400"
        token = "abc123"
    "#;

    #[test]
    fn full_config_parses() {
        let cfg: SpeedwardenConfig = toml::from_str(FULL).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.max_upload, 1000.0);
        assert_eq!(cfg.min_upload, 50.0);
        assert_eq!(cfg.units, Units::Mbps);
        assert!(cfg.manual_speed_algorithm_share);
        assert!(!cfg.legacy_share_swap);
        assert_eq!(cfg.clients.len(), 2);
        assert_eq!(cfg.clients[0].kind, ClientKind::Qbittorrent);
        assert_eq!(cfg.clients[0].download_shares, 3.0);
        assert_eq!(cfg.clients[1].kind, ClientKind::Transmission);
        assert_eq!(cfg.clients[1].upload_shares, 1.0);

        let rule = &cfg.modules.schedule[0];
        assert_eq!(rule.days, vec![Weekday::Mon, Weekday::Tue]);
        assert_eq!(rule.start, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(rule.end, NaiveTime::from_hms_opt(17, 30, 0).unwrap());
        assert_eq!(rule.upload, ReductionAmount::Amount(200.0));
        assert_eq!(rule.download, ReductionAmount::Unlimited);

        let media = cfg.modules.media_server.as_ref().unwrap();
        assert_eq!(media.interval_secs, 15);
        assert_eq!(media.target_upload_speed, Some(TargetSpeed::Percent(50.0)));
        assert_eq!(media.servers[0].kind, ServerKind::Plex);
    }

    #[test]
    fn unknown_client_kind_is_rejected_at_parse() {
        let toml = r#"
            max_upload = 100
            max_download = 100
            [[clients]]
            url = "http://localhost:1"
            type = "rtorrent"
            [[modules.schedule]]
            start = "00:00"
            end = "06:00"
        "#;
        assert!(toml::from_str::<SpeedwardenConfig>(toml).is_err());
    }

    #[test]
    fn validation_requires_a_module() {
        let toml = r#"
            max_upload = 100
            max_download = 100
            [[clients]]
            url = "http://localhost:8080"
            type = "qbittorrent"
        "#;
        let cfg: SpeedwardenConfig = toml::from_str(toml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_rejects_min_above_max() {
        let toml = r#"
            max_upload = 100
            min_upload = 200
            max_download = 100
            [[clients]]
            url = "http://localhost:8080"
            type = "qbittorrent"
            [[modules.schedule]]
            start = "00:00"
            end = "06:00"
        "#;
        let cfg: SpeedwardenConfig = toml::from_str(toml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_rejects_nonpositive_manual_shares() {
        let toml = r#"
            max_upload = 100
            max_download = 100
            manual_speed_algorithm_share = true
            [[clients]]
            url = "http://localhost:8080"
            type = "qbittorrent"
            upload_shares = 0
            [[modules.schedule]]
            start = "00:00"
            end = "06:00"
        "#;
        let cfg: SpeedwardenConfig = toml::from_str(toml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_config_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, FULL).unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.clients.len(), 2);
    }

    #[test]
    fn bad_weekday_and_time_are_rejected() {
        let toml = r#"
            max_upload = 100
            max_download = 100
            [[clients]]
            url = "http://localhost:8080"
            type = "qbittorrent"
            [[modules.schedule]]
            days = ["funday"]
            start = "00:00"
            end = "06:00"
        "#;
        assert!(toml::from_str::<SpeedwardenConfig>(toml).is_err());

        let toml = r#"
            max_upload = 100
            max_download = 100
            [[clients]]
            url = "http://localhost:8080"
            type = "qbittorrent"
            [[modules.schedule]]
            start = "25:00"
            end = "06:00"
        "#;
        assert!(toml::from_str::<SpeedwardenConfig>(toml).is_err());
    }
}
