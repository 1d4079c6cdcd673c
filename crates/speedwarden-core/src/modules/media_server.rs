//! Media-server module: live stream detection.
//!
//! Polls one or more media servers (Plex, Jellyfin) for active playback
//! sessions. Reductions are queried fresh each cycle (blocking HTTP, may
//! fail); the background poll thread only signals the control loop when the
//! total stream count changes.

use anyhow::{Context, Result};
use serde_json::Value;
use std::thread;
use std::time::Duration;

use crate::clients::http::{self, Body};
use crate::config::{MediaServerConfig, MediaServerEntry, ServerKind};
use crate::event::UpdateHandle;
use crate::speed::{DownloadReduction, ReductionValue, TargetSpeed, UploadReduction};

pub struct MediaServerModule {
    cfg: MediaServerConfig,
}

impl MediaServerModule {
    pub fn new(cfg: MediaServerConfig) -> Self {
        Self { cfg }
    }

    /// Spawn the poll thread: fetch the stream count every interval and
    /// signal a recompute when it changes. Fetch errors here are logged and
    /// the previous count kept; the cycle-aborting path is the control
    /// loop's own query.
    pub fn run(&self, handle: UpdateHandle) {
        let servers = self.cfg.servers.clone();
        let interval = Duration::from_secs(self.cfg.interval_secs);
        thread::spawn(move || {
            let mut last: Option<u64> = None;
            loop {
                match total_stream_count(&servers) {
                    Ok(count) => {
                        if last != Some(count) {
                            tracing::debug!("active stream count changed to {}", count);
                            last = Some(count);
                            handle.signal();
                        }
                    }
                    Err(err) => {
                        tracing::warn!("media server poll failed: {:#}", err);
                    }
                }
                thread::sleep(interval);
            }
        });
    }

    /// Current reduction pair from the live stream count. With an absolute
    /// target configured, any active stream defers upload to stream-based
    /// resolution; otherwise both directions get per-stream reductions.
    pub fn reduction_value(&self) -> Result<ReductionValue> {
        let streams = total_stream_count(&self.cfg.servers)?;
        if streams == 0 {
            return Ok(ReductionValue::none());
        }
        let download =
            DownloadReduction::Amount(streams as f64 * self.cfg.download_reduction_per_stream);
        let upload = if self.cfg.target_upload_speed.is_some() {
            UploadReduction::Stream
        } else {
            UploadReduction::Amount(streams as f64 * self.cfg.upload_reduction_per_stream)
        };
        Ok(ReductionValue { upload, download })
    }

    /// The configured absolute upload target used under stream-based
    /// resolution. Only meaningful after `reduction_value` returned the
    /// stream sentinel.
    pub fn target_upload_speed(&self) -> TargetSpeed {
        self.cfg.target_upload_speed.unwrap_or(TargetSpeed::Unlimited)
    }
}

/// Sum of active streams across all configured servers.
fn total_stream_count(servers: &[MediaServerEntry]) -> Result<u64> {
    let mut total = 0;
    for server in servers {
        total += fetch_stream_count(server)
            .with_context(|| format!("query media server {}", server.url))?;
    }
    Ok(total)
}

fn fetch_stream_count(server: &MediaServerEntry) -> Result<u64> {
    let base = server.url.trim_end_matches('/');
    let (url, headers): (String, Vec<(&str, &str)>) = match server.kind {
        ServerKind::Plex => (
            format!("{}/status/sessions", base),
            vec![
                ("X-Plex-Token", server.token.as_str()),
                ("Accept", "application/json"),
            ],
        ),
        ServerKind::Jellyfin => (
            format!("{}/Sessions", base),
            vec![("X-Emby-Token", server.token.as_str())],
        ),
    };
    let resp = http::request(&url, &headers, Body::None, None)?;
    if resp.status < 200 || resp.status >= 300 {
        anyhow::bail!("media server returned HTTP {}", resp.status);
    }
    let value: Value = serde_json::from_slice(&resp.body).context("parse sessions response")?;
    match server.kind {
        ServerKind::Plex => plex_session_count(&value),
        ServerKind::Jellyfin => jellyfin_session_count(&value),
    }
}

/// Session count from a Plex `/status/sessions` reply.
fn plex_session_count(value: &Value) -> Result<u64> {
    let container = value
        .get("MediaContainer")
        .context("sessions response carried no MediaContainer")?;
    if let Some(size) = container.get("size").and_then(Value::as_u64) {
        return Ok(size);
    }
    Ok(container
        .get("Metadata")
        .and_then(Value::as_array)
        .map_or(0, |m| m.len()) as u64)
}

/// Playing-session count from a Jellyfin `/Sessions` reply: only sessions
/// with something loaded count as streams.
fn jellyfin_session_count(value: &Value) -> Result<u64> {
    let sessions = value
        .as_array()
        .context("sessions response is not an array")?;
    let count = sessions
        .iter()
        .filter(|s| s.get("NowPlayingItem").is_some_and(|v| !v.is_null()))
        .count();
    Ok(count as u64)
}
