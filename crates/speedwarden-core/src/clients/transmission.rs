//! Transmission backend adapter (RPC over HTTP).
//!
//! Handles the X-Transmission-Session-Id 409 handshake and optional basic
//! auth. Session speed limits are set in KB/s (1000 bytes) via session-set;
//! unlimited disables the limit instead of setting a magnitude.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::sync::Mutex;

use super::http::{self, BasicAuth, Body};
use super::TorrentClient;
use crate::config::ClientConfig;
use crate::speed::{Speed, Units};

/// Transmission torrent status codes counted as active.
const STATUS_DOWNLOAD: i64 = 4;
const STATUS_SEED: i64 = 6;

pub struct TransmissionClient {
    url: String,
    rpc_url: String,
    username: Option<String>,
    password: Option<String>,
    units: Units,
    session_id: Mutex<Option<String>>,
}

impl TransmissionClient {
    pub fn new(client: &ClientConfig, units: Units) -> Self {
        let url = client.url.trim_end_matches('/').to_string();
        let rpc_url = format!("{}/transmission/rpc", url);
        Self {
            url,
            rpc_url,
            username: client.username.clone(),
            password: client.password.clone(),
            units,
            session_id: Mutex::new(None),
        }
    }

    /// One RPC call; on 409, capture the session id and retry once.
    fn rpc(&self, request: &Value) -> Result<Value> {
        let payload = request.to_string();
        let mut refreshed = false;
        loop {
            let session = self.session_id.lock().unwrap().clone();
            let mut headers: Vec<(&str, &str)> = Vec::new();
            if let Some(session) = &session {
                headers.push(("X-Transmission-Session-Id", session));
            }
            let auth = match (&self.username, &self.password) {
                (Some(username), Some(password)) => Some(BasicAuth { username, password }),
                _ => None,
            };
            let resp = http::request(&self.rpc_url, &headers, Body::Json(&payload), auth)?;
            if resp.status == 409 && !refreshed {
                let session = resp
                    .header("X-Transmission-Session-Id")
                    .context("409 response without a session id header")?
                    .to_string();
                *self.session_id.lock().unwrap() = Some(session);
                refreshed = true;
                continue;
            }
            if resp.status < 200 || resp.status >= 300 {
                anyhow::bail!("Transmission RPC returned HTTP {}", resp.status);
            }
            let value: Value =
                serde_json::from_slice(&resp.body).context("parse Transmission RPC response")?;
            let result = value.get("result").and_then(Value::as_str).unwrap_or("");
            if result != "success" {
                anyhow::bail!("Transmission RPC error: {:?}", result);
            }
            return Ok(value);
        }
    }
}

impl TorrentClient for TransmissionClient {
    fn url(&self) -> &str {
        &self.url
    }

    fn active_torrent_count(&self) -> Result<u64> {
        let response = self.rpc(&json!({
            "method": "torrent-get",
            "arguments": { "fields": ["status"] },
        }))?;
        count_active(&response)
    }

    fn set_upload_speed(&self, speed: Speed) -> Result<()> {
        self.rpc(&json!({
            "method": "session-set",
            "arguments": session_limit_args("speed-limit-up", speed, self.units),
        }))?;
        Ok(())
    }

    fn set_download_speed(&self, speed: Speed) -> Result<()> {
        self.rpc(&json!({
            "method": "session-set",
            "arguments": session_limit_args("speed-limit-down", speed, self.units),
        }))?;
        Ok(())
    }
}

/// Count torrents in a downloading or seeding state from a torrent-get reply.
fn count_active(response: &Value) -> Result<u64> {
    let torrents = response
        .get("arguments")
        .and_then(|a| a.get("torrents"))
        .and_then(Value::as_array)
        .context("torrent-get response carried no torrents array")?;
    let count = torrents
        .iter()
        .filter(|t| {
            matches!(
                t.get("status").and_then(Value::as_i64),
                Some(STATUS_DOWNLOAD) | Some(STATUS_SEED)
            )
        })
        .count();
    Ok(count as u64)
}

/// Build session-set arguments for one direction's limit.
fn session_limit_args(key: &str, speed: Speed, units: Units) -> Value {
    let mut args = serde_json::Map::new();
    match speed {
        Speed::Unlimited => {
            args.insert(format!("{}-enabled", key), Value::Bool(false));
        }
        Speed::Limited(v) => {
            // Transmission limits are in KB/s (1000 bytes); never 0 for a
            // finite speed.
            let kbytes = (units.to_bytes_per_sec(v) / 1000).max(1);
            args.insert(key.to_string(), Value::from(kbytes));
            args.insert(format!("{}-enabled", key), Value::Bool(true));
        }
    }
    Value::Object(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_downloading_and_seeding_torrents() {
        let response = json!({
            "result": "success",
            "arguments": {
                "torrents": [
                    { "status": 4 },
                    { "status": 6 },
                    { "status": 0 },
                    { "status": 3 },
                    { "status": 6 },
                ]
            }
        });
        assert_eq!(count_active(&response).unwrap(), 3);
    }

    #[test]
    fn count_fails_without_torrents_array() {
        let response = json!({ "result": "success", "arguments": {} });
        assert!(count_active(&response).is_err());
    }

    #[test]
    fn limited_speed_builds_enabled_limit_in_kbytes() {
        let args = session_limit_args("speed-limit-up", Speed::Limited(10.0), Units::Mbps);
        assert_eq!(args["speed-limit-up"], json!(1250));
        assert_eq!(args["speed-limit-up-enabled"], json!(true));
    }

    #[test]
    fn unlimited_speed_disables_the_limit() {
        let args = session_limit_args("speed-limit-down", Speed::Unlimited, Units::Mbps);
        assert_eq!(args["speed-limit-down-enabled"], json!(false));
        assert!(args.get("speed-limit-down").is_none());
    }

    #[test]
    fn tiny_finite_speed_never_becomes_zero() {
        let args = session_limit_args("speed-limit-up", Speed::Limited(0.001), Units::Bps);
        assert_eq!(args["speed-limit-up"], json!(1));
    }
}
