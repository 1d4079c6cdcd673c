//! qBittorrent backend adapter (Web API v2).
//!
//! Cookie-based auth: login once on the first 403 and retry the request.
//! Transfer limits are set in bytes/sec; qBittorrent treats 0 as unlimited.

use anyhow::{Context, Result};
use std::sync::Mutex;

use super::http::{self, Body};
use super::TorrentClient;
use crate::config::ClientConfig;
use crate::speed::{Speed, Units};

pub struct QbittorrentClient {
    url: String,
    username: Option<String>,
    password: Option<String>,
    units: Units,
    sid: Mutex<Option<String>>,
}

impl QbittorrentClient {
    pub fn new(client: &ClientConfig, units: Units) -> Self {
        Self {
            url: client.url.trim_end_matches('/').to_string(),
            username: client.username.clone(),
            password: client.password.clone(),
            units,
            sid: Mutex::new(None),
        }
    }

    fn login(&self) -> Result<()> {
        let (Some(user), Some(pass)) = (&self.username, &self.password) else {
            anyhow::bail!("qBittorrent rejected the request and no credentials are configured");
        };
        let body = format!(
            "username={}&password={}",
            http::url_encode(user),
            http::url_encode(pass)
        );
        let resp = http::request(
            &format!("{}/api/v2/auth/login", self.url),
            &[("Referer", &self.url)],
            Body::Form(&body),
            None,
        )?;
        if resp.status != 200 {
            anyhow::bail!("qBittorrent login returned HTTP {}", resp.status);
        }
        // A bad password still yields 200, with "Fails." as the body.
        if login_rejected(&resp) {
            anyhow::bail!("qBittorrent login rejected the configured credentials");
        }
        let sid = parse_sid(&resp.headers)
            .context("qBittorrent login response carried no SID cookie (bad credentials?)")?;
        *self.sid.lock().unwrap() = Some(sid);
        tracing::debug!("logged in to qBittorrent at {}", self.url);
        Ok(())
    }

    /// One API call with the session cookie; re-login once on 403.
    fn call(&self, path: &str, form: Option<&str>) -> Result<http::HttpResponse> {
        let mut retried = false;
        loop {
            let cookie = self
                .sid
                .lock()
                .unwrap()
                .as_ref()
                .map(|sid| format!("SID={}", sid));
            let mut headers: Vec<(&str, &str)> = vec![("Referer", &self.url)];
            if let Some(cookie) = &cookie {
                headers.push(("Cookie", cookie));
            }
            let resp = http::request(
                &format!("{}{}", self.url, path),
                &headers,
                match form {
                    Some(data) => Body::Form(data),
                    None => Body::None,
                },
                None,
            )?;
            if resp.status == 403 && !retried {
                self.login()?;
                retried = true;
                continue;
            }
            if resp.status < 200 || resp.status >= 300 {
                anyhow::bail!("qBittorrent {} returned HTTP {}", path, resp.status);
            }
            return Ok(resp);
        }
    }
}

impl TorrentClient for QbittorrentClient {
    fn url(&self) -> &str {
        &self.url
    }

    fn active_torrent_count(&self) -> Result<u64> {
        let resp = self.call("/api/v2/torrents/info?filter=active", None)?;
        let torrents: serde_json::Value =
            serde_json::from_slice(&resp.body).context("parse torrents/info response")?;
        let count = torrents
            .as_array()
            .context("torrents/info response is not an array")?
            .len() as u64;
        Ok(count)
    }

    fn set_upload_speed(&self, speed: Speed) -> Result<()> {
        let form = format!("limit={}", limit_bytes(speed, self.units));
        self.call("/api/v2/transfer/setUploadLimit", Some(&form))?;
        Ok(())
    }

    fn set_download_speed(&self, speed: Speed) -> Result<()> {
        let form = format!("limit={}", limit_bytes(speed, self.units));
        self.call("/api/v2/transfer/setDownloadLimit", Some(&form))?;
        Ok(())
    }
}

/// Convert a speed to the qBittorrent limit parameter: bytes/sec, 0 meaning
/// unlimited. A finite speed never maps to 0.
fn limit_bytes(speed: Speed, units: Units) -> u64 {
    match speed {
        Speed::Unlimited => 0,
        Speed::Limited(v) => units.to_bytes_per_sec(v).max(1),
    }
}

/// Whether a 200 login response actually reported rejected credentials.
fn login_rejected(resp: &http::HttpResponse) -> bool {
    resp.body_str().map(str::trim).ok() == Some("Fails.")
}

/// Extract the SID cookie value from login response headers.
fn parse_sid(headers: &[String]) -> Option<String> {
    headers.iter().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if !key.trim().eq_ignore_ascii_case("set-cookie") {
            return None;
        }
        let value = value.trim();
        let rest = value.strip_prefix("SID=")?;
        let sid = rest.split(';').next()?.trim();
        if sid.is_empty() {
            None
        } else {
            Some(sid.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_maps_unlimited_to_zero_and_floors_finite_at_one() {
        assert_eq!(limit_bytes(Speed::Unlimited, Units::Mbps), 0);
        assert_eq!(limit_bytes(Speed::Limited(10.0), Units::Mbps), 1_250_000);
        // Tiny but finite speeds must not become "unlimited".
        assert_eq!(limit_bytes(Speed::Limited(0.0000001), Units::Bps), 1);
    }

    #[test]
    fn login_rejection_is_detected_from_the_body() {
        let resp = |body: &[u8]| http::HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: body.to_vec(),
        };
        assert!(login_rejected(&resp(b"Fails.")));
        assert!(login_rejected(&resp(b"Fails.\n")));
        assert!(!login_rejected(&resp(b"Ok.")));
        assert!(!login_rejected(&resp(b"")));
        assert!(!login_rejected(&resp(&[0xff, 0xfe])));
    }

    #[test]
    fn sid_cookie_is_parsed_from_headers() {
        let headers = vec![
            "HTTP/1.1 200 OK".to_string(),
            "Content-Type: text/plain".to_string(),
            "Set-Cookie: SID=hBc7TxF3; HttpOnly; path=/".to_string(),
        ];
        assert_eq!(parse_sid(&headers).as_deref(), Some("hBc7TxF3"));
        assert_eq!(parse_sid(&["Set-Cookie: other=1".to_string()]), None);
        assert_eq!(parse_sid(&[]), None);
    }
}
