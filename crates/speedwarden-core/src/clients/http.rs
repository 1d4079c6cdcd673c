//! Minimal blocking HTTP helper for the backend adapters.
//!
//! Uses the curl crate (libcurl) directly. Each call is one request with
//! its own timeouts; adapters own retry/auth logic.

use anyhow::{Context, Result};
use std::str;
use std::time::Duration;

/// A completed HTTP exchange: status, raw header lines, and body.
pub(crate) struct HttpResponse {
    pub status: u32,
    pub headers: Vec<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Case-insensitive lookup of a response header's value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key.trim().eq_ignore_ascii_case(name) {
                Some(value.trim())
            } else {
                None
            }
        })
    }

    pub fn body_str(&self) -> Result<&str> {
        str::from_utf8(&self.body).context("response body is not UTF-8")
    }
}

/// Request body to send, if any.
pub(crate) enum Body<'a> {
    None,
    /// `application/x-www-form-urlencoded` POST.
    Form(&'a str),
    /// `application/json` POST.
    Json(&'a str),
}

/// Optional HTTP basic auth credentials.
pub(crate) struct BasicAuth<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Perform one request and collect status, headers, and body.
pub(crate) fn request(
    url: &str,
    headers: &[(&str, &str)],
    body: Body<'_>,
    auth: Option<BasicAuth<'_>>,
) -> Result<HttpResponse> {
    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.follow_location(true)?;
    easy.connect_timeout(Duration::from_secs(15))?;
    easy.timeout(Duration::from_secs(30))?;

    if let Some(auth) = auth {
        easy.username(auth.username)?;
        easy.password(auth.password)?;
    }

    let mut list = curl::easy::List::new();
    for (k, v) in headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))?;
    }
    let payload: Option<Vec<u8>> = match body {
        Body::None => None,
        Body::Form(data) => {
            list.append("Content-Type: application/x-www-form-urlencoded")?;
            Some(data.as_bytes().to_vec())
        }
        Body::Json(data) => {
            list.append("Content-Type: application/json")?;
            Some(data.as_bytes().to_vec())
        }
    };
    easy.http_headers(list)?;
    if let Some(data) = &payload {
        easy.post(true)?;
        easy.post_fields_copy(data)?;
    }

    let mut header_lines: Vec<String> = Vec::new();
    let mut body_bytes: Vec<u8> = Vec::new();
    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                header_lines.push(s.trim_end().to_string());
            }
            true
        })?;
        transfer.write_function(|data| {
            body_bytes.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.perform().context("HTTP request failed")?;
    }

    let status = easy.response_code().context("no response code")?;
    Ok(HttpResponse {
        status,
        headers: header_lines,
        body: body_bytes,
    })
}

/// Percent-encode one form value.
pub(crate) fn url_encode(value: &str) -> String {
    curl::easy::Easy::new().url_encode(value.as_bytes())
}
