//! Torrent-client backend adapters.
//!
//! The engine only sees the [`TorrentClient`] contract; the set of
//! implementations is closed (one per [`ClientKind`]). Unit conversion to
//! each backend's native limit representation happens here, never in the
//! engine.

pub(crate) mod http;
mod qbittorrent;
mod transmission;

use anyhow::Result;

use crate::config::{ClientKind, SpeedwardenConfig};
use crate::speed::Speed;

pub use qbittorrent::QbittorrentClient;
pub use transmission::TransmissionClient;

/// Contract every torrent-client backend implements.
///
/// Calls may block on network I/O. `active_torrent_count` failures abort the
/// cycle; `set_*_speed` failures are isolated per client by the engine.
pub trait TorrentClient: Send {
    /// Base URL, used in diagnostics.
    fn url(&self) -> &str;

    /// Number of torrents currently transferring, queried fresh every cycle.
    fn active_torrent_count(&self) -> Result<u64>;

    /// Apply an upload limit immediately.
    fn set_upload_speed(&self, speed: Speed) -> Result<()>;

    /// Apply a download limit immediately.
    fn set_download_speed(&self, speed: Speed) -> Result<()>;
}

/// Construct one adapter per configured client, in config order.
pub fn build_clients(cfg: &SpeedwardenConfig) -> Vec<Box<dyn TorrentClient>> {
    cfg.clients
        .iter()
        .map(|client| -> Box<dyn TorrentClient> {
            match client.kind {
                ClientKind::Qbittorrent => Box::new(QbittorrentClient::new(client, cfg.units)),
                ClientKind::Transmission => Box::new(TransmissionClient::new(client, cfg.units)),
            }
        })
        .collect()
}
