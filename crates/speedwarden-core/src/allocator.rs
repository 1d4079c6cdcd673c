//! Per-client allocation of the resolved global speeds.
//!
//! Runs independently per direction and per client, with no cross-cycle
//! memory. Two policies: activity-proportional (default, weighted by live
//! active-torrent counts) and manual shares (fixed configured weights).

use crate::config::SpeedwardenConfig;
use crate::resolver::ResolvedSpeeds;
use crate::speed::Speed;

/// Effective per-client speeds for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientAllocation {
    pub upload: Speed,
    pub download: Speed,
}

/// Split the resolved speeds across clients. `counts` holds the live
/// active-torrent count per client, parallel to `cfg.clients`.
pub fn allocate_speeds(
    cfg: &SpeedwardenConfig,
    resolved: &ResolvedSpeeds,
    counts: &[u64],
) -> Vec<ClientAllocation> {
    debug_assert_eq!(cfg.clients.len(), counts.len());

    let sum_counts: u64 = counts.iter().sum();
    let sum_upload_shares: f64 = cfg.clients.iter().map(|c| c.upload_shares).sum();
    let sum_download_shares: f64 = cfg.clients.iter().map(|c| c.download_shares).sum();

    cfg.clients
        .iter()
        .zip(counts)
        .map(|(client, &count)| {
            let upload_share = if cfg.legacy_share_swap {
                // Legacy behavior: upload allocation driven by the
                // download_shares field (denominator stays unswapped).
                client.download_shares
            } else {
                client.upload_shares
            };
            let download_share = if cfg.legacy_share_swap {
                client.upload_shares
            } else {
                client.download_shares
            };

            let split = |speed: Speed, share: f64, sum_shares: f64| -> Speed {
                let Speed::Limited(v) = speed else {
                    // Unlimited is never split.
                    return Speed::Unlimited;
                };
                if cfg.manual_speed_algorithm_share {
                    Speed::Limited(share / sum_shares * v)
                } else if sum_counts == 0 || count == 0 {
                    // Idle clients (and a fully idle fleet) get the whole
                    // resolved speed unsplit.
                    Speed::Limited(v)
                } else {
                    Speed::Limited(count as f64 / sum_counts as f64 * v)
                }
            };

            ClientAllocation {
                upload: split(resolved.upload, upload_share, sum_upload_shares),
                download: split(resolved.download, download_share, sum_download_shares),
            }
        })
        .collect()
}
