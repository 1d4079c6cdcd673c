//! Speed resolution: turn per-module reduction values into one global
//! upload and one global download speed.
//!
//! Two modes per cycle. Bandwidth-based (default): each direction starts at
//! its configured max and subtracts the sum of reductions, floored at the
//! configured min; any unlimited demand wins outright. Stream-based (any
//! module reported the upload stream sentinel): upload starts from the media
//! server's absolute target instead, with the remaining schedule reductions
//! applied on top. Download is always bandwidth-based.

use crate::config::SpeedwardenConfig;
use crate::speed::{DownloadReduction, ReductionValue, Speed, TargetSpeed, UploadReduction};

/// Global per-direction targets for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedSpeeds {
    pub upload: Speed,
    pub download: Speed,
}

/// Resolve global speeds from this cycle's reduction values.
///
/// `target` is the media-server absolute upload target, fetched by the caller
/// only when a stream sentinel is present; `None` falls back to the
/// configured max. Pure: same inputs always yield the same outputs.
pub fn resolve_speeds(
    cfg: &SpeedwardenConfig,
    reductions: &[ReductionValue],
    target: Option<TargetSpeed>,
) -> ResolvedSpeeds {
    let stream_mode = reductions
        .iter()
        .any(|r| r.upload == UploadReduction::Stream);

    let upload = if stream_mode {
        resolve_upload_stream(cfg, reductions, target)
    } else {
        resolve_upload_bandwidth(cfg, reductions)
    };

    ResolvedSpeeds {
        upload,
        download: resolve_download(cfg, reductions),
    }
}

fn resolve_upload_bandwidth(cfg: &SpeedwardenConfig, reductions: &[ReductionValue]) -> Speed {
    let mut sum = 0.0;
    for r in reductions {
        match r.upload {
            UploadReduction::Amount(v) => sum += v,
            UploadReduction::Unlimited => return Speed::Unlimited,
            // Bandwidth mode is only entered when no sentinel is present.
            UploadReduction::Stream => {}
        }
    }
    Speed::Limited(cfg.min_upload.max(cfg.max_upload - sum))
}

fn resolve_upload_stream(
    cfg: &SpeedwardenConfig,
    reductions: &[ReductionValue],
    target: Option<TargetSpeed>,
) -> Speed {
    let base = match target {
        None => Speed::Limited(cfg.max_upload),
        Some(TargetSpeed::Unlimited) => Speed::Unlimited,
        Some(TargetSpeed::Percent(pct)) => Speed::Limited(cfg.max_upload * pct / 100.0),
        Some(TargetSpeed::Amount(v)) => Speed::Limited(v),
    };

    // Drop the sentinel entries; they carry no magnitude.
    let mut sum = 0.0;
    let mut any = false;
    for r in reductions {
        match r.upload {
            UploadReduction::Amount(v) => {
                sum += v;
                any = true;
            }
            UploadReduction::Unlimited => return Speed::Unlimited,
            UploadReduction::Stream => {}
        }
    }

    match base {
        // Reductions against an unlimited base apply to the configured max.
        Speed::Unlimited if any => Speed::Limited(cfg.min_upload.max(cfg.max_upload - sum)),
        Speed::Unlimited => Speed::Unlimited,
        Speed::Limited(b) if any => Speed::Limited(cfg.min_upload.max(b - sum)),
        // No schedule reductions: the target passes through unchanged, even
        // below the configured min.
        Speed::Limited(b) => Speed::Limited(b),
    }
}

fn resolve_download(cfg: &SpeedwardenConfig, reductions: &[ReductionValue]) -> Speed {
    let mut sum = 0.0;
    for r in reductions {
        match r.download {
            DownloadReduction::Amount(v) => sum += v,
            DownloadReduction::Unlimited => return Speed::Unlimited,
        }
    }
    Speed::Limited(cfg.min_download.max(cfg.max_download - sum))
}
