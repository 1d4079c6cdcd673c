//! Schedule module: time-window based reductions.
//!
//! Reductions come straight from the config rules and the local clock, so
//! queries never fail. The background thread only has to wake the control
//! loop whenever a window edge passes.

use chrono::{DateTime, Datelike, Local, NaiveTime, Weekday};
use std::thread;
use std::time::Duration;

use crate::config::ScheduleRule;
use crate::event::UpdateHandle;
use crate::speed::{DownloadReduction, ReductionAmount, ReductionValue, UploadReduction};

pub struct ScheduleModule {
    rules: Vec<ScheduleRule>,
}

impl ScheduleModule {
    pub fn new(rules: Vec<ScheduleRule>) -> Self {
        Self { rules }
    }

    /// Spawn the boundary-watcher thread. It sleeps until the next rule edge
    /// (start or end, whichever comes first) and signals a recompute. Edges
    /// on days a rule does not apply to just trigger a no-op recompute.
    pub fn run(&self, handle: UpdateHandle) {
        let rules = self.rules.clone();
        thread::spawn(move || loop {
            let wait = seconds_until_next_boundary(&rules, Local::now().time());
            // +1s margin so the recompute lands inside the new window.
            thread::sleep(Duration::from_secs(wait + 1));
            handle.signal();
        });
    }

    /// Current reduction pair: the sum of all active rules per direction,
    /// with any "unlimited" rule winning that direction outright.
    pub fn reduction_value(&self) -> ReductionValue {
        let now: DateTime<Local> = Local::now();
        reduction_at(&self.rules, now.weekday(), now.time())
    }
}

fn reduction_at(rules: &[ScheduleRule], weekday: Weekday, time: NaiveTime) -> ReductionValue {
    let mut upload_sum = 0.0;
    let mut upload_unlimited = false;
    let mut download_sum = 0.0;
    let mut download_unlimited = false;

    for rule in rules.iter().filter(|r| rule_active(r, weekday, time)) {
        match rule.upload {
            ReductionAmount::Amount(v) => upload_sum += v,
            ReductionAmount::Unlimited => upload_unlimited = true,
        }
        match rule.download {
            ReductionAmount::Amount(v) => download_sum += v,
            ReductionAmount::Unlimited => download_unlimited = true,
        }
    }

    ReductionValue {
        upload: if upload_unlimited {
            UploadReduction::Unlimited
        } else {
            UploadReduction::Amount(upload_sum)
        },
        download: if download_unlimited {
            DownloadReduction::Unlimited
        } else {
            DownloadReduction::Amount(download_sum)
        },
    }
}

/// Whether a rule's window covers the given local weekday and time. Windows
/// with `end` before `start` cross midnight; the weekday filter applies to
/// the day the window started on.
fn rule_active(rule: &ScheduleRule, weekday: Weekday, time: NaiveTime) -> bool {
    let day_matches = |day: Weekday| rule.days.is_empty() || rule.days.contains(&day);

    if rule.start <= rule.end {
        time >= rule.start && time < rule.end && day_matches(weekday)
    } else if time >= rule.start {
        // Evening half of a midnight-crossing window.
        day_matches(weekday)
    } else if time < rule.end {
        // Morning half: started yesterday.
        day_matches(weekday.pred())
    } else {
        false
    }
}

/// Seconds until the next start or end edge of any rule (clock-only; day
/// filters are ignored because a spurious recompute is harmless).
fn seconds_until_next_boundary(rules: &[ScheduleRule], now: NaiveTime) -> u64 {
    let mut best: Option<i64> = None;
    for rule in rules {
        for edge in [rule.start, rule.end] {
            let mut delta = edge.signed_duration_since(now).num_seconds();
            if delta <= 0 {
                delta += 86_400;
            }
            best = Some(best.map_or(delta, |b: i64| b.min(delta)));
        }
    }
    best.unwrap_or(86_400) as u64
}
