//! The reconciliation control loop.
//!
//! One dedicated thread waits on the update event, then runs a full cycle
//! synchronously: query every module's reduction value, resolve the global
//! speeds, fetch live active-torrent counts, allocate, and apply per client.
//! A cycle error is logged and the loop goes back to waiting; nothing inside
//! the loop is fatal.

mod error;

pub use error::CycleError;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::allocator::{allocate_speeds, ClientAllocation};
use crate::clients::TorrentClient;
use crate::config::SpeedwardenConfig;
use crate::event::UpdateEvent;
use crate::modules::Module;
use crate::resolver::resolve_speeds;
use crate::speed::{TargetSpeed, Units, UploadReduction};

/// Poll bound for the event wait so shutdown requests are observed promptly.
const WAIT_TIMEOUT: Duration = Duration::from_millis(200);

pub struct Engine {
    cfg: SpeedwardenConfig,
    modules: Vec<Module>,
    clients: Vec<Box<dyn TorrentClient>>,
    /// Index of the (at most one) media-server module, found once at setup.
    media_server_ix: Option<usize>,
    event: Arc<UpdateEvent>,
    shutdown: Arc<AtomicBool>,
}

impl Engine {
    /// Panics when `clients` does not carry exactly one adapter per
    /// configured client entry; allocation relies on the two being parallel.
    pub fn new(
        cfg: SpeedwardenConfig,
        modules: Vec<Module>,
        clients: Vec<Box<dyn TorrentClient>>,
    ) -> Self {
        assert_eq!(
            cfg.clients.len(),
            clients.len(),
            "one client adapter per configured client entry"
        );
        let media_server_ix = modules.iter().position(|m| m.as_media_server().is_some());
        Self {
            cfg,
            modules,
            clients,
            media_server_ix,
            event: UpdateEvent::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Token an external caller sets to stop the loop; observed within the
    /// wait poll bound.
    pub fn shutdown_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Start all module threads and run the control loop until shutdown.
    pub fn run(&self) {
        for module in &self.modules {
            module.run(self.event.handle());
            tracing::info!("started module: {}", module.name());
        }

        // Force an initial cycle.
        self.event.signal();

        while !self.shutdown.load(Ordering::Relaxed) {
            if !self.event.wait_and_clear(WAIT_TIMEOUT) {
                continue;
            }
            tracing::info!("update event triggered");
            match self.reconcile() {
                Ok(()) => tracing::info!("speeds updated"),
                Err(err) => tracing::error!("cycle aborted: {}", err),
            }
            tracing::info!("waiting for next update event");
        }
        tracing::info!("control loop stopped");
    }

    /// One reconciliation cycle. All state computed here is discarded when
    /// the cycle ends.
    fn reconcile(&self) -> Result<(), CycleError> {
        let mut reductions = Vec::with_capacity(self.modules.len());
        for module in &self.modules {
            let value = module
                .reduction_value()
                .map_err(|source| CycleError::Reduction {
                    module: module.name(),
                    source,
                })?;
            reductions.push(value);
        }

        let stream_mode = reductions
            .iter()
            .any(|r| r.upload == UploadReduction::Stream);
        let target: Option<TargetSpeed> = if stream_mode {
            self.media_server_ix
                .and_then(|ix| self.modules[ix].as_media_server())
                .map(|m| m.target_upload_speed())
        } else {
            None
        };

        let resolved = resolve_speeds(&self.cfg, &reductions, target);
        tracing::info!(
            "new calculated upload speed: {}",
            resolved.upload.describe(self.cfg.units)
        );
        tracing::info!(
            "new calculated download speed: {}",
            resolved.download.describe(self.cfg.units)
        );

        tracing::debug!("getting active torrent counts");
        let mut counts = Vec::with_capacity(self.clients.len());
        for client in &self.clients {
            let count = client
                .active_torrent_count()
                .map_err(|source| CycleError::ActiveCount {
                    client: client.url().to_string(),
                    source,
                })?;
            counts.push(count);
        }

        let allocations = allocate_speeds(&self.cfg, &resolved, &counts);
        apply_allocations(&self.clients, &allocations, self.cfg.units);
        Ok(())
    }
}

/// Apply computed speeds to every client, isolating failures per client so
/// one broken backend never blocks the rest.
fn apply_allocations(
    clients: &[Box<dyn TorrentClient>],
    allocations: &[ClientAllocation],
    units: Units,
) {
    for (client, alloc) in clients.iter().zip(allocations) {
        let applied = client
            .set_upload_speed(alloc.upload)
            .and_then(|()| client.set_download_speed(alloc.download));
        match applied {
            Ok(()) => {
                tracing::info!(
                    "set speeds for {}: upload {}, download {}",
                    client.url(),
                    alloc.upload.describe(units),
                    alloc.download.describe(units)
                );
            }
            Err(err) => {
                tracing::warn!("error updating {}, skipping: {:#}", client.url(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModulesConfig;
    use crate::modules::ScheduleModule;
    use crate::speed::{ReductionAmount, Speed};
    use anyhow::Result;
    use chrono::NaiveTime;
    use std::sync::Mutex;

    /// Records applied speeds; optionally fails counts or sets.
    struct MockClient {
        url: String,
        count: u64,
        fail_count: bool,
        fail_set: bool,
        applied: Arc<Mutex<Vec<(String, Speed, Speed)>>>,
        pending_upload: Mutex<Option<Speed>>,
    }

    impl MockClient {
        fn new(
            url: &str,
            count: u64,
            applied: Arc<Mutex<Vec<(String, Speed, Speed)>>>,
        ) -> Self {
            Self {
                url: url.to_string(),
                count,
                fail_count: false,
                fail_set: false,
                applied,
                pending_upload: Mutex::new(None),
            }
        }
    }

    impl TorrentClient for MockClient {
        fn url(&self) -> &str {
            &self.url
        }

        fn active_torrent_count(&self) -> Result<u64> {
            if self.fail_count {
                anyhow::bail!("count unavailable");
            }
            Ok(self.count)
        }

        fn set_upload_speed(&self, speed: Speed) -> Result<()> {
            if self.fail_set {
                anyhow::bail!("backend down");
            }
            *self.pending_upload.lock().unwrap() = Some(speed);
            Ok(())
        }

        fn set_download_speed(&self, speed: Speed) -> Result<()> {
            if self.fail_set {
                anyhow::bail!("backend down");
            }
            let upload = self.pending_upload.lock().unwrap().take().unwrap();
            self.applied
                .lock()
                .unwrap()
                .push((self.url.clone(), upload, speed));
            Ok(())
        }
    }

    /// Config with one default-share client entry per adapter url.
    fn cfg(urls: &[&str]) -> SpeedwardenConfig {
        let clients = urls
            .iter()
            .map(|url| crate::config::ClientConfig {
                url: url.to_string(),
                kind: crate::config::ClientKind::Qbittorrent,
                username: None,
                password: None,
                upload_shares: 1.0,
                download_shares: 1.0,
            })
            .collect();
        SpeedwardenConfig {
            max_upload: 1000.0,
            min_upload: 0.0,
            max_download: 1000.0,
            min_download: 0.0,
            units: Default::default(),
            manual_speed_algorithm_share: false,
            legacy_share_swap: false,
            logs_path: None,
            clients,
            modules: ModulesConfig::default(),
        }
    }

    /// Two complementary windows so exactly one rule is active at any time
    /// of day, making the resolved speeds time-independent.
    fn all_day_schedule(upload: f64, download: f64) -> ScheduleModule {
        let rule = |start, end| crate::config::ScheduleRule {
            days: Vec::new(),
            start: NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(end, 0, 0).unwrap(),
            upload: ReductionAmount::Amount(upload),
            download: ReductionAmount::Amount(download),
        };
        ScheduleModule::new(vec![rule(0, 12), rule(12, 0)])
    }

    #[test]
    fn reconcile_resolves_allocates_and_applies() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let clients: Vec<Box<dyn TorrentClient>> = vec![
            Box::new(MockClient::new("http://a", 3, Arc::clone(&applied))),
            Box::new(MockClient::new("http://b", 1, Arc::clone(&applied))),
        ];
        let modules = vec![Module::Schedule(all_day_schedule(200.0, 0.0))];
        let engine = Engine::new(cfg(&["http://a", "http://b"]), modules, clients);

        engine.reconcile().unwrap();

        let applied = applied.lock().unwrap();
        // Upload resolved to 800, split 3:1 by activity.
        assert_eq!(applied[0], ("http://a".to_string(), Speed::Limited(600.0), Speed::Limited(750.0)));
        assert_eq!(applied[1], ("http://b".to_string(), Speed::Limited(200.0), Speed::Limited(250.0)));
    }

    #[test]
    fn reconcile_is_idempotent_for_unchanged_inputs() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let clients: Vec<Box<dyn TorrentClient>> = vec![Box::new(MockClient::new(
            "http://a",
            2,
            Arc::clone(&applied),
        ))];
        let modules = vec![Module::Schedule(all_day_schedule(100.0, 50.0))];
        let engine = Engine::new(cfg(&["http://a"]), modules, clients);

        engine.reconcile().unwrap();
        engine.reconcile().unwrap();

        let applied = applied.lock().unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].1, applied[1].1);
        assert_eq!(applied[0].2, applied[1].2);
    }

    #[test]
    fn failing_client_does_not_block_the_others() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut broken = MockClient::new("http://b", 0, Arc::clone(&applied));
        broken.fail_set = true;
        let clients: Vec<Box<dyn TorrentClient>> = vec![
            Box::new(broken),
            Box::new(MockClient::new("http://a", 0, Arc::clone(&applied))),
        ];
        let modules = vec![Module::Schedule(all_day_schedule(0.0, 0.0))];
        let engine = Engine::new(cfg(&["http://b", "http://a"]), modules, clients);

        engine.reconcile().unwrap();

        let applied = applied.lock().unwrap();
        // Only the healthy client recorded an apply, with the full speeds.
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0], ("http://a".to_string(), Speed::Limited(1000.0), Speed::Limited(1000.0)));
    }

    #[test]
    #[should_panic(expected = "one client adapter per configured client entry")]
    fn mismatched_client_entries_and_adapters_are_rejected_at_setup() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let clients: Vec<Box<dyn TorrentClient>> = vec![
            Box::new(MockClient::new("http://a", 0, Arc::clone(&applied))),
            Box::new(MockClient::new("http://b", 0, Arc::clone(&applied))),
        ];
        let modules = vec![Module::Schedule(all_day_schedule(0.0, 0.0))];
        Engine::new(cfg(&["http://a"]), modules, clients);
    }

    #[test]
    fn count_failure_aborts_the_cycle_before_any_apply() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut broken = MockClient::new("http://a", 0, Arc::clone(&applied));
        broken.fail_count = true;
        let clients: Vec<Box<dyn TorrentClient>> = vec![
            Box::new(broken),
            Box::new(MockClient::new("http://b", 1, Arc::clone(&applied))),
        ];
        let modules = vec![Module::Schedule(all_day_schedule(0.0, 0.0))];
        let engine = Engine::new(cfg(&["http://a", "http://b"]), modules, clients);

        let err = engine.reconcile().unwrap_err();
        assert!(matches!(err, CycleError::ActiveCount { .. }));
        assert!(applied.lock().unwrap().is_empty());
    }
}
