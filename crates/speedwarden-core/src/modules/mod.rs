//! Reduction-producing modules.
//!
//! A closed set of variants dispatched by match; the media-server specific
//! operation is reachable only through [`Module::as_media_server`].

mod media_server;
mod schedule;

use anyhow::Result;

use crate::config::SpeedwardenConfig;
use crate::event::UpdateHandle;
use crate::speed::ReductionValue;

pub use media_server::MediaServerModule;
pub use schedule::ScheduleModule;

/// One enabled module.
pub enum Module {
    Schedule(ScheduleModule),
    MediaServer(MediaServerModule),
}

impl Module {
    /// Module name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Module::Schedule(_) => "schedule",
            Module::MediaServer(_) => "media_server",
        }
    }

    /// Start the module's background signaling thread.
    pub fn run(&self, handle: UpdateHandle) {
        match self {
            Module::Schedule(m) => m.run(handle),
            Module::MediaServer(m) => m.run(handle),
        }
    }

    /// This cycle's reduction pair. May block on network I/O; a failure
    /// aborts the entire cycle.
    pub fn reduction_value(&self) -> Result<ReductionValue> {
        match self {
            Module::Schedule(m) => Ok(m.reduction_value()),
            Module::MediaServer(m) => m.reduction_value(),
        }
    }

    pub fn as_media_server(&self) -> Option<&MediaServerModule> {
        match self {
            Module::MediaServer(m) => Some(m),
            Module::Schedule(_) => None,
        }
    }
}

/// Construct every enabled module from the config.
pub fn build_modules(cfg: &SpeedwardenConfig) -> Vec<Module> {
    let mut modules = Vec::new();
    if let Some(media) = &cfg.modules.media_server {
        modules.push(Module::MediaServer(MediaServerModule::new(media.clone())));
    }
    if !cfg.modules.schedule.is_empty() {
        modules.push(Module::Schedule(ScheduleModule::new(
            cfg.modules.schedule.clone(),
        )));
    }
    modules
}
