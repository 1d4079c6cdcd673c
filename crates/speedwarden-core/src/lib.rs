pub mod config;
pub mod logging;

pub mod allocator;
pub mod clients;
pub mod engine;
pub mod event;
pub mod modules;
pub mod resolver;
pub mod speed;
