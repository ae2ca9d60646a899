// Library exports for Souk
// This allows integration tests and the binary to share one set of modules

pub mod backend;
pub mod catalog;
pub mod clock;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod flows;
pub mod guard;
pub mod media;
pub mod ratelimit;
pub mod saga;
pub mod session;
pub mod state;
