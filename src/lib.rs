//! Local print agent: accepts raster print jobs and status queries over
//! HTTP(S) and relays them to one ESC/POS thermal printer over USB or raw TCP.

pub mod advertise;
pub mod api;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod escpos;
pub mod executor;
pub mod prober;
pub mod queue;
pub mod sentry_init;
pub mod status;
pub mod transport;
