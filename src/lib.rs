//! Library crate for apcups-scan: apcupsd status queries and LAN discovery.
pub mod client;
pub mod codec;
pub mod config;
pub mod duration;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod netdetect;
pub mod scanner;
pub mod status;
pub mod types;
