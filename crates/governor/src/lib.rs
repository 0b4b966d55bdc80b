//! Host governor daemon
//!
//! Runs one `ResourceManager` for the host and serves its health, status and
//! metrics over HTTP.

pub mod api;
pub mod config;
