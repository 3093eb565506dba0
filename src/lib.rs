//! Hemicycle: debate metadata backend core.
//!
//! The crate hosts the dual-tier cache ([`cache`]) and the real-time
//! notification layer ([`realtime`]) along with the HTTP surface that exposes
//! them ([`infra::http`]).

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
pub mod realtime;
pub mod util;
