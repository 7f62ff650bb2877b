//! ipwarden server - IP traffic classification and anomaly detection
//!
//! This crate handles:
//! - Per-request block list checks and login rate limiting
//! - Geo enrichment of client addresses with a TTL cache
//! - Durable audit logging of admitted requests
//! - Periodic scans of the audit log for high-volume and sensitive-path access

pub mod abuse;
pub mod cache;
pub mod config;
pub mod db;
pub mod geo;
pub mod pipeline;
pub mod redis;
pub mod routes;
pub mod store;
