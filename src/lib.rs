//! Versioned read-through caching for the Vynox VPN admin backend.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
