//! Caddy Proxy Manager - an admin backend for Caddy
//!
//! This library keeps a store of proxy hosts and, after every change,
//! regenerates the complete Caddy JSON configuration and pushes it to the
//! Caddy admin endpoint:
//! - Maps domains to upstreams with TLS, auth, access control and WAF toggles
//! - Builds one route per enabled host with a fixed handler order
//! - Keeps an inventory of remote servers usable as upstreams
//! - Exposes a token-protected JSON API for managing both

pub mod api;
pub mod auth;
pub mod caddy;
pub mod config;
pub mod db;
pub mod error;
pub mod generator;
pub mod models;
pub mod remote;
pub mod service;
