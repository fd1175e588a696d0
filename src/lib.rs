//! Rentproxy - Rented Session Proxy
//!
//! A rewriting reverse proxy that lets tenants use a classifieds account through
//! a shared login, plus a bump engine that keeps their posts fresh.
//!
//! ## Features
//!
//! - Per-tenant authorization with rental windows and a short-lived record cache
//! - HTML and CSS rewriting so every link, form and asset stays behind the proxy
//! - Status bar and expiry notice injected into proxied pages
//! - Upstream session cookies persisted per tenant
//! - Scheduled or triggered bump runs over every eligible tenant
//! - Optional forward proxy (HTTP or SOCKS5) per tenant

pub mod api;
pub mod bump;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod repository;
pub mod services;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use error::{RentError, Result};
