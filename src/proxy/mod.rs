//! Rewriting reverse proxy
//!
//! This module provides:
//! - Upstream fetching through per-tenant forward proxies with manual redirects
//! - Cookie jar merging
//! - HTML/CSS URL rewriting and the injected rental overlay
//! - The per-request proxy handler

pub mod cookies;
pub mod fetcher;
pub mod handler;
pub mod inject;
pub mod pages;
pub mod rewrite;

pub use fetcher::{FetcherConfig, HttpFetcher, UpstreamFetcher};
pub use handler::{ProxyHandler, ProxyRequest, PHONE_SENTINEL};
