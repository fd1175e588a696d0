//! Listing bump job
//!
//! - Post id and phone extraction from the tenant's listing page
//! - Session-expired and blocked page heuristics
//! - The sequential bump engine

pub mod classify;
pub mod engine;
pub mod extract;

pub use engine::BumpEngine;
