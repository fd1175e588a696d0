//! API server implementation
//!
//! Hosts the proxy entry point together with the robot, bump and health endpoints.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
