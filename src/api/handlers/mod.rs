//! API request handlers

pub mod bump;
pub mod health;
pub mod proxy;
pub mod robot;
