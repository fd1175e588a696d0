//! Background services

pub mod bump_scheduler;

pub use bump_scheduler::{BumpScheduler, BumpSchedulerConfig, BumpSchedulerHandle};
