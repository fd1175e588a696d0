pub mod cache;
pub mod tenant;

pub use cache::TenantCache;
pub use tenant::{HttpTenantStore, TenantStore};
