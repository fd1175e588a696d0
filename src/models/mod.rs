pub mod bump;
pub mod device;
pub mod fetch;
pub mod tenant;

pub use bump::*;
pub use fetch::*;
pub use tenant::*;
