pub mod cache;
pub mod config;
pub mod logging;
pub mod test_support;

pub use cache::AwaitCache;
