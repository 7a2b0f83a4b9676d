pub mod cache;

pub use cache::{CacheStatsProvider, TtlCache};
