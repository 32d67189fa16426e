//! Re-subscribable streams and the sharing operators built on them.
//!
//! `StreamSource` plays the role of a cold observable. `CacheLast` shares one
//! upstream subscription among any number of consumers, replays the last
//! value to late ones, drops consecutive duplicates, and tears the upstream
//! down with the last consumer. `memoize`/`select` put a transform in front
//! of it.

pub mod cache_last;
pub mod memoize;
pub mod source;

pub use cache_last::{CacheLast, CacheLastStream};
pub use memoize::memoize;
pub use source::StreamSource;
