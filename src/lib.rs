//! BatchRing - Lock-Free Bounded Multi-Producer Single-Consumer Ring
//!
//! A fixed-capacity ring buffer that admits owned values from any number of
//! producer threads without locks, and lets a single consumer claim a
//! contiguous run of entries with one atomic release.
//!
//! Producers never block on a full ring: [`Ring::push`] either takes
//! ownership or hands the value straight back. The consumer side is built
//! for batch drains, so a background worker can claim N entries and pay for
//! one `head` update instead of N.
//!
//! # Example
//!
//! ```
//! use batchring::{Config, Ring};
//!
//! let ring = Ring::new(Config::new(8, false));
//!
//! ring.push("first".to_string()).unwrap();
//! ring.push("second".to_string()).unwrap();
//!
//! let mut claimed = Vec::new();
//! ring.consume_up_to(8, |item| claimed.push(item));
//! assert_eq!(claimed, ["first", "second"]);
//! ```

mod config;
mod invariants;
mod metrics;
mod ring;

pub use config::Config;
pub use metrics::{Metrics, MetricsSnapshot};
pub use ring::{Ring, RingFull};
