//! # Weave Core
//!
//! Small, dependency-light building blocks shared by the Weave client and
//! server:
//!
//! - **Memory**: a fixed-capacity slot pool. Storage is allocated once at
//!   startup and never grows, so handles stay valid across ticks.
//! - **Time**: the [`Clock`] abstraction. The network layer never reads the
//!   system time directly; it asks a clock for elapsed seconds.
//! - **Math**: the transform values an entity exposes to replication.
//!
//! ## Example
//!
//! ```rust
//! use weave_core::{ManualClock, Clock, PoolAllocator};
//!
//! let mut pool: PoolAllocator<u32> = PoolAllocator::new(4);
//! let handle = pool.allocate(7).expect("pool has room");
//! assert_eq!(pool.get(handle), Some(&7));
//!
//! let clock = ManualClock::new();
//! clock.advance(0.5);
//! assert!((clock.now() - 0.5).abs() < f64::EPSILON);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]

pub mod math;
pub mod memory;
pub mod time;

pub use math::{Position, Rotation};
pub use memory::{PoolAllocator, PoolHandle};
pub use time::{Clock, ManualClock, SharedClock, SystemClock};
