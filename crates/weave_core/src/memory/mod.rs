//! # Memory Management
//!
//! Pre-allocated storage for objects whose maximum count is known at
//! startup.
//!
//! The replication store keeps every networked entity in one of these pools:
//! capacity is fixed, a full pool refuses new objects instead of growing, and
//! a freed slot is handed out again by the next allocation.

mod pool;

pub use pool::{PoolAllocator, PoolHandle};
