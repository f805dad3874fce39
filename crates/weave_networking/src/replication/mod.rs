//! # Entity Replication
//!
//! Server-authoritative entity state and its wire form.
//!
//! ## Architecture
//!
//! ```text
//! SERVER                                        CLIENT
//! ┌──────────────┐  build_snapshot   ┌────────┐  apply   ┌──────────────┐
//! │ EntityStore  │ ────────────────> │ State  │ ───────> │ ReplicaMirror│
//! │ (slot pool)  │                   │ packet │          │ (hash map)   │
//! └──────────────┘                   └────────┘          └──────────────┘
//! ```
//!
//! The store owns the only mutable copy of each entity. Gameplay changes it
//! through setters that track which field groups changed; snapshots carry
//! those groups to clients, which merge them into their mirror.

mod entity;
mod kind;
mod mirror;
mod record;
mod store;

pub use entity::ReplicatedEntity;
pub use kind::{ClassType, EntityKind, ProjectileState, Replicate, TankState};
pub use mirror::{RemoteEntity, ReplicaMirror};
pub use record::{DirtyMask, EntityRecord, NetworkId, ReplicationAction};
pub use store::{EntityStore, ReplicationError, ReplicationMode, ReplicationResult};
