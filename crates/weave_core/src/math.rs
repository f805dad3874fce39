//! # Transform Values
//!
//! The parts of an entity's transform that are replicated over the network.
//! Both are plain `f32` triples and travel at full width on the wire.

use bytemuck::{Pod, Zeroable};

/// Position in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Position {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
}

impl Position {
    /// Creates a new position.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Squared distance to another position.
    #[inline]
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Returns this position moved by `(dx, dy, dz)`.
    #[inline]
    #[must_use]
    pub fn offset(self, dx: f32, dy: f32, dz: f32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

/// Euler rotation in radians.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Rotation {
    /// Rotation about the X axis.
    pub pitch: f32,
    /// Rotation about the Y axis.
    pub yaw: f32,
    /// Rotation about the Z axis.
    pub roll: f32,
}

impl Rotation {
    /// Creates a new rotation.
    #[inline]
    #[must_use]
    pub const fn new(pitch: f32, yaw: f32, roll: f32) -> Self {
        Self { pitch, yaw, roll }
    }

    /// Rotation with only a heading component.
    #[inline]
    #[must_use]
    pub const fn from_yaw(yaw: f32) -> Self {
        Self::new(0.0, yaw, 0.0)
    }

    /// Unit forward vector on the ground plane for this heading, as `(x, z)`.
    #[inline]
    #[must_use]
    pub fn forward_xz(self) -> (f32, f32) {
        (self.yaw.sin(), self.yaw.cos())
    }
}
