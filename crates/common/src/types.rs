use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Unique identifier for a renderable registered with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RenderableId(pub Uuid);

impl RenderableId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RenderableId {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything the visibility pipeline can place in a render list.
///
/// Positions are read concurrently by the relevance and render-list workers,
/// so implementors must make `position` safe to call from any thread.
pub trait Renderable: Send + Sync {
    fn id(&self) -> RenderableId;

    /// Current world-space position.
    fn position(&self) -> DVec3;

    /// Index of the object definition record the GPU should draw.
    fn object_id(&self) -> u32;
}

/// A minimal renderable whose position can be updated lock-free.
///
/// Used by tooling and tests; gameplay objects implement [`Renderable`]
/// directly.
#[derive(Debug)]
pub struct Marker {
    id: RenderableId,
    object_id: u32,
    xyz: [AtomicU64; 3],
}

impl Marker {
    pub fn new(object_id: u32, position: DVec3) -> Self {
        Self {
            id: RenderableId::new(),
            object_id,
            xyz: [
                AtomicU64::new(position.x.to_bits()),
                AtomicU64::new(position.y.to_bits()),
                AtomicU64::new(position.z.to_bits()),
            ],
        }
    }

    pub fn set_position(&self, position: DVec3) {
        self.xyz[0].store(position.x.to_bits(), Ordering::Relaxed);
        self.xyz[1].store(position.y.to_bits(), Ordering::Relaxed);
        self.xyz[2].store(position.z.to_bits(), Ordering::Relaxed);
    }
}

impl Renderable for Marker {
    fn id(&self) -> RenderableId {
        self.id
    }

    fn position(&self) -> DVec3 {
        DVec3::new(
            f64::from_bits(self.xyz[0].load(Ordering::Relaxed)),
            f64::from_bits(self.xyz[1].load(Ordering::Relaxed)),
            f64::from_bits(self.xyz[2].load(Ordering::Relaxed)),
        )
    }

    fn object_id(&self) -> u32 {
        self.object_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderable_id_uniqueness() {
        let a = RenderableId::new();
        let b = RenderableId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn marker_position_round_trips() {
        let m = Marker::new(7, DVec3::new(1.5, -2.0, 3.25));
        assert_eq!(m.position(), DVec3::new(1.5, -2.0, 3.25));
        m.set_position(DVec3::new(-9.0, 0.0, 4.0));
        assert_eq!(m.position(), DVec3::new(-9.0, 0.0, 4.0));
        assert_eq!(m.object_id(), 7);
    }
}
