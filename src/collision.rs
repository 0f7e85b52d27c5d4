//! Probe result and filter structures.
//!
//! These structures hold the results of physics queries (raycasts and shape
//! casts) used for ground detection, slide probing, blink validation and IK.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Named collision layer bits used by the default [`ProbeLayers`](crate::settings::ProbeLayers).
pub mod layers {
    /// Walkable geometry.
    pub const GROUND: u32 = 1 << 0;
    /// Water volumes (usually sensors).
    pub const WATER: u32 = 1 << 1;
    /// Surfaces that keep a flying character airborne.
    pub const DISABLE_LAND: u32 = 1 << 2;
    /// Geometry that blocks blinks.
    pub const BLINK: u32 = 1 << 3;
    /// Every layer.
    pub const ALL: u32 = u32::MAX;
}

/// Information about a raycast/shapecast collision.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CollisionData {
    /// Distance along the cast to the hit.
    pub distance: f32,
    /// Normal of the surface at hit point.
    pub normal: Vec3,
    /// World position of the hit point.
    pub point: Vec3,
    /// Entity that was hit (if any).
    pub entity: Option<Entity>,
}

impl CollisionData {
    /// Create a collision result.
    pub fn new(distance: f32, normal: Vec3, point: Vec3, entity: Option<Entity>) -> Self {
        Self {
            distance,
            normal,
            point,
            entity,
        }
    }
}

/// Which colliders a probe may hit.
///
/// `layers` is matched against collider memberships. Sensors are skipped
/// unless `include_sensors` is set, which water probes need because water
/// volumes are normally sensors.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFilter {
    /// Layer bits this probe tests against.
    pub layers: u32,
    /// Whether sensor colliders count as hits.
    pub include_sensors: bool,
}

impl Default for ProbeFilter {
    fn default() -> Self {
        Self::new(layers::ALL)
    }
}

impl ProbeFilter {
    /// Solid colliders on the given layers.
    pub const fn new(layers: u32) -> Self {
        Self {
            layers,
            include_sensors: false,
        }
    }

    /// Solid and sensor colliders on the given layers.
    pub const fn with_sensors(layers: u32) -> Self {
        Self {
            layers,
            include_sensors: true,
        }
    }

    /// Whether a collider with these memberships passes the filter.
    #[inline]
    pub fn accepts(&self, memberships: u32, is_sensor: bool) -> bool {
        self.layers & memberships != 0 && (self.include_sensors || !is_sensor)
    }
}
