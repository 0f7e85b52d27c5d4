//! World probing abstraction used by the movement logic.
//!
//! The state machine, slide probe, blink solver and IK solver only ever ask
//! the world simple questions: "what does this ray hit?", "does this capsule
//! overlap anything?". [`PhysicsProbe`] captures exactly those questions so
//! the logic can run against a physics backend (see
//! [`BackendProbe`](crate::backend::BackendProbe)) or an in-memory scene in
//! tests.

use bevy::prelude::*;

use crate::collision::{CollisionData, ProbeFilter};

/// Length of the downward ray used to snap points onto the ground.
pub const GROUND_VECTOR_DISTANCE: f32 = 2000.0;

/// Read-only spatial queries against the physics world.
///
/// The character's own body is always excluded by the implementor.
pub trait PhysicsProbe {
    /// Cast a ray and return the closest hit.
    ///
    /// `direction` must be normalized. A ray starting inside a solid collider
    /// reports a hit at distance zero; when the filter includes sensors, a ray
    /// starting inside a volume reports the volume's boundary instead.
    fn raycast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        filter: ProbeFilter,
    ) -> Option<CollisionData>;

    /// Whether a sphere overlaps any collider.
    fn sphere_overlap(&self, center: Vec3, radius: f32, filter: ProbeFilter) -> bool;

    /// Whether a capsule between `a` and `b` overlaps any collider.
    fn capsule_overlap(&self, a: Vec3, b: Vec3, radius: f32, filter: ProbeFilter) -> bool;

    /// Sweep a capsule along `direction` and return the first hit.
    fn capsule_cast(
        &self,
        a: Vec3,
        b: Vec3,
        radius: f32,
        direction: Vec3,
        max_distance: f32,
        filter: ProbeFilter,
    ) -> Option<CollisionData>;

    /// Whether the straight segment from `from` to `to` is blocked.
    fn linecast(&self, from: Vec3, to: Vec3, filter: ProbeFilter) -> Option<CollisionData> {
        let delta = to - from;
        let length = delta.length();
        if length <= f32::EPSILON {
            return None;
        }
        self.raycast(from, delta / length, length, filter)
    }

    /// Snap `point` down onto the ground below it.
    ///
    /// Returns the point unchanged when nothing is found below.
    fn ground_vector(&self, point: Vec3, filter: ProbeFilter) -> Vec3 {
        match self.raycast(point, Vec3::NEG_Y, GROUND_VECTOR_DISTANCE, filter) {
            Some(hit) => Vec3::new(point.x, hit.point.y, point.z),
            None => point,
        }
    }
}

/// Deterministic in-memory scenes for unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::collision::layers;

    #[derive(Debug, Clone, Copy)]
    pub(crate) enum MockShape {
        /// Everything below the plane through `point` with `normal` is solid.
        HalfSpace { point: Vec3, normal: Vec3 },
        /// Axis-aligned box.
        Aabb { min: Vec3, max: Vec3 },
    }

    #[derive(Debug, Clone, Copy)]
    pub(crate) struct MockCollider {
        pub shape: MockShape,
        pub memberships: u32,
        pub sensor: bool,
    }

    /// A tiny physics world made of half-spaces and boxes.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockWorld {
        pub colliders: Vec<MockCollider>,
    }

    const CAST_STEP: f32 = 0.01;

    impl MockWorld {
        pub fn new() -> Self {
            Self::default()
        }

        /// Flat ground whose surface is at `height`.
        pub fn with_ground(self, height: f32) -> Self {
            self.with_collider(
                MockShape::HalfSpace {
                    point: Vec3::new(0.0, height, 0.0),
                    normal: Vec3::Y,
                },
                layers::GROUND,
                false,
            )
        }

        /// Ground inclined by `degrees`, descending toward `downhill`, passing
        /// through the origin.
        pub fn with_slope(self, degrees: f32, downhill: Vec3) -> Self {
            let downhill = Vec3::new(downhill.x, 0.0, downhill.z).normalize();
            let radians = degrees.to_radians();
            let normal = (Vec3::Y * radians.cos() + downhill * radians.sin()).normalize();
            self.with_collider(
                MockShape::HalfSpace {
                    point: Vec3::ZERO,
                    normal,
                },
                layers::GROUND,
                false,
            )
        }

        /// Solid box on the ground layer.
        pub fn with_box(self, min: Vec3, max: Vec3) -> Self {
            self.with_collider(MockShape::Aabb { min, max }, layers::GROUND, false)
        }

        /// Water volume whose surface is at `max.y`.
        pub fn with_water(self, min: Vec3, max: Vec3) -> Self {
            self.with_collider(MockShape::Aabb { min, max }, layers::WATER, true)
        }

        pub fn with_collider(mut self, shape: MockShape, memberships: u32, sensor: bool) -> Self {
            self.colliders.push(MockCollider {
                shape,
                memberships,
                sensor,
            });
            self
        }

        fn candidates(&self, filter: ProbeFilter) -> impl Iterator<Item = &MockCollider> {
            self.colliders
                .iter()
                .filter(move |c| filter.accepts(c.memberships, c.sensor))
        }

        fn ray_shape(
            shape: &MockShape,
            origin: Vec3,
            direction: Vec3,
            hollow: bool,
        ) -> Option<(f32, Vec3)> {
            match *shape {
                MockShape::HalfSpace { point, normal } => {
                    let d0 = (origin - point).dot(normal);
                    let dn = direction.dot(normal);
                    if d0 > 0.0 {
                        if dn >= 0.0 {
                            return None;
                        }
                        Some((-d0 / dn, normal))
                    } else if !hollow {
                        Some((0.0, normal))
                    } else if dn > 0.0 {
                        Some((-d0 / dn, -normal))
                    } else {
                        None
                    }
                }
                MockShape::Aabb { min, max } => {
                    let mut t_min = f32::NEG_INFINITY;
                    let mut t_max = f32::INFINITY;
                    let mut enter_normal = Vec3::ZERO;
                    let mut exit_normal = Vec3::ZERO;
                    for axis in 0..3 {
                        let o = origin[axis];
                        let d = direction[axis];
                        if d.abs() < 1e-8 {
                            if o < min[axis] || o > max[axis] {
                                return None;
                            }
                            continue;
                        }
                        let mut t1 = (min[axis] - o) / d;
                        let mut t2 = (max[axis] - o) / d;
                        let mut n = Vec3::ZERO;
                        n[axis] = -d.signum();
                        if t1 > t2 {
                            std::mem::swap(&mut t1, &mut t2);
                        }
                        if t1 > t_min {
                            t_min = t1;
                            enter_normal = n;
                        }
                        if t2 < t_max {
                            t_max = t2;
                            exit_normal = -n;
                        }
                    }
                    if t_max < 0.0 || t_min > t_max {
                        return None;
                    }
                    if t_min >= 0.0 {
                        Some((t_min, enter_normal))
                    } else if hollow {
                        Some((t_max, exit_normal))
                    } else {
                        Some((0.0, enter_normal))
                    }
                }
            }
        }

        fn point_distance(shape: &MockShape, p: Vec3) -> f32 {
            match *shape {
                MockShape::HalfSpace { point, normal } => (p - point).dot(normal),
                MockShape::Aabb { min, max } => {
                    let clamped = p.clamp(min, max);
                    if clamped == p {
                        0.0
                    } else {
                        (clamped - p).length()
                    }
                }
            }
        }

        fn closest_point(shape: &MockShape, p: Vec3) -> Vec3 {
            match *shape {
                MockShape::HalfSpace { point, normal } => p - normal * (p - point).dot(normal),
                MockShape::Aabb { min, max } => p.clamp(min, max),
            }
        }

        fn segment_overlaps(shape: &MockShape, a: Vec3, b: Vec3, radius: f32) -> bool {
            (0..=16).any(|i| {
                let p = a.lerp(b, i as f32 / 16.0);
                Self::point_distance(shape, p) <= radius
            })
        }
    }

    impl PhysicsProbe for MockWorld {
        fn raycast(
            &self,
            origin: Vec3,
            direction: Vec3,
            max_distance: f32,
            filter: ProbeFilter,
        ) -> Option<CollisionData> {
            self.candidates(filter)
                .filter_map(|c| Self::ray_shape(&c.shape, origin, direction, filter.include_sensors))
                .filter(|(t, _)| *t <= max_distance)
                .min_by(|a, b| a.0.total_cmp(&b.0))
                .map(|(t, normal)| CollisionData::new(t, normal, origin + direction * t, None))
        }

        fn sphere_overlap(&self, center: Vec3, radius: f32, filter: ProbeFilter) -> bool {
            self.candidates(filter)
                .any(|c| Self::point_distance(&c.shape, center) <= radius)
        }

        fn capsule_overlap(&self, a: Vec3, b: Vec3, radius: f32, filter: ProbeFilter) -> bool {
            self.candidates(filter)
                .any(|c| Self::segment_overlaps(&c.shape, a, b, radius))
        }

        fn capsule_cast(
            &self,
            a: Vec3,
            b: Vec3,
            radius: f32,
            direction: Vec3,
            max_distance: f32,
            filter: ProbeFilter,
        ) -> Option<CollisionData> {
            let direction = direction.normalize_or_zero();
            let steps = (max_distance / CAST_STEP).ceil() as usize;
            for step in 0..=steps {
                let t = (step as f32 * CAST_STEP).min(max_distance);
                let offset = direction * t;
                for collider in self.candidates(filter) {
                    if Self::segment_overlaps(&collider.shape, a + offset, b + offset, radius) {
                        let mid = (a + b) * 0.5 + offset;
                        let point = Self::closest_point(&collider.shape, mid);
                        let normal = (mid - point).normalize_or(-direction);
                        return Some(CollisionData::new(t, normal, point, None));
                    }
                }
            }
            None
        }
    }

    #[test]
    fn ground_vector_snaps_to_surface() {
        let world = MockWorld::new().with_ground(1.5);
        let grounded = world.ground_vector(Vec3::new(3.0, 10.0, -2.0), ProbeFilter::new(layers::GROUND));
        assert!((grounded - Vec3::new(3.0, 1.5, -2.0)).length() < 1e-4);
    }

    #[test]
    fn ground_vector_without_ground_is_identity() {
        let world = MockWorld::new();
        let p = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(world.ground_vector(p, ProbeFilter::new(layers::GROUND)), p);
    }

    #[test]
    fn water_probe_from_inside_reports_surface() {
        let world = MockWorld::new().with_water(Vec3::new(-10.0, -5.0, -10.0), Vec3::new(10.0, 2.0, 10.0));
        let hit = world
            .raycast(Vec3::ZERO, Vec3::Y, 1000.0, ProbeFilter::with_sensors(layers::WATER))
            .expect("water surface above");
        assert!((hit.point.y - 2.0).abs() < 1e-4);

        // Solid probes ignore sensors entirely.
        assert!(world
            .raycast(Vec3::ZERO, Vec3::Y, 1000.0, ProbeFilter::new(layers::WATER))
            .is_none());
    }

    #[test]
    fn linecast_detects_wall() {
        let world = MockWorld::new().with_box(Vec3::new(1.0, 0.0, -1.0), Vec3::new(2.0, 3.0, 1.0));
        let filter = ProbeFilter::new(layers::GROUND);
        assert!(world.linecast(Vec3::new(0.0, 1.0, 0.0), Vec3::new(3.0, 1.0, 0.0), filter).is_some());
        assert!(world.linecast(Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.5, 1.0, 0.0), filter).is_none());
    }

    #[test]
    fn capsule_cast_stops_before_box() {
        let world = MockWorld::new().with_box(Vec3::new(2.0, 0.0, -1.0), Vec3::new(3.0, 3.0, 1.0));
        let hit = world
            .capsule_cast(
                Vec3::new(0.0, 0.5, 0.0),
                Vec3::new(0.0, 1.5, 0.0),
                0.3,
                Vec3::X,
                5.0,
                ProbeFilter::new(layers::GROUND),
            )
            .expect("box in the way");
        assert!((hit.distance - 1.7).abs() < 0.02);
    }
}
