//! Physics backend abstraction.
//!
//! This module defines the trait that physics backends must implement
//! to work with the character controller. The movement logic never talks to
//! a physics engine directly: it reads the world through [`BackendProbe`] and
//! the systems turn its body commands into backend calls.

use std::marker::PhantomData;

use bevy::prelude::*;

use crate::collision::{CollisionData, ProbeFilter};
use crate::probe::PhysicsProbe;

/// Trait for physics backend implementations.
///
/// Implement this trait to integrate a physics engine with the character
/// controller. All functions are static and operate on the ECS world, so the
/// systems can stay generic over the backend.
///
/// Positions are rigid-body translations, not feet positions; the systems
/// convert using [`BodySettings::origin_height`](crate::settings::BodySettings).
///
/// # Example
///
/// For a full implementation, see the `rapier` module's `Rapier3dBackend`.
///
/// ```rust
/// use bevy::prelude::*;
/// use multistate_character_controller::prelude::*;
///
/// #[cfg(feature = "rapier3d")]
/// fn fixed_step(world: &World) -> f32 {
///     Rapier3dBackend::get_fixed_timestep(world)
/// }
/// ```
pub trait CharacterPhysicsBackend: 'static + Send + Sync {
    /// The velocity component type used by this backend.
    type VelocityComponent: Component;

    /// Returns the plugin that sets up this backend.
    fn plugin() -> impl Plugin;

    /// Cast a ray and return the closest hit.
    fn raycast(world: &World, request: &RaycastRequest) -> Option<CollisionData>;

    /// Whether a sphere overlaps any collider accepted by `filter`.
    fn sphere_overlap(
        world: &World,
        center: Vec3,
        radius: f32,
        exclude: Entity,
        filter: ProbeFilter,
    ) -> bool;

    /// Whether a capsule between `a` and `b` overlaps any collider.
    fn capsule_overlap(
        world: &World,
        a: Vec3,
        b: Vec3,
        radius: f32,
        exclude: Entity,
        filter: ProbeFilter,
    ) -> bool;

    /// Sweep a capsule between `a` and `b` along `direction`.
    #[allow(clippy::too_many_arguments)]
    fn capsule_cast(
        world: &World,
        a: Vec3,
        b: Vec3,
        radius: f32,
        direction: Vec3,
        max_distance: f32,
        exclude: Entity,
        filter: ProbeFilter,
    ) -> Option<CollisionData>;

    /// Get the current velocity of an entity.
    fn get_velocity(world: &World, entity: Entity) -> Vec3;

    /// Set the velocity of an entity.
    fn set_velocity(world: &mut World, entity: Entity, velocity: Vec3);

    /// Apply a force to an entity.
    ///
    /// Force is applied over the physics timestep.
    fn apply_force(world: &mut World, entity: Entity, force: Vec3);

    /// Get the rigid-body translation of an entity.
    fn get_position(world: &World, entity: Entity) -> Vec3;

    /// Teleport an entity.
    fn set_position(world: &mut World, entity: Entity, position: Vec3);

    fn get_rotation(world: &World, entity: Entity) -> Quat;

    fn set_rotation(world: &mut World, entity: Entity, rotation: Quat);

    /// Get the fixed timestep delta time.
    fn get_fixed_timestep(world: &World) -> f32;

    /// Set the linear drag of an entity.
    fn set_linear_damping(_world: &mut World, _entity: Entity, _damping: f32) {}

    /// Set the friction coefficient of an entity's collider.
    fn set_friction(_world: &mut World, _entity: Entity, _friction: f32) {}

    /// Resize the character's capsule. `center` is relative to the body.
    fn set_capsule(_world: &mut World, _entity: Entity, _height: f32, _radius: f32, _center: Vec3) {}

    /// Hand the body over to free rigid-body motion.
    fn launch_ragdoll(world: &mut World, entity: Entity, initial_y_velocity: f32) {
        let velocity = Self::get_velocity(world, entity);
        Self::set_velocity(
            world,
            entity,
            Vec3::new(velocity.x, initial_y_velocity, velocity.z),
        );
    }

    /// Take the body back from ragdoll motion.
    fn end_ragdoll(_world: &mut World, _entity: Entity) {}

    /// Get the mass of an entity.
    ///
    /// Used to scale forces so that settings produce consistent acceleration
    /// regardless of actual body mass.
    fn get_mass(_world: &World, _entity: Entity) -> f32 {
        1.0
    }
}

/// Empty plugin for backends that don't need additional setup.
pub struct NoOpBackendPlugin;

impl Plugin for NoOpBackendPlugin {
    fn build(&self, _app: &mut App) {}
}

/// Helper struct for building raycasts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastRequest {
    /// Origin point of the ray.
    pub origin: Vec3,
    /// Direction of the ray (normalized).
    pub direction: Vec3,
    /// Maximum distance to cast.
    pub max_distance: f32,
    /// Entity to exclude from results.
    pub exclude: Option<Entity>,
    pub filter: ProbeFilter,
}

impl RaycastRequest {
    /// Create a new raycast request against every layer.
    pub fn new(origin: Vec3, direction: Vec3, max_distance: f32) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
            max_distance,
            exclude: None,
            filter: ProbeFilter::default(),
        }
    }

    /// Exclude an entity from the raycast.
    pub fn excluding(mut self, entity: Entity) -> Self {
        self.exclude = Some(entity);
        self
    }

    /// Restrict the raycast to a filter.
    pub fn with_filter(mut self, filter: ProbeFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// [`PhysicsProbe`] view of a backend for one character.
///
/// The character's own body is excluded from every query.
pub struct BackendProbe<'w, B: CharacterPhysicsBackend> {
    world: &'w World,
    character: Entity,
    _marker: PhantomData<B>,
}

impl<'w, B: CharacterPhysicsBackend> BackendProbe<'w, B> {
    pub fn new(world: &'w World, character: Entity) -> Self {
        Self {
            world,
            character,
            _marker: PhantomData,
        }
    }
}

impl<B: CharacterPhysicsBackend> PhysicsProbe for BackendProbe<'_, B> {
    fn raycast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        filter: ProbeFilter,
    ) -> Option<CollisionData> {
        let request = RaycastRequest::new(origin, direction, max_distance)
            .excluding(self.character)
            .with_filter(filter);
        B::raycast(self.world, &request)
    }

    fn sphere_overlap(&self, center: Vec3, radius: f32, filter: ProbeFilter) -> bool {
        B::sphere_overlap(self.world, center, radius, self.character, filter)
    }

    fn capsule_overlap(&self, a: Vec3, b: Vec3, radius: f32, filter: ProbeFilter) -> bool {
        B::capsule_overlap(self.world, a, b, radius, self.character, filter)
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
        B::capsule_cast(
            self.world,
            a,
            b,
            radius,
            direction,
            max_distance,
            self.character,
            filter,
        )
    }
}

/// Forces the controller applied to a body, kept apart from external forces.
///
/// Backends accumulate into `pending` during the tick. At the start of the
/// next tick the previously applied amount is subtracted again, so forces
/// added by other code are preserved while ours last exactly one step.
#[derive(Component, Reflect, Debug, Clone, Copy, Default, PartialEq)]
#[reflect(Component)]
pub struct ControllerForces {
    pending: Vec3,
    applied: Vec3,
}

impl ControllerForces {
    pub fn add(&mut self, force: Vec3) {
        self.pending += force;
    }

    /// Forces accumulated so far this tick.
    pub fn pending(&self) -> Vec3 {
        self.pending
    }

    /// Clear the accumulator and return what was applied last tick.
    pub fn prepare_new_frame(&mut self) -> Vec3 {
        self.pending = Vec3::ZERO;
        std::mem::take(&mut self.applied)
    }

    /// Return the accumulated force and remember it for the next subtraction.
    pub fn finalize_frame(&mut self) -> Vec3 {
        self.applied = self.pending;
        self.pending
    }
}
