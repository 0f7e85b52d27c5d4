//! Rapier3D physics backend implementation.
//!
//! This module provides the physics backend for Bevy Rapier3D.
//! Enable with the `rapier3d` feature.

use std::collections::HashSet;

use bevy::prelude::*;
use bevy_rapier3d::geometry::Group;
use bevy_rapier3d::prelude::*;

use crate::backend::{CharacterPhysicsBackend, ControllerForces, RaycastRequest};
use crate::collision::{CollisionData, ProbeFilter};
use crate::events::RailCapContact;
use crate::rail::RailCap;
use crate::runtime::MovementRuntime;
use crate::systems::PhysicsGyro;
use crate::MultiStateControllerSet;

/// Rapier3D physics backend for the character controller.
///
/// Queries go through the default Rapier context. Forces are accumulated in
/// [`ControllerForces`] and handed to [`ExternalForce`] once per tick.
pub struct Rapier3dBackend;

/// Borrow the default Rapier context from the world.
fn with_context<R>(world: &World, f: impl FnOnce(&RapierContext) -> Option<R>) -> Option<R> {
    let mut state = world.try_query_filtered::<(
        &RapierContextSimulation,
        &RapierContextColliders,
        &RapierContextJoints,
        &RapierQueryPipeline,
        &RapierRigidBodySet,
    ), With<DefaultRapierContext>>()?;
    let (simulation, colliders, joints, query_pipeline, rigidbody_set) = state.single(world).ok()?;
    let context = RapierContext {
        simulation,
        colliders,
        joints,
        query_pipeline,
        rigidbody_set,
    };
    f(&context)
}

fn query_filter(exclude: Option<Entity>, filter: ProbeFilter) -> QueryFilter<'static> {
    let mut query = QueryFilter::default().groups(CollisionGroups::new(
        Group::ALL,
        Group::from_bits_truncate(filter.layers),
    ));
    if !filter.include_sensors {
        query = query.exclude_sensors();
    }
    if let Some(entity) = exclude {
        query = query.exclude_rigid_body(entity);
    }
    query
}

/// A capsule between `a` and `b`, positioned at its midpoint.
fn capsule_between(a: Vec3, b: Vec3, radius: f32) -> (Vec3, Collider) {
    let mid = (a + b) * 0.5;
    (mid, Collider::capsule(a - mid, b - mid, radius))
}

/// The entity carrying the character's capsule: its gyro if it has one.
fn collider_entity(world: &World, character: Entity) -> Entity {
    world
        .try_query::<(Entity, &PhysicsGyro)>()
        .and_then(|mut gyros| {
            gyros
                .iter(world)
                .find(|(_, gyro)| gyro.character == character)
                .map(|(entity, _)| entity)
        })
        .unwrap_or(character)
}

impl CharacterPhysicsBackend for Rapier3dBackend {
    type VelocityComponent = Velocity;

    fn plugin() -> impl Plugin {
        Rapier3dBackendPlugin
    }

    fn raycast(world: &World, request: &RaycastRequest) -> Option<CollisionData> {
        if request.direction == Vec3::ZERO {
            return None;
        }
        with_context(world, |context| {
            context
                .cast_ray_and_get_normal(
                    request.origin,
                    request.direction,
                    request.max_distance,
                    true,
                    query_filter(request.exclude, request.filter),
                )
                .map(|(entity, hit)| {
                    CollisionData::new(hit.time_of_impact, hit.normal, hit.point, Some(entity))
                })
        })
    }

    fn sphere_overlap(
        world: &World,
        center: Vec3,
        radius: f32,
        exclude: Entity,
        filter: ProbeFilter,
    ) -> bool {
        let shape = Collider::ball(radius);
        with_context(world, |context| {
            context.query_pipeline.intersection_with_shape(
                context.colliders,
                context.rigidbody_set,
                center,
                Quat::IDENTITY,
                &shape,
                query_filter(Some(exclude), filter),
            )
        })
        .is_some()
    }

    fn capsule_overlap(
        world: &World,
        a: Vec3,
        b: Vec3,
        radius: f32,
        exclude: Entity,
        filter: ProbeFilter,
    ) -> bool {
        let (position, shape) = capsule_between(a, b, radius);
        with_context(world, |context| {
            context.query_pipeline.intersection_with_shape(
                context.colliders,
                context.rigidbody_set,
                position,
                Quat::IDENTITY,
                &shape,
                query_filter(Some(exclude), filter),
            )
        })
        .is_some()
    }

    fn capsule_cast(
        world: &World,
        a: Vec3,
        b: Vec3,
        radius: f32,
        direction: Vec3,
        max_distance: f32,
        exclude: Entity,
        filter: ProbeFilter,
    ) -> Option<CollisionData> {
        let direction = direction.normalize_or_zero();
        if direction == Vec3::ZERO {
            return None;
        }
        let (position, shape) = capsule_between(a, b, radius);
        with_context(world, |context| {
            context
                .cast_shape(
                    position,
                    Quat::IDENTITY,
                    direction,
                    &shape,
                    ShapeCastOptions {
                        max_time_of_impact: max_distance,
                        stop_at_penetration: false,
                        compute_impact_geometry_on_penetration: true,
                        ..default()
                    },
                    query_filter(Some(exclude), filter),
                )
                .map(|(entity, hit)| {
                    let normal = hit.details.map(|d| d.normal1).unwrap_or(-direction);
                    // Contact lies on the swept capsule, against the surface normal.
                    let point = position + direction * hit.time_of_impact - normal * radius;
                    CollisionData::new(hit.time_of_impact, normal, point, Some(entity))
                })
        })
    }

    fn get_velocity(world: &World, entity: Entity) -> Vec3 {
        world
            .get::<Velocity>(entity)
            .map(|v| v.linvel)
            .unwrap_or(Vec3::ZERO)
    }

    fn set_velocity(world: &mut World, entity: Entity, velocity: Vec3) {
        if let Some(mut vel) = world.get_mut::<Velocity>(entity) {
            vel.linvel = velocity;
        }
    }

    fn apply_force(world: &mut World, entity: Entity, force: Vec3) {
        // Accumulated here and handed to ExternalForce by apply_controller_forces.
        if let Some(mut forces) = world.get_mut::<ControllerForces>(entity) {
            forces.add(force);
        }
    }

    fn get_position(world: &World, entity: Entity) -> Vec3 {
        world
            .get::<Transform>(entity)
            .map(|t| t.translation)
            .or_else(|| {
                world
                    .get::<GlobalTransform>(entity)
                    .map(GlobalTransform::translation)
            })
            .unwrap_or(Vec3::ZERO)
    }

    fn set_position(world: &mut World, entity: Entity, position: Vec3) {
        if let Some(mut transform) = world.get_mut::<Transform>(entity) {
            transform.translation = position;
        }
    }

    fn get_rotation(world: &World, entity: Entity) -> Quat {
        world
            .get::<Transform>(entity)
            .map(|t| t.rotation)
            .unwrap_or(Quat::IDENTITY)
    }

    fn set_rotation(world: &mut World, entity: Entity, rotation: Quat) {
        if let Some(mut transform) = world.get_mut::<Transform>(entity) {
            if transform.rotation != rotation {
                transform.rotation = rotation;
            }
        }
    }

    fn get_fixed_timestep(world: &World) -> f32 {
        world
            .get_resource::<Time<Fixed>>()
            .map(|t| t.delta_secs())
            .filter(|&d| d > 0.0)
            .unwrap_or(1.0 / 60.0)
    }

    fn set_linear_damping(world: &mut World, entity: Entity, damping: f32) {
        if let Some(mut current) = world.get_mut::<Damping>(entity) {
            if current.linear_damping != damping {
                current.linear_damping = damping;
            }
        }
    }

    fn set_friction(world: &mut World, entity: Entity, friction: f32) {
        let target = collider_entity(world, entity);
        match world.get_mut::<Friction>(target) {
            Some(mut current) => {
                if current.coefficient != friction {
                    current.coefficient = friction;
                }
            }
            None => {
                if let Ok(mut entity) = world.get_entity_mut(target) {
                    entity.insert(Friction::coefficient(friction));
                }
            }
        }
    }

    fn set_capsule(world: &mut World, entity: Entity, height: f32, radius: f32, center: Vec3) {
        let target = collider_entity(world, entity);
        let half_height = (height * 0.5 - radius).max(0.0);
        let collider = Collider::compound(vec![(
            center,
            Quat::IDENTITY,
            Collider::capsule_y(half_height, radius),
        )]);
        if let Ok(mut entity) = world.get_entity_mut(target) {
            entity.insert(collider);
        }
    }

    fn launch_ragdoll(world: &mut World, entity: Entity, initial_y_velocity: f32) {
        let Some(axes) = world.get::<LockedAxes>(entity).copied() else {
            return;
        };
        if world.get::<RagdollBody>(entity).is_none() {
            if let Ok(mut body) = world.get_entity_mut(entity) {
                body.insert((
                    RagdollBody {
                        locked_axes: axes.bits(),
                    },
                    LockedAxes::empty(),
                ));
            }
        }
        if let Some(mut velocity) = world.get_mut::<Velocity>(entity) {
            velocity.linvel.y = initial_y_velocity;
        }
    }

    fn end_ragdoll(world: &mut World, entity: Entity) {
        let Some(ragdoll) = world.get::<RagdollBody>(entity).copied() else {
            return;
        };
        if let Ok(mut body) = world.get_entity_mut(entity) {
            body.remove::<RagdollBody>();
            body.insert(LockedAxes::from_bits_truncate(ragdoll.locked_axes));
        }
        if let Some(mut velocity) = world.get_mut::<Velocity>(entity) {
            velocity.angvel = Vec3::ZERO;
        }
    }

    fn get_mass(world: &World, entity: Entity) -> f32 {
        world
            .get::<ReadMassProperties>(entity)
            .map(|props| props.mass)
            .filter(|mass| *mass > 0.0 && mass.is_finite())
            .unwrap_or(1.0)
    }
}

/// Axis locks saved while a body is ragdolling.
#[derive(Component, Reflect, Debug, Clone, Copy)]
#[reflect(Component)]
pub struct RagdollBody {
    /// [`LockedAxes`] bits to restore.
    pub locked_axes: u8,
}

/// Rail cap sensors the characters are currently inside.
#[derive(Resource, Debug, Default)]
pub struct RailCapOverlaps(HashSet<(Entity, Entity)>);

impl RailCapOverlaps {
    pub fn contains(&self, cap: Entity, character: Entity) -> bool {
        self.0.contains(&(cap, character))
    }
}

/// Plugin that sets up Rapier3D-specific systems for the character controller.
pub struct Rapier3dBackendPlugin;

impl Plugin for Rapier3dBackendPlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<RagdollBody>()
            .init_resource::<RailCapOverlaps>();

        app.add_systems(
            FixedUpdate,
            (clear_controller_forces, collect_rail_cap_contacts)
                .in_set(MultiStateControllerSet::Preparation),
        );

        app.add_systems(
            FixedUpdate,
            apply_controller_forces.in_set(MultiStateControllerSet::FinalApplication),
        );
    }
}

/// Clear controller forces at the start of each tick.
///
/// Subtracts what we applied last tick from [`ExternalForce`], so forces set
/// by other code are preserved while ours last exactly one step.
pub fn clear_controller_forces(mut q: Query<(&mut ExternalForce, &mut ControllerForces)>) {
    for (mut ext_force, mut forces) in &mut q {
        let previous = forces.prepare_new_frame();
        if previous != Vec3::ZERO {
            ext_force.force -= previous;
        }
    }
}

/// Apply the forces accumulated during the tick.
pub fn apply_controller_forces(mut q: Query<(&mut ExternalForce, &mut ControllerForces)>) {
    for (mut ext_force, mut forces) in &mut q {
        let force = forces.finalize_frame();
        if force != Vec3::ZERO {
            ext_force.force += force;
        }
    }
}

/// Resolve a collider entity to the character that owns it.
fn owning_character(
    entity: Entity,
    characters: &Query<(), With<MovementRuntime>>,
    gyros: &Query<&PhysicsGyro>,
) -> Option<Entity> {
    if characters.contains(entity) {
        return Some(entity);
    }
    gyros.get(entity).ok().map(|gyro| gyro.character)
}

/// Turn Rapier collision events on rail cap sensors into [`RailCapContact`]s.
///
/// Enter fires once with `stay: false`; every later tick inside the sensor
/// fires with `stay: true`.
pub fn collect_rail_cap_contacts(
    mut collisions: EventReader<CollisionEvent>,
    mut overlaps: ResMut<RailCapOverlaps>,
    caps: Query<(), With<RailCap>>,
    characters: Query<(), With<MovementRuntime>>,
    gyros: Query<&PhysicsGyro>,
    mut contacts: EventWriter<RailCapContact>,
) {
    for (cap, character) in overlaps.0.iter().copied() {
        contacts.write(RailCapContact {
            cap,
            character,
            stay: true,
        });
    }

    for collision in collisions.read() {
        let (a, b, started) = match *collision {
            CollisionEvent::Started(a, b, _) => (a, b, true),
            CollisionEvent::Stopped(a, b, _) => (a, b, false),
        };
        let pair = if caps.contains(a) {
            owning_character(b, &characters, &gyros).map(|character| (a, character))
        } else if caps.contains(b) {
            owning_character(a, &characters, &gyros).map(|character| (b, character))
        } else {
            None
        };
        let Some((cap, character)) = pair else {
            continue;
        };

        if started {
            if overlaps.0.insert((cap, character)) {
                contacts.write(RailCapContact {
                    cap,
                    character,
                    stay: false,
                });
            }
        } else {
            overlaps.0.remove(&(cap, character));
        }
    }
}

/// Components for a rail cap trigger volume.
///
/// Pair with a [`RailCap`] and a [`Transform`].
pub fn rail_cap_sensor(half_extents: Vec3) -> (Collider, Sensor, ActiveEvents) {
    (
        Collider::cuboid(half_extents.x, half_extents.y, half_extents.z),
        Sensor,
        ActiveEvents::COLLISION_EVENTS,
    )
}

/// Bundle for creating a character with Rapier3D physics.
///
/// The controller supplies its own falling pull, so Rapier gravity is off
/// and rotation is locked; facing is set through the transform.
///
/// # Example
///
/// ```ignore
/// use bevy::prelude::*;
/// use bevy_rapier3d::prelude::*;
/// use multistate_character_controller::prelude::*;
/// use multistate_character_controller::rapier::Rapier3dCharacterBundle;
///
/// fn spawn_player(mut commands: Commands) {
///     let settings = MultiStateSettings::default();
///     commands.spawn((
///         Transform::from_xyz(0.0, 1.0, 0.0),
///         MultiStateCharacter::new(settings, Vec3::ZERO),
///         Rapier3dCharacterBundle::new(),
///         Collider::capsule_y(0.5, 0.5),
///     ));
/// }
/// ```
#[derive(Bundle)]
pub struct Rapier3dCharacterBundle {
    pub rigid_body: RigidBody,
    /// Updated by Rapier each physics step.
    pub velocity: Velocity,
    /// Controller forces are written here once per tick.
    pub external_force: ExternalForce,
    pub locked_axes: LockedAxes,
    /// Linear damping is driven by the movement state's drag.
    pub damping: Damping,
    pub friction: Friction,
    pub gravity_scale: GravityScale,
    /// Used to scale forces to the body's mass.
    pub mass_properties: ReadMassProperties,
    pub controller_forces: ControllerForces,
}

impl Default for Rapier3dCharacterBundle {
    fn default() -> Self {
        Self::new()
    }
}

impl Rapier3dCharacterBundle {
    /// Dynamic, upright, gravity-free body.
    pub fn new() -> Self {
        Self {
            rigid_body: RigidBody::Dynamic,
            velocity: Velocity::default(),
            external_force: ExternalForce::default(),
            locked_axes: LockedAxes::ROTATION_LOCKED,
            damping: Damping {
                linear_damping: 0.0,
                angular_damping: 1.0,
            },
            friction: Friction::coefficient(1.0),
            gravity_scale: GravityScale(0.0),
            mass_properties: ReadMassProperties::default(),
            controller_forces: ControllerForces::default(),
        }
    }

    pub fn with_body(mut self, body: RigidBody) -> Self {
        self.rigid_body = body;
        self
    }

    /// Set which axes should be locked for the rigid body.
    ///
    /// Ragdolling releases every axis and restores these afterwards.
    pub fn with_locked_axes(mut self, axes: LockedAxes) -> Self {
        self.locked_axes = axes;
        self
    }

    pub fn with_damping(mut self, linear: f32, angular: f32) -> Self {
        self.damping = Damping {
            linear_damping: linear,
            angular_damping: angular,
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::ecs::system::RunSystemOnce;

    fn create_test_app() -> App {
        let mut app = App::new();
        app.add_plugins((MinimalPlugins, TransformPlugin));
        app.add_plugins(RapierPhysicsPlugin::<NoUserData>::default());
        app.insert_resource(Time::<Fixed>::from_hz(60.0));
        app
    }

    fn spawn_floor(app: &mut App) -> Entity {
        app.world_mut()
            .spawn((
                Transform::from_xyz(0.0, -0.5, 0.0),
                RigidBody::Fixed,
                Collider::cuboid(20.0, 0.5, 20.0),
            ))
            .id()
    }

    // ==== Body Tests ====

    #[test]
    fn rapier_backend_get_position() {
        let mut app = create_test_app();

        let entity = app
            .world_mut()
            .spawn((Transform::from_xyz(10.0, 20.0, 30.0), RigidBody::Dynamic))
            .id();

        app.update();

        let pos = Rapier3dBackend::get_position(app.world(), entity);
        assert!((pos - Vec3::new(10.0, 20.0, 30.0)).length() < 0.01);
    }

    #[test]
    fn rapier_backend_velocity() {
        let mut app = create_test_app();

        let entity = app
            .world_mut()
            .spawn((
                Transform::default(),
                RigidBody::Dynamic,
                Velocity::linear(Vec3::new(5.0, 3.0, -2.0)),
            ))
            .id();

        app.update();

        let vel = Rapier3dBackend::get_velocity(app.world(), entity);
        assert!((vel.x - 5.0).abs() < 0.01);
        assert!((vel.z + 2.0).abs() < 0.01);

        Rapier3dBackend::set_velocity(app.world_mut(), entity, Vec3::new(0.0, 0.0, 4.0));

        let vel = Rapier3dBackend::get_velocity(app.world(), entity);
        assert_eq!(vel, Vec3::new(0.0, 0.0, 4.0));
    }

    #[test]
    fn mass_falls_back_to_one() {
        let mut app = create_test_app();
        let entity = app.world_mut().spawn(Transform::default()).id();
        assert_eq!(Rapier3dBackend::get_mass(app.world(), entity), 1.0);
    }

    #[test]
    fn forces_are_accumulated_until_applied() {
        let mut app = create_test_app();
        let entity = app
            .world_mut()
            .spawn((Transform::default(), Rapier3dCharacterBundle::new()))
            .id();

        Rapier3dBackend::apply_force(app.world_mut(), entity, Vec3::X * 3.0);
        Rapier3dBackend::apply_force(app.world_mut(), entity, Vec3::Z);
        assert_eq!(
            app.world().get::<ExternalForce>(entity).unwrap().force,
            Vec3::ZERO,
            "PROOF: nothing reaches Rapier before the final application"
        );

        app.world_mut()
            .run_system_once(apply_controller_forces)
            .expect("system runs");
        assert_eq!(
            app.world().get::<ExternalForce>(entity).unwrap().force,
            Vec3::new(3.0, 0.0, 1.0)
        );

        app.world_mut()
            .run_system_once(clear_controller_forces)
            .expect("system runs");
        assert_eq!(
            app.world().get::<ExternalForce>(entity).unwrap().force,
            Vec3::ZERO,
            "PROOF: controller forces last one tick"
        );
    }

    #[test]
    fn ragdoll_releases_and_restores_axes() {
        let mut app = create_test_app();
        let entity = app
            .world_mut()
            .spawn((Transform::default(), Rapier3dCharacterBundle::new()))
            .id();

        Rapier3dBackend::launch_ragdoll(app.world_mut(), entity, 4.0);
        assert_eq!(*app.world().get::<LockedAxes>(entity).unwrap(), LockedAxes::empty());
        assert_eq!(app.world().get::<Velocity>(entity).unwrap().linvel.y, 4.0);

        Rapier3dBackend::end_ragdoll(app.world_mut(), entity);
        assert_eq!(
            *app.world().get::<LockedAxes>(entity).unwrap(),
            LockedAxes::ROTATION_LOCKED
        );
        assert!(app.world().get::<RagdollBody>(entity).is_none());
    }

    // ==== Query Tests ====

    #[test]
    fn raycast_hits_floor_and_skips_self() {
        let mut app = create_test_app();
        let floor = spawn_floor(&mut app);
        let body = app
            .world_mut()
            .spawn((
                Transform::from_xyz(0.0, 1.0, 0.0),
                RigidBody::Fixed,
                Collider::ball(0.5),
            ))
            .id();
        app.update();
        app.update();

        let request = RaycastRequest::new(Vec3::new(0.0, 1.0, 0.0), Vec3::NEG_Y, 5.0).excluding(body);
        let hit = Rapier3dBackend::raycast(app.world(), &request).expect("floor below");
        assert_eq!(hit.entity, Some(floor));
        assert!((hit.distance - 1.0).abs() < 0.01, "got {}", hit.distance);
        assert!(hit.normal.dot(Vec3::Y) > 0.99);
    }

    #[test]
    fn probes_respect_layers() {
        let mut app = create_test_app();
        app.world_mut().spawn((
            Transform::from_xyz(0.0, -0.5, 0.0),
            RigidBody::Fixed,
            Collider::cuboid(20.0, 0.5, 20.0),
            CollisionGroups::new(
                Group::from_bits_truncate(crate::collision::layers::WATER),
                Group::ALL,
            ),
        ));
        app.update();
        app.update();

        let me = Entity::from_raw(9999);
        let ground = ProbeFilter::new(crate::collision::layers::GROUND);
        let water = ProbeFilter::new(crate::collision::layers::WATER);
        assert!(!Rapier3dBackend::sphere_overlap(app.world(), Vec3::ZERO, 0.3, me, ground));
        assert!(Rapier3dBackend::sphere_overlap(app.world(), Vec3::ZERO, 0.3, me, water));
    }

    #[test]
    fn capsule_cast_reports_distance_to_wall() {
        let mut app = create_test_app();
        app.world_mut().spawn((
            Transform::from_xyz(0.0, 1.0, 5.5),
            RigidBody::Fixed,
            Collider::cuboid(5.0, 5.0, 0.5),
        ));
        app.update();
        app.update();

        let me = Entity::from_raw(9999);
        let hit = Rapier3dBackend::capsule_cast(
            app.world(),
            Vec3::new(0.0, 0.5, 0.0),
            Vec3::new(0.0, 1.5, 0.0),
            0.5,
            Vec3::Z,
            10.0,
            me,
            ProbeFilter::default(),
        )
        .expect("wall ahead");
        assert!((hit.distance - 4.5).abs() < 0.05, "got {}", hit.distance);
        assert!(hit.normal.dot(Vec3::NEG_Z) > 0.9);
    }

    // ==== Bundle Tests ====

    #[test]
    fn rapier_character_bundle_creates_valid_entity() {
        let mut app = create_test_app();

        let entity = app
            .world_mut()
            .spawn((
                Transform::default(),
                Rapier3dCharacterBundle::new(),
                Collider::capsule_y(0.5, 0.5),
            ))
            .id();

        app.update();

        assert!(app.world().get::<RigidBody>(entity).is_some());
        assert!(app.world().get::<ControllerForces>(entity).is_some());
        assert_eq!(app.world().get::<GravityScale>(entity).unwrap().0, 0.0);
    }

    #[test]
    fn capsule_goes_on_the_gyro_when_present() {
        let mut app = create_test_app();
        let character = app
            .world_mut()
            .spawn((Transform::default(), Rapier3dCharacterBundle::new()))
            .id();
        let gyro = app
            .world_mut()
            .spawn((Transform::default(), PhysicsGyro { character }))
            .id();
        app.world_mut().entity_mut(character).add_child(gyro);

        Rapier3dBackend::set_capsule(app.world_mut(), character, 1.0, 0.5, Vec3::ZERO);
        assert!(app.world().get::<Collider>(gyro).is_some());
        assert!(app.world().get::<Collider>(character).is_none());
    }
}
