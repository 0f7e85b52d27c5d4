//! Core controller systems.
//!
//! These systems run the movement logic for every character and apply its
//! results through the physics backend. They are generic over the backend
//! so the same logic drives any physics engine.
//!
//! Characters are processed one at a time: their components are cloned out
//! of the world, ticked against a [`BackendProbe`], and written back.

use bevy::prelude::*;

use crate::animation::AnimationParameters;
use crate::backend::{BackendProbe, CharacterPhysicsBackend};
use crate::control::ControlVector;
use crate::events::{
    self, AnimationTriggerFired, AnimationTriggerReset, ControllerEvent, MovementStateChanged,
    PlayerLanded, RailCapContact,
};
use crate::ik::{solve_ik, IkFrame, IkRig};
use crate::machine::{BodyCommand, BodyState, MovementContext, TickOutputs};
use crate::rail::{RailCap, RailDolly, RailEvaluation, RailSet, RailSystem};
use crate::requests::{ControllerRequest, ControllerRequests};
use crate::runtime::{ColliderState, MovementRuntime, ProfileChangeRequest};
use crate::settings::{MultiStateSettings, ProfileLibrary};
use crate::state::MovementState;

/// The visual mesh of a character. Follows the character's representation.
#[derive(Component, Reflect, Debug, Clone, Copy, PartialEq)]
#[reflect(Component)]
pub struct CharacterRepresentation {
    pub character: Entity,
}

/// Child collider proxy that leans during flight and swimming.
#[derive(Component, Reflect, Debug, Clone, Copy, PartialEq)]
#[reflect(Component)]
pub struct PhysicsGyro {
    pub character: Entity,
}

type Snapshot = (
    Entity,
    MultiStateSettings,
    MovementRuntime,
    ControlVector,
    AnimationParameters,
);

fn collect_characters(world: &mut World) -> Vec<Snapshot> {
    world
        .query::<(
            Entity,
            &MultiStateSettings,
            &MovementRuntime,
            Option<&ControlVector>,
            &AnimationParameters,
        )>()
        .iter(world)
        .map(|(entity, settings, runtime, control, animation)| {
            (
                entity,
                settings.clone(),
                runtime.clone(),
                control.cloned().unwrap_or_default(),
                animation.clone(),
            )
        })
        .collect()
}

fn drain_requests(world: &mut World, entity: Entity) -> Vec<ControllerRequest> {
    world
        .get_mut::<ControllerRequests>(entity)
        .map(|mut requests| requests.drain().collect())
        .unwrap_or_default()
}

fn collect_rails(world: &mut World) -> RailSet {
    let mut rails = RailSet::new();
    for (entity, rail) in world.query::<(Entity, &RailSystem)>().iter(world) {
        rails.insert(entity, rail.clone());
    }
    rails
}

fn store_rails(world: &mut World, rails: RailSet) {
    for (entity, rail) in rails.into_inner() {
        if let Some(mut component) = world.get_mut::<RailSystem>(entity) {
            *component = rail;
        }
    }
}

fn read_body<B: CharacterPhysicsBackend>(
    world: &World,
    entity: Entity,
    settings: &MultiStateSettings,
) -> BodyState {
    BodyState {
        position: B::get_position(world, entity) - Vec3::Y * settings.body.origin_height,
        rotation: B::get_rotation(world, entity),
        velocity: B::get_velocity(world, entity),
    }
}

fn store_character(
    world: &mut World,
    entity: Entity,
    settings: MultiStateSettings,
    runtime: MovementRuntime,
    animation: AnimationParameters,
) {
    if let Ok(mut character) = world.get_entity_mut(entity) {
        character.insert((settings, runtime, animation));
    }
}

/// Apply body commands and publish events produced by a tick.
fn apply_outputs<B: CharacterPhysicsBackend>(
    world: &mut World,
    entity: Entity,
    settings: &MultiStateSettings,
    out: &TickOutputs,
) {
    let mass = B::get_mass(world, entity);
    let origin = Vec3::Y * settings.body.origin_height;

    for command in out.commands.iter().copied() {
        match command {
            BodyCommand::AddForce(force) => B::apply_force(world, entity, force * mass),
            BodyCommand::SetVelocity(velocity) => B::set_velocity(world, entity, velocity),
            BodyCommand::SetPosition(feet) => B::set_position(world, entity, feet + origin),
            BodyCommand::SetRotation(rotation) => B::set_rotation(world, entity, rotation),
            BodyCommand::SetDrag(drag) => B::set_linear_damping(world, entity, drag),
            BodyCommand::SetFriction(friction) => B::set_friction(world, entity, friction),
            BodyCommand::LaunchRagdoll(velocity) => B::launch_ragdoll(world, entity, velocity),
        }
    }

    for event in &out.events {
        match event {
            ControllerEvent::Landed { fall_time } => {
                world.send_event(PlayerLanded {
                    entity,
                    fall_time: *fall_time,
                });
            }
            ControllerEvent::StateChanged { from, to } => {
                if *from == MovementState::Ragdoll {
                    B::end_ragdoll(world, entity);
                }
                world.send_event(MovementStateChanged {
                    entity,
                    from: *from,
                    to: *to,
                });
            }
            ControllerEvent::AnimationTrigger(trigger) => {
                world.send_event(AnimationTriggerFired {
                    entity,
                    trigger: trigger.clone(),
                });
            }
            ControllerEvent::ResetAnimationTrigger(trigger) => {
                world.send_event(AnimationTriggerReset {
                    entity,
                    trigger: trigger.clone(),
                });
            }
            ControllerEvent::RailLatched { rail, position } => {
                world.send_event(events::RailLatched {
                    character: entity,
                    rail: *rail,
                    position: *position,
                });
            }
            ControllerEvent::RailUnlatched { rail, key } => {
                world.send_event(events::RailUnlatched {
                    character: entity,
                    rail: *rail,
                    key: key.clone(),
                });
            }
        }
    }
}

/// Run one fixed tick of the movement logic for every character.
///
/// Queued [`ControllerRequests`] are drained and applied at the start of the
/// tick, before identification.
pub fn run_movement_tick<B: CharacterPhysicsBackend>(world: &mut World) {
    let characters = collect_characters(world);
    if characters.is_empty() {
        return;
    }
    let dt = B::get_fixed_timestep(world);
    let mut rails = collect_rails(world);

    for (entity, mut settings, mut runtime, control, mut animation) in characters {
        let requests = drain_requests(world, entity);
        let body = read_body::<B>(world, entity, &settings);
        let mut out = TickOutputs::default();
        {
            let probe = BackendProbe::<B>::new(world, entity);
            let mut ctx = MovementContext {
                entity,
                settings: &mut settings,
                runtime: &mut runtime,
                control: &control,
                body,
                dt,
                probe: &probe,
                rails: &mut rails,
                animation: &mut animation,
                out: &mut out,
            };
            ctx.tick(requests);
        }
        apply_outputs::<B>(world, entity, &settings, &out);
        store_character(world, entity, settings, runtime, animation);
    }

    store_rails(world, rails);
}

/// Late pass: collider shape, physics gyro and deferred profile changes.
pub fn run_post_tick<B: CharacterPhysicsBackend>(world: &mut World) {
    let characters = collect_characters(world);
    if characters.is_empty() {
        return;
    }
    let dt = B::get_fixed_timestep(world);

    for (entity, mut settings, mut runtime, control, mut animation) in characters {
        let profile = take_profile(world, entity);
        let collider_before: ColliderState = runtime.collider;
        let body = read_body::<B>(world, entity, &settings);
        let mut rails = RailSet::new();
        let mut out = TickOutputs::default();
        {
            let probe = BackendProbe::<B>::new(world, entity);
            let mut ctx = MovementContext {
                entity,
                settings: &mut settings,
                runtime: &mut runtime,
                control: &control,
                body,
                dt,
                probe: &probe,
                rails: &mut rails,
                animation: &mut animation,
                out: &mut out,
            };
            ctx.post_tick(profile.as_ref());
        }

        let collider = runtime.collider;
        if collider.height != collider_before.height
            || collider.radius != collider_before.radius
            || collider.center != collider_before.center
        {
            B::set_capsule(world, entity, collider.height, collider.radius, collider.center);
        }

        apply_outputs::<B>(world, entity, &settings, &out);
        store_character(world, entity, settings, runtime, animation);
    }
}

/// Take a pending profile change, resolved against the [`ProfileLibrary`].
fn take_profile(world: &mut World, entity: Entity) -> Option<MultiStateSettings> {
    let request = world.get::<ProfileChangeRequest>(entity)?.clone();
    if let Ok(mut character) = world.get_entity_mut(entity) {
        character.remove::<ProfileChangeRequest>();
    }
    match request.resolve(world.get_resource::<ProfileLibrary>()) {
        Ok(profile) => Some(profile.clone()),
        Err(err) => {
            error!("{entity:?}: profile change failed: {err}");
            None
        }
    }
}

// === Rails ===

/// Refresh the world position of each rail's rotation target.
pub fn resolve_rail_rotation_targets(
    mut rails: Query<&mut RailSystem>,
    transforms: Query<&GlobalTransform>,
) {
    for mut rail in &mut rails {
        let resolved = rail
            .rotation_target
            .and_then(|target| transforms.get(target).ok())
            .map(GlobalTransform::translation);
        if rail.resolved_rotation_target != resolved {
            rail.resolved_rotation_target = resolved;
        }
    }
}

/// React to characters touching rail caps.
///
/// Local caps queue an [`ControllerRequest::EvaluateRail`] on the character.
/// Remote caps start a poll that waits for the character to be grounded.
pub fn evaluate_rail_caps(
    mut contacts: EventReader<RailCapContact>,
    mut caps: Query<(&mut RailCap, Option<&GlobalTransform>)>,
    rails: Query<&RailSystem>,
    mut characters: Query<(
        &MovementRuntime,
        &GlobalTransform,
        Option<&ControlVector>,
        &mut ControllerRequests,
    )>,
    mut triggers: EventWriter<AnimationTriggerFired>,
) {
    for contact in contacts.read() {
        let Ok((mut cap, cap_transform)) = caps.get_mut(contact.cap) else {
            continue;
        };
        let Ok((runtime, transform, control, mut requests)) = characters.get_mut(contact.character)
        else {
            continue;
        };
        if !cap.reacts_to(contact.stay, control) || runtime.rail.interaction_time != 0.0 {
            continue;
        }

        let attached = runtime.rail.rail();
        if cap.remote.enabled {
            if cap.remote.pending.is_some() || attached == Some(cap.rail) {
                continue;
            }
            if let Some(origin) = cap_transform {
                let distance = origin.translation().distance(transform.translation());
                if !cap.remote.in_range(distance) {
                    continue;
                }
            }
            cap.remote.pending = Some(contact.character);
            cap.remote.timeout = 0.0;
            if !cap.remote.animation_trigger.is_empty() {
                triggers.write(AnimationTriggerFired {
                    entity: contact.character,
                    trigger: cap.remote.animation_trigger.clone(),
                });
            }
            continue;
        }

        if attached.is_some_and(|rail| rail != cap.rail) {
            continue;
        }
        let Ok(rail) = rails.get(cap.rail) else {
            error!("{:?}: rail cap points at {:?}, which has no rail system", contact.cap, cap.rail);
            continue;
        };
        requests.push(ControllerRequest::EvaluateRail(RailEvaluation::from_cap(
            &cap,
            rail,
            transform.translation(),
        )));
    }
}

/// Tick remote rail access: latch once the character is grounded, or give up.
pub fn poll_remote_rail_access(
    time: Res<Time>,
    mut caps: Query<(Entity, &mut RailCap)>,
    rails: Query<&RailSystem>,
    mut characters: Query<(&MovementRuntime, &GlobalTransform, &mut ControllerRequests)>,
) {
    let dt = time.delta_secs();
    for (cap_entity, mut cap) in &mut caps {
        let Some(character) = cap.remote.pending else {
            continue;
        };
        let Ok((runtime, transform, mut requests)) = characters.get_mut(character) else {
            cap.remote.pending = None;
            continue;
        };

        if runtime.state != MovementState::Grounded {
            cap.remote.timeout += dt;
            if cap.remote.timeout > cap.remote.timeout_limit {
                debug!("{cap_entity:?}: remote rail access timed out for {character:?}");
                cap.remote.pending = None;
            }
            continue;
        }

        cap.remote.pending = None;
        if let Ok(rail) = rails.get(cap.rail) {
            requests.push(ControllerRequest::EvaluateRail(RailEvaluation::from_cap(
                &cap,
                rail,
                transform.translation(),
            )));
        }
    }
}

/// Move dollies toward the positions their rails were evaluated at.
///
/// A dolly travelling the rail that drives it is a cycle; it is reported
/// and skipped.
pub fn drive_rail_dollies(world: &mut World) {
    let updates: Vec<_> = world
        .query::<(Entity, &mut RailSystem)>()
        .iter_mut(world)
        .filter_map(|(entity, mut rail)| {
            let update = rail.pending_dolly.take()?;
            Some((entity, update, rail.dollies.clone()))
        })
        .collect();

    for (rail, update, dollies) in updates {
        for dolly_entity in dollies {
            let Some(mut dolly) = world.get::<RailDolly>(dolly_entity).cloned() else {
                continue;
            };
            if dolly.path == rail {
                error!("{rail:?}: dolly {dolly_entity:?} travels the rail that drives it, skipped");
                continue;
            }
            let Some(mut transform) = world.get::<Transform>(dolly_entity).copied() else {
                continue;
            };
            {
                let Some(mut path) = world.get_mut::<RailSystem>(dolly.path) else {
                    continue;
                };
                if update.reset {
                    dolly.reset(&mut path, update.position, &mut transform);
                } else {
                    dolly.evaluate(&mut path, update.position);
                }
            }
            if let Ok(mut entity) = world.get_entity_mut(dolly_entity) {
                entity.insert((dolly, transform));
            }
        }
    }
}

/// Ease active dollies toward their targets.
pub fn step_rail_dollies(world: &mut World) {
    let dt = world
        .get_resource::<Time<Fixed>>()
        .map(|time| time.delta_secs())
        .filter(|&dt| dt > 0.0)
        .unwrap_or(1.0 / 60.0);

    let dollies: Vec<(Entity, RailDolly, Transform)> = world
        .query::<(Entity, &RailDolly, &Transform)>()
        .iter(world)
        .filter(|(_, dolly, _)| dolly.active)
        .map(|(entity, dolly, transform)| (entity, dolly.clone(), *transform))
        .collect();

    for (entity, mut dolly, mut transform) in dollies {
        let Some(path) = world.get::<RailSystem>(dolly.path) else {
            continue;
        };
        dolly.step(path, &mut transform, dt);
        if let Ok(mut entity) = world.get_entity_mut(entity) {
            entity.insert((dolly, transform));
        }
    }
}

/// Publish positional events fired during the tick.
pub fn publish_rail_positions(
    mut rails: Query<(Entity, &mut RailSystem)>,
    mut reached: EventWriter<events::RailPositionReached>,
) {
    for (entity, mut rail) in &mut rails {
        if rail.fired_events.is_empty() {
            continue;
        }
        for index in rail.fired_events.drain(..) {
            reached.write(events::RailPositionReached {
                rail: entity,
                index,
            });
        }
    }
}

// === IK ===

/// Collect `parent` and all its descendants' positions.
fn gather_ik_targets(world: &World, parent: Entity) -> Vec<Vec3> {
    let mut targets = Vec::new();
    let mut stack = vec![parent];
    while let Some(entity) = stack.pop() {
        if let Some(transform) = world.get::<GlobalTransform>(entity) {
            targets.push(transform.translation());
        }
        if let Some(children) = world.get::<Children>(entity) {
            stack.extend(children.iter());
        }
    }
    targets
}

/// Solve feet and hand placement for every character with an [`IkRig`].
pub fn solve_character_ik<B: CharacterPhysicsBackend>(world: &mut World) {
    let rigs: Vec<(Entity, MultiStateSettings, MovementRuntime, IkRig)> = world
        .query::<(Entity, &MultiStateSettings, &MovementRuntime, &IkRig)>()
        .iter(world)
        .map(|(entity, settings, runtime, rig)| {
            (entity, settings.clone(), runtime.clone(), rig.clone())
        })
        .collect();

    for (entity, settings, runtime, mut rig) in rigs {
        rig.targets = match runtime.ik.target_parent {
            Some(parent) => gather_ik_targets(world, parent),
            None => Vec::new(),
        };
        let frame = IkFrame {
            rotation: runtime.rep.rotation,
            height: settings.body.height,
        };
        {
            let probe = BackendProbe::<B>::new(world, entity);
            solve_ik(
                &probe,
                &settings.ik,
                settings.layers.ik,
                &runtime.ik,
                frame,
                &mut rig,
            );
        }
        if let Some(mut component) = world.get_mut::<IkRig>(entity) {
            *component = rig;
        }
    }
}

// === Visual sync ===

/// Move each representation to its character's smoothed pose.
pub fn sync_character_representation(
    characters: Query<(&MovementRuntime, Option<&IkRig>)>,
    mut representations: Query<(&CharacterRepresentation, &mut Transform)>,
) {
    for (representation, mut transform) in &mut representations {
        let Ok((runtime, rig)) = characters.get(representation.character) else {
            continue;
        };
        let offset = rig.map_or(Vec3::ZERO, |rig| rig.body_offset);
        transform.translation = runtime.rep.position + offset;
        transform.rotation = runtime.rep.rotation;
    }
}

/// Turn each physics gyro to its character's lean.
pub fn sync_physics_gyro(
    characters: Query<&MovementRuntime>,
    mut gyros: Query<(&PhysicsGyro, &mut Transform)>,
) {
    for (gyro, mut transform) in &mut gyros {
        let Ok(runtime) = characters.get(gyro.character) else {
            continue;
        };
        transform.rotation = runtime.collider.gyro_rotation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rail::LatchPosition;

    fn rail_world() -> (World, Entity, Entity, Entity) {
        let mut world = World::new();
        world.insert_resource(Time::<Fixed>::from_hz(60.0));
        let path = world
            .spawn(
                RailSystem::new(vec![Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)], 10.0)
                    .expect("valid rail"),
            )
            .id();
        let dolly = world
            .spawn((RailDolly::new(path), Transform::default()))
            .id();
        let mut driver = RailSystem::new(vec![Vec3::ZERO, Vec3::new(0.0, 0.0, 10.0)], 10.0)
            .expect("valid rail");
        driver.dollies.push(dolly);
        let driver = world.spawn(driver).id();
        (world, driver, path, dolly)
    }

    #[test]
    fn dolly_snaps_on_latch_and_eases_afterwards() {
        let (mut world, driver, _path, dolly) = rail_world();

        world.get_mut::<RailSystem>(driver).unwrap().pending_dolly = Some(crate::rail::DollyUpdate {
            position: 5.0,
            reset: true,
        });
        drive_rail_dollies(&mut world);
        let snapped = world.get::<Transform>(dolly).unwrap().translation;
        assert!(
            (snapped.x - 5.0).abs() < 1e-4,
            "PROOF: reset snaps the dolly onto its path, got {snapped:?}"
        );

        world.get_mut::<RailSystem>(driver).unwrap().pending_dolly = Some(crate::rail::DollyUpdate {
            position: 8.0,
            reset: false,
        });
        drive_rail_dollies(&mut world);
        assert!(world.get::<RailDolly>(dolly).unwrap().active);
        step_rail_dollies(&mut world);
        let eased = world.get::<Transform>(dolly).unwrap().translation;
        assert!(eased.x > 5.0 && eased.x < 8.0, "PROOF: dolly eases, got {eased:?}");
    }

    #[test]
    fn dolly_on_its_own_rail_is_skipped() {
        let mut world = World::new();
        let rail = world
            .spawn(
                RailSystem::new(vec![Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)], 10.0)
                    .expect("valid rail"),
            )
            .id();
        let dolly = world
            .spawn((RailDolly::new(rail), Transform::from_xyz(0.0, 7.0, 0.0)))
            .id();
        {
            let mut component = world.get_mut::<RailSystem>(rail).unwrap();
            component.dollies.push(dolly);
            component.pending_dolly = Some(crate::rail::DollyUpdate {
                position: 5.0,
                reset: true,
            });
        }

        drive_rail_dollies(&mut world);
        assert_eq!(
            world.get::<Transform>(dolly).unwrap().translation,
            Vec3::new(0.0, 7.0, 0.0),
            "PROOF: cyclic dolly is left untouched"
        );
    }

    #[test]
    fn ik_targets_include_descendants() {
        let mut world = World::new();
        let grandchild = world
            .spawn(GlobalTransform::from_xyz(3.0, 0.0, 0.0))
            .id();
        let child = world
            .spawn(GlobalTransform::from_xyz(2.0, 0.0, 0.0))
            .add_child(grandchild)
            .id();
        let parent = world
            .spawn(GlobalTransform::from_xyz(1.0, 0.0, 0.0))
            .add_child(child)
            .id();

        let mut xs: Vec<f32> = gather_ik_targets(&world, parent).iter().map(|t| t.x).collect();
        xs.sort_by(f32::total_cmp);
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn keyless_cap_queues_rail_evaluation() {
        let mut app = App::new();
        app.add_event::<RailCapContact>();
        app.add_event::<AnimationTriggerFired>();
        app.add_systems(Update, evaluate_rail_caps);

        let rail = app
            .world_mut()
            .spawn(
                RailSystem::new(vec![Vec3::ZERO, Vec3::Z * 10.0], 10.0).expect("valid rail"),
            )
            .id();
        let cap = app
            .world_mut()
            .spawn(RailCap::new(rail, LatchPosition::Fixed(2.0)))
            .id();
        let settings = MultiStateSettings::default();
        let character = app
            .world_mut()
            .spawn((
                MovementRuntime::from_settings(&settings, Vec3::ZERO),
                GlobalTransform::default(),
                ControllerRequests::new(),
            ))
            .id();

        app.world_mut().send_event(RailCapContact {
            cap,
            character,
            stay: false,
        });
        app.update();

        let mut requests = app.world_mut().get_mut::<ControllerRequests>(character).unwrap();
        let queued: Vec<_> = requests.drain().collect();
        assert!(
            matches!(&queued[..], [ControllerRequest::EvaluateRail(evaluation)] if evaluation.position == 2.0),
            "PROOF: contact queues one evaluation, got {queued:?}"
        );
    }
}
