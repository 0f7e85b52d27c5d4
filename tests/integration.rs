//! Integration tests for the character controller.
//!
//! These tests verify the complete system behavior with actual physics simulation.
//! Each test produces PROOF through explicit state and position checks.

#![cfg(feature = "rapier3d")]

use bevy::prelude::*;
use bevy::time::Virtual;
use bevy_rapier3d::prelude::*;
use multistate_character_controller::prelude::*;
use multistate_character_controller::rail::RailEvaluation;

/// Events observed by the app, collected across ticks.
#[derive(Resource, Default)]
struct Observed {
    changes: Vec<(MovementState, MovementState)>,
    landings: Vec<f32>,
    latches: Vec<RailLatched>,
}

fn observe(
    mut observed: ResMut<Observed>,
    mut changes: EventReader<MovementStateChanged>,
    mut landings: EventReader<PlayerLanded>,
    mut latches: EventReader<RailLatched>,
) {
    observed
        .changes
        .extend(changes.read().map(|change| (change.from, change.to)));
    observed
        .landings
        .extend(landings.read().map(|landing| landing.fall_time));
    observed.latches.extend(latches.read().copied());
}

/// Create a minimal test app with physics and character controller.
fn create_test_app() -> App {
    let mut app = App::new();

    app.add_plugins(MinimalPlugins);
    app.add_plugins(TransformPlugin);
    app.add_plugins(RapierPhysicsPlugin::<NoUserData>::default());
    app.add_plugins(MultiStateControllerPlugin::<Rapier3dBackend>::default());
    app.insert_resource(Time::<Fixed>::from_hz(60.0));
    app.init_resource::<Observed>();
    app.add_systems(Update, observe);

    app.finish();
    app.cleanup();
    app
}

/// Spawn a static floor whose top face is at `y = 0`.
fn spawn_floor(app: &mut App) -> Entity {
    let transform = Transform::from_xyz(0.0, -0.5, 0.0);
    app.world_mut()
        .spawn((
            transform,
            GlobalTransform::from(transform),
            RigidBody::Fixed,
            Collider::cuboid(50.0, 0.5, 50.0),
        ))
        .id()
}

/// Spawn a character with its feet at `feet`.
fn spawn_character(app: &mut App, feet: Vec3) -> Entity {
    spawn_character_with_settings(app, feet, MultiStateSettings::player())
}

fn spawn_character_with_settings(
    app: &mut App,
    feet: Vec3,
    settings: MultiStateSettings,
) -> Entity {
    let transform = Transform::from_translation(feet + Vec3::Y * settings.body.origin_height);
    app.world_mut()
        .spawn((
            transform,
            GlobalTransform::from(transform),
            MultiStateCharacter::new(settings, feet),
            Rapier3dCharacterBundle::new(),
            Collider::capsule_y(0.5, 0.5),
        ))
        .id()
}

/// Run one physics step.
fn tick(app: &mut App) {
    let timestep = std::time::Duration::from_secs_f64(1.0 / 60.0);
    app.world_mut()
        .resource_mut::<Time<Virtual>>()
        .advance_by(timestep);
    app.update();
    app.world_mut().run_schedule(bevy::prelude::FixedUpdate);
    app.update();
}

/// Run the app for N physics frames.
fn run_frames(app: &mut App, frames: usize) {
    for _ in 0..frames {
        tick(app);
    }
}

/// Run until the character reaches `state`, up to `limit` frames.
fn run_until_state(app: &mut App, entity: Entity, state: MovementState, limit: usize) -> bool {
    for _ in 0..limit {
        tick(app);
        if current_state(app, entity) == state {
            return true;
        }
    }
    false
}

fn current_state(app: &App, entity: Entity) -> MovementState {
    app.world().get::<MovementRuntime>(entity).unwrap().state
}

fn feet_height(app: &App, entity: Entity) -> f32 {
    app.world().get::<Transform>(entity).unwrap().translation.y - 1.0
}

fn requests(app: &mut App, entity: Entity) -> Mut<'_, ControllerRequests> {
    app.world_mut().get_mut::<ControllerRequests>(entity).unwrap()
}

// ==================== Grounding Tests ====================

mod grounding {
    use super::*;

    #[test]
    fn standing_character_is_grounded() {
        let mut app = create_test_app();
        spawn_floor(&mut app);
        let character = spawn_character(&mut app, Vec3::ZERO);

        run_frames(&mut app, 30);

        // PROOF: the ground probe finds the floor under the feet
        assert_eq!(current_state(&app, character), MovementState::Grounded);
        let feet = feet_height(&app, character);
        assert!(
            feet.abs() < 0.5,
            "PROOF: grounded character stays on the floor, feet at {feet}"
        );
    }

    #[test]
    fn airborne_character_falls() {
        let mut app = create_test_app();
        spawn_floor(&mut app);
        let character = spawn_character(&mut app, Vec3::new(0.0, 8.0, 0.0));

        run_frames(&mut app, 10);

        assert_eq!(current_state(&app, character), MovementState::Falling);
        let feet = feet_height(&app, character);
        assert!(feet < 8.0, "PROOF: falling pull moves the body down, feet at {feet}");
        let velocity = app.world().get::<Velocity>(character).unwrap().linvel;
        assert!(velocity.y < 0.0, "PROOF: velocity points down, got {velocity:?}");
    }

    #[test]
    fn falling_character_lands_and_reports_it() {
        let mut app = create_test_app();
        spawn_floor(&mut app);
        let character = spawn_character(&mut app, Vec3::new(0.0, 3.0, 0.0));

        assert!(
            run_until_state(&mut app, character, MovementState::Grounded, 300),
            "PROOF: character reaches the floor, ended {:?}",
            current_state(&app, character)
        );
        tick(&mut app);

        let observed = app.world().resource::<Observed>();
        assert!(
            !observed.landings.is_empty(),
            "PROOF: landing is published as an event"
        );
        assert!(observed.landings[0] > 0.0);
        assert!(observed
            .changes
            .iter()
            .any(|&(_, to)| to == MovementState::Falling));
    }

    #[test]
    fn no_floor_means_no_ground() {
        let mut app = create_test_app();
        let character = spawn_character(&mut app, Vec3::new(0.0, 50.0, 0.0));

        run_frames(&mut app, 20);

        assert_ne!(current_state(&app, character), MovementState::Grounded);
        assert!(!app.world().get::<MovementRuntime>(character).unwrap().is_grounded);
    }
}

// ==================== Request Tests ====================

mod requests {
    use super::*;

    #[test]
    fn jump_lifts_character_then_returns_to_air_states() {
        let mut app = create_test_app();
        spawn_floor(&mut app);
        let settings = MultiStateSettings::player().with_jump(10.0, 0.1, 0.2);
        let character = spawn_character_with_settings(&mut app, Vec3::ZERO, settings);
        assert!(run_until_state(&mut app, character, MovementState::Grounded, 60));
        run_frames(&mut app, 10);
        let start = feet_height(&app, character);

        requests(&mut app, character).jump();

        let mut peak = start;
        for _ in 0..45 {
            tick(&mut app);
            peak = peak.max(feet_height(&app, character));
        }

        let observed = app.world().resource::<Observed>();
        assert!(
            observed
                .changes
                .iter()
                .any(|&(_, to)| to == MovementState::Jumping),
            "PROOF: the jump request enters the jumping state, saw {:?}",
            observed.changes
        );
        assert!(
            peak > start + 0.2,
            "PROOF: the jump lifts the body, start {start} peak {peak}"
        );
        assert!(matches!(
            current_state(&app, character),
            MovementState::Falling | MovementState::Recovery | MovementState::Grounded
        ));
    }

    #[test]
    fn teleport_moves_body_and_representation() {
        let mut app = create_test_app();
        spawn_floor(&mut app);
        let character = spawn_character(&mut app, Vec3::ZERO);
        run_frames(&mut app, 5);

        let destination = Vec3::new(10.0, 0.0, -4.0);
        requests(&mut app, character).teleport(destination);
        tick(&mut app);

        let translation = app.world().get::<Transform>(character).unwrap().translation;
        assert!(
            translation.xz().distance(destination.xz()) < 0.5,
            "PROOF: body moved to the destination, got {translation:?}"
        );
        let runtime = app.world().get::<MovementRuntime>(character).unwrap();
        assert!(runtime.rep.position.xz().distance(destination.xz()) < 0.5);
    }

    #[test]
    fn substate_request_changes_walk_mode() {
        let mut app = create_test_app();
        spawn_floor(&mut app);
        let character = spawn_character(&mut app, Vec3::ZERO);
        assert!(run_until_state(&mut app, character, MovementState::Grounded, 60));

        requests(&mut app, character).set_substate(GroundedSubstate::Walking);
        tick(&mut app);

        assert_eq!(
            app.world().get::<MovementRuntime>(character).unwrap().substate,
            GroundedSubstate::Walking
        );
    }

    #[test]
    fn profile_change_swaps_settings() {
        let mut app = create_test_app();
        spawn_floor(&mut app);
        let character = spawn_character(&mut app, Vec3::ZERO);
        run_frames(&mut app, 2);

        let profile = MultiStateSettings::player().with_jump(20.0, 0.2, 0.1);
        app.world_mut()
            .entity_mut(character)
            .insert(ProfileChangeRequest::Inline(Box::new(profile)));
        tick(&mut app);

        assert!(app.world().get::<ProfileChangeRequest>(character).is_none());
        let settings = app.world().get::<MultiStateSettings>(character).unwrap();
        assert_eq!(settings.jump.force, 20.0, "PROOF: profile applied after the tick");
    }

    #[test]
    fn unknown_named_profile_keeps_settings() {
        let mut app = create_test_app();
        let character = spawn_character(&mut app, Vec3::ZERO);
        let before = app.world().get::<MultiStateSettings>(character).unwrap().clone();

        app.world_mut()
            .entity_mut(character)
            .insert(ProfileChangeRequest::Named("missing".into()));
        tick(&mut app);

        assert!(app.world().get::<ProfileChangeRequest>(character).is_none());
        assert_eq!(app.world().get::<MultiStateSettings>(character).unwrap(), &before);
    }
}

// ==================== Rail Tests ====================

mod rails {
    use super::*;

    #[test]
    fn rail_evaluation_latches_grounded_character() {
        let mut app = create_test_app();
        spawn_floor(&mut app);
        let character = spawn_character(&mut app, Vec3::ZERO);
        assert!(run_until_state(&mut app, character, MovementState::Grounded, 60));

        let rail = RailSystem::new(
            vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 20.0)],
            10.0,
        )
        .expect("valid rail")
        .time_controlled()
        .with_speed(1.0);
        let cap = RailCap::new(Entity::PLACEHOLDER, LatchPosition::Fixed(0.0));
        let evaluation = RailEvaluation::from_cap(&cap, &rail, Vec3::ZERO);
        let rail_entity = app.world_mut().spawn(rail).id();
        let evaluation = RailEvaluation {
            rail: rail_entity,
            ..evaluation
        };

        requests(&mut app, character).push(ControllerRequest::EvaluateRail(evaluation));
        tick(&mut app);

        assert_eq!(current_state(&app, character), MovementState::OnRails);
        assert_eq!(
            app.world().get::<RailSystem>(rail_entity).unwrap().occupant,
            Some(character),
            "PROOF: the rail records its rider"
        );
        let observed = app.world().resource::<Observed>();
        assert_eq!(observed.latches.len(), 1);
        assert_eq!(observed.latches[0].rail, rail_entity);
    }
}

// ==================== Representation Tests ====================

mod representation {
    use super::*;

    #[test]
    fn representation_follows_character() {
        let mut app = create_test_app();
        spawn_floor(&mut app);
        let character = spawn_character(&mut app, Vec3::new(3.0, 0.0, 2.0));
        let mesh = app
            .world_mut()
            .spawn((Transform::default(), CharacterRepresentation { character }))
            .id();

        run_frames(&mut app, 30);

        let rep = app.world().get::<Transform>(mesh).unwrap().translation;
        let body = app.world().get::<Transform>(character).unwrap().translation;
        assert!(
            rep.xz().distance(body.xz()) < 0.5,
            "PROOF: representation tracks the body, rep {rep:?} body {body:?}"
        );
    }
}
