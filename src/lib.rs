//! # `multistate_character_controller`
//!
//! A multi-state rigidbody character controller with physics backend abstraction.
//!
//! Every character runs a movement state machine each fixed tick:
//! - Grounded walking with substates (walking, running, sprinting, crouching)
//!   and a tunable climb limit
//! - Jumping with a charge delay, falling with fall protection, and recovery
//! - Slope sliding, swimming and flying
//! - Lunges, blinks (short teleports) and ragdoll hand-off
//! - Rails with caps, dollies and positional events
//! - A smoothed visual representation, procedural feet and hand IK and a
//!   physics gyro that leans the collider in flight
//!
//! ## Architecture
//!
//! The controller drives a **dynamic rigidbody** toward a target:
//! 1. Probes (rays, overlaps, capsule casts) identify the state
//! 2. The state computes an external target from the input
//! 3. Forces pull the body toward that target; Rapier resolves collisions
//! 4. A late pass smooths the visual representation and resizes the collider
//!
//! The movement logic only sees the world through
//! [`PhysicsProbe`](probe::PhysicsProbe), so it is independent of the physics
//! engine. [`CharacterPhysicsBackend`](backend::CharacterPhysicsBackend) adapts
//! a specific engine (Rapier3D included).
//!
//! ## Usage
//!
//! ```rust
//! use bevy::prelude::*;
//! use multistate_character_controller::prelude::*;
//!
//! // Character components, spawned next to the physics components.
//! let settings = MultiStateSettings::player().with_jump(12.0, 0.1, 0.2);
//! let character = MultiStateCharacter::new(settings, Vec3::ZERO);
//!
//! // Gameplay code drives it through requests.
//! let mut requests = ControllerRequests::new();
//! requests.jump();
//! requests.set_substate(GroundedSubstate::Walking);
//! assert_eq!(requests.len(), 2);
//! # let _ = character;
//! ```

use bevy::prelude::*;

pub mod animation;
pub mod backend;
pub mod blink;
pub mod collision;
pub mod control;
pub mod events;
pub mod ik;
mod integrator;
pub mod locks;
pub mod lunge;
pub mod machine;
pub mod math;
mod movement;
pub mod probe;
pub mod rail;
pub mod requests;
pub mod runtime;
pub mod settings;
pub mod slide;
pub mod state;
pub mod systems;

#[cfg(feature = "rapier3d")]
pub mod rapier;

pub mod prelude {
    //! Convenient re-exports for common usage.

    pub use crate::animation::AnimationParameters;
    pub use crate::backend::CharacterPhysicsBackend;
    pub use crate::collision::{layers, ProbeFilter};
    pub use crate::control::ControlVector;
    pub use crate::events::{
        AnimationTriggerFired, AnimationTriggerReset, MovementStateChanged, PlayerLanded,
        RailLatched, RailPositionReached, RailUnlatched,
    };
    pub use crate::ik::{FeetLocationMethod, HandLocationMethod, IkRig};
    pub use crate::lunge::LungeAction;
    pub use crate::rail::{LatchPosition, RailCap, RailDolly, RailSystem};
    pub use crate::requests::{ControllerRequest, ControllerRequests};
    pub use crate::runtime::{MovementRuntime, ProfileChangeRequest};
    pub use crate::settings::{MultiStateSettings, ProfileLibrary};
    pub use crate::state::{GroundedSubstate, MovementState};
    pub use crate::systems::{CharacterRepresentation, PhysicsGyro};
    pub use crate::{MultiStateCharacter, MultiStateControllerPlugin, MultiStateControllerSet};

    #[cfg(feature = "rapier3d")]
    pub use crate::rapier::{Rapier3dBackend, Rapier3dCharacterBundle};
}

/// System sets for the controller, run in order in `FixedUpdate`.
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MultiStateControllerSet {
    /// Clear last tick's forces and refresh cached transforms.
    Preparation,
    /// Turn contacts into queued requests.
    Input,
    /// The movement state machine.
    Movement,
    /// Collider, representation, dollies and IK.
    Late,
    /// Hand accumulated forces to the physics engine.
    FinalApplication,
}

/// Components that make an entity a controlled character.
///
/// Spawn next to the backend's physics components, e.g.
/// [`Rapier3dCharacterBundle`](crate::rapier::Rapier3dCharacterBundle).
#[derive(Bundle, Clone)]
pub struct MultiStateCharacter {
    pub settings: settings::MultiStateSettings,
    pub runtime: runtime::MovementRuntime,
    pub control: control::ControlVector,
    pub animation: animation::AnimationParameters,
    pub requests: requests::ControllerRequests,
    pub ik: ik::IkRig,
}

impl MultiStateCharacter {
    /// A character standing with its feet at `feet`.
    pub fn new(settings: settings::MultiStateSettings, feet: Vec3) -> Self {
        let runtime = runtime::MovementRuntime::from_settings(&settings, feet);
        Self {
            settings,
            runtime,
            control: control::ControlVector::default(),
            animation: animation::AnimationParameters::default(),
            requests: requests::ControllerRequests::new(),
            ik: ik::IkRig::default(),
        }
    }
}

/// Main plugin for the character controller system.
///
/// This plugin is generic over a physics backend `B` which provides the actual
/// physics operations (probing, force application, etc.).
///
/// # Examples
///
/// With Rapier3D backend:
/// ```rust,no_run
/// use bevy::prelude::*;
/// use bevy_rapier3d::prelude::*;
/// use multistate_character_controller::prelude::*;
///
/// App::new()
///     .add_plugins(DefaultPlugins)
///     .add_plugins(RapierPhysicsPlugin::<NoUserData>::default())
///     .add_plugins(MultiStateControllerPlugin::<Rapier3dBackend>::default())
///     .run();
/// ```
pub struct MultiStateControllerPlugin<B: backend::CharacterPhysicsBackend> {
    _marker: std::marker::PhantomData<B>,
}

impl<B: backend::CharacterPhysicsBackend> Default for MultiStateControllerPlugin<B> {
    fn default() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<B: backend::CharacterPhysicsBackend> Plugin for MultiStateControllerPlugin<B> {
    fn build(&self, app: &mut App) {
        // Register core types
        app.register_type::<settings::MultiStateSettings>();
        app.register_type::<runtime::MovementRuntime>();
        app.register_type::<control::ControlVector>();
        app.register_type::<animation::AnimationParameters>();
        app.register_type::<state::MovementState>();
        app.register_type::<state::GroundedSubstate>();
        app.register_type::<ik::IkRig>();
        app.register_type::<rail::RailSystem>();
        app.register_type::<rail::RailDolly>();
        app.register_type::<rail::RailCap>();
        app.register_type::<backend::ControllerForces>();
        app.register_type::<systems::CharacterRepresentation>();
        app.register_type::<systems::PhysicsGyro>();

        app.add_event::<events::PlayerLanded>()
            .add_event::<events::MovementStateChanged>()
            .add_event::<events::AnimationTriggerFired>()
            .add_event::<events::AnimationTriggerReset>()
            .add_event::<events::RailLatched>()
            .add_event::<events::RailUnlatched>()
            .add_event::<events::RailPositionReached>()
            .add_event::<events::RailCapContact>();

        app.init_resource::<settings::ProfileLibrary>();

        app.configure_sets(
            FixedUpdate,
            (
                MultiStateControllerSet::Preparation,
                MultiStateControllerSet::Input,
                MultiStateControllerSet::Movement,
                MultiStateControllerSet::Late,
                MultiStateControllerSet::FinalApplication,
            )
                .chain(),
        );

        // Add the physics backend plugin
        app.add_plugins(B::plugin());

        app.add_systems(
            FixedUpdate,
            systems::resolve_rail_rotation_targets.in_set(MultiStateControllerSet::Preparation),
        );
        app.add_systems(
            FixedUpdate,
            (systems::evaluate_rail_caps, systems::poll_remote_rail_access)
                .chain()
                .in_set(MultiStateControllerSet::Input),
        );
        app.add_systems(
            FixedUpdate,
            systems::run_movement_tick::<B>.in_set(MultiStateControllerSet::Movement),
        );
        app.add_systems(
            FixedUpdate,
            (
                systems::run_post_tick::<B>,
                systems::drive_rail_dollies,
                systems::step_rail_dollies,
                systems::publish_rail_positions,
                systems::solve_character_ik::<B>,
                systems::sync_character_representation,
                systems::sync_physics_gyro,
            )
                .chain()
                .in_set(MultiStateControllerSet::Late),
        );
    }
}
