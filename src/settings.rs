//! Controller profile.
//!
//! [`MultiStateSettings`] holds every tunable parameter, grouped by concern.
//! It never holds live values such as timers or the current state; those
//! live in [`MovementRuntime`](crate::runtime::MovementRuntime), so swapping a
//! profile cannot reset motion in flight.

use std::collections::HashMap;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::collision::layers;
use crate::ik::{FeetLocationMethod, HandLocationMethod};
use crate::state::{EnabledStates, GroundedSubstate, MovementState};

/// Errors raised while loading or validating a profile.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("failed to parse profile: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown profile `{0}`")]
    Unknown(String),
    #[error("invalid profile: `{field}` {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Which states may become current and how disabled states are handled.
#[derive(Reflect, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    pub enabled: EnabledStates,
    /// Leave the current state as soon as it is disabled.
    pub eject_from_disabled: bool,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            enabled: EnabledStates::all(),
            eject_from_disabled: true,
        }
    }
}

/// Collision layer bits each probe tests against.
///
/// Colliders without explicit collision groups belong to every layer, so a
/// scene that never assigns groups makes every probe hit everything.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeLayers {
    pub ground: u32,
    /// Blocks jumping and leaving crouch.
    pub overhead: u32,
    pub water: u32,
    pub ik: u32,
    /// Keeps a flying character airborne when below it.
    pub disable_land: u32,
    /// Obstructs blinks.
    pub blink: u32,
    pub root_motion: u32,
}

impl Default for ProbeLayers {
    fn default() -> Self {
        Self {
            ground: layers::GROUND,
            overhead: layers::GROUND,
            water: layers::WATER,
            ik: layers::GROUND,
            disable_land: layers::DISABLE_LAND,
            blink: layers::BLINK | layers::GROUND,
            root_motion: layers::GROUND,
        }
    }
}

/// Follow speeds (smoothing times) of the visual representation per state family.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepSpeeds {
    /// Speed the representation starts with at spawn.
    pub initial: f32,
    pub grounded: f32,
    pub falling: f32,
    pub flying: f32,
    pub swimming: f32,
}

impl Default for RepSpeeds {
    fn default() -> Self {
        Self {
            initial: 0.1,
            grounded: 0.15,
            falling: 0.02,
            flying: 0.02,
            swimming: 0.15,
        }
    }
}

/// Visual representation (mesh) follow behavior.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualSettings {
    /// How fast the current follow speed converges to the state's target.
    pub rep_adjustment_speed: f32,
    /// Vertical offset of the representation from the reference position.
    pub rep_height_offset: f32,
    pub rep_speeds: RepSpeeds,
}

impl Default for VisualSettings {
    fn default() -> Self {
        Self {
            rep_adjustment_speed: 6.0,
            rep_height_offset: -2.08,
            rep_speeds: RepSpeeds::default(),
        }
    }
}

/// Ground probe length below the feet, per state.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaycastDistances {
    pub ground: f32,
    pub falling: f32,
    pub recovery: f32,
    pub sliding: f32,
    pub jumping: f32,
    pub flying: f32,
    pub swimming: f32,
}

impl Default for RaycastDistances {
    fn default() -> Self {
        Self {
            ground: 0.6,
            falling: 0.1,
            recovery: 0.5,
            sliding: 0.6,
            jumping: 0.0,
            flying: 0.3,
            swimming: 1.0,
        }
    }
}

/// Body dimensions.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodySettings {
    pub width: f32,
    /// Height of the reference point above the feet.
    pub height: f32,
    /// Height of the rigid body origin above the feet.
    pub origin_height: f32,
    /// Full collider height used for crouch shrinking.
    pub collider_height: f32,
    /// Collider centre relative to the body origin.
    pub collider_offset: Vec3,
}

impl Default for BodySettings {
    fn default() -> Self {
        Self {
            width: 0.5,
            height: 2.0,
            origin_height: 1.0,
            collider_height: 2.0,
            collider_offset: Vec3::ZERO,
        }
    }
}

/// Target tracking and rotation.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionalSettings {
    /// Proportional gain toward the grounded target.
    pub grounded_transitional_speed: f32,
    /// Window of the vertical force rolling average.
    pub average_y_count: usize,
    /// Degrees-per-second scale of slerp rotation.
    pub max_rotation_speed: f32,
    /// Multiplier on the control vector's yaw input.
    pub rotational_speed_multiplier: f32,
    /// Move-to targets closer than this to the feet are considered reached.
    pub move_to_target_distance: f32,
}

impl Default for DirectionalSettings {
    fn default() -> Self {
        Self {
            grounded_transitional_speed: 2.0,
            average_y_count: 30,
            max_rotation_speed: 400.0,
            rotational_speed_multiplier: 80.0,
            move_to_target_distance: 0.1,
        }
    }
}

/// Lean parameters of the physics gyro in one state.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GyroProfile {
    /// Largest pitch in degrees.
    pub max_angle: f32,
    /// Blend between input (0) and velocity (1).
    pub input_factor: f32,
    /// Magnitude that produces the full pitch.
    pub magnitude_factor: f32,
    pub transition_speed: f32,
}

impl Default for GyroProfile {
    fn default() -> Self {
        Self {
            max_angle: 90.0,
            input_factor: 0.632,
            magnitude_factor: 8.0,
            transition_speed: 5.0,
        }
    }
}

/// Physics gyro: the leaning collider proxy used in flight and water.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GyroSettings {
    pub enabled: bool,
    /// Radius growth while leaning.
    pub radius_multiplier: f32,
    pub normal_radius: f32,
    pub flying: GyroProfile,
    pub swimming: GyroProfile,
}

impl Default for GyroSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            radius_multiplier: 1.5,
            normal_radius: 0.5,
            flying: GyroProfile::default(),
            swimming: GyroProfile {
                magnitude_factor: 6.0,
                transition_speed: 2.0,
                ..default()
            },
        }
    }
}

/// Grounded substate speeds and crouch shrink.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstateSettings {
    pub default: GroundedSubstate,
    pub running: f32,
    pub walking: f32,
    pub crouching: f32,
    pub sprinting: f32,
    /// Collider height removed while crouching.
    pub crouching_collider_difference: f32,
}

impl Default for SubstateSettings {
    fn default() -> Self {
        Self {
            default: GroundedSubstate::Running,
            running: 1.0,
            walking: 0.35,
            crouching: 0.7,
            sprinting: 1.5,
            crouching_collider_difference: 0.4,
        }
    }
}

impl SubstateSettings {
    /// Speed multiplier of a substate. `Default` resolves through the configured default.
    pub fn multiplier(&self, substate: GroundedSubstate) -> f32 {
        match substate {
            GroundedSubstate::Running => self.running,
            GroundedSubstate::Walking => self.walking,
            GroundedSubstate::Crouching => self.crouching,
            GroundedSubstate::Sprinting => self.sprinting,
            GroundedSubstate::Default => match self.default {
                GroundedSubstate::Default => self.running,
                other => self.multiplier(other),
            },
        }
    }
}

/// Rigid-body force shaping.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceSettings {
    /// Global multiplier applied to every integrator force.
    pub multiplier: f32,
    /// Constant vertical force keeping ground contact.
    pub constant_y_grounded: f32,
    /// Quadratic damping of upward grounded force.
    pub variable_y_multiplier: f32,
    /// Linear drag in grounded-like states.
    pub normal_drag: f32,
    /// Terminal vertical speed while falling.
    pub gravity: f32,
    pub fall_velocity_preservation: f32,
    pub fall_velocity_y_preservation: f32,
}

impl Default for ForceSettings {
    fn default() -> Self {
        Self {
            multiplier: 10.0,
            constant_y_grounded: -10.0,
            variable_y_multiplier: 0.2,
            normal_drag: 5.0,
            gravity: -7.5,
            fall_velocity_preservation: 0.6,
            fall_velocity_y_preservation: 10.0,
        }
    }
}

/// Stuck detection while falling.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallProtectionSettings {
    /// Time spent below 1 unit/s before nudging starts.
    pub minimum_time: f32,
    pub force_multiplier: f32,
    pub maximum_force: f32,
}

impl Default for FallProtectionSettings {
    fn default() -> Self {
        Self {
            minimum_time: 1.0,
            force_multiplier: 20.0,
            maximum_force: 500.0,
        }
    }
}

/// Slope probe thresholds. Angles are in degrees.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlideSettings {
    /// Extra vertical force while sliding.
    pub constant_y: f32,
    /// Samples in the probe ring.
    pub checks: u32,
    pub minimum_fall_angle: f32,
    pub maximum_climb_angle: f32,
    pub entry_angle: f32,
    pub exit_angle: f32,
    /// Line-of-sight offset above the sampled points.
    pub height_offset: f32,
    pub min_range: f32,
    pub max_range: f32,
    pub speed_multiplier: f32,
    pub recovery_time: f32,
}

impl Default for SlideSettings {
    fn default() -> Self {
        Self {
            constant_y: -10.0,
            checks: 30,
            minimum_fall_angle: 75.0,
            maximum_climb_angle: 60.0,
            entry_angle: 60.0,
            exit_angle: 35.0,
            height_offset: 0.1,
            min_range: 0.2,
            max_range: 0.8,
            speed_multiplier: 1.5,
            recovery_time: 0.1,
        }
    }
}

/// Jump shaping.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JumpSettings {
    /// The jump delay applies only when jumping from the grounded state.
    pub require_ground_state: bool,
    /// Recovery set when jumping and falling.
    pub fall_recovery_time: f32,
    pub force: f32,
    pub duration: f32,
    pub delay: f32,
    /// Stop completely before the jump instead of damping horizontal velocity.
    pub zero_pre_jump_velocity: bool,
    pub horizontal_force_multiplier: f32,
}

impl Default for JumpSettings {
    fn default() -> Self {
        Self {
            require_ground_state: true,
            fall_recovery_time: 0.2,
            force: 10.0,
            duration: 0.1,
            delay: 0.25,
            zero_pre_jump_velocity: true,
            horizontal_force_multiplier: 0.68,
        }
    }
}

/// Flight.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlyingSettings {
    /// Land as soon as ground is close unless over a disable-land surface.
    pub automatic_land: bool,
    pub drag: f32,
    pub base_speed_multiplier: f32,
    pub additive_dive_multiplier: f32,
    pub additive_ascension_multiplier: f32,
    /// Keep flying forward without input.
    pub constant_forward: bool,
    pub max_rotation_speed_multiplier: f32,
    pub key_rotation_speed_multiplier: f32,
    /// Constant vertical term added to the flight target.
    pub gravity: f32,
    /// A jump attempt while airborne starts flying.
    pub from_falling: bool,
}

impl Default for FlyingSettings {
    fn default() -> Self {
        Self {
            automatic_land: true,
            drag: 0.5,
            base_speed_multiplier: 1.0,
            additive_dive_multiplier: 0.1,
            additive_ascension_multiplier: -0.1,
            constant_forward: false,
            max_rotation_speed_multiplier: 0.2,
            key_rotation_speed_multiplier: 0.2,
            gravity: 0.0,
            from_falling: true,
        }
    }
}

/// Swimming.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwimmingSettings {
    pub drag: f32,
    pub speed_multiplier: f32,
    /// Vertical offset of the water probe origin from the reference position.
    pub raycast_offset: f32,
    /// How far the reference may rise above the surface.
    pub surface_break: f32,
    pub allow_dive: bool,
    /// Use grounded visuals while swimming.
    pub false_walk: bool,
}

impl Default for SwimmingSettings {
    fn default() -> Self {
        Self {
            drag: 5.0,
            speed_multiplier: 1.0,
            raycast_offset: -1.2,
            surface_break: 0.3,
            allow_dive: true,
            false_walk: false,
        }
    }
}

/// Default blink limits, used when a request does not override them.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkSettings {
    pub min_distance_change: f32,
    pub recovery_time: f32,
    pub achievement_distance: f32,
    pub max_height_change: f32,
    pub animation_height_offset: f32,
    pub snap_rotation: bool,
    pub rep_speed: f32,
}

impl Default for BlinkSettings {
    fn default() -> Self {
        Self {
            min_distance_change: 0.4,
            recovery_time: 0.3,
            achievement_distance: 0.1,
            max_height_change: 0.4,
            animation_height_offset: 0.0,
            snap_rotation: false,
            rep_speed: 0.2,
        }
    }
}

/// Rail interaction.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RailInteractionSettings {
    /// Cooldown between latch and unlatch negotiations.
    pub interaction_time: f32,
}

impl Default for RailInteractionSettings {
    fn default() -> Self {
        Self {
            interaction_time: 0.5,
        }
    }
}

/// Ragdoll.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagdollSettings {
    /// Vertical velocity pushed into every ragdoll body on entry.
    pub initial_y_velocity: f32,
}

impl Default for RagdollSettings {
    fn default() -> Self {
        Self {
            initial_y_velocity: 1.0,
        }
    }
}

/// Source of the gyro lean and the published x/z velocities.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GyroCalculationMethod {
    /// Velocity of the visual representation.
    CharacterRepVelocity,
    /// Control input.
    #[default]
    FreeVectorInput,
    /// Direction to the per-state target.
    ExternalTargetDirectional,
    /// Offset between the body and its representation.
    CharacterRepPlayerOffset,
}

/// Swimming animation shaping.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwimmingAnimationSettings {
    pub maximum_speed: f32,
    pub gyro_transition_speed: f32,
    pub transition_speed: f32,
    pub minimum_gyro_depth: f32,
    pub gyro_fade_distance: f32,
    pub gyro_fade_multiplier: f32,
    pub upper_vertical_magnitude: f32,
    pub lower_vertical_magnitude: f32,
}

impl Default for SwimmingAnimationSettings {
    fn default() -> Self {
        Self {
            maximum_speed: 5.0,
            gyro_transition_speed: 2.0,
            transition_speed: 2.0,
            minimum_gyro_depth: 1.4,
            gyro_fade_distance: 0.2,
            gyro_fade_multiplier: 1000.0,
            upper_vertical_magnitude: 0.6,
            lower_vertical_magnitude: 0.5,
        }
    }
}

/// Flying animation shaping.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlyingAnimationSettings {
    pub maximum_speed: f32,
    pub gyro_transition_speed: f32,
    pub transition_speed: f32,
    pub upper_vertical_magnitude: f32,
    pub lower_vertical_magnitude: f32,
}

impl Default for FlyingAnimationSettings {
    fn default() -> Self {
        Self {
            maximum_speed: 2.0,
            gyro_transition_speed: 1.0,
            transition_speed: 1.0,
            upper_vertical_magnitude: 0.9,
            lower_vertical_magnitude: 0.5,
        }
    }
}

/// Animation parameter publishing.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationSettings {
    pub gyro_method: GyroCalculationMethod,
    pub speed_multiplier: f32,
    pub grounded_maximum_speed: f32,
    pub base_transition: f32,
    pub substate_transition_speed: f32,
    pub swimming: SwimmingAnimationSettings,
    pub flying: FlyingAnimationSettings,
}

impl Default for AnimationSettings {
    fn default() -> Self {
        Self {
            gyro_method: GyroCalculationMethod::FreeVectorInput,
            speed_multiplier: 1.0,
            grounded_maximum_speed: 100.0,
            base_transition: 0.9,
            substate_transition_speed: 8.0,
            swimming: SwimmingAnimationSettings::default(),
            flying: FlyingAnimationSettings::default(),
        }
    }
}

/// Root-motion driven grounded speed.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootMotionSettings {
    pub enabled: bool,
    pub modifier: f32,
    pub adjustment_speed: f32,
    /// Stop root motion when a wall blocks the input direction.
    pub check_input_direction: bool,
    pub cast_distance: f32,
    pub cast_height_offset: f32,
}

impl Default for RootMotionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            modifier: 0.6,
            adjustment_speed: 3.0,
            check_input_direction: true,
            cast_distance: 1.0,
            cast_height_offset: 0.25,
        }
    }
}

/// Procedural limb placement.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IkSettings {
    pub enabled: bool,
    pub feet_rotation: bool,
    pub hand_rotation: bool,
    pub foot_height: f32,
    pub foot_length: f32,
    pub hand_thickness: f32,
    pub body_offset: f32,
    pub body_drop_factor: f32,
    pub body_drop_limit: f32,
    pub body_offset_multiplier: f32,
    pub forward_projection_distance: f32,
    /// Feet method restored when leaving a rail.
    pub feet_method: FeetLocationMethod,
    /// Hand method restored when leaving a rail.
    pub hand_method: HandLocationMethod,
}

impl Default for IkSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            feet_rotation: true,
            hand_rotation: true,
            foot_height: 0.08,
            foot_length: 0.2,
            hand_thickness: 0.037,
            body_offset: 0.0,
            body_drop_factor: 1.0,
            body_drop_limit: 0.2,
            body_offset_multiplier: 1.0,
            forward_projection_distance: 1.0,
            feet_method: FeetLocationMethod::ProjectDown,
            hand_method: HandLocationMethod::None,
        }
    }
}

/// Complete controller profile.
///
/// Attach one per character next to a
/// [`MovementRuntime`](crate::runtime::MovementRuntime). The instance on the
/// entity is the live copy: operations such as
/// [`ControllerRequest::SetTransitionalSpeed`](crate::requests::ControllerRequest::SetTransitionalSpeed)
/// edit it in place.
///
/// # Example
///
/// ```rust
/// use multistate_character_controller::prelude::*;
///
/// let settings = MultiStateSettings::player()
///     .with_player_height(1.8)
///     .with_jump(12.0, 0.1, 0.2);
/// assert!(settings.validate().is_ok());
///
/// let json = settings.to_json().unwrap();
/// let parsed = MultiStateSettings::from_json(&json).unwrap();
/// assert_eq!(parsed, settings);
/// ```
#[derive(Component, Reflect, Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[reflect(Component)]
#[serde(default)]
pub struct MultiStateSettings {
    pub states: StateSettings,
    pub layers: ProbeLayers,
    pub visual: VisualSettings,
    pub raycast: RaycastDistances,
    pub body: BodySettings,
    pub directional: DirectionalSettings,
    pub gyro: GyroSettings,
    pub substates: SubstateSettings,
    pub forces: ForceSettings,
    pub fall_protection: FallProtectionSettings,
    pub slide: SlideSettings,
    pub jump: JumpSettings,
    pub flying: FlyingSettings,
    pub swimming: SwimmingSettings,
    pub blink: BlinkSettings,
    pub rail: RailInteractionSettings,
    pub ragdoll: RagdollSettings,
    pub animation: AnimationSettings,
    pub root_motion: RootMotionSettings,
    pub ik: IkSettings,
}

impl MultiStateSettings {
    /// Profile tuned for a player character.
    pub fn player() -> Self {
        Self::default()
    }

    /// Profile for AI-controlled characters: no flight, blinking or IK, and
    /// slower turning.
    pub fn ai() -> Self {
        let mut settings = Self::default();
        settings.states.enabled = EnabledStates::all()
            .without(MovementState::Flying)
            .without(MovementState::Blink);
        settings.flying.from_falling = false;
        settings.directional.max_rotation_speed = 200.0;
        settings.gyro.enabled = false;
        settings.ik.enabled = false;
        settings
    }

    /// Parse a profile from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ProfileError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize the profile to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ProfileError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject profiles the controller cannot run with.
    pub fn validate(&self) -> Result<(), ProfileError> {
        fn positive(value: f32, field: &'static str) -> Result<(), ProfileError> {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(ProfileError::Invalid {
                    field,
                    reason: "must be positive",
                })
            }
        }

        positive(self.body.height, "body.height")?;
        positive(self.body.width, "body.width")?;
        positive(self.jump.duration, "jump.duration")?;
        if self.slide.checks == 0 {
            return Err(ProfileError::Invalid {
                field: "slide.checks",
                reason: "must be at least one",
            });
        }
        if self.directional.average_y_count == 0 {
            return Err(ProfileError::Invalid {
                field: "directional.average_y_count",
                reason: "must be at least one",
            });
        }
        if self.slide.min_range > self.slide.max_range {
            return Err(ProfileError::Invalid {
                field: "slide.min_range",
                reason: "must not exceed slide.max_range",
            });
        }
        Ok(())
    }

    /// Target representation follow speed for a state.
    pub fn rep_speed_for(&self, state: MovementState) -> f32 {
        let speeds = &self.visual.rep_speeds;
        match state {
            MovementState::Falling | MovementState::Jumping => speeds.falling,
            MovementState::Flying => speeds.flying,
            MovementState::Swimming => speeds.swimming,
            _ => speeds.grounded,
        }
    }

    /// Builder: set the reference height above the feet.
    pub fn with_player_height(mut self, height: f32) -> Self {
        self.body.height = height;
        self
    }

    /// Builder: set the body origin height above the feet.
    pub fn with_origin_height(mut self, height: f32) -> Self {
        self.body.origin_height = height;
        self
    }

    /// Builder: set jump force, duration and delay.
    pub fn with_jump(mut self, force: f32, duration: f32, delay: f32) -> Self {
        self.jump.force = force;
        self.jump.duration = duration;
        self.jump.delay = delay;
        self
    }

    /// Builder: set which states are enabled.
    pub fn with_enabled_states(mut self, enabled: EnabledStates) -> Self {
        self.states.enabled = enabled;
        self
    }

    /// Builder: set the probe layers.
    pub fn with_layers(mut self, layers: ProbeLayers) -> Self {
        self.layers = layers;
        self
    }

    /// Builder: set the global force multiplier.
    pub fn with_force_multiplier(mut self, multiplier: f32) -> Self {
        self.forces.multiplier = multiplier;
        self
    }

    /// Builder: set the falling terminal speed.
    pub fn with_gravity(mut self, gravity: f32) -> Self {
        self.forces.gravity = gravity;
        self
    }

    /// Builder: set slide entry, exit and fall angles in degrees.
    pub fn with_slide_angles(mut self, entry: f32, exit: f32, fall: f32) -> Self {
        self.slide.entry_angle = entry;
        self.slide.exit_angle = exit;
        self.slide.minimum_fall_angle = fall;
        self
    }

    /// Builder: set the grounded transitional speed.
    pub fn with_grounded_speed(mut self, speed: f32) -> Self {
        self.directional.grounded_transitional_speed = speed;
        self
    }

    /// Builder: set blink minimum distance and maximum height change.
    pub fn with_blink_limits(mut self, min_distance: f32, max_height_change: f32) -> Self {
        self.blink.min_distance_change = min_distance;
        self.blink.max_height_change = max_height_change;
        self
    }

    /// Builder: enable or disable automatic landing while flying.
    pub fn with_automatic_land(mut self, enabled: bool) -> Self {
        self.flying.automatic_land = enabled;
        self
    }

    /// Builder: enable or disable IK.
    pub fn with_ik(mut self, enabled: bool) -> Self {
        self.ik.enabled = enabled;
        self
    }
}

/// Named profiles that can be applied at runtime.
///
/// # Example
///
/// ```rust
/// use multistate_character_controller::prelude::*;
///
/// let mut library = ProfileLibrary::default();
/// library.insert("heavy", MultiStateSettings::default().with_gravity(-15.0));
/// library.load_json("light", r#"{ "forces": { "gravity": -3.0 } }"#).unwrap();
///
/// assert_eq!(library.get("light").unwrap().forces.gravity, -3.0);
/// assert!(library.get("missing").is_err());
/// ```
#[derive(Resource, Debug, Clone, Default)]
pub struct ProfileLibrary {
    profiles: HashMap<String, MultiStateSettings>,
}

impl ProfileLibrary {
    /// Register or replace a profile.
    pub fn insert(&mut self, name: impl Into<String>, profile: MultiStateSettings) {
        self.profiles.insert(name.into(), profile);
    }

    /// Parse and register a profile.
    pub fn load_json(&mut self, name: impl Into<String>, json: &str) -> Result<(), ProfileError> {
        let profile = MultiStateSettings::from_json(json)?;
        self.insert(name, profile);
        Ok(())
    }

    /// Look up a profile by name.
    pub fn get(&self, name: &str) -> Result<&MultiStateSettings, ProfileError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ProfileError::Unknown(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_tuning() {
        let settings = MultiStateSettings::default();
        assert_eq!(settings.jump.force, 10.0);
        assert_eq!(settings.jump.duration, 0.1);
        assert_eq!(settings.jump.delay, 0.25);
        assert_eq!(settings.slide.checks, 30);
        assert_eq!(settings.directional.average_y_count, 30);
        assert_eq!(settings.forces.gravity, -7.5);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn ai_preset_disables_flight() {
        let ai = MultiStateSettings::ai();
        assert!(!ai.states.enabled.is_enabled(MovementState::Flying));
        assert!(ai.states.enabled.is_enabled(MovementState::Grounded));
        assert!(!ai.ik.enabled);
    }

    #[test]
    fn substate_multipliers() {
        let substates = SubstateSettings::default();
        assert_eq!(substates.multiplier(GroundedSubstate::Sprinting), 1.5);
        assert_eq!(substates.multiplier(GroundedSubstate::Walking), 0.35);
        assert_eq!(substates.multiplier(GroundedSubstate::Crouching), 0.7);
        assert_eq!(substates.multiplier(GroundedSubstate::Default), 1.0);
    }

    #[test]
    fn partial_json_takes_defaults() {
        let settings = MultiStateSettings::from_json(r#"{ "jump": { "force": 20.0 } }"#).unwrap();
        assert_eq!(settings.jump.force, 20.0);
        assert_eq!(settings.jump.duration, 0.1);
        assert_eq!(settings.body.height, 2.0);
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = MultiStateSettings::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ProfileError::Parse(_)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = MultiStateSettings::from_json(r#"{ "body": { "height": 0.0 } }"#).unwrap_err();
        assert!(matches!(err, ProfileError::Invalid { field: "body.height", .. }));

        let mut settings = MultiStateSettings::default();
        settings.slide.min_range = 2.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rep_speed_per_state() {
        let settings = MultiStateSettings::default();
        assert_eq!(settings.rep_speed_for(MovementState::Falling), 0.02);
        assert_eq!(settings.rep_speed_for(MovementState::Grounded), 0.15);
        assert_eq!(settings.rep_speed_for(MovementState::Swimming), 0.15);
    }

    #[test]
    fn library_lookup() {
        let mut library = ProfileLibrary::default();
        assert!(library.is_empty());
        library.insert("default", MultiStateSettings::default());
        assert_eq!(library.len(), 1);
        assert!(matches!(library.get("nope"), Err(ProfileError::Unknown(name)) if name == "nope"));
    }
}
