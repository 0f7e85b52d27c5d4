//! Live per-character state.
//!
//! Everything in this module changes while the character moves: the current
//! and requested state, timers, targets and the smoothed visual
//! representation. Tunables live in
//! [`MultiStateSettings`](crate::settings::MultiStateSettings); swapping a
//! profile replaces those and leaves this state alone.

use std::collections::VecDeque;

use bevy::prelude::*;

use crate::ik::{FeetLocationMethod, HandLocationMethod};
use crate::locks::MotionLocks;
use crate::lunge::LungeAction;
use crate::settings::{MultiStateSettings, ProfileError, ProfileLibrary};
use crate::state::{GroundedMovementMethod, GroundedSubstate, MovementState};

/// Fixed-size window average.
#[derive(Reflect, Debug, Clone, PartialEq)]
pub struct RollingAverage {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl Default for RollingAverage {
    fn default() -> Self {
        Self::new(30)
    }
}

impl RollingAverage {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Add a sample, dropping the oldest past capacity, and return the new average.
    pub fn push(&mut self, value: f32) -> f32 {
        self.samples.push_back(value);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.average()
    }

    /// Average of the stored samples, `0` when empty.
    pub fn average(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }

    /// Change the window size, keeping the newest samples.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Link between a character and the rail it rides.
#[derive(Reflect, Debug, Clone, Copy, PartialEq)]
pub struct RailAttachment {
    /// Entity carrying the [`RailSystem`](crate::rail::RailSystem).
    pub rail: Entity,
    /// Scalar position along the rail, within `[0, duration]`.
    pub position: f32,
    /// Travel direction, `1` or `-1`.
    pub direction: f32,
}

/// Rail bookkeeping that outlives a single attachment.
#[derive(Reflect, Debug, Clone, PartialEq)]
pub struct RailRuntime {
    pub attachment: Option<RailAttachment>,
    /// Negative while a latch negotiation cools down, counts up to zero.
    pub interaction_time: f32,
    /// Clear the attachment at the end of the tick.
    pub will_detach: bool,
    /// Dolly the camera should follow while attached.
    pub camera_dolly: Option<Entity>,
    /// Waypoint offset the representation looks toward on key-driven rails.
    pub last_look_dir: i32,
    pub has_called_trigger: bool,
    pub animation_position_multiplier: f32,
    pub animation_position_offset: f32,
}

impl Default for RailRuntime {
    fn default() -> Self {
        Self {
            attachment: None,
            interaction_time: 0.0,
            will_detach: false,
            camera_dolly: None,
            last_look_dir: 1,
            has_called_trigger: false,
            animation_position_multiplier: 1.0,
            animation_position_offset: 0.0,
        }
    }
}

impl RailRuntime {
    /// Entity of the attached rail, if any.
    #[inline]
    pub fn rail(&self) -> Option<Entity> {
        self.attachment.map(|a| a.rail)
    }

    #[inline]
    pub fn position(&self) -> f32 {
        self.attachment.map_or(0.0, |a| a.position)
    }
}

/// A validated blink in progress.
#[derive(Reflect, Debug, Clone, PartialEq)]
pub struct ActiveBlink {
    /// Feet position to move to.
    pub target: Vec3,
    /// Time to wait before moving.
    pub delay: f32,
    pub elapsed: f32,
    pub snap_rotation: bool,
    /// Yaw facing the target, applied when snapping.
    pub ideal_rotation: Quat,
    pub achievement_distance: f32,
    pub recovery_time: f32,
    /// Representation follow speed while blinking.
    pub rep_speed: f32,
    pub animation_height_offset: f32,
    /// Representation height when the blink started.
    pub start_height: f32,
    /// Signed height from the representation to the target.
    pub total_height_change: f32,
}

/// Smoothed visual representation (the character mesh).
#[derive(Reflect, Debug, Clone, PartialEq)]
pub struct CharacterRep {
    pub position: Vec3,
    pub rotation: Quat,
    /// Velocity of the smoothing spring, also used for animation.
    pub velocity: Vec3,
    pub current_speed: f32,
    pub target_speed: f32,
    /// Rotation the rail rotation modes steer toward.
    pub target_rotation: Quat,
}

impl Default for CharacterRep {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            current_speed: 0.1,
            target_speed: 0.02,
            target_rotation: Quat::IDENTITY,
        }
    }
}

/// Live IK configuration. The solved targets live on [`IkRig`](crate::ik::IkRig).
#[derive(Reflect, Debug, Clone, PartialEq, Default)]
pub struct IkState {
    pub feet_method: FeetLocationMethod,
    pub hand_method: HandLocationMethod,
    /// Root of the entity tree whose transforms are lock-to-target candidates.
    pub target_parent: Option<Entity>,
}

/// Collider proxy state: capsule dimensions and gyro lean.
#[derive(Reflect, Debug, Clone, Copy, PartialEq)]
pub struct ColliderState {
    pub height: f32,
    pub radius: f32,
    /// Capsule centre relative to the body origin.
    pub center: Vec3,
    /// Local rotation of the physics gyro.
    pub gyro_rotation: Quat,
}

impl Default for ColliderState {
    fn default() -> Self {
        Self {
            height: 2.0,
            radius: 0.5,
            center: Vec3::ZERO,
            gyro_rotation: Quat::IDENTITY,
        }
    }
}

/// Live movement state of one character.
#[derive(Component, Reflect, Debug, Clone, PartialEq)]
#[reflect(Component)]
pub struct MovementRuntime {
    // === State ===
    pub state: MovementState,
    /// Pending transition, honored at the next identification pass.
    pub requested: MovementState,
    pub substate: GroundedSubstate,
    pub movement_method: GroundedMovementMethod,
    pub locks: MotionLocks,
    /// Ground contact reported by the physics backend.
    pub is_grounded: bool,

    // === Targets ===
    /// Head-height probe origin.
    pub reference_position: Vec3,
    /// Where the integrator pulls the body this tick.
    pub external_target: Vec3,
    pub move_to_target: Option<Vec3>,
    pub transitional_speed: f32,
    pub rotation_speed: f32,
    /// Camera-to-body yaw offset kept while the camera orbits freely.
    pub rotation_difference: Quat,
    pub y_average: RollingAverage,
    /// Ground probe length of the current state.
    pub raycast_distance: f32,

    // === Timers ===
    /// Negative while recovering, counts up to zero.
    pub recovery: f32,
    pub fall_time: f32,
    /// Negative during a jump: delay phase, then active phase.
    pub jump_time: f32,
    /// Negative while jump attempts are refused.
    pub jump_attempt_guard: f32,
    pub jump_direction: Vec3,
    /// Velocity captured on the first falling tick.
    pub fall_start_velocity: Vec3,
    pub fall_protection_time: f32,

    // === Slide ===
    pub slide_range: f32,
    pub slide_target: Vec3,

    // === Water ===
    pub water_level: f32,

    // === Actions ===
    pub lunge: Option<LungeAction>,
    pub lunge_step: f32,
    pub blink: Option<ActiveBlink>,

    // === Subsystems ===
    pub rail: RailRuntime,
    pub rep: CharacterRep,
    pub ik: IkState,
    pub collider: ColliderState,
    /// Animation-reported speed used by root motion.
    pub root_motion_speed: f32,
    /// Body yaw recorded at the end of the previous tick.
    pub recorded_yaw: f32,
}

impl Default for MovementRuntime {
    fn default() -> Self {
        Self {
            state: MovementState::Grounded,
            requested: MovementState::Undefined,
            substate: GroundedSubstate::Running,
            movement_method: GroundedMovementMethod::ControlVectorBased,
            locks: MotionLocks::default(),
            is_grounded: false,
            reference_position: Vec3::ZERO,
            external_target: Vec3::ZERO,
            move_to_target: None,
            transitional_speed: 0.2,
            rotation_speed: 0.0,
            rotation_difference: Quat::IDENTITY,
            y_average: RollingAverage::default(),
            raycast_distance: 0.1,
            recovery: 0.0,
            fall_time: 0.0,
            jump_time: 0.0,
            jump_attempt_guard: 0.0,
            jump_direction: Vec3::ZERO,
            fall_start_velocity: Vec3::ZERO,
            fall_protection_time: 0.0,
            slide_range: 0.2,
            slide_target: Vec3::ZERO,
            water_level: 0.0,
            lunge: None,
            lunge_step: 0.0,
            blink: None,
            rail: RailRuntime::default(),
            rep: CharacterRep::default(),
            ik: IkState::default(),
            collider: ColliderState::default(),
            root_motion_speed: 0.0,
            recorded_yaw: 0.0,
        }
    }
}

impl MovementRuntime {
    /// Runtime initialised from a profile for a body whose feet are at `feet`.
    pub fn from_settings(settings: &MultiStateSettings, feet: Vec3) -> Self {
        let reference = feet + Vec3::Y * settings.body.height;
        let mut runtime = Self {
            substate: match settings.substates.default {
                GroundedSubstate::Default => GroundedSubstate::Running,
                other => other,
            },
            reference_position: reference,
            external_target: reference,
            y_average: RollingAverage::new(settings.directional.average_y_count),
            raycast_distance: settings.raycast.falling,
            slide_range: settings.slide.min_range,
            ..default()
        };
        runtime.rep.position = reference + Vec3::Y * settings.visual.rep_height_offset;
        runtime.rep.current_speed = settings.visual.rep_speeds.initial;
        runtime.rep.target_speed = if runtime.state == MovementState::Flying {
            settings.visual.rep_speeds.flying
        } else {
            settings.visual.rep_speeds.falling
        };
        runtime.ik.feet_method = settings.ik.feet_method;
        runtime.ik.hand_method = settings.ik.hand_method;
        runtime.collider = ColliderState {
            height: settings.body.collider_height,
            radius: settings.gyro.normal_radius,
            center: settings.body.collider_offset,
            gyro_rotation: Quat::IDENTITY,
        };
        runtime
    }

    /// Seconds spent in the falling state so far.
    #[inline]
    pub fn fall_time(&self) -> f32 {
        self.fall_time
    }

    /// Ground contact when `actual`, otherwise whether the state is grounded.
    pub fn is_grounded(&self, actual: bool) -> bool {
        if actual {
            self.is_grounded
        } else {
            self.state == MovementState::Grounded
        }
    }

    /// Current representation follow speed relative to the grounded speed.
    pub fn rep_speed_percent(&self, settings: &MultiStateSettings) -> f32 {
        let grounded = settings.visual.rep_speeds.grounded;
        if grounded == 0.0 {
            return 0.0;
        }
        self.rep.current_speed / grounded
    }

    /// Dolly the camera should follow, if attached to a rail with one.
    #[inline]
    pub fn camera_dolly(&self) -> Option<Entity> {
        self.rail.camera_dolly
    }
}

/// Pending profile swap, applied after the tick.
#[derive(Component, Debug, Clone)]
pub enum ProfileChangeRequest {
    /// Look the profile up in the [`ProfileLibrary`].
    Named(String),
    /// Use this profile directly.
    Inline(Box<MultiStateSettings>),
}

impl ProfileChangeRequest {
    /// Resolve the request to a profile.
    pub fn resolve<'a>(
        &'a self,
        library: Option<&'a ProfileLibrary>,
    ) -> Result<&'a MultiStateSettings, ProfileError> {
        match self {
            ProfileChangeRequest::Inline(profile) => Ok(profile),
            ProfileChangeRequest::Named(name) => match library {
                Some(library) => library.get(name),
                None => Err(ProfileError::Unknown(name.clone())),
            },
        }
    }
}

/// Replace the configuration with `profile`.
///
/// Only configuration is copied: timers, targets, locks and the current state
/// are left untouched so motion continues across the swap. The rolling
/// average window follows the new profile's size.
pub fn apply_profile(
    settings: &mut MultiStateSettings,
    runtime: &mut MovementRuntime,
    profile: &MultiStateSettings,
) {
    *settings = profile.clone();
    runtime
        .y_average
        .resize(settings.directional.average_y_count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_average_window() {
        let mut avg = RollingAverage::new(3);
        avg.push(3.0);
        avg.push(6.0);
        assert_eq!(avg.average(), 4.5);
        avg.push(9.0);
        assert_eq!(avg.push(12.0), 9.0);
        assert_eq!(avg.len(), 3);
    }

    #[test]
    fn rolling_average_resize_keeps_newest() {
        let mut avg = RollingAverage::new(4);
        for v in [1.0, 2.0, 3.0, 4.0] {
            avg.push(v);
        }
        avg.resize(2);
        assert_eq!(avg.average(), 3.5);
        assert!(RollingAverage::new(0).capacity() >= 1);
    }

    #[test]
    fn runtime_from_settings() {
        let settings = MultiStateSettings::default();
        let runtime = MovementRuntime::from_settings(&settings, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(runtime.reference_position, Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(runtime.y_average.capacity(), 30);
        assert_eq!(runtime.raycast_distance, settings.raycast.falling);
        assert_eq!(runtime.state, MovementState::Grounded);
    }

    #[test]
    fn merge_keeps_runtime_values() {
        let mut settings = MultiStateSettings::default();
        let mut runtime = MovementRuntime::from_settings(&settings, Vec3::ZERO);
        runtime.fall_time = 1.25;
        runtime.recovery = -0.3;
        runtime.state = MovementState::Falling;
        runtime.y_average.push(4.0);

        let mut profile = MultiStateSettings::default().with_gravity(-20.0);
        profile.directional.average_y_count = 10;
        apply_profile(&mut settings, &mut runtime, &profile);

        assert_eq!(settings.forces.gravity, -20.0);
        assert_eq!(runtime.fall_time, 1.25);
        assert_eq!(runtime.recovery, -0.3);
        assert_eq!(runtime.state, MovementState::Falling);
        assert_eq!(runtime.y_average.capacity(), 10);
        assert_eq!(runtime.y_average.average(), 4.0);
    }

    #[test]
    fn named_profile_resolution() {
        let mut library = ProfileLibrary::default();
        library.insert("swift", MultiStateSettings::default().with_grounded_speed(4.0));
        let request = ProfileChangeRequest::Named("swift".into());
        let profile = request.resolve(Some(&library)).unwrap();
        assert_eq!(profile.directional.grounded_transitional_speed, 4.0);

        let missing = ProfileChangeRequest::Named("slow".into());
        assert!(missing.resolve(Some(&library)).is_err());
        assert!(request.resolve(None).is_err());
    }

    #[test]
    fn grounded_queries() {
        let mut runtime = MovementRuntime::default();
        runtime.state = MovementState::Sliding;
        runtime.is_grounded = true;
        assert!(runtime.is_grounded(true));
        assert!(!runtime.is_grounded(false));
        runtime.state = MovementState::Grounded;
        assert!(runtime.is_grounded(false));
    }
}
