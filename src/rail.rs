//! Rail systems: designer-authored paths a character can latch onto.
//!
//! A [`RailSystem`] maps a scalar position in `[0, duration]` to a world
//! location along its waypoints. While a character rides it, every
//! evaluation also drives the attached [`RailDolly`] entities and fires
//! [`PositionalEvent`]s. [`RailCap`]s are the interaction points where
//! characters latch on and off.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::ControlVector;
use crate::ik::{FeetLocationMethod, HandLocationMethod};
use crate::math::{lerp_vec3, look_rotation, slerp, yaw_only};
use crate::state::{GroundedSubstate, MovementState};

/// Animation trigger reset on every latch and fired by rail exit shortcuts.
pub const RAIL_EXIT_TRIGGER: &str = "RailExit";

/// Errors raised while authoring rails.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RailError {
    #[error("rail needs at least two waypoints, got {0}")]
    TooFewWaypoints(usize),
    #[error("rail duration must be positive, got {0}")]
    InvalidDuration(f32),
    #[error("dolly {dolly:?} travels along the rail {rail:?} that drives it")]
    CyclicDolly { rail: Entity, dolly: Entity },
}

/// What advances the rail position.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RailControl {
    /// The control vector's rail axis.
    #[default]
    Key,
    /// Elapsed time.
    Time,
}

/// How a position resolves to a location.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RailInterpolation {
    /// Proportional to travelled arc length.
    #[default]
    UniformDistance,
    /// Waypoints evenly spaced in position regardless of their distance.
    WaypointIndex,
}

/// How a riding character is rotated.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RailRotationControl {
    /// Look toward the next waypoint.
    NextWaypoint,
    /// Look at a target entity.
    Target,
    /// Keep the rotation at latch time.
    Locked,
    /// Rotation is left to the control vector.
    #[default]
    Free,
}

/// When a positional event fires.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PositionalTrigger {
    /// Once the position is at or past the event.
    After,
    /// Once the position is at or before the event.
    Before,
    /// Once the position is within the tolerance.
    #[default]
    At,
}

/// An event fired once per latch when the rail position meets a condition.
#[derive(Reflect, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionalEvent {
    pub position: f32,
    pub trigger: PositionalTrigger,
    /// Range around `position` for [`PositionalTrigger::At`].
    pub tolerance: f32,
    #[serde(skip)]
    pub fired: bool,
}

impl PositionalEvent {
    pub fn new(position: f32, trigger: PositionalTrigger) -> Self {
        Self {
            position,
            trigger,
            tolerance: 0.5,
            fired: false,
        }
    }

    /// Builder: set the tolerance.
    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    fn is_met(&self, position: f32) -> bool {
        match self.trigger {
            PositionalTrigger::After => position >= self.position,
            PositionalTrigger::Before => position <= self.position,
            PositionalTrigger::At => (position - self.position).abs() <= self.tolerance,
        }
    }
}

/// Dolly evaluation requested by the last rail evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DollyUpdate {
    pub position: f32,
    /// Snap the dollies instead of easing them.
    pub reset: bool,
}

/// The character side of a rail, as seen by extensions.
pub trait RailOccupant {
    fn substate(&self) -> GroundedSubstate;
    fn set_substate(&mut self, substate: GroundedSubstate);
    /// Set the default substate, switching to it when `switch` is set.
    fn set_default_substate(&mut self, substate: GroundedSubstate, switch: bool);
    fn request_state(&mut self, state: MovementState);
    fn trigger_animation(&mut self, trigger: &str);
}

/// Custom per-rail behaviour, invoked in registration order.
pub trait RailExtension: Debug + Send + Sync {
    fn on_latch(&self, _occupant: &mut dyn RailOccupant) {}
    fn on_unlatch(&self, _occupant: &mut dyn RailOccupant) {}
    fn on_key_unlatch(&self, _occupant: &mut dyn RailOccupant, _key: &str) {}
    /// Called every tick while a character rides the rail.
    fn on_tick(&self, _occupant: &mut dyn RailOccupant, _control: &ControlVector) {}
}

/// Forces crouching while attached.
///
/// With a switch key configured, holding it runs instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LockToCrouch {
    pub switch_key: Option<String>,
}

impl LockToCrouch {
    pub fn with_switch_key(key: impl Into<String>) -> Self {
        Self {
            switch_key: Some(key.into()),
        }
    }
}

impl RailExtension for LockToCrouch {
    fn on_latch(&self, occupant: &mut dyn RailOccupant) {
        occupant.set_default_substate(GroundedSubstate::Crouching, true);
    }

    fn on_unlatch(&self, occupant: &mut dyn RailOccupant) {
        occupant.set_default_substate(GroundedSubstate::Running, true);
    }

    fn on_tick(&self, occupant: &mut dyn RailOccupant, control: &ControlVector) {
        let Some(key) = &self.switch_key else {
            return;
        };
        if control.is_pressed(key) {
            occupant.set_default_substate(GroundedSubstate::Running, true);
        } else {
            occupant.set_default_substate(GroundedSubstate::Crouching, true);
        }
    }
}

/// A path characters can ride.
#[derive(Component, Reflect, Debug, Clone)]
#[reflect(Component)]
pub struct RailSystem {
    // === Path ===
    pub waypoints: Vec<Vec3>,
    /// Position range is `[0, duration]`.
    pub duration: f32,
    pub interpolation: RailInterpolation,
    /// Round positions to `1 / round_to` steps. `0` disables rounding.
    pub round_to: f32,
    pub events: Vec<PositionalEvent>,

    // === Motion ===
    pub control: RailControl,
    pub speed: f32,
    /// Speed restored on every latch.
    pub base_speed: f32,
    /// Teleport the body onto the rail instead of steering it there.
    pub absolute_position_lock: bool,
    /// Direction follows the camera.
    pub camera_based_direction: bool,
    pub y_offset: f32,
    pub drag: f32,
    pub character_rep_speed: f32,
    pub recovery_time: f32,

    // === Rotation ===
    pub rotation: RailRotationControl,
    pub rotation_target: Option<Entity>,
    pub rotate_on_y_only: bool,
    pub rotation_speed: f32,

    // === Attachment ===
    pub animation_trigger: String,
    pub animation_position_multiplier: f32,
    pub animation_position_offset: f32,
    /// Keys that detach a riding character.
    pub unlatch_keys: Vec<String>,
    /// Key-driven unlatches also run the regular unlatch hooks.
    pub key_unlatch_runs_unlatch: bool,
    pub feet_method: FeetLocationMethod,
    pub hand_method: HandLocationMethod,
    pub ik_target_parent: Option<Entity>,
    pub attach_camera_to_dolly: bool,
    pub camera_dolly_index: usize,
    /// Dollies driven by this rail.
    pub dollies: Vec<Entity>,

    // === Runtime ===
    pub current_waypoint: usize,
    pub occupant: Option<Entity>,
    #[reflect(ignore)]
    pub extensions: Vec<Arc<dyn RailExtension>>,
    /// World position of `rotation_target`, refreshed every tick.
    #[reflect(ignore)]
    pub resolved_rotation_target: Option<Vec3>,
    #[reflect(ignore)]
    pub pending_dolly: Option<DollyUpdate>,
    /// Indices of positional events fired since the last drain.
    #[reflect(ignore)]
    pub fired_events: Vec<usize>,
}

impl RailSystem {
    /// Create a rail through `waypoints` spanning positions `[0, duration]`.
    pub fn new(waypoints: Vec<Vec3>, duration: f32) -> Result<Self, RailError> {
        if waypoints.len() < 2 {
            return Err(RailError::TooFewWaypoints(waypoints.len()));
        }
        if duration.is_nan() || duration <= 0.0 {
            return Err(RailError::InvalidDuration(duration));
        }
        Ok(Self {
            waypoints,
            duration,
            interpolation: RailInterpolation::UniformDistance,
            round_to: 0.0,
            events: Vec::new(),
            control: RailControl::Key,
            speed: 1.0,
            base_speed: 1.0,
            absolute_position_lock: false,
            camera_based_direction: false,
            y_offset: 0.0,
            drag: 5.0,
            character_rep_speed: 0.05,
            recovery_time: 0.1,
            rotation: RailRotationControl::Free,
            rotation_target: None,
            rotate_on_y_only: true,
            rotation_speed: 30.0,
            animation_trigger: "onRailsTrigger".to_string(),
            animation_position_multiplier: 1.0,
            animation_position_offset: 0.0,
            unlatch_keys: Vec::new(),
            key_unlatch_runs_unlatch: true,
            feet_method: FeetLocationMethod::ProjectDown,
            hand_method: HandLocationMethod::None,
            ik_target_parent: None,
            attach_camera_to_dolly: false,
            camera_dolly_index: 0,
            dollies: Vec::new(),
            current_waypoint: 0,
            occupant: None,
            extensions: Vec::new(),
            resolved_rotation_target: None,
            pending_dolly: None,
            fired_events: Vec::new(),
        })
    }

    /// Builder: set the interpolation mode.
    pub fn with_interpolation(mut self, interpolation: RailInterpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    /// Builder: advance with time instead of key input.
    pub fn time_controlled(mut self) -> Self {
        self.control = RailControl::Time;
        self
    }

    /// Builder: set the travel speed.
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self.base_speed = speed;
        self
    }

    /// Builder: set the rotation mode.
    pub fn with_rotation(mut self, rotation: RailRotationControl) -> Self {
        self.rotation = rotation;
        self
    }

    /// Builder: add a positional event.
    pub fn with_event(mut self, event: PositionalEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Builder: add an extension.
    pub fn with_extension(mut self, extension: impl RailExtension + 'static) -> Self {
        self.extensions.push(Arc::new(extension));
        self
    }

    /// Builder: add an unlatch key.
    pub fn with_unlatch_key(mut self, key: impl Into<String>) -> Self {
        self.unlatch_keys.push(key.into());
        self
    }

    /// Builder: set the rounding precision.
    pub fn with_rounding(mut self, round_to: f32) -> Self {
        self.round_to = round_to;
        self
    }

    /// Register a dolly driven by this rail.
    ///
    /// A dolly must travel along a different rail than the one driving it.
    pub fn add_dolly(
        &mut self,
        rail: Entity,
        dolly_entity: Entity,
        dolly: &RailDolly,
    ) -> Result<(), RailError> {
        if dolly.path == rail {
            return Err(RailError::CyclicDolly {
                rail,
                dolly: dolly_entity,
            });
        }
        self.dollies.push(dolly_entity);
        Ok(())
    }

    /// Clamp and optionally round a position.
    pub fn clamp_position(&self, position: f32) -> f32 {
        let position = position.clamp(0.0, self.duration);
        if self.round_to > 0.0 {
            (position * self.round_to).round() / self.round_to
        } else {
            position
        }
    }

    /// Resolve a position to a location and the waypoint segment it lies on,
    /// without side effects.
    pub fn resolve(&self, position: f32) -> (Vec3, usize) {
        let position = self.clamp_position(position);
        let n = self.waypoints.len();
        match n {
            0 => return (Vec3::ZERO, 0),
            1 => return (self.waypoints[0], 0),
            _ => {}
        }
        if self.duration <= 0.0 {
            return (self.waypoints[0], 0);
        }

        match self.interpolation {
            RailInterpolation::WaypointIndex => {
                let spacing = self.duration / (n - 1) as f32;
                let index = ((position / spacing).floor() as usize).min(n - 1);
                if index == n - 1 {
                    return (self.waypoints[index], index);
                }
                let t = (position - index as f32 * spacing) / spacing;
                (
                    lerp_vec3(self.waypoints[index], self.waypoints[index + 1], t),
                    index,
                )
            }
            RailInterpolation::UniformDistance => {
                let total: f32 = self
                    .waypoints
                    .windows(2)
                    .map(|w| w[0].distance(w[1]))
                    .sum();
                if total <= f32::EPSILON {
                    return (self.waypoints[0], 0);
                }
                let travelled = position / self.duration * total;
                let mut accumulated = 0.0;
                for (index, segment) in self.waypoints.windows(2).enumerate() {
                    let length = segment[0].distance(segment[1]);
                    if travelled <= accumulated + length && length > 0.0 {
                        let t = (travelled - accumulated) / length;
                        return (lerp_vec3(segment[0], segment[1], t), index);
                    }
                    accumulated += length;
                }
                (self.waypoints[n - 1], n - 2)
            }
        }
    }

    /// Evaluate a position: drive the dollies, fire positional events and
    /// return the world location.
    pub fn get_rail_location(&mut self, position: f32) -> Vec3 {
        let position = self.clamp_position(position);
        self.pending_dolly = Some(DollyUpdate {
            position,
            reset: self.pending_dolly.is_some_and(|p| p.reset),
        });
        self.evaluate_events(position);
        let (location, waypoint) = self.resolve(position);
        self.current_waypoint = waypoint;
        location
    }

    fn evaluate_events(&mut self, position: f32) {
        for (index, event) in self.events.iter_mut().enumerate() {
            if !event.fired && event.is_met(position) {
                event.fired = true;
                self.fired_events.push(index);
            }
        }
    }

    /// Waypoint `offset` places after the current one, clamped to the path.
    pub fn floor_waypoint(&self, offset: i32) -> Vec3 {
        if self.waypoints.is_empty() {
            return Vec3::ZERO;
        }
        let last = self.waypoints.len() as i64 - 1;
        let index = (self.current_waypoint as i64 + offset as i64).clamp(0, last);
        self.waypoints[index as usize]
    }

    /// Start a ride at `position`.
    ///
    /// Restores the authored speed, re-arms positional events, snaps the
    /// dollies and runs the latch hooks.
    pub fn latch(&mut self, position: f32, character: Entity, occupant: &mut dyn RailOccupant) {
        self.occupant = Some(character);
        self.speed = self.base_speed;
        self.current_waypoint = 0;
        for event in &mut self.events {
            event.fired = false;
        }
        self.pending_dolly = Some(DollyUpdate {
            position: self.clamp_position(position),
            reset: true,
        });
        for extension in self.extensions.clone() {
            extension.on_latch(occupant);
        }
    }

    /// End a ride, optionally because `key` was pressed.
    pub fn unlatch(&mut self, key: Option<&str>, occupant: &mut dyn RailOccupant) {
        if self.occupant.take().is_none() {
            return;
        }
        if let Some(key) = key {
            for extension in self.extensions.clone() {
                extension.on_key_unlatch(occupant, key);
            }
            if !self.key_unlatch_runs_unlatch {
                return;
            }
        }
        for extension in self.extensions.clone() {
            extension.on_unlatch(occupant);
        }
    }

    /// Run the per-tick extension hooks for the riding character.
    pub fn tick_extensions(&self, occupant: &mut dyn RailOccupant, control: &ControlVector) {
        for extension in &self.extensions {
            extension.on_tick(occupant, control);
        }
    }

    /// Change the travel speed of the current ride.
    pub fn set_speed(&mut self, speed: f32) {
        self.speed = speed;
    }

    /// Dolly the camera follows, when configured.
    pub fn camera_dolly(&self) -> Option<Entity> {
        if !self.attach_camera_to_dolly {
            return None;
        }
        self.dollies.get(self.camera_dolly_index).copied()
    }

    /// First key in `pressed` that unlatches this rail.
    pub fn unlatch_key<'a>(&self, pressed: &'a [String]) -> Option<&'a str> {
        pressed
            .iter()
            .find(|key| self.unlatch_keys.contains(key))
            .map(String::as_str)
    }
}

/// Rails borrowed out of the world for one tick.
#[derive(Debug, Default)]
pub struct RailSet {
    rails: HashMap<Entity, RailSystem>,
}

impl RailSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: Entity, rail: RailSystem) {
        self.rails.insert(entity, rail);
    }

    pub fn get(&self, entity: Entity) -> Option<&RailSystem> {
        self.rails.get(&entity)
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut RailSystem> {
        self.rails.get_mut(&entity)
    }

    /// Remove a rail so it can be mutated alongside its occupant.
    pub fn take(&mut self, entity: Entity) -> Option<RailSystem> {
        self.rails.remove(&entity)
    }

    /// Return a rail removed with [`take`](Self::take).
    pub fn put(&mut self, entity: Entity, rail: RailSystem) {
        self.rails.insert(entity, rail);
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.rails.contains_key(&entity)
    }

    pub fn into_inner(self) -> HashMap<Entity, RailSystem> {
        self.rails
    }
}

/// An object that follows a rail position along its own path.
///
/// The rail that drives it is the one listing it in
/// [`RailSystem::dollies`]; `path` is the rail it travels on.
#[derive(Component, Reflect, Debug, Clone, PartialEq)]
#[reflect(Component)]
pub struct RailDolly {
    pub path: Entity,
    pub position_multiplier: f32,
    pub position_offset: f32,
    /// Position easing speed.
    pub speed: f32,
    pub rotation_multiplier: f32,
    /// Look back along the path when the driver reverses.
    pub allow_reverse: bool,
    pub limit_to_y: bool,

    // === Runtime ===
    pub active: bool,
    pub target: Vec3,
    pub last_position: f32,
    pub last_direction: i32,
}

impl RailDolly {
    pub fn new(path: Entity) -> Self {
        Self {
            path,
            position_multiplier: 1.0,
            position_offset: 0.0,
            speed: 5.0,
            rotation_multiplier: 5.0,
            allow_reverse: false,
            limit_to_y: false,
            active: false,
            target: Vec3::ZERO,
            last_position: 0.0,
            last_direction: 1,
        }
    }

    fn path_position(&self, position: f32) -> f32 {
        position * self.position_multiplier + self.position_offset
    }

    /// Snap onto the path at the driver's `position`.
    pub fn reset(&mut self, path: &mut RailSystem, position: f32, transform: &mut Transform) {
        let location = path.get_rail_location(self.path_position(position));
        self.target = location;
        self.last_position = position;
        transform.translation = location;
    }

    /// Retarget toward the driver's `position`.
    pub fn evaluate(&mut self, path: &mut RailSystem, position: f32) {
        self.active = true;
        self.target = path.get_rail_location(self.path_position(position));
        if self.last_position > position {
            self.last_direction = 0;
        } else if self.last_position < position {
            self.last_direction = 1;
        }
        self.last_position = position;
    }

    /// Ease toward the target and turn along the path.
    pub fn step(&mut self, path: &RailSystem, transform: &mut Transform, dt: f32) {
        if !self.active {
            return;
        }
        transform.translation = lerp_vec3(transform.translation, self.target, self.speed * dt);

        let offset = if self.allow_reverse { self.last_direction } else { 1 };
        let look = path.floor_waypoint(offset) - transform.translation;
        if look.length_squared() > f32::EPSILON {
            let mut desired = look_rotation(look, Vec3::Y);
            if self.limit_to_y {
                desired = yaw_only(desired);
            }
            transform.rotation = slerp(transform.rotation, desired, self.rotation_multiplier * dt);
        }

        if transform.translation.distance(self.target) <= 0.001 {
            self.active = false;
        }
    }
}

/// Where a cap latches the character.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LatchPosition {
    /// A fixed rail position.
    Fixed(f32),
    /// Between `start` and `end`, weighted by the character's distance to
    /// two markers.
    Calculated {
        start: f32,
        end: f32,
        marker_one: Vec3,
        marker_two: Vec3,
    },
}

impl Default for LatchPosition {
    fn default() -> Self {
        LatchPosition::Fixed(0.0)
    }
}

impl LatchPosition {
    /// Rail position for a character standing at `character`.
    pub fn resolve(&self, character: Vec3) -> f32 {
        match *self {
            LatchPosition::Fixed(position) => position,
            LatchPosition::Calculated {
                start,
                end,
                marker_one,
                marker_two,
            } => {
                let one = character.distance(marker_one);
                let two = character.distance(marker_two);
                let total = one + two;
                if total <= f32::EPSILON {
                    return start;
                }
                (end - start) * (one / total) + start
            }
        }
    }
}

/// Latching from a distance, once the character is grounded.
#[derive(Reflect, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteAccess {
    pub enabled: bool,
    pub min_distance: f32,
    pub max_distance: f32,
    pub animation_trigger: String,
    /// Seconds the poll waits for the character to become grounded.
    pub timeout_limit: f32,

    // === Runtime ===
    #[serde(skip)]
    pub timeout: f32,
    #[serde(skip)]
    pub pending: Option<Entity>,
}

impl Default for RemoteAccess {
    fn default() -> Self {
        Self {
            enabled: false,
            min_distance: 1.0,
            max_distance: 10.0,
            animation_trigger: String::new(),
            timeout_limit: 5.0,
            timeout: 0.0,
            pending: None,
        }
    }
}

impl RemoteAccess {
    pub fn in_range(&self, distance: f32) -> bool {
        distance >= self.min_distance && distance <= self.max_distance
    }
}

/// Interaction point of a rail.
///
/// Keyless caps react when a character enters their trigger volume; keyed
/// caps react while the character stays inside with the key held.
#[derive(Component, Reflect, Debug, Clone, PartialEq)]
#[reflect(Component)]
pub struct RailCap {
    pub rail: Entity,
    pub interaction_key: Option<String>,
    pub allow_latch: bool,
    pub allow_unlatch: bool,
    pub latch: LatchPosition,
    /// Travel direction after latching, `1` or `-1`.
    pub direction: f32,
    pub remote: RemoteAccess,
}

impl RailCap {
    pub fn new(rail: Entity, latch: LatchPosition) -> Self {
        Self {
            rail,
            interaction_key: None,
            allow_latch: true,
            allow_unlatch: true,
            latch,
            direction: 1.0,
            remote: RemoteAccess::default(),
        }
    }

    /// Builder: require a held key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.interaction_key = Some(key.into());
        self
    }

    /// Builder: set the travel direction.
    pub fn with_direction(mut self, direction: f32) -> Self {
        self.direction = direction.signum();
        self
    }

    /// Builder: allow remote access between the given distances.
    pub fn with_remote_access(mut self, min_distance: f32, max_distance: f32) -> Self {
        self.remote.enabled = true;
        self.remote.min_distance = min_distance;
        self.remote.max_distance = max_distance;
        self
    }

    /// Whether a contact of this kind should trigger an interaction.
    pub fn reacts_to(&self, stay: bool, control: Option<&ControlVector>) -> bool {
        match &self.interaction_key {
            None => !stay,
            Some(key) => stay && control.is_some_and(|c| c.is_pressed(key)),
        }
    }
}

/// Latch negotiation parameters handed to the character.
#[derive(Reflect, Debug, Clone, PartialEq)]
pub struct RailEvaluation {
    pub rail: Entity,
    pub position: f32,
    pub direction: f32,
    pub allow_latch: bool,
    pub allow_unlatch: bool,
    pub feet_method: FeetLocationMethod,
    pub hand_method: HandLocationMethod,
    pub ik_target_parent: Option<Entity>,
    pub animation_position_multiplier: f32,
    pub animation_position_offset: f32,
    pub camera_dolly: Option<Entity>,
}

impl RailEvaluation {
    /// Evaluation for `cap` on `rail` with the character at `character`.
    pub fn from_cap(cap: &RailCap, rail: &RailSystem, character: Vec3) -> Self {
        Self {
            rail: cap.rail,
            position: cap.latch.resolve(character),
            direction: cap.direction,
            allow_latch: cap.allow_latch,
            allow_unlatch: cap.allow_unlatch,
            feet_method: rail.feet_method,
            hand_method: rail.hand_method,
            ik_target_parent: rail.ik_target_parent,
            animation_position_multiplier: rail.animation_position_multiplier,
            animation_position_offset: rail.animation_position_offset,
            camera_dolly: rail.camera_dolly(),
        }
    }
}
