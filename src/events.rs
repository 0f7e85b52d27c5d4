//! Notifications published by the controller.
//!
//! The movement logic records [`ControllerEvent`]s while it runs; the systems
//! forward them as Bevy events tagged with the character entity.

use bevy::prelude::*;

use crate::state::MovementState;

/// Raised when the character lands after falling.
#[derive(Event, Debug, Clone, Copy, PartialEq)]
pub struct PlayerLanded {
    pub entity: Entity,
    /// Seconds spent falling before the landing.
    pub fall_time: f32,
}

/// Raised whenever the current movement state changes.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovementStateChanged {
    pub entity: Entity,
    pub from: MovementState,
    pub to: MovementState,
}

/// A named animation trigger pulse.
#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub struct AnimationTriggerFired {
    pub entity: Entity,
    pub trigger: String,
}

/// A previously fired animation trigger should be cleared.
#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub struct AnimationTriggerReset {
    pub entity: Entity,
    pub trigger: String,
}

/// A character latched onto a rail.
#[derive(Event, Debug, Clone, Copy, PartialEq)]
pub struct RailLatched {
    pub character: Entity,
    pub rail: Entity,
    pub position: f32,
}

/// A character left a rail.
#[derive(Event, Debug, Clone, PartialEq)]
pub struct RailUnlatched {
    pub character: Entity,
    pub rail: Entity,
    /// Key that caused the unlatch, if it was key driven.
    pub key: Option<String>,
}

/// A rail's positional event fired.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RailPositionReached {
    pub rail: Entity,
    /// Index of the positional event on the rail.
    pub index: usize,
}

/// A character touched a rail cap's trigger volume.
///
/// Emitted by the physics backend; the rail systems react to it.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RailCapContact {
    pub cap: Entity,
    pub character: Entity,
    /// `true` while the contact persists, `false` on the first touch.
    pub stay: bool,
}

/// Something the movement logic wants the outside world to know.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Landed { fall_time: f32 },
    StateChanged { from: MovementState, to: MovementState },
    AnimationTrigger(String),
    ResetAnimationTrigger(String),
    RailLatched { rail: Entity, position: f32 },
    RailUnlatched { rail: Entity, key: Option<String> },
}
