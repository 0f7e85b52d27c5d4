//! Movement state enums and the per-state activation table.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// The locomotion state a character is in.
///
/// Exactly one state is current at any time. `Undefined` is a transient
/// marker meaning "re-evaluate from scratch on the next identification pass";
/// the machine falls through to grounded or falling from there.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MovementState {
    #[default]
    Undefined,
    Recovery,
    Grounded,
    Sliding,
    Blink,
    Lunge,
    Jumping,
    Falling,
    Flying,
    Swimming,
    OnRails,
    Ragdoll,
}

impl MovementState {
    /// Every state, in declaration order.
    pub const ALL: [MovementState; 12] = [
        MovementState::Undefined,
        MovementState::Recovery,
        MovementState::Grounded,
        MovementState::Sliding,
        MovementState::Blink,
        MovementState::Lunge,
        MovementState::Jumping,
        MovementState::Falling,
        MovementState::Flying,
        MovementState::Swimming,
        MovementState::OnRails,
        MovementState::Ragdoll,
    ];

    /// States whose visuals stay glued to the ground and whose forces go
    /// through the climb-limited grounded integrator.
    #[inline]
    pub fn is_ground_like(self) -> bool {
        matches!(
            self,
            MovementState::Undefined
                | MovementState::Recovery
                | MovementState::Grounded
                | MovementState::Sliding
        )
    }

    /// States integrated as a plain proportional pull toward the target.
    #[inline]
    pub fn is_free_motion(self) -> bool {
        matches!(
            self,
            MovementState::Jumping
                | MovementState::Swimming
                | MovementState::Flying
                | MovementState::Falling
                | MovementState::Lunge
        )
    }
}

/// Secondary mode while grounded.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GroundedSubstate {
    #[default]
    Running,
    Walking,
    Crouching,
    Sprinting,
    /// Placeholder meaning "whatever the configured default is".
    Default,
}

impl GroundedSubstate {
    /// Value the animation blend converges to for this substate.
    pub fn blend_value(self) -> Option<f32> {
        match self {
            GroundedSubstate::Sprinting => Some(0.0),
            GroundedSubstate::Running => Some(1.0),
            GroundedSubstate::Walking => Some(2.0),
            GroundedSubstate::Crouching => Some(3.0),
            GroundedSubstate::Default => None,
        }
    }

    /// Parse a substate name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "running" => Some(GroundedSubstate::Running),
            "walking" => Some(GroundedSubstate::Walking),
            "crouching" => Some(GroundedSubstate::Crouching),
            "sprinting" => Some(GroundedSubstate::Sprinting),
            "default" => Some(GroundedSubstate::Default),
            _ => None,
        }
    }

    /// Substate by declaration index.
    pub fn from_index(index: usize) -> Option<Self> {
        [
            GroundedSubstate::Running,
            GroundedSubstate::Walking,
            GroundedSubstate::Crouching,
            GroundedSubstate::Sprinting,
            GroundedSubstate::Default,
        ]
        .get(index)
        .copied()
    }
}

/// How grounded movement picks its direction.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GroundedMovementMethod {
    /// Follow the control vector.
    #[default]
    ControlVectorBased,
    /// Walk forward toward a move-to target.
    TargetBased,
}

/// Per-state activation flags.
///
/// A disabled state can never become current. `Undefined` is always allowed
/// because it is the machine's own re-evaluation marker.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnabledStates {
    pub recovery: bool,
    pub grounded: bool,
    pub sliding: bool,
    pub blink: bool,
    pub lunge: bool,
    pub jumping: bool,
    pub falling: bool,
    pub flying: bool,
    pub swimming: bool,
    pub on_rails: bool,
    pub ragdoll: bool,
}

impl Default for EnabledStates {
    fn default() -> Self {
        Self::all()
    }
}

impl EnabledStates {
    /// Every state enabled.
    pub fn all() -> Self {
        Self {
            recovery: true,
            grounded: true,
            sliding: true,
            blink: true,
            lunge: true,
            jumping: true,
            falling: true,
            flying: true,
            swimming: true,
            on_rails: true,
            ragdoll: true,
        }
    }

    /// Every state disabled.
    pub fn none() -> Self {
        Self {
            recovery: false,
            grounded: false,
            sliding: false,
            blink: false,
            lunge: false,
            jumping: false,
            falling: false,
            flying: false,
            swimming: false,
            on_rails: false,
            ragdoll: false,
        }
    }

    /// Only the listed states enabled.
    pub fn only(states: &[MovementState]) -> Self {
        let mut enabled = Self::none();
        for state in states {
            enabled.set(*state, true);
        }
        enabled
    }

    /// Whether `state` may become current.
    pub fn is_enabled(&self, state: MovementState) -> bool {
        match state {
            MovementState::Undefined => true,
            MovementState::Recovery => self.recovery,
            MovementState::Grounded => self.grounded,
            MovementState::Sliding => self.sliding,
            MovementState::Blink => self.blink,
            MovementState::Lunge => self.lunge,
            MovementState::Jumping => self.jumping,
            MovementState::Falling => self.falling,
            MovementState::Flying => self.flying,
            MovementState::Swimming => self.swimming,
            MovementState::OnRails => self.on_rails,
            MovementState::Ragdoll => self.ragdoll,
        }
    }

    /// Enable or disable a state. `Undefined` cannot be disabled.
    pub fn set(&mut self, state: MovementState, enabled: bool) {
        let slot = match state {
            MovementState::Undefined => return,
            MovementState::Recovery => &mut self.recovery,
            MovementState::Grounded => &mut self.grounded,
            MovementState::Sliding => &mut self.sliding,
            MovementState::Blink => &mut self.blink,
            MovementState::Lunge => &mut self.lunge,
            MovementState::Jumping => &mut self.jumping,
            MovementState::Falling => &mut self.falling,
            MovementState::Flying => &mut self.flying,
            MovementState::Swimming => &mut self.swimming,
            MovementState::OnRails => &mut self.on_rails,
            MovementState::Ragdoll => &mut self.ragdoll,
        };
        *slot = enabled;
    }

    /// Builder: disable a state.
    pub fn without(mut self, state: MovementState) -> Self {
        self.set(state, false);
        self
    }
}
