//! Lunge actions: short, decaying forced displacements such as dashes.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::state::{EnabledStates, MovementState};

/// A single-use lunge description.
///
/// Consumed when the character enters the lunge state and dropped once the
/// duration elapses.
#[derive(Reflect, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LungeAction {
    /// World-space direction of travel. Normalized when applied.
    pub direction: Vec3,
    /// Displacement strength at the start of the lunge.
    pub intensity: f32,
    /// Seconds over which the intensity decays to zero.
    pub duration: f32,
    /// Recovery countdown set on entry.
    pub recovery_time: f32,
    /// States the lunge may start from.
    pub can_transition_from: EnabledStates,
    /// Animation trigger fired when the lunge starts. Empty for none.
    pub animation_trigger: String,
}

impl Default for LungeAction {
    fn default() -> Self {
        Self {
            direction: Vec3::Z,
            intensity: 5.0,
            duration: 0.25,
            recovery_time: 0.1,
            can_transition_from: EnabledStates::only(&[MovementState::Grounded]),
            animation_trigger: String::new(),
        }
    }
}

impl LungeAction {
    pub fn new(direction: Vec3, intensity: f32, duration: f32) -> Self {
        Self {
            direction,
            intensity,
            duration,
            ..default()
        }
    }

    /// Builder: set the recovery countdown.
    pub fn with_recovery_time(mut self, recovery_time: f32) -> Self {
        self.recovery_time = recovery_time;
        self
    }

    /// Builder: set the states the lunge may start from.
    pub fn from_states(mut self, states: &[MovementState]) -> Self {
        self.can_transition_from = EnabledStates::only(states);
        self
    }

    /// Builder: set the animation trigger.
    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.animation_trigger = trigger.into();
        self
    }

    /// Intensity after `step` seconds, decaying linearly to zero.
    pub fn intensity_at(&self, step: f32) -> f32 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        crate::math::lerp(self.intensity, 0.0, step / self.duration)
    }

    /// Whether the lunge can start from `state`.
    pub fn allows(&self, state: MovementState) -> bool {
        state != MovementState::Undefined && self.can_transition_from.is_enabled(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intensity_decays_linearly() {
        let lunge = LungeAction::new(Vec3::X, 10.0, 0.5);
        assert_eq!(lunge.intensity_at(0.0), 10.0);
        assert!((lunge.intensity_at(0.25) - 5.0).abs() < 1e-5);
        assert_eq!(lunge.intensity_at(1.0), 0.0);
    }

    #[test]
    fn zero_duration_has_no_intensity() {
        let lunge = LungeAction::new(Vec3::X, 10.0, 0.0);
        assert_eq!(lunge.intensity_at(0.0), 0.0);
    }

    #[test]
    fn source_states_gate() {
        let lunge = LungeAction::default().from_states(&[MovementState::Grounded, MovementState::Falling]);
        assert!(lunge.allows(MovementState::Falling));
        assert!(!lunge.allows(MovementState::Swimming));
        assert!(!lunge.allows(MovementState::Undefined));
    }
}
