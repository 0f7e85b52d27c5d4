//! Control vector component.
//!
//! The control vector is produced once per tick by an input layer or AI and
//! consumed read-only by the controller. The controller never writes it.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// How camera and character rotation relate.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControlScheme {
    /// Keyboard turning, the character faces where the camera rig faces.
    #[default]
    Classic,
    /// Classic with mouse-driven camera orbiting.
    SemiModern,
    /// The character turns toward its movement direction.
    ModernUnlocked,
    /// Unlocked movement whose grounded facing still follows the camera.
    ModernMixed,
    /// The character always faces the camera direction.
    ModernLocked,
}

impl ControlScheme {
    #[inline]
    pub fn is_classic(self) -> bool {
        self == ControlScheme::Classic
    }

    /// Whether movement direction, not the camera, drives facing.
    #[inline]
    pub fn is_unlocked_modern(self) -> bool {
        matches!(self, ControlScheme::ModernUnlocked | ControlScheme::ModernMixed)
    }

    #[inline]
    pub fn is_modern_mixed(self) -> bool {
        self == ControlScheme::ModernMixed
    }
}

/// Per-tick movement request for one character.
///
/// `flat_vector` and `free_vector` are world-space and clamped to a magnitude
/// of one by the setters. `flat_vector` has no vertical component;
/// `free_vector` may point anywhere and drives flying and swimming.
///
/// # Example
///
/// ```rust
/// use bevy::prelude::*;
/// use multistate_character_controller::prelude::*;
///
/// let mut control = ControlVector::default();
/// control.set_flat_vector(Vec3::new(0.0, 0.0, 2.0));
/// assert!((control.flat_vector.length() - 1.0).abs() < 1e-5);
/// assert!(control.is_active());
///
/// control.clear();
/// assert!(!control.is_active());
/// ```
#[derive(Component, Reflect, Debug, Clone, PartialEq)]
#[reflect(Component)]
pub struct ControlVector {
    // === Movement ===
    /// Requested horizontal movement direction.
    pub flat_vector: Vec3,
    /// Requested free movement direction, including vertical.
    pub free_vector: Vec3,
    /// Additional yaw input in degrees per second before the rotational multiplier.
    pub rotation: f32,

    // === Rotation Policy ===
    /// Facing locks to the camera rig.
    pub lock_rotation: bool,
    /// Rotation speed scales with movement input.
    pub rotate_with_movement: bool,
    /// The camera may orbit without turning the character.
    pub allow_rotation_difference: bool,
    pub scheme: ControlScheme,

    // === Camera Rig ===
    /// Yaw rotation of the camera rig.
    pub camera_rotation: Quat,
    /// Forward direction of the pitched camera gimbal.
    pub camera_forward: Vec3,

    // === Raw Axes (animation correction) ===
    pub vertical_input: f32,
    pub horizontal_input: f32,
    pub side_step_input: f32,
    /// Up/down axis, used for the jump-into-swim surface check and flight.
    pub up_down_input: f32,

    // === Rails ===
    /// Axis that advances key-controlled rails.
    pub rail_axis: f32,
    /// Direction along the rail derived from the camera, `1` or `-1`.
    pub rail_direction: f32,
    /// Names of keys held this tick, checked against rail unlatch and interaction keys.
    pub pressed_keys: Vec<String>,
}

impl Default for ControlVector {
    fn default() -> Self {
        Self {
            flat_vector: Vec3::ZERO,
            free_vector: Vec3::ZERO,
            rotation: 0.0,
            lock_rotation: false,
            rotate_with_movement: false,
            allow_rotation_difference: false,
            scheme: ControlScheme::Classic,
            camera_rotation: Quat::IDENTITY,
            camera_forward: Vec3::Z,
            vertical_input: 0.0,
            horizontal_input: 0.0,
            side_step_input: 0.0,
            up_down_input: 0.0,
            rail_axis: 0.0,
            rail_direction: 1.0,
            pressed_keys: Vec::new(),
        }
    }
}

impl ControlVector {
    /// Create an idle control vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Control vector for the given scheme with matching rotation flags.
    pub fn with_scheme(scheme: ControlScheme) -> Self {
        let mut control = Self::default();
        control.apply_scheme(scheme);
        control
    }

    /// Set the scheme and the rotation flags it implies.
    pub fn apply_scheme(&mut self, scheme: ControlScheme) {
        self.scheme = scheme;
        let (lock, with_movement, difference) = match scheme {
            ControlScheme::Classic => (true, false, true),
            ControlScheme::SemiModern => (false, false, true),
            ControlScheme::ModernUnlocked | ControlScheme::ModernMixed => (false, true, false),
            ControlScheme::ModernLocked => (true, false, false),
        };
        self.lock_rotation = lock;
        self.rotate_with_movement = with_movement;
        self.allow_rotation_difference = difference;
    }

    /// Set the horizontal movement direction. The vertical part is dropped.
    pub fn set_flat_vector(&mut self, direction: Vec3) {
        self.flat_vector = Vec3::new(direction.x, 0.0, direction.z).clamp_length_max(1.0);
    }

    /// Set the free movement direction.
    pub fn set_free_vector(&mut self, direction: Vec3) {
        self.free_vector = direction.clamp_length_max(1.0);
    }

    /// Set both vectors from one world-space input.
    pub fn set_movement(&mut self, direction: Vec3) {
        self.set_flat_vector(direction);
        self.set_free_vector(direction);
    }

    /// Clear movement and rotation input. Rotation policy is kept.
    pub fn clear(&mut self) {
        self.flat_vector = Vec3::ZERO;
        self.free_vector = Vec3::ZERO;
        self.rotation = 0.0;
        self.rail_axis = 0.0;
        self.vertical_input = 0.0;
        self.horizontal_input = 0.0;
        self.side_step_input = 0.0;
        self.up_down_input = 0.0;
    }

    /// Whether any free movement is requested.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.free_vector != Vec3::ZERO
    }

    /// Whether the named key is held this tick.
    pub fn is_pressed(&self, key: &str) -> bool {
        self.pressed_keys.iter().any(|k| k == key)
    }
}
