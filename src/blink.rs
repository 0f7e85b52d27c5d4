//! Short-range teleport ("blink") solver.
//!
//! A blink request names a travel vector in some frame of reference. The
//! solver turns it into a world-space target, validates it against the world
//! and produces the [`ActiveBlink`] the state machine then executes.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collision::ProbeFilter;
use crate::math::look_yaw;
use crate::probe::PhysicsProbe;
use crate::runtime::ActiveBlink;
use crate::settings::MultiStateSettings;

/// Frame of reference a blink direction is expressed in.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum BlinkTravelBasis {
    /// Relative to the character's facing.
    #[default]
    Character,
    /// Relative to the camera rig.
    Camera,
    /// World space.
    World,
    /// Relative to an object's rotation.
    Object { rotation: Quat },
    /// Relative to an object, flipped so the blink always crosses it.
    RelativeObject { rotation: Quat, position: Vec3 },
}

impl BlinkTravelBasis {
    /// Object basis from a transform.
    pub fn object(transform: &GlobalTransform) -> Self {
        BlinkTravelBasis::Object {
            rotation: transform.rotation(),
        }
    }

    /// Object-relative basis from a transform.
    pub fn relative_object(transform: &GlobalTransform) -> Self {
        BlinkTravelBasis::RelativeObject {
            rotation: transform.rotation(),
            position: transform.translation(),
        }
    }
}

/// A request to blink.
#[derive(Reflect, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkRequest {
    /// Travel vector in the chosen basis. Its length is the blink distance.
    pub direction: Vec3,
    pub basis: BlinkTravelBasis,
    /// Snap the target onto the ground.
    pub ground: bool,
    /// Sweep toward the target and stop short of obstructions instead of
    /// rejecting an obstructed target.
    pub project_forward: bool,
    /// Seconds to wait before moving.
    pub delay: f32,
    /// Seconds the representation takes to catch up. Profile value when unset.
    pub travel_time: Option<f32>,
    /// Animation trigger fired on success. Empty for none.
    pub trigger: String,
    pub achievement_distance: Option<f32>,
    pub max_height_change: Option<f32>,
    pub min_distance_change: Option<f32>,
    pub recovery_time: Option<f32>,
    pub animation_height_offset: Option<f32>,
}

impl Default for BlinkRequest {
    fn default() -> Self {
        Self {
            direction: Vec3::Z,
            basis: BlinkTravelBasis::Character,
            ground: true,
            project_forward: false,
            delay: 0.0,
            travel_time: None,
            trigger: String::new(),
            achievement_distance: None,
            max_height_change: None,
            min_distance_change: None,
            recovery_time: None,
            animation_height_offset: None,
        }
    }
}

impl BlinkRequest {
    pub fn new(direction: Vec3, basis: BlinkTravelBasis) -> Self {
        Self {
            direction,
            basis,
            ..default()
        }
    }

    /// Builder: sweep toward the target instead of rejecting obstructions.
    pub fn projected(mut self) -> Self {
        self.project_forward = true;
        self
    }

    /// Builder: keep the target at reference height minus the body height.
    pub fn ungrounded(mut self) -> Self {
        self.ground = false;
        self
    }

    /// Builder: set the pre-movement delay.
    pub fn with_delay(mut self, delay: f32) -> Self {
        self.delay = delay;
        self
    }

    /// Builder: set the animation trigger.
    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = trigger.into();
        self
    }

    /// World-space travel vector.
    pub fn travel(&self, origin: &BlinkOrigin) -> Vec3 {
        match self.basis {
            BlinkTravelBasis::Character => origin.rotation * self.direction,
            BlinkTravelBasis::Camera => origin.camera_rotation * self.direction,
            BlinkTravelBasis::World => self.direction,
            BlinkTravelBasis::Object { rotation } => rotation * self.direction,
            BlinkTravelBasis::RelativeObject { rotation, position } => {
                let local = rotation.inverse() * (origin.reference - position);
                if local.z < 0.0 {
                    rotation * self.direction
                } else {
                    rotation * -self.direction
                }
            }
        }
    }
}

/// Where the character is when the blink is solved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlinkOrigin {
    pub feet: Vec3,
    pub reference: Vec3,
    pub rotation: Quat,
    pub camera_rotation: Quat,
    pub rep_position: Vec3,
}

/// Why a blink was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum BlinkRejection {
    #[error("blink target is obstructed")]
    Obstructed,
    #[error("blink height change {change:.2} exceeds {max:.2}")]
    HeightChange { change: f32, max: f32 },
    #[error("blink distance {distance:.2} is below {min:.2}")]
    TooShort { distance: f32, min: f32 },
}

/// Solve and validate a blink.
pub fn solve_blink(
    probe: &dyn PhysicsProbe,
    settings: &MultiStateSettings,
    request: &BlinkRequest,
    origin: &BlinkOrigin,
) -> Result<ActiveBlink, BlinkRejection> {
    let height = settings.body.height;
    let up = Vec3::Y;
    let ground = ProbeFilter::new(settings.layers.ground);
    let blockers = ProbeFilter::new(settings.layers.blink);

    let travel = request.travel(origin);
    let mut target = if request.ground {
        probe.ground_vector(origin.reference + travel, ground)
    } else {
        origin.reference + travel - up * height
    };

    let r = settings.gyro.normal_radius;
    let capsule_radius = (r - 0.15).max(0.01);
    let bottom = up * (r - height);
    let top = up * -r;

    if !request.project_forward {
        let a = target + bottom + up * (height + 0.1);
        let b = target + top + up * height;
        if probe.capsule_overlap(a, b, capsule_radius, blockers) {
            return Err(BlinkRejection::Obstructed);
        }
    } else {
        let direction = (target - origin.feet).normalize_or_zero();
        let distance = origin.reference.distance(target);
        if direction != Vec3::ZERO {
            if let Some(hit) = probe.capsule_cast(
                origin.reference + bottom,
                origin.reference + top,
                capsule_radius,
                direction,
                distance,
                blockers,
            ) {
                target = hit.point + (target - origin.reference).clamp_length_max(1.0) * -(r + 0.1);
                if request.ground {
                    target = probe.ground_vector(target, ground);
                }
            }
        }
    }

    let max_height = request
        .max_height_change
        .unwrap_or(settings.blink.max_height_change);
    let change = (origin.feet.y - target.y).abs();
    if change > max_height {
        return Err(BlinkRejection::HeightChange {
            change,
            max: max_height,
        });
    }

    let min_distance = request
        .min_distance_change
        .unwrap_or(settings.blink.min_distance_change);
    let distance = origin.feet.distance(target);
    if distance < min_distance {
        return Err(BlinkRejection::TooShort {
            distance,
            min: min_distance,
        });
    }

    let rep_speed = match request.travel_time {
        Some(time) if time > 0.0 => 1.0 / time,
        _ => settings.blink.rep_speed,
    };

    Ok(ActiveBlink {
        target,
        delay: request.delay.max(0.0),
        elapsed: 0.0,
        snap_rotation: settings.blink.snap_rotation,
        ideal_rotation: look_yaw(target - origin.reference),
        achievement_distance: request
            .achievement_distance
            .unwrap_or(settings.blink.achievement_distance),
        recovery_time: request
            .recovery_time
            .unwrap_or(settings.blink.recovery_time),
        rep_speed,
        animation_height_offset: request
            .animation_height_offset
            .unwrap_or(settings.blink.animation_height_offset),
        start_height: origin.rep_position.y,
        total_height_change: target.y - origin.rep_position.y,
    })
}
