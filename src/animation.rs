//! Animation parameters published every tick, and the physics gyro.
//!
//! The controller never drives an animator itself. It fills
//! [`AnimationParameters`] and fires trigger events; an animation layer
//! reads them.

use bevy::prelude::*;

use crate::collision::ProbeFilter;
use crate::machine::MovementContext;
use crate::math::{delta_angle, flat, lerp, look_rotation, slerp, yaw_degrees, yaw_only};
use crate::rail::RailControl;
use crate::runtime::RollingAverage;
use crate::settings::{GyroCalculationMethod, GyroProfile};
use crate::state::{GroundedMovementMethod, MovementState};

const ANGULAR_SAMPLES: usize = 5;

/// Per-character animation parameters.
#[derive(Component, Reflect, Debug, Clone, PartialEq)]
#[reflect(Component)]
pub struct AnimationParameters {
    // === Locomotion ===
    /// Local sideways velocity.
    pub x_velocity: f32,
    /// Local forward velocity.
    pub z_velocity: f32,
    /// Representation speed.
    pub magnitude: f32,
    /// Signed speed along a key-controlled rail.
    pub directional_magnitude: f32,
    pub angular_velocity: f32,
    pub speed_adjustment: f32,
    /// Blend between sprint (0), run (1), walk (2) and crouch (3).
    pub grounded_substate: f32,

    // === State flags ===
    pub falling: bool,
    pub jumping: bool,
    pub sliding: bool,
    pub swimming: bool,
    pub flying: bool,
    pub on_rails: bool,
    /// Off while ragdolled.
    pub enabled: bool,

    // === State values ===
    pub rail_position: f32,
    /// Water surface height above the reference position.
    pub water_depth: f32,
    pub blink_distance: f32,
    pub blink_height: f32,
    pub blink_total_height_change: f32,

    // === Gyro ===
    /// Lean of the animated gyro, in degrees.
    pub gyro_pitch: f32,
    /// World rotation of the animated gyro.
    pub gyro_rotation: Quat,

    #[reflect(ignore)]
    angular_samples: RollingAverage,
    velocity: Vec2,
}

impl Default for AnimationParameters {
    fn default() -> Self {
        Self {
            x_velocity: 0.0,
            z_velocity: 0.0,
            magnitude: 0.0,
            directional_magnitude: 0.0,
            angular_velocity: 0.0,
            speed_adjustment: 1.0,
            grounded_substate: 1.0,
            falling: false,
            jumping: false,
            sliding: false,
            swimming: false,
            flying: false,
            on_rails: false,
            enabled: true,
            rail_position: 0.0,
            water_depth: 0.0,
            blink_distance: 0.0,
            blink_height: 0.0,
            blink_total_height_change: 0.0,
            gyro_pitch: 0.0,
            gyro_rotation: Quat::IDENTITY,
            angular_samples: RollingAverage::new(ANGULAR_SAMPLES),
            velocity: Vec2::ZERO,
        }
    }
}

impl AnimationParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero the local velocity, e.g. on entering a new locomotion mode.
    pub fn clear_velocity(&mut self) {
        self.x_velocity = 0.0;
        self.z_velocity = 0.0;
        self.velocity = Vec2::ZERO;
    }

    fn set_flags(&mut self, falling: bool, jumping: bool, sliding: bool, swimming: bool, flying: bool, on_rails: bool) {
        self.falling = falling;
        self.jumping = jumping;
        self.sliding = sliding;
        self.swimming = swimming;
        self.flying = flying;
        self.on_rails = on_rails;
    }
}

/// Clamp that tolerates `min > max`, resolving to `max` above `min`.
fn clamp_loose(value: f32, min: f32, max: f32) -> f32 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// Per-state animation shaping for one tick.
struct Shape {
    maximum_speed: f32,
    gyro: bool,
    freeze: bool,
    gyro_speed: f32,
    lerp_speed: f32,
    upper: f32,
    lower: f32,
}

impl Default for Shape {
    fn default() -> Self {
        Self {
            maximum_speed: 1.0,
            gyro: false,
            freeze: false,
            gyro_speed: 50.0,
            lerp_speed: 50.0,
            upper: 0.9,
            lower: 0.9,
        }
    }
}

impl MovementContext<'_> {
    /// Fill [`AnimationParameters`] for the current state.
    pub(crate) fn publish_animation(&mut self) {
        let state = self.runtime.state;
        if state == MovementState::Ragdoll {
            self.animation.enabled = false;
            return;
        }
        self.animation.enabled = true;

        let settings = self.settings.animation;
        let false_walk = self.settings.swimming.false_walk;
        let mut shape = Shape::default();

        match state {
            MovementState::Falling => {
                shape.freeze = true;
                self.animation.set_flags(true, false, false, false, false, false);
            }
            MovementState::Jumping => {
                self.animation.set_flags(true, true, false, false, false, false);
            }
            MovementState::Sliding => {
                shape.maximum_speed = settings.grounded_maximum_speed;
                self.animation.set_flags(false, false, true, false, false, false);
            }
            MovementState::OnRails if self.runtime.rail.attachment.is_some() => {
                shape.maximum_speed = 100.0;
                self.animation.set_flags(false, false, false, false, false, true);
                self.publish_rail_animation();
            }
            MovementState::Swimming if !false_walk => {
                let swimming = settings.swimming;
                shape.maximum_speed = swimming.maximum_speed;
                shape.gyro_speed = swimming.gyro_transition_speed;
                shape.lerp_speed = swimming.transition_speed;
                shape.upper = swimming.upper_vertical_magnitude;
                shape.lower = swimming.lower_vertical_magnitude;
                self.animation.set_flags(false, false, false, true, false, false);

                let depth = self.runtime.water_level - self.reference().y;
                shape.gyro = depth >= swimming.minimum_gyro_depth;
                if !shape.gyro {
                    // Close to the surface the lean fades out quickly.
                    let fade = (swimming.minimum_gyro_depth - depth).max(0.0);
                    if fade > swimming.gyro_fade_distance {
                        shape.gyro_speed *= swimming.gyro_fade_multiplier;
                    }
                }
            }
            MovementState::Flying => {
                let flying = settings.flying;
                shape.maximum_speed = flying.maximum_speed;
                shape.gyro = true;
                shape.gyro_speed = flying.gyro_transition_speed;
                shape.lerp_speed = flying.transition_speed;
                shape.upper = flying.upper_vertical_magnitude;
                shape.lower = flying.lower_vertical_magnitude;
                self.animation.set_flags(false, false, false, false, true, false);
            }
            _ => {
                shape.maximum_speed = settings.grounded_maximum_speed;
                self.animation.set_flags(false, false, false, false, false, false);
            }
        }

        self.publish_common(shape.maximum_speed);
        self.publish_blink();
        self.publish_velocity(&shape);
        self.publish_substate();
    }

    fn publish_common(&mut self, maximum_speed: f32) {
        let settings = self.settings.animation;
        let dt = self.dt;
        let velocity = self.runtime.rep.velocity;

        let rail = &self.runtime.rail;
        let modified =
            rail.position() * rail.animation_position_multiplier + rail.animation_position_offset;
        let water_depth = self.runtime.water_level - self.reference().y;
        let turn = delta_angle(self.runtime.recorded_yaw, yaw_degrees(self.body.rotation));

        let animation = &mut *self.animation;
        animation.rail_position = modified - modified.floor();
        animation.water_depth = water_depth;
        animation.magnitude = velocity.length();
        let average = animation.angular_samples.push(turn * dt * 100.0);
        animation.angular_velocity = lerp(animation.angular_velocity, average, 20.0 * dt);
        animation.speed_adjustment = 1.0
            + clamp_loose(
                (velocity.length() - settings.base_transition) * settings.speed_multiplier,
                0.01,
                maximum_speed - 1.0,
            );
    }

    fn publish_rail_animation(&mut self) {
        let Some(rail) = self.runtime.rail.rail().and_then(|entity| self.rails.get(entity)) else {
            return;
        };
        let key_controlled = rail.control == RailControl::Key;
        let trigger = rail.animation_trigger.clone();

        if key_controlled {
            let speed = self.runtime.rep.velocity.length();
            self.animation.directional_magnitude = if self.control.rail_axis < 0.0 {
                -speed
            } else {
                speed
            };
        }
        if !self.runtime.rail.has_called_trigger {
            self.runtime.rail.has_called_trigger = true;
            self.trigger(&trigger);
        }
    }

    fn publish_blink(&mut self) {
        let animation = &mut *self.animation;
        match (self.runtime.state, self.runtime.blink.as_ref()) {
            (MovementState::Blink, Some(blink)) => {
                let rep = self.runtime.rep.position;
                animation.blink_distance = rep.distance(self.runtime.reference_position);
                animation.blink_height = rep.y - blink.start_height - blink.animation_height_offset;
                animation.blink_total_height_change = blink.total_height_change;
            }
            _ => {
                animation.blink_distance = 0.0;
                animation.blink_height = 0.0;
            }
        }
    }

    fn publish_velocity(&mut self, shape: &Shape) {
        let dt = self.dt;
        let rep_rotation = self.runtime.rep.rotation;
        let velocity = self.runtime.rep.velocity;
        let local = rep_rotation.inverse() * velocity;

        if shape.gyro {
            let (local, given, direction) = self.gyro_inputs(local);
            let vertical = local.length() - flat(local).length();
            let fraction = if local.y > 0.0 {
                -(vertical / shape.upper.abs().max(f32::EPSILON)).clamp(0.0, 1.0)
            } else if local.y < 0.0 {
                (vertical / shape.lower.abs().max(f32::EPSILON)).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let animation = &mut *self.animation;
            let pitch = 90.0 * direction * fraction;
            animation.gyro_pitch = lerp(animation.gyro_pitch, pitch, shape.gyro_speed * dt);
            animation.velocity.x = lerp(animation.velocity.x, given.x, shape.lerp_speed * dt);
            animation.velocity.y = lerp(animation.velocity.y, given.z, shape.lerp_speed * dt);
        } else {
            let animation = &mut *self.animation;
            animation.gyro_pitch = lerp(animation.gyro_pitch, 0.0, shape.gyro_speed * dt);
            let target = if shape.freeze {
                Vec2::ZERO
            } else if let Some(target) = self.root_motion_velocity() {
                target
            } else {
                Vec2::new(local.x, local.z)
            };
            let speed = if shape.freeze {
                10.0
            } else if self.settings.root_motion.enabled {
                self.settings.root_motion.adjustment_speed
            } else if self.runtime.state == MovementState::Swimming {
                self.settings.animation.swimming.transition_speed
            } else {
                15.0
            };
            let animation = &mut *self.animation;
            animation.velocity = animation.velocity.lerp(target, (speed * dt).clamp(0.0, 1.0));
        }

        let animation = &mut *self.animation;
        animation.x_velocity = animation.velocity.x;
        animation.z_velocity = animation.velocity.y;
        animation.gyro_rotation =
            yaw_only(rep_rotation) * Quat::from_rotation_x(animation.gyro_pitch.to_radians());
    }

    /// Local velocity target under root motion, if root motion applies.
    fn root_motion_velocity(&self) -> Option<Vec2> {
        let root_motion = self.settings.root_motion;
        if !root_motion.enabled {
            return None;
        }

        let input = self.control.flat_vector;
        if root_motion.check_input_direction && input != Vec3::ZERO {
            let origin = self.reference()
                - Vec3::Y * (self.settings.body.height - root_motion.cast_height_offset);
            let filter = ProbeFilter::new(self.settings.layers.root_motion);
            if self
                .probe
                .raycast(origin, input.normalize_or_zero(), root_motion.cast_distance, filter)
                .is_some()
            {
                return Some(Vec2::ZERO);
            }
        }

        Some(match self.runtime.movement_method {
            GroundedMovementMethod::ControlVectorBased => {
                let local = self.body.rotation.inverse() * input;
                Vec2::new(local.x, local.z)
            }
            GroundedMovementMethod::TargetBased => Vec2::Y,
        })
    }

    /// Local velocity, gyro-relative velocity and lean direction for the
    /// configured gyro method.
    fn gyro_inputs(&self, local_velocity: Vec3) -> (Vec3, Vec3, f32) {
        let rep = &self.runtime.rep;
        let gyro_inverse = self.animation.gyro_rotation.inverse();
        let height = self.settings.body.height;
        let sign = |forward: bool| if forward { 1.0 } else { -1.0 };

        match self.settings.animation.gyro_method {
            GyroCalculationMethod::CharacterRepVelocity => (
                local_velocity,
                gyro_inverse * rep.velocity,
                sign(local_velocity.z >= 0.0),
            ),
            GyroCalculationMethod::FreeVectorInput => {
                let mut local = rep.rotation.inverse() * self.control.free_vector;
                if self.runtime.state == MovementState::Flying && self.settings.flying.constant_forward {
                    local.z = 1.0;
                }
                let world = rep.rotation * local;
                (local, gyro_inverse * world, sign(self.control.vertical_input >= 0.0))
            }
            GyroCalculationMethod::ExternalTargetDirectional => {
                let target = self.runtime.external_target - Vec3::Y * height;
                let local = rep.rotation.inverse() * (target - rep.position);
                (local, gyro_inverse * (rep.rotation * local), sign(local.z >= 0.0))
            }
            GyroCalculationMethod::CharacterRepPlayerOffset => {
                let offset = self.body.position - rep.position;
                let local = rep.rotation.inverse() * offset;
                (local, gyro_inverse * offset, sign(local.z >= 0.0))
            }
        }
    }

    fn publish_substate(&mut self) {
        let Some(target) = self.runtime.substate.blend_value() else {
            return;
        };
        let speed = self.settings.animation.substate_transition_speed * self.dt;
        let animation = &mut *self.animation;
        animation.grounded_substate = lerp(animation.grounded_substate, target, speed);
    }

    // === Physics gyro ===

    /// Lean the collider while flying or swimming; relax it otherwise.
    pub(crate) fn update_physics_gyro(&mut self) {
        let gyro = self.settings.gyro;
        if !gyro.enabled {
            return;
        }

        let profile = match self.runtime.state {
            MovementState::Flying => Some(gyro.flying),
            MovementState::Swimming if !self.settings.swimming.false_walk => Some(gyro.swimming),
            _ => None,
        };
        let dt = self.dt;

        let Some(profile) = profile else {
            let collider = &mut self.runtime.collider;
            collider.radius = gyro.normal_radius;
            collider.gyro_rotation = slerp(collider.gyro_rotation, Quat::IDENTITY, 10.0 * dt);
            return;
        };

        let target = self.physics_gyro_target(&profile);
        let collider = &mut self.runtime.collider;
        collider.radius = gyro.normal_radius * gyro.radius_multiplier;
        collider.gyro_rotation = slerp(collider.gyro_rotation, target, profile.transition_speed * dt);
    }

    /// Body-local lean toward the blend of velocity and input.
    fn physics_gyro_target(&self, profile: &GyroProfile) -> Quat {
        let body_inverse = self.body.rotation.inverse();
        let free = body_inverse * self.control.free_vector * 10.0;
        let velocity = body_inverse * self.runtime.rep.velocity;
        let relative = (velocity - free) * profile.input_factor + free;

        let magnitude = relative.length();
        if magnitude <= f32::EPSILON {
            return Quat::IDENTITY;
        }

        let heading = yaw_only(look_rotation(relative, Vec3::Y));
        let mut pitch = (magnitude / profile.magnitude_factor.max(f32::EPSILON) * profile.max_angle)
            .clamp(0.0, profile.max_angle);
        if free.z < 0.0 {
            pitch = -pitch;
        }
        heading * Quat::from_rotation_x(pitch.to_radians())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::testing::Harness;
    use crate::state::GroundedSubstate;

    #[test]
    fn state_flags_follow_state() {
        let mut harness = Harness::on_ground();
        harness.runtime.state = MovementState::Jumping;
        harness.with(|ctx| ctx.publish_animation());
        assert!(harness.animation.falling && harness.animation.jumping);

        harness.runtime.state = MovementState::Grounded;
        harness.with(|ctx| ctx.publish_animation());
        assert!(!harness.animation.falling && !harness.animation.jumping);
    }

    #[test]
    fn ragdoll_disables_animator() {
        let mut harness = Harness::on_ground();
        harness.runtime.state = MovementState::Ragdoll;
        harness.with(|ctx| ctx.publish_animation());
        assert!(!harness.animation.enabled);
    }

    #[test]
    fn substate_blend_converges() {
        let mut harness = Harness::on_ground();
        harness.runtime.substate = GroundedSubstate::Crouching;
        for _ in 0..300 {
            harness.with(|ctx| ctx.publish_animation());
        }
        assert!((harness.animation.grounded_substate - 3.0).abs() < 0.01);
    }

    #[test]
    fn speed_adjustment_tolerates_low_maximum() {
        // Falling caps the maximum speed at one, below the lower clamp bound.
        let mut harness = Harness::on_ground();
        harness.runtime.state = MovementState::Falling;
        harness.runtime.rep.velocity = Vec3::new(0.0, -20.0, 0.0);
        harness.with(|ctx| ctx.publish_animation());
        assert_eq!(harness.animation.speed_adjustment, 1.0);
    }

    #[test]
    fn rail_position_wraps() {
        let mut harness = Harness::on_ground();
        harness.runtime.rail.attachment = Some(crate::runtime::RailAttachment {
            rail: Entity::from_raw(9),
            position: 2.75,
            direction: 1.0,
        });
        harness.runtime.rail.animation_position_multiplier = 1.0;
        harness.runtime.rail.animation_position_offset = 0.0;
        harness.with(|ctx| ctx.publish_animation());
        assert!((harness.animation.rail_position - 0.75).abs() < 1e-5);
    }

    #[test]
    fn gyro_relaxes_outside_flight() {
        let mut harness = Harness::on_ground();
        harness.runtime.collider.gyro_rotation = Quat::from_rotation_x(0.5);
        for _ in 0..120 {
            harness.with(|ctx| ctx.update_physics_gyro());
        }
        assert!(harness.runtime.collider.gyro_rotation.angle_between(Quat::IDENTITY) < 0.01);
        assert_eq!(harness.runtime.collider.radius, harness.settings.gyro.normal_radius);
    }

    #[test]
    fn gyro_leans_into_flight() {
        let mut harness = Harness::on_ground();
        harness.runtime.state = MovementState::Flying;
        harness.control.set_free_vector(Vec3::Z);
        for _ in 0..120 {
            harness.with(|ctx| ctx.update_physics_gyro());
        }
        let gyro = harness.settings.gyro;
        assert!(harness.runtime.collider.gyro_rotation.angle_between(Quat::IDENTITY) > 0.01);
        assert_eq!(harness.runtime.collider.radius, gyro.normal_radius * gyro.radius_multiplier);
    }
}
