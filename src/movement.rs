//! Per-state movement targets, facing and the visual representation.
//!
//! Every state update boils down to choosing `runtime.external_target`, the
//! point the integrator pulls the body toward this tick.

use bevy::prelude::*;

use crate::locks::priority;
use crate::machine::MovementContext;
use crate::math::{
    climb_angle, flat_distance, height_distance, lerp, look_rotation, look_yaw, slerp,
    smooth_damp, yaw_degrees, yaw_only,
};
use crate::rail::{RailControl, RailRotationControl};
use crate::state::{GroundedMovementMethod, MovementState};

impl MovementContext<'_> {
    // === Move-to target ===

    /// Switch between input-driven and target-driven grounded movement.
    pub(crate) fn identify_move_to_target(&mut self) {
        let Some(target) = self.runtime.move_to_target else {
            self.runtime.movement_method = GroundedMovementMethod::ControlVectorBased;
            return;
        };
        let reach = self.settings.directional.move_to_target_distance;
        if self.body.position.distance(target) <= reach {
            self.runtime.move_to_target = None;
            self.runtime.movement_method = GroundedMovementMethod::ControlVectorBased;
        } else {
            self.runtime.movement_method = GroundedMovementMethod::TargetBased;
        }
    }

    // === State updates ===

    pub(crate) fn update_movement_by_state(&mut self) {
        if self.runtime.state == MovementState::Recovery {
            self.update_recovery();
        } else {
            self.runtime.locks.movement.release(priority::RECOVERY);
        }

        if self.runtime.locks.movement.is_locked() {
            return;
        }

        match self.runtime.state {
            MovementState::Grounded => self.update_grounded(),
            MovementState::Sliding => self.update_sliding(),
            MovementState::OnRails => self.update_on_rails(),
            MovementState::Falling => self.update_falling(),
            MovementState::Flying => self.update_flying(),
            MovementState::Swimming => self.update_swimming(),
            MovementState::Jumping => self.update_jumping(),
            MovementState::Blink => self.update_blink(),
            MovementState::Ragdoll => self.update_ragdoll(),
            MovementState::Lunge => self.update_lunge(),
            MovementState::Recovery | MovementState::Undefined => {}
        }
    }

    fn update_grounded(&mut self) {
        self.runtime.slide_range = self.settings.slide.min_range;
        let root_motion = self.settings.root_motion;
        self.runtime.transitional_speed = if root_motion.enabled {
            self.runtime.root_motion_speed * root_motion.modifier
        } else {
            self.settings.directional.grounded_transitional_speed
        };

        let multiplier = self.settings.substates.multiplier(self.runtime.substate);
        let direction = match self.runtime.movement_method {
            GroundedMovementMethod::TargetBased => self.body.rotation * Vec3::Z,
            GroundedMovementMethod::ControlVectorBased => self.control.flat_vector,
        };
        let probe_point = self.reference() + direction * multiplier;
        self.runtime.external_target = self.probe.ground_vector(probe_point, self.ground_filter());
    }

    fn update_sliding(&mut self) {
        let slide = self.settings.slide;
        self.runtime.transitional_speed = self.settings.directional.grounded_transitional_speed;
        let feet = self.body.position;
        let target = self.runtime.slide_target;
        let direction = Vec3::new(target.x - feet.x, 0.0, target.z - feet.z) * slide.speed_multiplier;

        if self.runtime.slide_range != slide.max_range {
            self.runtime.slide_range = slide.max_range;
        } else {
            let probe_point = self.reference() + direction;
            self.runtime.external_target =
                self.probe.ground_vector(probe_point, self.ground_filter());
        }
    }

    fn update_on_rails(&mut self) {
        let Some(mut attachment) = self.runtime.rail.attachment else {
            return;
        };
        let Some(rail) = self.rails.get_mut(attachment.rail) else {
            return;
        };

        if rail.camera_based_direction {
            attachment.direction = self.control.rail_direction;
        }
        let step = match rail.control {
            RailControl::Key => self.control.rail_axis * rail.speed * self.dt * attachment.direction,
            RailControl::Time => self.dt * attachment.direction * rail.speed,
        };
        attachment.position = rail.clamp_position(attachment.position + step);
        let target = rail.get_rail_location(attachment.position) + Vec3::Y * rail.y_offset;

        self.runtime.rail.attachment = Some(attachment);
        self.runtime.external_target = target;
    }

    fn update_falling(&mut self) {
        if self.runtime.fall_time == 0.0 {
            self.runtime.fall_start_velocity = self.body.velocity;
        }
        self.runtime.fall_time += self.dt;

        let forces = self.settings.forces;
        let fall = self.runtime.fall_time * self.runtime.fall_time;
        let start = self.runtime.fall_start_velocity;
        let horizontal = 0.2 + forces.fall_velocity_preservation * fall;
        let vertical = 0.2 + (forces.fall_velocity_y_preservation * fall).clamp(0.0, 1.0);

        // Offset from the head, so terminal pull is gravity at the feet.
        let offset = Vec3::new(
            lerp(start.x, 0.0, horizontal),
            lerp(start.y, forces.gravity - self.settings.body.height, vertical),
            lerp(start.z, 0.0, horizontal),
        );
        self.runtime.external_target = self.reference() + offset;
        self.fall_protection();
    }

    fn update_flying(&mut self) {
        let flying = self.settings.flying;
        let height = self.settings.body.height;
        let control = self.control;

        let mut base = control.free_vector * flying.base_speed_multiplier;
        if flying.constant_forward {
            let forward = self.body.rotation * Vec3::Z;
            base = if !control.lock_rotation {
                forward * flying.base_speed_multiplier
            } else if control.scheme.is_classic() {
                (control.free_vector + forward * 2.0).normalize_or_zero()
                    * flying.base_speed_multiplier
            } else {
                control.camera_forward * flying.base_speed_multiplier
            };
        }

        let reference = self.reference();
        let aim = reference + base;
        let forward_distance = flat_distance(reference, aim);
        let angle = if forward_distance == 0.0 {
            90.0
        } else {
            climb_angle(height_distance(reference - Vec3::Y * height, aim), forward_distance)
        };

        if flying.additive_ascension_multiplier != 0.0 && aim.y > reference.y {
            base += base * (angle / 90.0 * flying.additive_ascension_multiplier);
        }
        if flying.additive_dive_multiplier != 0.0 && aim.y < reference.y {
            base += base * (angle / 90.0 * flying.additive_dive_multiplier);
        }

        self.runtime.external_target = reference + base + Vec3::Y * flying.gravity;
    }

    fn update_swimming(&mut self) {
        let swimming = self.settings.swimming;
        let height = self.settings.body.height;
        let reference = self.reference();
        let water_level = self.runtime.water_level;

        let mut free = self.control.free_vector;
        if !swimming.allow_dive {
            free.y = 1.0;
        }

        // Negative when the reference is above the surface.
        let depth = water_level - reference.y;
        if free.y > 0.0 && depth < -height / 2.0 {
            free.y = 0.0;
            free = free.normalize_or_zero();
        }

        let mut target = reference + free * swimming.speed_multiplier;
        let ceiling = water_level - swimming.raycast_offset - swimming.surface_break;
        if target.y > ceiling {
            target.y = ceiling;
        }
        self.runtime.external_target = target;
    }

    fn update_jumping(&mut self) {
        let jump = self.settings.jump;
        self.runtime.jump_time += self.dt;
        let time = self.runtime.jump_time;
        let reference = self.reference();

        if time >= -jump.duration {
            let progress = if jump.duration > 0.0 {
                ((time + jump.duration) / jump.duration).clamp(0.0, 1.0)
            } else {
                1.0
            };
            let force = jump.force * (1.0 - progress);
            let horizontal = jump.horizontal_force_multiplier * progress * force;

            let direction = self.runtime.jump_direction;
            let offset = if direction == Vec3::ZERO {
                let flat = self.control.flat_vector;
                Vec3::new(flat.x * horizontal, force, flat.z * horizontal)
            } else {
                Vec3::new(direction.x * horizontal, direction.y * force, direction.z * horizontal)
            };
            self.runtime.external_target = reference + offset;
        } else {
            // Wind-up: hold still.
            self.runtime.external_target = reference;
        }

        if time >= 0.0 {
            self.change_state(MovementState::Undefined);
        }
    }

    fn update_blink(&mut self) {
        self.runtime.rail.interaction_time = 0.0;
        let dt = self.dt;
        let Some(blink) = self.runtime.blink.as_mut() else {
            self.change_state(MovementState::Undefined);
            return;
        };

        if blink.delay != 0.0 {
            blink.elapsed += dt;
            if blink.elapsed < blink.delay {
                return;
            }
        }

        let target = blink.target;
        let reached = self.runtime.rep.position.distance(target) <= blink.achievement_distance;
        self.set_position(target);
        self.runtime.external_target = target;

        if reached {
            self.runtime.blink = None;
            self.change_state(MovementState::Undefined);
        }
    }

    fn update_ragdoll(&mut self) {
        self.runtime.locks.movement.acquire(priority::RAGDOLL);
        self.runtime.locks.rotation.acquire(priority::RAGDOLL);
    }

    fn update_recovery(&mut self) {
        self.runtime.locks.movement.acquire(priority::RECOVERY);
        self.runtime.external_target = self.reference();
        self.runtime.recovery += self.dt;
        if self.runtime.recovery >= 0.0 {
            self.runtime.recovery = 0.0;
            self.change_state(MovementState::Undefined);
        }
    }

    fn update_lunge(&mut self) {
        let Some(lunge) = self.runtime.lunge.as_ref() else {
            self.runtime.locks.rotation.release(priority::LUNGE);
            self.change_state(MovementState::Undefined);
            return;
        };

        self.runtime.lunge_step += self.dt;
        let step = self.runtime.lunge_step;
        let direction = lunge.direction;
        let intensity = lunge.intensity_at(step);
        let finished = step >= lunge.duration;

        self.runtime.external_target = self.reference() + direction * intensity;

        if finished {
            self.runtime.lunge_step = 0.0;
            self.runtime.lunge = None;
            self.runtime.locks.rotation.release(priority::LUNGE);
            self.change_state(MovementState::Undefined);
        }
    }

    // === Rotation ===

    pub(crate) fn update_rotation(&mut self) {
        if self.runtime.rail.attachment.is_some() {
            self.update_rail_rotation();
        }
        if self.runtime.locks.rotation.is_locked() {
            return;
        }

        if self.runtime.state == MovementState::Blink {
            if let Some(blink) = self.runtime.blink.as_ref() {
                if blink.snap_rotation {
                    let rotation = blink.ideal_rotation;
                    self.set_rotation(rotation);
                    return;
                }
            }
        }

        let control = self.control;
        if self.runtime.movement_method == GroundedMovementMethod::ControlVectorBased {
            self.set_camera_rotation_speed();
            if !control.scheme.is_unlocked_modern() || control.scheme.is_modern_mixed() {
                self.rotate_towards(control.camera_rotation);
            } else {
                let target = if control.flat_vector == Vec3::ZERO {
                    yaw_only(self.body.rotation)
                } else {
                    look_yaw(control.flat_vector)
                };
                self.rotate_towards(target);
            }
        } else if let Some(target) = self.runtime.move_to_target {
            self.runtime.rotation_speed = self.settings.directional.max_rotation_speed;
            let look = look_yaw(target - self.body.position);
            self.rotate_towards(look);
        }
    }

    /// Pick the turn rate from the control vector's rotation policy.
    fn set_camera_rotation_speed(&mut self) {
        let control = self.control;
        let max = self.settings.directional.max_rotation_speed;
        let flying = self.runtime.state == MovementState::Flying;

        if !control.allow_rotation_difference {
            self.runtime.rotation_difference = Quat::IDENTITY;
        } else if !control.lock_rotation {
            // Camera orbits freely; the character keeps its offset.
            self.runtime.rotation_speed = 0.0;
            self.runtime.rotation_difference =
                self.body.rotation * control.camera_rotation.inverse();
            return;
        }

        if control.lock_rotation {
            self.runtime.rotation_speed = if flying {
                max * self.settings.flying.max_rotation_speed_multiplier
            } else {
                max
            };
        } else if control.rotate_with_movement {
            self.runtime.rotation_speed = if flying {
                max * self.settings.flying.key_rotation_speed_multiplier
                    * control.free_vector.length()
                    * self.dt
            } else {
                max * control.flat_vector.length() * self.dt
            };
        }
    }

    fn rotate_towards(&mut self, target: Quat) {
        let goal = target * self.runtime.rotation_difference;
        let mut rotation = slerp(self.body.rotation, goal, self.runtime.rotation_speed * self.dt);
        let turn = self.control.rotation * self.settings.directional.rotational_speed_multiplier;
        if turn != 0.0 {
            rotation *= Quat::from_rotation_y((turn * self.dt).to_radians());
        }
        if rotation != self.body.rotation {
            self.set_rotation(rotation);
        }
    }

    fn update_rail_rotation(&mut self) {
        let Some(rail_entity) = self.runtime.rail.rail() else {
            return;
        };
        let Some(rail) = self.rails.get(rail_entity) else {
            return;
        };

        let height = self.settings.body.height;
        let rep_position = self.runtime.rep.position;
        let eye = Vec3::Y * (height - rail.y_offset);
        let target = match rail.rotation {
            RailRotationControl::NextWaypoint => {
                let mut offset = 1;
                if rail.control == RailControl::Key {
                    if self.control.rail_axis > 0.0 {
                        self.runtime.rail.last_look_dir = self.control.rail_direction.round() as i32;
                    } else if self.control.rail_axis < 0.0 {
                        self.runtime.rail.last_look_dir = 0;
                    }
                    offset = self.runtime.rail.last_look_dir;
                }
                Some(rail.floor_waypoint(offset))
            }
            RailRotationControl::Target => rail.resolved_rotation_target,
            RailRotationControl::Free => {
                self.runtime.locks.rotation.release(priority::RAIL);
                None
            }
            RailRotationControl::Locked => None,
        };

        let Some(point) = target else {
            return;
        };
        let mut look = look_rotation(point - eye - rep_position, Vec3::Y);
        if rail.rotate_on_y_only {
            look = yaw_only(look);
        }
        let speed = rail.rotation_speed;
        let rep = &mut self.runtime.rep;
        rep.target_rotation = look;
        rep.rotation = slerp(rep.rotation, look, speed * self.dt);
        let facing = yaw_only(rep.rotation);
        self.set_rotation(facing);
    }

    pub(crate) fn record_rotation(&mut self) {
        self.runtime.recorded_yaw = yaw_degrees(self.body.rotation);
    }

    // === Representation ===

    /// Ease the visual representation toward the body.
    pub(crate) fn update_rep(&mut self) {
        let visual = self.settings.visual;
        let height = self.settings.body.height;
        let dt = self.dt;

        let rep = &mut self.runtime.rep;
        rep.current_speed = lerp(rep.current_speed, rep.target_speed, visual.rep_adjustment_speed * dt);

        let rail_owns_rotation = self
            .runtime
            .rail
            .rail()
            .and_then(|entity| self.rails.get(entity))
            .is_some_and(|rail| {
                matches!(
                    rail.rotation,
                    RailRotationControl::NextWaypoint | RailRotationControl::Target
                )
            });
        if !rail_owns_rotation {
            self.runtime.rep.rotation = yaw_only(self.body.rotation);
        }

        let state = self.runtime.state;
        let glued = matches!(
            state,
            MovementState::Grounded | MovementState::Recovery | MovementState::Sliding
        ) || (state == MovementState::Swimming && self.settings.swimming.false_walk);

        let reference = self.reference();
        let target = if glued {
            self.probe.ground_vector(reference, self.ground_filter())
                + Vec3::Y * (visual.rep_height_offset + height)
        } else {
            reference + Vec3::Y * visual.rep_height_offset
        };

        let rep = &mut self.runtime.rep;
        let mut velocity = rep.velocity;
        rep.position = smooth_damp(rep.position, target, &mut velocity, rep.current_speed, dt);
        rep.velocity = velocity;
    }
}
