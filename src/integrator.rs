//! Turns the tick's external target into rigid-body forces.

use bevy::prelude::*;
use rand::Rng;

use crate::machine::MovementContext;
use crate::math::{climb_angle, flat_distance, height_distance};
use crate::state::MovementState;

impl MovementContext<'_> {
    /// Queue the forces pulling the body toward `runtime.external_target`.
    pub(crate) fn apply_forces(&mut self) {
        let state = self.runtime.state;
        if state == MovementState::Ragdoll {
            return;
        }

        let reference = self.reference();
        let target = self.runtime.external_target;
        let forces = self.settings.forces;

        if state.is_ground_like() {
            self.add_force(Vec3::Y * forces.constant_y_grounded);

            let height = self.settings.body.height;
            let lifted = target + Vec3::Y * height;
            let angle = climb_angle(
                height_distance(reference - Vec3::Y * height, lifted),
                flat_distance(reference, lifted),
            );
            if target.y > reference.y && angle > self.settings.slide.maximum_climb_angle {
                return;
            }

            let mut pull = (lifted - reference) * self.runtime.transitional_speed;
            pull.y = self.runtime.y_average.push(pull.y);
            if pull.y > 0.0 {
                pull.y -= pull.y * pull.y * forces.variable_y_multiplier;
            }
            if state == MovementState::Sliding {
                pull.y += self.settings.slide.constant_y;
            }
            self.add_force(pull * forces.multiplier);
        } else if state.is_free_motion() {
            self.add_force((target - reference) * forces.multiplier);
        } else if state == MovementState::OnRails {
            let lock = self
                .runtime
                .rail
                .rail()
                .and_then(|entity| self.rails.get(entity))
                .map(|rail| rail.absolute_position_lock);
            match lock {
                Some(true) => self.set_position(target),
                Some(false) => self.set_velocity(target - reference),
                None => {}
            }
        }
    }

    /// Full friction only while standing idle.
    pub(crate) fn update_friction(&mut self) {
        let idle = self.control.free_vector == Vec3::ZERO
            && !matches!(
                self.runtime.state,
                MovementState::Sliding
                    | MovementState::Falling
                    | MovementState::Jumping
                    | MovementState::Recovery
            );
        self.set_friction(if idle { 1.0 } else { 0.0 });
    }

    /// Nudge a falling body that has stopped moving, e.g. wedged on an edge.
    pub(crate) fn fall_protection(&mut self) {
        if self.body.velocity.length() < 1.0 {
            self.runtime.fall_protection_time += self.dt;
        } else {
            self.runtime.fall_protection_time = 0.0;
        }

        let protection = self.settings.fall_protection;
        if self.runtime.fall_protection_time <= protection.minimum_time {
            return;
        }

        let magnitude = (self.runtime.fall_protection_time * protection.force_multiplier)
            .clamp(0.0, protection.maximum_force);
        let mut rng = rand::thread_rng();
        let x = rng.gen_range(-1..=1) as f32;
        let z = rng.gen_range(-1..=1) as f32;
        self.add_force(Vec3::new(magnitude * x, 0.0, magnitude * z));
    }
}

#[cfg(test)]
mod tests {
    use crate::machine::testing::Harness;
    use crate::machine::BodyCommand;
    use crate::probe::testing::MockWorld;
    use crate::settings::MultiStateSettings;
    use crate::state::MovementState;
    use bevy::prelude::*;

    #[test]
    fn grounded_pushes_into_the_ground() {
        let mut harness = Harness::on_ground();
        harness.tick_idle();
        let grounded = harness.settings.forces.constant_y_grounded;
        assert!(harness.out.commands.contains(&BodyCommand::AddForce(Vec3::Y * grounded)));
    }

    #[test]
    fn grounded_pull_moves_toward_input() {
        let mut harness = Harness::on_ground();
        harness.control.set_flat_vector(Vec3::Z);
        harness.tick_idle();
        let force = harness.out.total_force();
        assert!(force.z > 0.0, "pull follows input: {force:?}");
    }

    #[test]
    fn wall_steeper_than_climb_limit_gives_no_pull() {
        let mut harness = Harness::on_ground();
        harness.runtime.transitional_speed = 1.0;
        // A target well above the head: too steep to climb.
        harness.runtime.external_target = Vec3::new(0.1, 5.0, 0.0);
        harness.with(|ctx| ctx.apply_forces());
        let grounded = harness.settings.forces.constant_y_grounded;
        assert_eq!(harness.out.total_force(), Vec3::Y * grounded);
    }

    #[test]
    fn free_motion_is_proportional() {
        let mut harness = Harness::on_ground();
        harness.runtime.state = MovementState::Flying;
        harness.runtime.reference_position = Vec3::new(0.0, 2.0, 0.0);
        harness.runtime.external_target = Vec3::new(1.0, 2.0, 0.0);
        harness.with(|ctx| ctx.apply_forces());
        let multiplier = harness.settings.forces.multiplier;
        assert_eq!(harness.out.total_force(), Vec3::X * multiplier);
    }

    #[test]
    fn stuck_fall_gets_nudged() {
        let mut harness = Harness::new(
            MultiStateSettings::default(),
            MockWorld::new(),
            Vec3::new(0.0, 50.0, 0.0),
        );
        let minimum = harness.settings.fall_protection.minimum_time;
        let ticks = ((minimum / harness.dt) as usize) + 10;
        for _ in 0..ticks {
            harness.tick_idle();
        }
        assert_eq!(harness.state(), MovementState::Falling);
        assert!(harness.runtime.fall_protection_time > minimum);

        harness.body.velocity = Vec3::new(0.0, -5.0, 0.0);
        harness.tick_idle();
        assert_eq!(harness.runtime.fall_protection_time, 0.0);
    }
}
