//! The movement state machine.
//!
//! [`MovementContext`] is everything one character needs for one fixed tick:
//! its configuration and runtime, the control vector, a snapshot of the rigid
//! body and a physics probe. The tick never touches the physics engine
//! directly; it queues [`BodyCommand`]s and [`ControllerEvent`]s in
//! [`TickOutputs`] for the backend systems to apply.

use bevy::prelude::*;

use crate::animation::AnimationParameters;
use crate::collision::ProbeFilter;
use crate::control::ControlVector;
use crate::events::ControllerEvent;
use crate::locks::priority;
use crate::probe::PhysicsProbe;
use crate::rail::{RailOccupant, RailSet};
use crate::requests::ControllerRequest;
use crate::runtime::{apply_profile, MovementRuntime};
use crate::settings::MultiStateSettings;
use crate::slide::{probe_slide, SlideMode, SlideVerdict};
use crate::state::{GroundedSubstate, MovementState};

/// Snapshot of the character's rigid body. `position` is the feet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
}

impl Default for BodyState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
        }
    }
}

impl BodyState {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..default()
        }
    }
}

/// A change the state machine wants applied to the rigid body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BodyCommand {
    AddForce(Vec3),
    SetVelocity(Vec3),
    /// Teleport so the feet end up here.
    SetPosition(Vec3),
    SetRotation(Quat),
    SetDrag(f32),
    SetFriction(f32),
    /// Give every ragdoll body this vertical velocity.
    LaunchRagdoll(f32),
}

/// Everything a tick produced, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutputs {
    pub commands: Vec<BodyCommand>,
    pub events: Vec<ControllerEvent>,
}

impl TickOutputs {
    pub fn clear(&mut self) {
        self.commands.clear();
        self.events.clear();
    }

    /// Sum of every force queued this tick.
    pub fn total_force(&self) -> Vec3 {
        self.commands
            .iter()
            .filter_map(|command| match command {
                BodyCommand::AddForce(force) => Some(*force),
                _ => None,
            })
            .sum()
    }

    /// Last velocity override queued this tick.
    pub fn last_velocity(&self) -> Option<Vec3> {
        self.commands.iter().rev().find_map(|command| match command {
            BodyCommand::SetVelocity(velocity) => Some(*velocity),
            _ => None,
        })
    }
}

/// One character's view of the world for a single tick.
pub struct MovementContext<'a> {
    pub entity: Entity,
    pub settings: &'a mut MultiStateSettings,
    pub runtime: &'a mut MovementRuntime,
    pub control: &'a ControlVector,
    pub body: BodyState,
    pub dt: f32,
    pub probe: &'a dyn PhysicsProbe,
    pub rails: &'a mut RailSet,
    pub animation: &'a mut AnimationParameters,
    pub out: &'a mut TickOutputs,
}

impl<'a> MovementContext<'a> {
    // === Tick ===

    /// Run one fixed tick.
    ///
    /// Requests are applied first, then the identification pass, the state
    /// update, force integration, animation and representation.
    pub fn tick(&mut self, requests: impl IntoIterator<Item = ControllerRequest>) {
        self.runtime.reference_position =
            self.body.position + Vec3::Y * self.settings.body.height;

        for request in requests {
            self.apply_request(request);
        }

        self.rail_tick();
        self.identify_move_to_target();
        self.update_rotation();
        self.identify();
        self.update_movement_by_state();
        self.update_friction();
        self.apply_forces();
        self.publish_animation();
        self.update_rep();
        self.record_rotation();
        self.check_rail_detach();
    }

    /// Late pass: collider shape, physics gyro and pending profile swap.
    pub fn post_tick(&mut self, profile: Option<&MultiStateSettings>) {
        self.update_collider_height();
        self.update_physics_gyro();
        if let Some(profile) = profile {
            self.change_profile(profile);
        }
    }

    /// Swap in a new profile and re-evaluate the state from scratch.
    pub fn change_profile(&mut self, profile: &MultiStateSettings) {
        self.runtime.requested = MovementState::Undefined;
        self.change_state(MovementState::Undefined);
        apply_profile(self.settings, self.runtime, profile);
        debug!("{:?}: profile changed", self.entity);
    }

    // === Body commands ===

    /// Head-height probe origin, recomputed at the start of every tick.
    #[inline]
    pub fn reference(&self) -> Vec3 {
        self.runtime.reference_position
    }

    #[inline]
    pub(crate) fn is_enabled(&self, state: MovementState) -> bool {
        self.settings.states.enabled.is_enabled(state)
    }

    #[inline]
    pub(crate) fn ground_filter(&self) -> ProbeFilter {
        ProbeFilter::new(self.settings.layers.ground)
    }

    pub(crate) fn add_force(&mut self, force: Vec3) {
        self.out.commands.push(BodyCommand::AddForce(force));
    }

    pub(crate) fn set_velocity(&mut self, velocity: Vec3) {
        self.body.velocity = velocity;
        self.out.commands.push(BodyCommand::SetVelocity(velocity));
    }

    pub(crate) fn set_position(&mut self, position: Vec3) {
        self.body.position = position;
        self.out.commands.push(BodyCommand::SetPosition(position));
    }

    pub(crate) fn set_rotation(&mut self, rotation: Quat) {
        self.body.rotation = rotation;
        self.out.commands.push(BodyCommand::SetRotation(rotation));
    }

    pub(crate) fn set_friction(&mut self, friction: f32) {
        self.out.commands.push(BodyCommand::SetFriction(friction));
    }

    pub(crate) fn emit(&mut self, event: ControllerEvent) {
        self.out.events.push(event);
    }

    /// Fire an animation trigger. Empty names are ignored.
    pub(crate) fn trigger(&mut self, trigger: &str) {
        if !trigger.is_empty() {
            self.emit(ControllerEvent::AnimationTrigger(trigger.to_string()));
        }
    }

    // === Identification ===

    /// Decide the current state from requests and probes.
    pub(crate) fn identify(&mut self) {
        if self.settings.states.eject_from_disabled && !self.is_enabled(self.runtime.state) {
            self.change_state(MovementState::Undefined);
        }

        self.runtime.jump_attempt_guard = (self.runtime.jump_attempt_guard + self.dt).clamp(-1.0, 0.0);

        if self.identify_override() {
            return;
        }

        let reference = self.reference();
        let length = self.settings.body.height + self.runtime.raycast_distance;
        let hit = self
            .probe
            .raycast(reference, Vec3::NEG_Y, length, self.ground_filter());
        self.runtime.is_grounded = hit.is_some();

        if hit.is_some() {
            self.identify_grounded();
        } else if self.runtime.state != MovementState::Flying
            && self.is_enabled(MovementState::Falling)
        {
            self.change_state(MovementState::Falling);
        }
    }

    /// Requested or sticky states that bypass the ground probe.
    ///
    /// Returns `true` when a state claimed the tick.
    fn identify_override(&mut self) -> bool {
        if self.hold_or_enter(MovementState::Ragdoll) || self.hold_or_enter(MovementState::OnRails) {
            return true;
        }

        if self.is_enabled(MovementState::Swimming) {
            let swimming = self.settings.swimming;
            let origin = self.reference() + Vec3::Y * swimming.raycast_offset;
            let water = ProbeFilter::with_sensors(self.settings.layers.water);
            if let Some(hit) = self.probe.raycast(origin, Vec3::Y, 1000.0, water) {
                self.runtime.water_level = hit.point.y;
                self.change_state(MovementState::Swimming);
                return true;
            }
        }

        if self.is_enabled(MovementState::Flying) {
            if self.runtime.state == MovementState::Flying {
                if !self.settings.flying.automatic_land || self.over_disable_land() {
                    return true;
                }
            } else if self.runtime.requested == MovementState::Flying {
                self.change_state(MovementState::Flying);
                self.runtime.requested = MovementState::Undefined;
                return true;
            }
        }

        for state in [
            MovementState::Jumping,
            MovementState::Blink,
            MovementState::Lunge,
            MovementState::Recovery,
        ] {
            if self.hold_or_enter(state) {
                return true;
            }
        }

        let requested = self.runtime.requested;
        if matches!(requested, MovementState::Falling | MovementState::Grounded)
            && self.is_enabled(requested)
        {
            self.change_state(requested);
            self.runtime.requested = MovementState::Undefined;
            return true;
        }

        false
    }

    /// Keep `state` if current, or enter it if requested.
    fn hold_or_enter(&mut self, state: MovementState) -> bool {
        if !self.is_enabled(state) {
            if self.runtime.requested == state {
                self.runtime.requested = MovementState::Undefined;
            }
            return false;
        }
        if self.runtime.state == state {
            return true;
        }
        if self.runtime.requested == state {
            self.change_state(state);
            self.runtime.requested = MovementState::Undefined;
            return true;
        }
        false
    }

    /// Whether the ground far below is marked as no-landing.
    pub(crate) fn over_disable_land(&self) -> bool {
        let filter = ProbeFilter::new(self.settings.layers.disable_land);
        self.probe
            .raycast(self.reference(), Vec3::NEG_Y, 500.0, filter)
            .is_some()
    }

    /// Ground is below: pick between sliding, recovery and grounded.
    fn identify_grounded(&mut self) {
        if self.is_enabled(MovementState::Sliding) {
            let mode = if self.runtime.state == MovementState::Sliding {
                SlideMode::Continuation
            } else {
                SlideMode::Entry
            };
            let verdict = probe_slide(
                self.probe,
                self.settings,
                self.body.position,
                self.reference(),
                self.runtime.slide_range,
                mode,
            );
            match verdict {
                SlideVerdict::None => {}
                SlideVerdict::Slide(point) => {
                    self.runtime.slide_target = point;
                    self.change_state(MovementState::Sliding);
                    return;
                }
                SlideVerdict::Fall(point) => {
                    if self.runtime.recovery < 0.0 && self.is_enabled(MovementState::Recovery) {
                        self.change_state(MovementState::Recovery);
                    } else if self.is_enabled(MovementState::Grounded) {
                        self.change_state(MovementState::Grounded);
                    } else {
                        self.runtime.slide_target = point;
                        self.change_state(MovementState::Sliding);
                    }
                    return;
                }
            }
        }

        if self.runtime.recovery < 0.0 {
            if self.is_enabled(MovementState::Recovery) {
                self.change_state(MovementState::Recovery);
                return;
            }
            self.runtime.recovery = 0.0;
        }

        if self.is_enabled(MovementState::Grounded) {
            self.change_state(MovementState::Grounded);
        }
    }

    // === Transitions ===

    /// Enter `next`, running its entry side effects.
    ///
    /// Disabled states are refused, as is `OnRails` without a rail.
    pub fn change_state(&mut self, next: MovementState) {
        if !self.is_enabled(next) {
            debug!("{:?}: refused disabled state {:?}", self.entity, next);
            return;
        }
        if next == MovementState::OnRails && self.runtime.rail.attachment.is_none() {
            debug!("{:?}: refused OnRails without a rail", self.entity);
            return;
        }

        let previous = self.runtime.state;
        let raycast = self.settings.raycast;
        let rep = self.settings.visual.rep_speeds;
        let normal_drag = self.settings.forces.normal_drag;

        match next {
            MovementState::Undefined => {}
            MovementState::Grounded | MovementState::Recovery => {
                self.schedule_rail_detach();
                self.runtime.jump_direction = Vec3::ZERO;
                let distance = if next == MovementState::Grounded {
                    raycast.ground
                } else {
                    raycast.recovery
                };
                self.adjust(normal_drag, rep.grounded, distance, None);
                if previous == MovementState::Falling {
                    self.land();
                }
            }
            MovementState::Sliding => {
                self.schedule_rail_detach();
                self.runtime.jump_direction = Vec3::ZERO;
                let recovery = self.settings.slide.recovery_time;
                self.adjust(normal_drag, rep.falling, raycast.sliding, Some(recovery));
                if previous == MovementState::Falling {
                    self.land();
                }
            }
            MovementState::Flying => {
                self.runtime.jump_direction = Vec3::ZERO;
                self.adjust(self.settings.flying.drag, rep.flying, raycast.flying, None);
                self.runtime.move_to_target = None;
                self.schedule_rail_detach();
                if previous != MovementState::Flying {
                    self.animation.clear_velocity();
                }
                self.runtime.fall_time = 0.0;
            }
            MovementState::Swimming => {
                self.adjust(self.settings.swimming.drag, rep.swimming, raycast.swimming, None);
                self.runtime.move_to_target = None;
                self.schedule_rail_detach();
                self.runtime.jump_direction = Vec3::ZERO;
                if previous != MovementState::Swimming {
                    self.animation.clear_velocity();
                }
                self.runtime.fall_time = 0.0;
            }
            MovementState::Jumping => {
                self.schedule_rail_detach();
                let jump = self.settings.jump;
                self.adjust(normal_drag, rep.falling, raycast.jumping, Some(jump.fall_recovery_time));
                let velocity = if jump.zero_pre_jump_velocity {
                    Vec3::ZERO
                } else {
                    let h = jump.horizontal_force_multiplier;
                    Vec3::new(self.body.velocity.x * h, 0.0, self.body.velocity.z * h)
                };
                self.set_velocity(velocity);
            }
            MovementState::Falling => {
                self.schedule_rail_detach();
                self.runtime.jump_direction = Vec3::ZERO;
                let recovery = self.settings.jump.fall_recovery_time;
                self.adjust(normal_drag, rep.falling, raycast.falling, Some(recovery));
            }
            MovementState::OnRails => {
                self.runtime.move_to_target = None;
                let rail = self
                    .runtime
                    .rail
                    .rail()
                    .and_then(|entity| self.rails.get(entity))
                    .map(|rail| (rail.drag, rail.character_rep_speed, rail.recovery_time));
                if let Some((drag, rep_speed, recovery)) = rail {
                    self.adjust(drag, rep_speed, raycast.ground, Some(recovery));
                }
                self.runtime.jump_direction = Vec3::ZERO;
                self.runtime.fall_time = 0.0;
            }
            MovementState::Ragdoll => {
                self.schedule_rail_detach();
                self.runtime.jump_direction = Vec3::ZERO;
                self.adjust(normal_drag, rep.grounded, 0.0, None);
                let launch = self.settings.ragdoll.initial_y_velocity;
                self.out.commands.push(BodyCommand::LaunchRagdoll(launch));
            }
            MovementState::Blink => {
                self.set_velocity(Vec3::ZERO);
                let (rep_speed, recovery) = self
                    .runtime
                    .blink
                    .as_ref()
                    .map(|blink| (blink.rep_speed, blink.recovery_time))
                    .unwrap_or((rep.grounded, self.settings.blink.recovery_time));
                self.adjust(normal_drag, rep_speed, 0.0, Some(recovery));
            }
            MovementState::Lunge => {
                self.runtime.locks.rotation.acquire(priority::LUNGE);
                let recovery = self
                    .runtime
                    .lunge
                    .as_ref()
                    .map_or(0.0, |lunge| lunge.recovery_time);
                self.adjust(normal_drag, rep.grounded, 0.0, Some(recovery));
            }
        }

        if previous == MovementState::Ragdoll && next != MovementState::Ragdoll {
            self.runtime.locks.release_all(priority::RAGDOLL);
        }

        if next != previous {
            debug!("{:?}: {:?} -> {:?}", self.entity, previous, next);
            self.emit(ControllerEvent::StateChanged {
                from: previous,
                to: next,
            });
        }
        self.runtime.state = next;
    }

    /// Per-state drag, representation speed, probe length and recovery.
    fn adjust(&mut self, drag: f32, rep_speed: f32, raycast_distance: f32, recovery: Option<f32>) {
        self.out.commands.push(BodyCommand::SetDrag(drag));
        self.runtime.rep.target_speed = rep_speed;
        self.runtime.raycast_distance = raycast_distance;
        if let Some(recovery) = recovery {
            self.runtime.recovery = -recovery;
        }
    }

    fn land(&mut self) {
        let fall_time = self.runtime.fall_time;
        self.emit(ControllerEvent::Landed { fall_time });
        debug!("{:?}: landed after {:.2}s", self.entity, fall_time);
        self.runtime.fall_time = 0.0;
    }

    // === Late pass ===

    /// Shrink the collider while crouching on the ground or a rail.
    pub(crate) fn update_collider_height(&mut self) {
        let body = self.settings.body;
        let crouched = matches!(
            self.runtime.state,
            MovementState::Grounded | MovementState::Recovery | MovementState::OnRails
        ) && self.runtime.substate == GroundedSubstate::Crouching;

        if crouched {
            let difference = self.settings.substates.crouching_collider_difference;
            self.runtime.collider.height = body.collider_height - difference;
            self.runtime.collider.center = body.collider_offset + Vec3::NEG_Y * difference * 0.5;
        } else {
            self.runtime.collider.height = body.collider_height;
            self.runtime.collider.center = body.collider_offset;
        }
    }
}

impl RailOccupant for MovementContext<'_> {
    fn substate(&self) -> GroundedSubstate {
        self.runtime.substate
    }

    fn set_substate(&mut self, substate: GroundedSubstate) {
        MovementContext::set_substate(self, substate);
    }

    fn set_default_substate(&mut self, substate: GroundedSubstate, switch: bool) {
        MovementContext::set_default_substate(self, substate, switch);
    }

    fn request_state(&mut self, state: MovementState) {
        MovementContext::request_state(self, state);
    }

    fn trigger_animation(&mut self, trigger: &str) {
        self.trigger(trigger);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::probe::testing::MockWorld;

    /// Owns everything a [`MovementContext`] borrows, for unit tests.
    pub struct Harness {
        pub entity: Entity,
        pub settings: MultiStateSettings,
        pub runtime: MovementRuntime,
        pub control: ControlVector,
        pub body: BodyState,
        pub rails: RailSet,
        pub animation: AnimationParameters,
        pub out: TickOutputs,
        pub world: MockWorld,
        pub dt: f32,
    }

    impl Harness {
        pub fn new(settings: MultiStateSettings, world: MockWorld, feet: Vec3) -> Self {
            let runtime = MovementRuntime::from_settings(&settings, feet);
            Self {
                entity: Entity::from_raw(1),
                settings,
                runtime,
                control: ControlVector::default(),
                body: BodyState::at(feet),
                rails: RailSet::new(),
                animation: AnimationParameters::default(),
                out: TickOutputs::default(),
                world,
                dt: 1.0 / 60.0,
            }
        }

        /// Default profile standing on flat ground at the origin.
        pub fn on_ground() -> Self {
            Self::new(
                MultiStateSettings::default(),
                MockWorld::new().with_ground(0.0),
                Vec3::ZERO,
            )
        }

        /// Run `f` against a context borrowing this harness.
        pub fn with<R>(&mut self, f: impl FnOnce(&mut MovementContext) -> R) -> R {
            let (result, body) = {
                let mut ctx = MovementContext {
                    entity: self.entity,
                    settings: &mut self.settings,
                    runtime: &mut self.runtime,
                    control: &self.control,
                    body: self.body,
                    dt: self.dt,
                    probe: &self.world,
                    rails: &mut self.rails,
                    animation: &mut self.animation,
                    out: &mut self.out,
                };
                let result = f(&mut ctx);
                (result, ctx.body)
            };
            self.body = body;
            result
        }

        /// One tick with the given requests. Outputs hold only this tick.
        pub fn tick(&mut self, requests: Vec<ControllerRequest>) {
            self.out.clear();
            self.with(|ctx| ctx.tick(requests));
        }

        pub fn tick_idle(&mut self) {
            self.tick(Vec::new());
        }

        pub fn events(&self) -> &[ControllerEvent] {
            &self.out.events
        }

        pub fn state(&self) -> MovementState {
            self.runtime.state
        }
    }
}
