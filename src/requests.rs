//! Public operations on a character.
//!
//! Callers outside the fixed tick push [`ControllerRequest`]s into the
//! character's [`ControllerRequests`] queue; the tick drains it before
//! identification. State requests therefore take effect at the next
//! identification pass, never mid-tick.

use bevy::prelude::*;

use crate::blink::{solve_blink, BlinkOrigin, BlinkRequest};
use crate::collision::ProbeFilter;
use crate::events::ControllerEvent;
use crate::ik::{FeetLocationMethod, HandLocationMethod};
use crate::locks::priority;
use crate::lunge::LungeAction;
use crate::machine::MovementContext;
use crate::rail::{RailEvaluation, RAIL_EXIT_TRIGGER};
use crate::runtime::RailAttachment;
use crate::state::{GroundedSubstate, MovementState};

/// One queued operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerRequest {
    /// Ask the machine to enter a state at the next identification.
    State(MovementState),
    /// Jump along the current input.
    Jump,
    /// Jump in an explicit direction, skipping the overhead check.
    JumpToward(Vec3),
    /// Jump regardless of state and guards.
    ForceJump(Vec3),
    Lunge(LungeAction),
    Blink(BlinkRequest),
    EnableRagdoll,
    DisableRagdoll,
    SetSubstate(GroundedSubstate),
    ToggleSubstate(GroundedSubstate),
    ToggleSubstateByName(String),
    ToggleSubstateByIndex(usize),
    SetDefaultSubstate {
        substate: GroundedSubstate,
        switch: bool,
    },
    /// Teleport the feet.
    SetPlayerPosition {
        position: Vec3,
        snap_rep: bool,
        reset_state: bool,
    },
    /// Set the grounded speed, optionally also for swimming and flying.
    SetTransitionalSpeed {
        speed: f32,
        swimming: bool,
        flying: bool,
    },
    SetMoveToTarget(Option<Vec3>),
    EvaluateRail(RailEvaluation),
    ExitRailSystem {
        key: Option<String>,
    },
    DetachFromRail(MovementState),
    LockMovement(u32),
    UnlockMovement(u32),
    LockRotation(u32),
    UnlockRotation(u32),
    SetIkMethod {
        feet: FeetLocationMethod,
        hand: HandLocationMethod,
    },
    /// Lock-to-target IK candidates come from this entity and its children.
    EvaluateIkTargetSet(Option<Entity>),
}

/// Per-character queue of pending operations.
///
/// # Example
///
/// ```rust
/// use bevy::prelude::*;
/// use multistate_character_controller::prelude::*;
///
/// let mut requests = ControllerRequests::new();
/// requests.jump();
/// requests.set_substate(GroundedSubstate::Walking);
/// assert_eq!(requests.len(), 2);
///
/// let drained: Vec<_> = requests.drain().collect();
/// assert_eq!(drained[0], ControllerRequest::Jump);
/// assert!(requests.is_empty());
/// ```
#[derive(Component, Debug, Clone, Default)]
pub struct ControllerRequests {
    queue: Vec<ControllerRequest>,
}

impl ControllerRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: ControllerRequest) {
        self.queue.push(request);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take every pending request, in submission order.
    pub fn drain(&mut self) -> std::vec::Drain<'_, ControllerRequest> {
        self.queue.drain(..)
    }

    /// Request a state change.
    pub fn request_state(&mut self, state: MovementState) {
        self.push(ControllerRequest::State(state));
    }

    /// Attempt a jump along the current input.
    pub fn jump(&mut self) {
        self.push(ControllerRequest::Jump);
    }

    /// Attempt a jump in `direction`.
    pub fn jump_toward(&mut self, direction: Vec3) {
        self.push(ControllerRequest::JumpToward(direction));
    }

    pub fn force_jump(&mut self, direction: Vec3) {
        self.push(ControllerRequest::ForceJump(direction));
    }

    pub fn lunge(&mut self, lunge: LungeAction) {
        self.push(ControllerRequest::Lunge(lunge));
    }

    pub fn blink(&mut self, blink: BlinkRequest) {
        self.push(ControllerRequest::Blink(blink));
    }

    pub fn set_substate(&mut self, substate: GroundedSubstate) {
        self.push(ControllerRequest::SetSubstate(substate));
    }

    pub fn toggle_substate(&mut self, substate: GroundedSubstate) {
        self.push(ControllerRequest::ToggleSubstate(substate));
    }

    /// Teleport the feet to `position`, snapping the mesh and re-evaluating the state.
    pub fn teleport(&mut self, position: Vec3) {
        self.push(ControllerRequest::SetPlayerPosition {
            position,
            snap_rep: true,
            reset_state: true,
        });
    }

    pub fn move_to(&mut self, target: Vec3) {
        self.push(ControllerRequest::SetMoveToTarget(Some(target)));
    }

    pub fn exit_rail(&mut self) {
        self.push(ControllerRequest::ExitRailSystem { key: None });
    }
}

impl MovementContext<'_> {
    /// Apply one queued request.
    pub fn apply_request(&mut self, request: ControllerRequest) {
        match request {
            ControllerRequest::State(state) => self.request_state(state),
            ControllerRequest::Jump => self.attempt_jump(None),
            ControllerRequest::JumpToward(direction) => self.attempt_jump(Some(direction)),
            ControllerRequest::ForceJump(direction) => self.force_jump(direction),
            ControllerRequest::Lunge(lunge) => self.request_lunge(lunge),
            ControllerRequest::Blink(blink) => self.request_blink(&blink),
            ControllerRequest::EnableRagdoll => self.enable_ragdoll(),
            ControllerRequest::DisableRagdoll => self.disable_ragdoll(),
            ControllerRequest::SetSubstate(substate) => {
                self.set_substate(substate);
            }
            ControllerRequest::ToggleSubstate(substate) => self.toggle_substate(substate),
            ControllerRequest::ToggleSubstateByName(name) => self.toggle_substate_by_name(&name),
            ControllerRequest::ToggleSubstateByIndex(index) => self.toggle_substate_by_index(index),
            ControllerRequest::SetDefaultSubstate { substate, switch } => {
                self.set_default_substate(substate, switch)
            }
            ControllerRequest::SetPlayerPosition {
                position,
                snap_rep,
                reset_state,
            } => self.set_player_position(position, snap_rep, reset_state),
            ControllerRequest::SetTransitionalSpeed {
                speed,
                swimming,
                flying,
            } => self.set_transitional_speed(speed, swimming, flying),
            ControllerRequest::SetMoveToTarget(target) => self.runtime.move_to_target = target,
            ControllerRequest::EvaluateRail(evaluation) => {
                self.evaluate_rail(&evaluation);
            }
            ControllerRequest::ExitRailSystem { key } => self.exit_rail_system(key.as_deref()),
            ControllerRequest::DetachFromRail(state) => self.detach_from_rail(state, None),
            ControllerRequest::LockMovement(level) => {
                self.runtime.locks.movement.acquire(level);
            }
            ControllerRequest::UnlockMovement(level) => {
                self.runtime.locks.movement.release(level);
            }
            ControllerRequest::LockRotation(level) => {
                self.runtime.locks.rotation.acquire(level);
            }
            ControllerRequest::UnlockRotation(level) => {
                self.runtime.locks.rotation.release(level);
            }
            ControllerRequest::SetIkMethod { feet, hand } => self.set_ik_method(feet, hand),
            ControllerRequest::EvaluateIkTargetSet(parent) => self.runtime.ik.target_parent = parent,
        }
    }

    // === States ===

    pub fn request_state(&mut self, state: MovementState) {
        self.runtime.requested = state;
    }

    pub fn enable_ragdoll(&mut self) {
        self.runtime.requested = MovementState::Ragdoll;
    }

    pub fn disable_ragdoll(&mut self) {
        self.change_state(MovementState::Undefined);
    }

    pub fn set_player_position(&mut self, position: Vec3, snap_rep: bool, reset_state: bool) {
        self.set_position(position);
        if snap_rep {
            let lift = self.settings.body.height + self.settings.visual.rep_height_offset;
            self.runtime.rep.position = position + Vec3::Y * lift;
            self.runtime.rep.velocity = Vec3::ZERO;
        }
        if reset_state {
            self.change_state(MovementState::Undefined);
        }
    }

    /// Set the grounded transitional speed, and optionally the swimming and
    /// flying speed multipliers to the same value.
    pub fn set_transitional_speed(&mut self, speed: f32, swimming: bool, flying: bool) {
        self.settings.directional.grounded_transitional_speed = speed;
        if swimming {
            self.settings.swimming.speed_multiplier = speed;
        }
        if flying {
            self.settings.flying.base_speed_multiplier = speed;
        }
    }

    // === Jumping ===

    /// Try to jump, along the input or toward `direction`.
    pub fn attempt_jump(&mut self, direction: Option<Vec3>) {
        if self.runtime.jump_attempt_guard < 0.0 {
            return;
        }
        self.runtime.jump_attempt_guard -= 0.1;

        if self.settings.flying.from_falling {
            self.attempt_fly_from_fall();
        }

        if self.runtime.state == MovementState::Jumping
            || (direction.is_none() && self.runtime.move_to_target.is_some())
            || self.runtime.recovery < 0.0
            || (direction.is_none() && self.overhead_blocked())
        {
            return;
        }

        let jump = self.settings.jump;
        if jump.require_ground_state {
            if self.runtime.state != MovementState::Grounded {
                return;
            }
            if let Some(direction) = direction {
                self.runtime.jump_direction = direction;
            }
            self.runtime.jump_time = -jump.duration - jump.delay;
        } else {
            self.runtime.jump_time = -jump.duration;
        }
        self.runtime.requested = MovementState::Jumping;
    }

    /// Jump toward `direction` without any gating.
    pub fn force_jump(&mut self, direction: Vec3) {
        let jump = self.settings.jump;
        self.runtime.jump_direction = direction;
        self.runtime.jump_time = -jump.duration - jump.delay;
        self.runtime.requested = MovementState::Jumping;
    }

    fn overhead_blocked(&self) -> bool {
        let height = self.settings.body.height;
        let origin = self.reference() - Vec3::Y * (height / 2.0);
        let filter = ProbeFilter::new(self.settings.layers.overhead);
        self.probe.raycast(origin, Vec3::Y, height, filter).is_some()
    }

    /// A jump while airborne toggles flight.
    fn attempt_fly_from_fall(&mut self) {
        if !self.is_enabled(MovementState::Flying) {
            return;
        }

        if self.settings.flying.automatic_land {
            let length = self.settings.raycast.flying + self.settings.body.height + 0.05;
            if self
                .probe
                .raycast(self.reference(), Vec3::NEG_Y, length, self.ground_filter())
                .is_some()
            {
                return;
            }
        }

        match self.runtime.state {
            MovementState::Falling | MovementState::Jumping => {
                self.runtime.jump_attempt_guard -= 0.3;
                self.runtime.requested = MovementState::Flying;
                self.set_velocity(Vec3::ZERO);
                self.add_force(Vec3::Y * 50.0);
            }
            MovementState::Flying => {
                if self.over_disable_land() {
                    return;
                }
                self.runtime.jump_attempt_guard -= 0.3;
                self.runtime.requested = MovementState::Falling;
            }
            _ => {}
        }
    }

    // === Lunge and blink ===

    pub fn request_lunge(&mut self, lunge: LungeAction) {
        if self.runtime.lunge_step != 0.0
            || self.runtime.recovery != 0.0
            || !lunge.allows(self.runtime.state)
            || lunge.direction == Vec3::ZERO
        {
            return;
        }
        let trigger = lunge.animation_trigger.clone();
        self.runtime.lunge = Some(lunge);
        self.runtime.lunge_step = 0.0;
        self.trigger(&trigger);
        self.runtime.requested = MovementState::Lunge;
    }

    /// Solve a blink and request the blink state. Infeasible blinks are dropped.
    pub fn request_blink(&mut self, request: &BlinkRequest) {
        if matches!(self.runtime.state, MovementState::Blink | MovementState::Recovery) {
            return;
        }
        let origin = BlinkOrigin {
            feet: self.body.position,
            reference: self.reference(),
            rotation: self.body.rotation,
            camera_rotation: self.control.camera_rotation,
            rep_position: self.runtime.rep.position,
        };
        match solve_blink(self.probe, self.settings, request, &origin) {
            Ok(blink) => {
                self.trigger(&request.trigger);
                self.runtime.blink = Some(blink);
                self.runtime.requested = MovementState::Blink;
            }
            Err(reason) => debug!("{:?}: blink rejected: {}", self.entity, reason),
        }
    }

    // === Substates ===

    fn resolve_substate(&self, substate: GroundedSubstate) -> GroundedSubstate {
        match substate {
            GroundedSubstate::Default => match self.settings.substates.default {
                GroundedSubstate::Default => GroundedSubstate::Running,
                configured => configured,
            },
            other => other,
        }
    }

    /// Set the grounded substate. Standing up under a low ceiling is refused.
    pub fn set_substate(&mut self, substate: GroundedSubstate) -> bool {
        let substate = self.resolve_substate(substate);
        if self.runtime.substate == GroundedSubstate::Crouching
            && substate != GroundedSubstate::Crouching
        {
            let radius = self.settings.gyro.normal_radius;
            let center = self.reference() - Vec3::Y * radius;
            let filter = ProbeFilter::new(self.settings.layers.overhead);
            if self.probe.sphere_overlap(center, radius, filter) {
                debug!("{:?}: no headroom to leave crouch", self.entity);
                return false;
            }
        }
        self.runtime.substate = substate;
        true
    }

    /// Switch to `substate`, or back to the default if already in it.
    pub fn toggle_substate(&mut self, substate: GroundedSubstate) {
        let default = self.settings.substates.default;
        let substate = if substate == GroundedSubstate::Default {
            default
        } else {
            substate
        };
        if substate == GroundedSubstate::Default {
            warn!("{:?}: no default substate configured to toggle", self.entity);
            return;
        }
        if self.runtime.substate == substate && substate != default {
            self.set_substate(default);
        } else {
            self.set_substate(substate);
        }
    }

    pub fn toggle_substate_by_name(&mut self, name: &str) {
        match GroundedSubstate::from_name(name) {
            Some(substate) => self.toggle_substate(substate),
            None => warn!("{:?}: unknown substate {name:?}", self.entity),
        }
    }

    pub fn toggle_substate_by_index(&mut self, index: usize) {
        match GroundedSubstate::from_index(index) {
            Some(substate) => self.toggle_substate(substate),
            None => warn!("{:?}: substate index {index} out of range", self.entity),
        }
    }

    /// Set the default substate, switching to it when `switch` is set.
    pub fn set_default_substate(&mut self, substate: GroundedSubstate, switch: bool) {
        self.settings.substates.default = substate;
        if switch {
            self.set_substate(substate);
        }
    }

    // === IK ===

    pub fn set_ik_method(&mut self, feet: FeetLocationMethod, hand: HandLocationMethod) {
        self.runtime.ik.feet_method = feet;
        self.runtime.ik.hand_method = hand;
    }

    fn reset_ik_methods(&mut self) {
        self.runtime.ik.feet_method = self.settings.ik.feet_method;
        self.runtime.ik.hand_method = self.settings.ik.hand_method;
        self.runtime.ik.target_parent = None;
    }

    // === Rails ===

    /// Latch onto or off a rail from a cap.
    ///
    /// Returns `1` on latch, `-1` on unlatch and `0` when nothing happened.
    pub fn evaluate_rail(&mut self, evaluation: &RailEvaluation) -> i32 {
        if self.runtime.rail.interaction_time != 0.0 {
            return 0;
        }
        self.runtime.rail.interaction_time = -self.settings.rail.interaction_time;

        let attached = self.runtime.rail.rail();
        if attached == Some(evaluation.rail) && evaluation.allow_unlatch {
            self.reset_ik_methods();
            self.detach_from_rail(MovementState::Undefined, None);
            return -1;
        }

        let Some(rail) = self.rails.get(evaluation.rail) else {
            return 0;
        };
        if rail.occupant.is_some_and(|occupant| occupant != self.entity) {
            return 0;
        }

        let can_latch = matches!(
            self.runtime.state,
            MovementState::Grounded | MovementState::Jumping | MovementState::Falling
        );
        if attached != Some(evaluation.rail) && evaluation.allow_latch && can_latch {
            self.runtime.ik.feet_method = evaluation.feet_method;
            self.runtime.ik.hand_method = evaluation.hand_method;
            self.runtime.ik.target_parent = evaluation.ik_target_parent;
            self.runtime.rail.animation_position_multiplier = evaluation.animation_position_multiplier;
            self.runtime.rail.animation_position_offset = evaluation.animation_position_offset;
            self.attach_to_rail(evaluation);
            return 1;
        }
        0
    }

    fn attach_to_rail(&mut self, evaluation: &RailEvaluation) {
        let rail = &mut self.runtime.rail;
        rail.camera_dolly = evaluation.camera_dolly;
        rail.attachment = Some(RailAttachment {
            rail: evaluation.rail,
            position: evaluation.position,
            direction: evaluation.direction,
        });
        rail.has_called_trigger = false;
        rail.will_detach = false;
        self.runtime.locks.rotation.acquire(priority::RAIL);

        self.emit(ControllerEvent::ResetAnimationTrigger(RAIL_EXIT_TRIGGER.to_string()));
        self.runtime.requested = MovementState::OnRails;

        let entity = self.entity;
        if let Some(mut system) = self.rails.take(evaluation.rail) {
            system.latch(evaluation.position, entity, self);
            self.rails.put(evaluation.rail, system);
        }
        self.emit(ControllerEvent::RailLatched {
            rail: evaluation.rail,
            position: evaluation.position,
        });
        debug!("{:?}: latched onto rail {:?}", entity, evaluation.rail);
    }

    /// Leave the current rail into `state`.
    pub fn detach_from_rail(&mut self, state: MovementState, key: Option<&str>) {
        self.runtime.rail.camera_dolly = None;
        self.runtime.locks.rotation.release(priority::RAIL);
        self.change_state(state);
        if let Some(attachment) = self.runtime.rail.attachment {
            self.unlatch_occupied(attachment.rail, key);
        }
        self.runtime.rail.will_detach = true;
    }

    /// Leave the rail through an exit key or a shortcut.
    pub fn exit_rail_system(&mut self, key: Option<&str>) {
        if self.runtime.state != MovementState::OnRails || self.runtime.rail.interaction_time != 0.0 {
            return;
        }
        self.runtime.rail.interaction_time = -self.settings.rail.interaction_time;
        self.reset_ik_methods();
        self.detach_from_rail(MovementState::Undefined, key);
    }

    /// Run rail extensions, or leave when an unlatch key is held.
    pub(crate) fn rail_tick(&mut self) {
        if self.runtime.state != MovementState::OnRails {
            return;
        }
        let Some(entity) = self.runtime.rail.rail() else {
            return;
        };
        let control = self.control;
        let key = self
            .rails
            .get(entity)
            .and_then(|rail| rail.unlatch_key(&control.pressed_keys));
        if let Some(key) = key {
            self.exit_rail_system(Some(key));
            return;
        }
        if let Some(rail) = self.rails.take(entity) {
            rail.tick_extensions(self, control);
            self.rails.put(entity, rail);
        }
    }

    /// Mark a pending detach when leaving the rail through a state change.
    pub(crate) fn schedule_rail_detach(&mut self) {
        if self.runtime.rail.attachment.is_some() {
            self.runtime.rail.will_detach = true;
        }
    }

    /// End-of-tick rail bookkeeping: cooldown and deferred detach.
    pub(crate) fn check_rail_detach(&mut self) {
        if self.runtime.rail.interaction_time < 0.0 {
            self.runtime.rail.interaction_time = (self.runtime.rail.interaction_time + self.dt).min(0.0);
        }
        if !self.runtime.rail.will_detach {
            return;
        }
        self.runtime.rail.will_detach = false;
        let Some(attachment) = self.runtime.rail.attachment.take() else {
            return;
        };
        self.unlatch_occupied(attachment.rail, None);
        self.runtime.locks.rotation.release(priority::RAIL);
        self.runtime.rail.camera_dolly = None;
    }

    fn unlatch_occupied(&mut self, rail: Entity, key: Option<&str>) {
        let Some(mut system) = self.rails.take(rail) else {
            return;
        };
        if system.occupant == Some(self.entity) {
            system.unlatch(key, self);
            self.emit(ControllerEvent::RailUnlatched {
                rail,
                key: key.map(str::to_string),
            });
            debug!("{:?}: left rail {:?}", self.entity, rail);
        }
        self.rails.put(rail, system);
    }
}
