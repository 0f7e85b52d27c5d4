//! Procedural foot and hand placement.
//!
//! The animation pass supplies the animated limb positions and per-limb
//! weights on [`IkRig`]; [`solve_ik`] projects them onto the world and writes
//! the resulting goals and body offset back to the rig for the animation
//! layer to apply.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::collision::ProbeFilter;
use crate::math::look_rotation;
use crate::probe::PhysicsProbe;
use crate::runtime::IkState;
use crate::settings::IkSettings;

/// How feet are placed.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeetLocationMethod {
    None,
    /// Raycast straight down from the animated foot.
    #[default]
    ProjectDown,
    /// Find a surface ahead of the foot first, then project down.
    ProjectForwardAndDown,
    /// Snap to the nearest target.
    LockToTarget,
}

/// How hands are placed.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HandLocationMethod {
    #[default]
    None,
    /// Press against a surface ahead of the hand.
    ProjectForward,
    /// Snap to the nearest target.
    LockToTarget,
}

/// Animation-curve weights, supplied every frame by the animation layer.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IkWeights {
    pub left_foot: f32,
    pub right_foot: f32,
    pub left_hand: f32,
    pub right_hand: f32,
    /// Forward shift of the body offset.
    pub body_forward: f32,
}

/// Animated limb positions in world space, supplied by the animation layer.
#[derive(Reflect, Debug, Clone, Copy, PartialEq, Default)]
pub struct IkLimbs {
    pub left_foot: Vec3,
    pub right_foot: Vec3,
    pub left_hand: Vec3,
    pub right_hand: Vec3,
}

/// A solved placement for one limb.
#[derive(Reflect, Debug, Clone, Copy, PartialEq)]
pub struct IkGoal {
    pub position: Vec3,
    pub rotation: Option<Quat>,
    pub weight: f32,
}

/// Per-character IK inputs and outputs.
#[derive(Component, Reflect, Debug, Clone, PartialEq, Default)]
#[reflect(Component)]
pub struct IkRig {
    // === Inputs ===
    pub weights: IkWeights,
    pub limbs: IkLimbs,
    /// Lock-to-target candidates, gathered from the target parent.
    pub targets: Vec<Vec3>,

    // === Outputs ===
    pub left_foot: Option<IkGoal>,
    pub right_foot: Option<IkGoal>,
    pub left_hand: Option<IkGoal>,
    pub right_hand: Option<IkGoal>,
    /// Offset to apply to the whole body.
    pub body_offset: Vec3,
}

impl IkRig {
    fn clear_outputs(&mut self) {
        self.left_foot = None;
        self.right_foot = None;
        self.left_hand = None;
        self.right_hand = None;
        self.body_offset = Vec3::ZERO;
    }

    fn closest_target(&self, point: Vec3) -> Option<Vec3> {
        self.targets
            .iter()
            .copied()
            .min_by(|a, b| a.distance_squared(point).total_cmp(&b.distance_squared(point)))
    }
}

/// Visual frame of the character the limbs belong to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IkFrame {
    pub rotation: Quat,
    pub height: f32,
}

impl IkFrame {
    fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }
}

/// Solve one IK pass.
pub fn solve_ik(
    probe: &dyn PhysicsProbe,
    settings: &IkSettings,
    layers: u32,
    state: &IkState,
    frame: IkFrame,
    rig: &mut IkRig,
) {
    rig.clear_outputs();
    if !settings.enabled {
        return;
    }
    let filter = ProbeFilter::new(layers);
    let weights = rig.weights;
    let limbs = rig.limbs;

    match state.feet_method {
        FeetLocationMethod::None => {}
        FeetLocationMethod::ProjectDown => {
            project_feet_down(probe, settings, filter, frame, rig, limbs.left_foot, limbs.right_foot);
        }
        FeetLocationMethod::ProjectForwardAndDown => {
            let left = project_forward(probe, settings, filter, frame, limbs.left_foot, settings.foot_length);
            let right = project_forward(probe, settings, filter, frame, limbs.right_foot, settings.foot_length);
            project_feet_down(probe, settings, filter, frame, rig, left, right);
        }
        FeetLocationMethod::LockToTarget => {
            rig.left_foot = rig.closest_target(limbs.left_foot).map(|position| IkGoal {
                position,
                rotation: settings.feet_rotation.then_some(frame.rotation),
                weight: weights.left_foot,
            });
            rig.right_foot = rig.closest_target(limbs.right_foot).map(|position| IkGoal {
                position,
                rotation: settings.feet_rotation.then_some(frame.rotation),
                weight: weights.right_foot,
            });
        }
    }

    match state.hand_method {
        HandLocationMethod::None => {}
        HandLocationMethod::ProjectForward => {
            rig.left_hand = Some(project_hand(probe, settings, filter, frame, limbs.left_hand, weights.left_hand));
            rig.right_hand = Some(project_hand(probe, settings, filter, frame, limbs.right_hand, weights.right_hand));
        }
        HandLocationMethod::LockToTarget => {
            rig.left_hand = rig.closest_target(limbs.left_hand).map(|position| IkGoal {
                position,
                rotation: settings.hand_rotation.then_some(frame.rotation),
                weight: weights.left_hand,
            });
            rig.right_hand = rig.closest_target(limbs.right_hand).map(|position| IkGoal {
                position,
                rotation: settings.hand_rotation.then_some(frame.rotation),
                weight: weights.right_hand,
            });
        }
    }
}

/// Push `point` onto a surface ahead of it, backed off by `offset`.
fn project_forward(
    probe: &dyn PhysicsProbe,
    settings: &IkSettings,
    filter: ProbeFilter,
    frame: IkFrame,
    point: Vec3,
    offset: f32,
) -> Vec3 {
    let forward = frame.forward();
    match probe.raycast(
        point - forward,
        forward,
        settings.forward_projection_distance + 1.0,
        filter,
    ) {
        Some(hit) => hit.point - forward * offset,
        None => point,
    }
}

fn project_feet_down(
    probe: &dyn PhysicsProbe,
    settings: &IkSettings,
    filter: ProbeFilter,
    frame: IkFrame,
    rig: &mut IkRig,
    left: Vec3,
    right: Vec3,
) {
    let weights = rig.weights;
    let forward = frame.forward();
    let drop_foot = |foot: Vec3, weight: f32| -> (Option<IkGoal>, f32) {
        let Some(hit) = probe.raycast(
            foot + Vec3::Y * frame.height,
            Vec3::NEG_Y,
            frame.height + settings.foot_height + settings.body_drop_factor,
            filter,
        ) else {
            return (None, 0.0);
        };
        let length = (foot.y - hit.point.y).abs() * weight;
        if length > settings.body_drop_limit {
            return (None, 0.0);
        }
        let goal = IkGoal {
            position: hit.point + Vec3::Y * settings.foot_height,
            rotation: settings
                .feet_rotation
                .then(|| look_rotation(forward, hit.normal)),
            weight,
        };
        (Some(goal), length)
    };

    let (left_goal, left_length) = drop_foot(left, weights.left_foot);
    let (right_goal, right_length) = drop_foot(right, weights.right_foot);
    rig.left_foot = left_goal;
    rig.right_foot = right_goal;

    rig.body_offset = Vec3::NEG_Y * left_length.max(right_length) * settings.body_offset_multiplier
        + Vec3::Y
            * (settings.foot_height
                + settings.body_offset * weights.left_foot * weights.right_foot)
        + forward * weights.body_forward;
}

fn project_hand(
    probe: &dyn PhysicsProbe,
    settings: &IkSettings,
    filter: ProbeFilter,
    frame: IkFrame,
    hand: Vec3,
    weight: f32,
) -> IkGoal {
    let forward = frame.forward();
    let projected = project_forward(probe, settings, filter, frame, hand, settings.hand_thickness);

    let Some(hit) = probe.raycast(
        projected - forward * (settings.hand_thickness + 0.1),
        forward,
        1.0,
        filter,
    ) else {
        return IkGoal {
            position: projected,
            rotation: None,
            weight,
        };
    };
    // A surface behind the projected hand means it clips through; pin it fully.
    let behind = (hit.point - projected).dot(forward) < 0.0;
    IkGoal {
        position: hit.point - forward * settings.hand_thickness,
        rotation: settings
            .hand_rotation
            .then(|| look_rotation(Vec3::Y, hit.normal)),
        weight: if behind { 1.0 } else { weight },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::layers;
    use crate::probe::testing::MockWorld;

    fn frame() -> IkFrame {
        IkFrame {
            rotation: Quat::IDENTITY,
            height: 2.0,
        }
    }

    fn rig_with_feet(left: Vec3, right: Vec3) -> IkRig {
        IkRig {
            weights: IkWeights {
                left_foot: 1.0,
                right_foot: 1.0,
                left_hand: 0.5,
                right_hand: 0.5,
                body_forward: 0.0,
            },
            limbs: IkLimbs {
                left_foot: left,
                right_foot: right,
                ..default()
            },
            ..default()
        }
    }

    fn state(feet: FeetLocationMethod, hands: HandLocationMethod) -> IkState {
        IkState {
            feet_method: feet,
            hand_method: hands,
            target_parent: None,
        }
    }

    #[test]
    fn feet_follow_uneven_ground() {
        let world = MockWorld::new()
            .with_ground(0.0)
            .with_box(Vec3::new(0.0, 0.0, -1.0), Vec3::new(1.0, 0.1, 1.0));
        let mut rig = rig_with_feet(Vec3::new(-0.2, 0.0, 0.0), Vec3::new(0.2, 0.0, 0.0));
        let settings = IkSettings::default();
        solve_ik(
            &world,
            &settings,
            layers::GROUND,
            &state(FeetLocationMethod::ProjectDown, HandLocationMethod::None),
            frame(),
            &mut rig,
        );
        let left = rig.left_foot.unwrap();
        let right = rig.right_foot.unwrap();
        assert!((left.position.y - settings.foot_height).abs() < 1e-3);
        assert!((right.position.y - (0.1 + settings.foot_height)).abs() < 1e-3);
        // The right foot is raised by 0.1, so the body drops by that much.
        assert!((rig.body_offset.y - (settings.foot_height - 0.1)).abs() < 1e-3);
    }

    #[test]
    fn deep_drops_are_discarded() {
        let world = MockWorld::new().with_ground(-0.5);
        let mut rig = rig_with_feet(Vec3::new(-0.2, 0.0, 0.0), Vec3::new(0.2, 0.0, 0.0));
        solve_ik(
            &world,
            &IkSettings::default(),
            layers::GROUND,
            &state(FeetLocationMethod::ProjectDown, HandLocationMethod::None),
            frame(),
            &mut rig,
        );
        assert!(rig.left_foot.is_none());
        assert!(rig.right_foot.is_none());
    }

    #[test]
    fn disabled_ik_clears_outputs() {
        let world = MockWorld::new().with_ground(0.0);
        let mut rig = rig_with_feet(Vec3::ZERO, Vec3::ZERO);
        rig.body_offset = Vec3::ONE;
        let settings = IkSettings {
            enabled: false,
            ..default()
        };
        solve_ik(
            &world,
            &settings,
            layers::GROUND,
            &state(FeetLocationMethod::ProjectDown, HandLocationMethod::None),
            frame(),
            &mut rig,
        );
        assert_eq!(rig.body_offset, Vec3::ZERO);
        assert!(rig.left_foot.is_none());
    }

    #[test]
    fn lock_to_nearest_target() {
        let world = MockWorld::new();
        let mut rig = rig_with_feet(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        rig.targets = vec![Vec3::new(-1.2, 0.5, 0.0), Vec3::new(1.1, 0.4, 0.0)];
        solve_ik(
            &world,
            &IkSettings::default(),
            layers::GROUND,
            &state(FeetLocationMethod::LockToTarget, HandLocationMethod::None),
            frame(),
            &mut rig,
        );
        assert_eq!(rig.left_foot.unwrap().position, Vec3::new(-1.2, 0.5, 0.0));
        assert_eq!(rig.right_foot.unwrap().position, Vec3::new(1.1, 0.4, 0.0));
    }

    #[test]
    fn hands_press_against_wall() {
        let world = MockWorld::new().with_box(Vec3::new(-2.0, 0.0, 0.5), Vec3::new(2.0, 3.0, 3.0));
        let mut rig = IkRig {
            weights: IkWeights {
                left_hand: 0.3,
                right_hand: 0.3,
                ..default()
            },
            limbs: IkLimbs {
                left_hand: Vec3::new(-0.3, 1.2, 0.2),
                // Buried deep inside the wall.
                right_hand: Vec3::new(0.3, 1.2, 2.5),
                ..default()
            },
            ..default()
        };
        let settings = IkSettings::default();
        solve_ik(
            &world,
            &settings,
            layers::GROUND,
            &state(FeetLocationMethod::None, HandLocationMethod::ProjectForward),
            frame(),
            &mut rig,
        );
        let left = rig.left_hand.unwrap();
        assert!((left.position.z - (0.5 - settings.hand_thickness)).abs() < 1e-3);
        assert_eq!(left.weight, 0.3);
        let right = rig.right_hand.unwrap();
        assert_eq!(right.weight, 1.0, "PROOF: clipping hand is pinned");
        assert!(right.position.z < 2.5);
    }

    #[test]
    fn hands_in_open_air_keep_their_pose() {
        let world = MockWorld::new().with_ground(0.0);
        let hand = Vec3::new(-0.3, 1.2, 0.2);
        let mut rig = IkRig {
            weights: IkWeights {
                left_hand: 0.4,
                right_hand: 0.4,
                ..default()
            },
            limbs: IkLimbs {
                left_hand: hand,
                right_hand: Vec3::new(0.3, 1.2, 0.2),
                ..default()
            },
            ..default()
        };
        solve_ik(
            &world,
            &IkSettings::default(),
            layers::GROUND,
            &state(FeetLocationMethod::None, HandLocationMethod::ProjectForward),
            frame(),
            &mut rig,
        );
        let left = rig
            .left_hand
            .expect("PROOF: a hand with nothing in front still gets a goal");
        assert_eq!(left.position, hand);
        assert_eq!(left.rotation, None);
        assert_eq!(left.weight, 0.4);
        assert!(rig.right_hand.is_some());
    }
}
