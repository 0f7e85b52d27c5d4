//! Radial slide probe.
//!
//! Samples a ring of points around the character, drops each onto the
//! ground and measures how steeply the terrain falls away toward the lowest
//! reachable one. The verdict decides between standing, sliding and falling.

use bevy::prelude::*;

use crate::collision::ProbeFilter;
use crate::math::{climb_angle, flat_distance, rotate_around_y};
use crate::probe::{PhysicsProbe, GROUND_VECTOR_DISTANCE};
use crate::settings::MultiStateSettings;

/// Outcome of a slide probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlideVerdict {
    /// Terrain is shallow enough to stand on.
    None,
    /// Slide toward this ground point.
    Slide(Vec3),
    /// Terrain is too steep to slide on. Carries the lowest point found.
    Fall(Vec3),
}

/// Probe mode, selecting the thresholds to compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideMode {
    /// Not sliding yet: narrow ring, entry and fall thresholds.
    Entry,
    /// Already sliding: wide ring, exit threshold.
    Continuation,
}

/// Run the slide probe around a character.
///
/// `feet` is the body position and `reference` the head-height probe
/// origin. `range` is the ring radius.
pub fn probe_slide(
    probe: &dyn PhysicsProbe,
    settings: &MultiStateSettings,
    feet: Vec3,
    reference: Vec3,
    range: f32,
    mode: SlideMode,
) -> SlideVerdict {
    let slide = &settings.slide;
    let height = settings.body.height;
    let ground = ProbeFilter::new(settings.layers.ground);
    let water = ProbeFilter::with_sensors(settings.layers.water);
    let lift = Vec3::Y * slide.height_offset;

    let checks = slide.checks.max(1);
    let step = 360.0 / checks as f32;
    let start = reference + Vec3::Z * range + Vec3::Y * height;

    let mut lowest: Option<Vec3> = None;
    for i in 0..checks {
        let sample = rotate_around_y(start, reference, step * i as f32);
        let Some(hit) = probe.raycast(sample, Vec3::NEG_Y, GROUND_VECTOR_DISTANCE, ground) else {
            continue;
        };
        let point = Vec3::new(sample.x, hit.point.y, sample.z);
        if point.y > reference.y {
            continue;
        }

        // Submerged ground never makes the character slide.
        if probe.raycast(point, Vec3::Y, height, water).is_some() {
            return SlideVerdict::None;
        }

        if probe.linecast(feet + lift, point + lift, ground).is_some() {
            continue;
        }

        if lowest.map_or(true, |current| point.y < current.y) {
            lowest = Some(point);
        }
    }

    let Some(point) = lowest else {
        return SlideVerdict::None;
    };
    let angle = climb_angle((feet.y - point.y).abs(), flat_distance(reference, point));

    match mode {
        SlideMode::Entry if angle > slide.minimum_fall_angle => SlideVerdict::Fall(point),
        SlideMode::Entry if angle > slide.entry_angle => SlideVerdict::Slide(point),
        SlideMode::Continuation if angle > slide.exit_angle => SlideVerdict::Slide(point),
        _ => SlideVerdict::None,
    }
}
