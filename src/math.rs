//! Small vector and rotation helpers shared by the movement logic.
//!
//! Interpolation helpers clamp their factor to `[0, 1]`, so callers can feed
//! raw `speed * dt` values without overshooting.

use bevy::prelude::*;

/// Linear interpolation with the factor clamped to `[0, 1]`.
#[inline]
pub fn lerp(from: f32, to: f32, t: f32) -> f32 {
    from + (to - from) * t.clamp(0.0, 1.0)
}

/// Vector interpolation with the factor clamped to `[0, 1]`.
#[inline]
pub fn lerp_vec3(from: Vec3, to: Vec3, t: f32) -> Vec3 {
    from.lerp(to, t.clamp(0.0, 1.0))
}

/// Spherical interpolation with the factor clamped to `[0, 1]`.
#[inline]
pub fn slerp(from: Quat, to: Quat, t: f32) -> Quat {
    from.slerp(to, t.clamp(0.0, 1.0))
}

/// Drops the vertical component.
#[inline]
pub fn flat(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

/// Horizontal distance between two points.
#[inline]
pub fn flat_distance(a: Vec3, b: Vec3) -> f32 {
    flat(a - b).length()
}

/// Absolute vertical distance between two points.
#[inline]
pub fn height_distance(a: Vec3, b: Vec3) -> f32 {
    (a.y - b.y).abs()
}

/// Angle in degrees between the horizontal and a rise of `height` over `forward`.
///
/// Degenerate triangles (either side at or below 1mm) report a flat angle.
pub fn climb_angle(height: f32, forward: f32) -> f32 {
    if forward <= 0.001 || height <= 0.001 {
        return 0.0;
    }
    height.atan2(forward).to_degrees()
}

/// Signed shortest difference between two angles in degrees, in `(-180, 180]`.
pub fn delta_angle(current: f32, target: f32) -> f32 {
    let mut delta = (target - current).rem_euclid(360.0);
    if delta > 180.0 {
        delta -= 360.0;
    }
    delta
}

/// Yaw of a rotation in degrees, measured from +Z toward +X.
pub fn yaw_degrees(rotation: Quat) -> f32 {
    let forward = rotation * Vec3::Z;
    forward.x.atan2(forward.z).to_degrees()
}

/// Rotation containing only the yaw part of `rotation`.
pub fn yaw_only(rotation: Quat) -> Quat {
    Quat::from_rotation_y(yaw_degrees(rotation).to_radians())
}

/// Rotation whose local +Z points along `direction` with +Y kept as close to
/// `up` as possible. Returns identity for a zero direction.
pub fn look_rotation(direction: Vec3, up: Vec3) -> Quat {
    let forward = direction.normalize_or_zero();
    if forward == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    let right = up.cross(forward).normalize_or_zero();
    if right == Vec3::ZERO {
        // Looking straight along `up`: any yaw works, keep pitch only.
        return Quat::from_rotation_arc(Vec3::Z, forward);
    }
    let corrected_up = forward.cross(right);
    Quat::from_mat3(&Mat3::from_cols(right, corrected_up, forward))
}

/// Yaw-only rotation facing `direction` projected onto the horizontal plane.
pub fn look_yaw(direction: Vec3) -> Quat {
    let planar = flat(direction);
    if planar.length_squared() <= f32::EPSILON {
        return Quat::IDENTITY;
    }
    Quat::from_rotation_y(planar.x.atan2(planar.z))
}

/// Rotates `point` around `pivot` by `degrees` about the world Y axis.
pub fn rotate_around_y(point: Vec3, pivot: Vec3, degrees: f32) -> Vec3 {
    Quat::from_rotation_y(degrees.to_radians()) * (point - pivot) + pivot
}

/// Critically damped spring toward `target`, updating `velocity` in place.
///
/// `smooth_time` is roughly the time to reach the target.
pub fn smooth_damp(
    current: Vec3,
    target: Vec3,
    velocity: &mut Vec3,
    smooth_time: f32,
    dt: f32,
) -> Vec3 {
    let smooth_time = smooth_time.max(0.0001);
    let omega = 2.0 / smooth_time;
    let x = omega * dt;
    let exp = 1.0 / (1.0 + x + 0.48 * x * x + 0.235 * x * x * x);
    let change = current - target;
    let temp = (*velocity + omega * change) * dt;
    *velocity = (*velocity - omega * temp) * exp;
    let mut output = target + (change + temp) * exp;

    // Prevent overshooting.
    if (target - current).dot(output - target) > 0.0 {
        output = target;
        *velocity = (output - target) / dt.max(f32::EPSILON);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lerp_clamps_factor() {
        assert_eq!(lerp(0.0, 10.0, 2.0), 10.0);
        assert_eq!(lerp(0.0, 10.0, -1.0), 0.0);
        assert_eq!(lerp(0.0, 10.0, 0.25), 2.5);
    }

    #[test]
    fn climb_angle_degenerate_is_flat() {
        assert_eq!(climb_angle(0.0, 1.0), 0.0);
        assert_eq!(climb_angle(1.0, 0.0), 0.0);
        assert!((climb_angle(1.0, 1.0) - 45.0).abs() < 1e-4);
    }

    #[test]
    fn delta_angle_wraps() {
        assert!((delta_angle(350.0, 10.0) - 20.0).abs() < 1e-4);
        assert!((delta_angle(10.0, 350.0) + 20.0).abs() < 1e-4);
    }

    #[test]
    fn look_rotation_faces_direction() {
        let rotation = look_rotation(Vec3::X, Vec3::Y);
        assert!((rotation * Vec3::Z - Vec3::X).length() < 1e-4);
        assert!((yaw_degrees(rotation) - 90.0).abs() < 1e-3);
    }

    #[test]
    fn rotate_around_pivot() {
        let rotated = rotate_around_y(Vec3::new(0.0, 0.0, 1.0), Vec3::ZERO, 90.0);
        assert!((rotated - Vec3::X).length() < 1e-4);
    }

    #[test]
    fn smooth_damp_converges() {
        let mut velocity = Vec3::ZERO;
        let mut position = Vec3::ZERO;
        for _ in 0..600 {
            position = smooth_damp(position, Vec3::X * 5.0, &mut velocity, 0.1, 1.0 / 60.0);
        }
        assert!((position - Vec3::X * 5.0).length() < 1e-3);
    }
}
