//! Turns a head orientation into the direction of a fixed sound source as
//! heard by the listener.

use crate::quaternion::Quaternion;

/// Floor for the horizontal distance when computing elevation, so a source
/// straight above or below the listener still has a defined angle.
const MIN_HORIZONTAL_DISTANCE: f64 = 1e-6;

/// The world-frame position of the virtual sound source: straight ahead of
/// a listener at rest.
pub const DEFAULT_SOURCE_VECTOR: [f64; 3] = [1.0, 0.0, 0.0];

/// A direction relative to the listener's head, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Direction {
    /// Horizontal angle, counter-clockwise from straight ahead, in (-180, 180]
    pub azimuth: f64,
    /// Vertical angle above the horizontal plane, in [-90, 90]
    pub elevation: f64,
}

impl Direction {
    /// True when both angles are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.azimuth.is_finite() && self.elevation.is_finite()
    }
}

/// Wraps an angle in degrees into (-180, 180].
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    // [-180, 180) so far; the open end belongs to the other side
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}

/// Azimuth and elevation of a head-relative vector.
pub fn vector_direction(v: [f64; 3]) -> Direction {
    let [x, y, z] = v;
    let azimuth = wrap_degrees(y.atan2(x).to_degrees());
    let horizontal = (x * x + y * y).sqrt().max(MIN_HORIZONTAL_DISTANCE);
    let elevation = z.atan2(horizontal).to_degrees();
    Direction { azimuth, elevation }
}

/// Where `world_vector` appears to a listener whose head is rotated by
/// `head`: the vector is rotated by the inverse of the head orientation.
pub fn head_relative_direction(head: &Quaternion, world_vector: [f64; 3]) -> Direction {
    vector_direction(head.inverse().rotate(world_vector))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn identity_looks_straight_ahead() {
        let d = head_relative_direction(&Quaternion::IDENTITY, DEFAULT_SOURCE_VECTOR);
        assert!(approx(d.azimuth, 0.0));
        assert!(approx(d.elevation, 0.0));
    }

    #[test]
    fn azimuth_wraps_past_180() {
        let angle = 190f64.to_radians();
        let d = vector_direction([angle.cos(), angle.sin(), 0.0]);
        assert!((d.azimuth + 170.0).abs() < 1e-6, "{}", d.azimuth);
    }

    #[test]
    fn wrap_range() {
        assert!(approx(wrap_degrees(190.0), -170.0));
        assert!(approx(wrap_degrees(-190.0), 170.0));
        assert!(approx(wrap_degrees(180.0), 180.0));
        assert!(approx(wrap_degrees(-180.0), 180.0));
        assert!(approx(wrap_degrees(540.0), 180.0));
        assert!(approx(wrap_degrees(0.0), 0.0));
        assert!(approx(wrap_degrees(-90.0), -90.0));
    }

    #[test]
    fn turning_left_moves_the_source_right() {
        let head = Quaternion::from_axis_angle([0.0, 0.0, 1.0], 30f64.to_radians());
        let d = head_relative_direction(&head, DEFAULT_SOURCE_VECTOR);
        assert!((d.azimuth + 30.0).abs() < 1e-9);
        assert!(approx(d.elevation, 0.0));
    }

    #[test]
    fn looking_down_raises_the_source() {
        // pitch the nose down by rotating about +y
        let head = Quaternion::from_axis_angle([0.0, 1.0, 0.0], 20f64.to_radians());
        let d = head_relative_direction(&head, DEFAULT_SOURCE_VECTOR);
        assert!((d.elevation - 20.0).abs() < 1e-9, "{}", d.elevation);
        assert!(approx(d.azimuth, 0.0));
    }

    #[test]
    fn straight_up_is_defined() {
        let d = vector_direction([0.0, 0.0, 1.0]);
        assert!(d.is_finite());
        assert!((d.elevation - 90.0).abs() < 1e-3);
    }
}
