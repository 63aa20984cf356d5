//! A minimal quaternion type for head orientations.

use std::fmt::Display;
use std::ops::Mul;

/// A rotation quaternion `w + xi + yj + zk`.
///
/// Orientations arriving from the earbuds are used as-is, so nothing here
/// assumes unit norm: [`Quaternion::inverse`] divides by the squared norm,
/// which makes [`Quaternion::rotate`] a pure rotation for any non-zero
/// quaternion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    /// Scalar part
    pub w: f64,
    /// First vector component
    pub x: f64,
    /// Second vector component
    pub y: f64,
    /// Third vector component
    pub z: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quaternion {
    /// The identity rotation.
    pub const IDENTITY: Quaternion = Quaternion {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Builds a quaternion from its components.
    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// Rotation of `angle` radians about `axis`. The axis does not need to
    /// be normalized, but must not be zero.
    pub fn from_axis_angle(axis: [f64; 3], angle: f64) -> Self {
        let len = (axis[0].powi(2) + axis[1].powi(2) + axis[2].powi(2)).sqrt();
        let (s, c) = (angle / 2.0).sin_cos();
        Self {
            w: c,
            x: axis[0] / len * s,
            y: axis[1] / len * s,
            z: axis[2] / len * s,
        }
    }

    /// Squared norm.
    pub fn norm_squared(&self) -> f64 {
        self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f64 {
        self.norm_squared().sqrt()
    }

    /// The conjugate `w - xi - yj - zk`.
    pub fn conjugate(&self) -> Self {
        Self {
            w: self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }

    /// The multiplicative inverse. Only a unit quaternion's inverse equals
    /// its conjugate.
    pub fn inverse(&self) -> Self {
        let n = self.norm_squared();
        let c = self.conjugate();
        Self {
            w: c.w / n,
            x: c.x / n,
            y: c.y / n,
            z: c.z / n,
        }
    }

    /// Rotates a 3-vector by this quaternion, computing `q v q⁻¹`.
    pub fn rotate(&self, v: [f64; 3]) -> [f64; 3] {
        let p = Quaternion::new(0.0, v[0], v[1], v[2]);
        let r = *self * p * self.inverse();
        [r.x, r.y, r.z]
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Hamilton product.
impl Mul for Quaternion {
    type Output = Quaternion;

    fn mul(self, r: Quaternion) -> Quaternion {
        Quaternion {
            w: self.w * r.w - self.x * r.x - self.y * r.y - self.z * r.z,
            x: self.w * r.x + self.x * r.w + self.y * r.z - self.z * r.y,
            y: self.w * r.y - self.x * r.z + self.y * r.w + self.z * r.x,
            z: self.w * r.z + self.x * r.y - self.y * r.x + self.z * r.w,
        }
    }
}

impl Display for Quaternion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({:.4}, {:.4}i, {:.4}j, {:.4}k)",
            self.w, self.x, self.y, self.z
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn close(a: [f64; 3], b: [f64; 3]) -> bool {
        a.iter().zip(b.iter()).all(|(l, r)| (l - r).abs() < 1e-9)
    }

    #[test]
    fn identity_leaves_vectors_alone() {
        assert!(close(Quaternion::IDENTITY.rotate([1.0, 2.0, 3.0]), [1.0, 2.0, 3.0]));
    }

    #[test]
    fn quarter_turn_about_z() {
        let q = Quaternion::from_axis_angle([0.0, 0.0, 1.0], FRAC_PI_2);
        assert!(close(q.rotate([1.0, 0.0, 0.0]), [0.0, 1.0, 0.0]));
        assert!(close(q.inverse().rotate([1.0, 0.0, 0.0]), [0.0, -1.0, 0.0]));
    }

    #[test]
    fn inverse_of_a_scaled_quaternion_still_rotates() {
        let q = Quaternion::from_axis_angle([0.0, 0.0, 1.0], FRAC_PI_2);
        let scaled = Quaternion::new(q.w * 3.0, q.x * 3.0, q.y * 3.0, q.z * 3.0);
        assert!(close(scaled.rotate([1.0, 0.0, 0.0]), [0.0, 1.0, 0.0]));
        let product = scaled * scaled.inverse();
        assert!((product.w - 1.0).abs() < 1e-12);
        assert!(product.x.abs() < 1e-12);
    }

    #[test]
    fn nan_is_not_finite() {
        assert!(Quaternion::IDENTITY.is_finite());
        assert!(!Quaternion::new(f64::NAN, 0.0, 0.0, 0.0).is_finite());
    }
}
