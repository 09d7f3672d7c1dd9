//! Linearized similarity (Helmert) transformation
use std::fmt;

use nalgebra::{DMatrix, DVector, Vector3};

/// Milliarcseconds per radian
const MAS_PER_RAD: f64 = 180.0 / std::f64::consts::PI * 3600.0 * 1.0E3;

/// [Helmert] transformation: `x' = x + T + R × x + s.x`,
/// small angle approximation of the 7 parameter similarity transform.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Helmert {
    /// Translation (meters)
    pub translation: Vector3<f64>,
    /// Rotation angles about X, Y, Z (radians)
    pub rotation: Vector3<f64>,
    /// Scale (unitless): 0 means scale factor of 1
    pub scale: f64,
}

impl Helmert {
    /// Number of parameters
    pub fn size(estimate_scale: bool) -> usize {
        if estimate_scale {
            7
        } else {
            6
        }
    }

    /// Builds a [Helmert] from a 6 (no scale) or 7 parameter vector
    /// (tx, ty, tz, rx, ry, rz, [s])
    pub fn from_parameters(x: &DVector<f64>) -> Self {
        Self {
            translation: Vector3::new(x[0], x[1], x[2]),
            rotation: Vector3::new(x[3], x[4], x[5]),
            scale: if x.len() > 6 { x[6] } else { 0.0 },
        }
    }

    /// (tx, ty, tz, rx, ry, rz, s)
    pub fn parameters(&self) -> [f64; 7] {
        [
            self.translation[0],
            self.translation[1],
            self.translation[2],
            self.rotation[0],
            self.rotation[1],
            self.rotation[2],
            self.scale,
        ]
    }

    /// Transforms one position
    pub fn apply(&self, x: &Vector3<f64>) -> Vector3<f64> {
        x + self.translation + self.rotation.cross(x) + x * self.scale
    }

    /// Chains two (small) transformations
    pub fn compose(&self, rhs: &Self) -> Self {
        Self {
            translation: self.translation + rhs.translation,
            rotation: self.rotation + rhs.rotation,
            scale: self.scale + rhs.scale,
        }
    }

    /// Multiplies every parameter by `k`. Used to propagate rates.
    pub fn scaled(&self, k: f64) -> Self {
        Self {
            translation: self.translation * k,
            rotation: self.rotation * k,
            scale: self.scale * k,
        }
    }

    /// Design matrix (3n x 6|7) of the transformation, evaluated at `points`.
    /// Rows are ordered (x0, y0, z0, x1, ...).
    pub fn design_matrix(points: &[Vector3<f64>], estimate_scale: bool) -> DMatrix<f64> {
        let npar = Self::size(estimate_scale);
        let mut a = DMatrix::zeros(3 * points.len(), npar);
        for (i, p) in points.iter().enumerate() {
            let (x, y, z) = (p[0], p[1], p[2]);
            let row = 3 * i;

            a[(row, 0)] = 1.0;
            a[(row, 4)] = z;
            a[(row, 5)] = -y;

            a[(row + 1, 1)] = 1.0;
            a[(row + 1, 3)] = -z;
            a[(row + 1, 5)] = x;

            a[(row + 2, 2)] = 1.0;
            a[(row + 2, 3)] = y;
            a[(row + 2, 4)] = -x;

            if estimate_scale {
                a[(row, 6)] = x;
                a[(row + 1, 6)] = y;
                a[(row + 2, 6)] = z;
            }
        }
        a
    }
}

impl fmt::Display for Helmert {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "T=({:.2}, {:.2}, {:.2})mm R=({:.3}, {:.3}, {:.3})mas s={:.3}ppb",
            self.translation[0] * 1.0E3,
            self.translation[1] * 1.0E3,
            self.translation[2] * 1.0E3,
            self.rotation[0] * MAS_PER_RAD,
            self.rotation[1] * MAS_PER_RAD,
            self.rotation[2] * MAS_PER_RAD,
            self.scale * 1.0E9,
        )
    }
}
