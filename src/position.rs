//! Station positions and local frames
use map_3d::{ecef2geodetic, Ellipsoid};
use nalgebra::{Matrix3, Vector3};

/// Station [Position], origin of a local North/East/Up frame.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// ECEF coordinates in meters
    pub(crate) ecef: Vector3<f64>,
    /// Geodetic coordinates (latitude [rad], longitude [rad], altitude [m])
    pub(crate) geodetic: Vector3<f64>,
}

impl Position {
    /// Builds new [Position] from ECEF coordinates expressed in meter.
    pub fn from_ecef(ecef: Vector3<f64>) -> Self {
        let (x, y, z) = (ecef[0], ecef[1], ecef[2]);
        let (lat, lon, h) = ecef2geodetic(x, y, z, Ellipsoid::WGS84);
        Self {
            ecef,
            geodetic: Vector3::new(lat, lon, h),
        }
    }

    /// Returns ECEF coordinates.
    pub fn ecef(&self) -> Vector3<f64> {
        self.ecef
    }

    /// Returns Geodetic coordinates
    /// - latitude [rad]
    /// - longitude [rad]
    /// - altitude above ellipsoid [m]
    pub fn geodetic(&self) -> Vector3<f64> {
        self.geodetic
    }

    /// Rotation from ECEF offsets to local (north, east, up) offsets
    pub fn neu_rotation(&self) -> Matrix3<f64> {
        let (sin_lat, cos_lat) = self.geodetic[0].sin_cos();
        let (sin_lon, cos_lon) = self.geodetic[1].sin_cos();
        Matrix3::new(
            -sin_lat * cos_lon,
            -sin_lat * sin_lon,
            cos_lat,
            -sin_lon,
            cos_lon,
            0.0,
            cos_lat * cos_lon,
            cos_lat * sin_lon,
            sin_lat,
        )
    }

    /// ECEF offset from this [Position] to local NEU offset
    pub fn to_neu(&self, ecef: &Vector3<f64>) -> Vector3<f64> {
        self.neu_rotation() * (ecef - self.ecef)
    }

    /// Local NEU offset to ECEF coordinates
    pub fn from_neu(&self, neu: &Vector3<f64>) -> Vector3<f64> {
        self.ecef + self.neu_rotation().transpose() * neu
    }

    /// Local NEU vector (velocity, offset) rotated to ECEF, origin left aside
    pub fn rotate_neu(&self, neu: &Vector3<f64>) -> Vector3<f64> {
        self.neu_rotation().transpose() * neu
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn neu_round_trip_and_up_axis() {
        let origin = Position::from_ecef(Vector3::new(1_130_773.8, -4_830_253.6, 3_994_704.4));
        let up = origin.from_neu(&Vector3::new(0.0, 0.0, 1.0));
        // going up increases the geocentric radius by ~1 m
        assert!((up.norm() - origin.ecef().norm() - 1.0).abs() < 1E-2);

        let neu = origin.to_neu(&up);
        assert!((neu - Vector3::new(0.0, 0.0, 1.0)).norm() < 1E-9);
    }
}
