//! Earth-fixed geometry: time scales, frame rotations and the topocentric
//! transform that turns an inertial satellite state into look angles from the
//! ground station.
//!
//! Conventions: WGS84 ellipsoid, GMST per the IAU 1982 expression, TEME to
//! earth-fixed by a single z-rotation (polar motion is far below the rotator
//! pointing tolerance).

use serde::{Deserialize, Serialize};

/// WGS84 semi-major axis (km).
const WGS84_A_KM: f64 = 6378.137;
/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257223563;
/// Earth rotation rate (rad/s).
const EARTH_OMEGA: f64 = 7.292_115_0e-5;

pub type Vec3 = [f64; 3];

/// Wrap an angle into `[0, 360)`.
pub fn wrap_360(angle_deg: f64) -> f64 {
    angle_deg.rem_euclid(360.0)
}

/// Signed shortest angular difference `a - b` in `(-180, 180]`.
pub fn shortest_angle_diff(a_deg: f64, b_deg: f64) -> f64 {
    let mut diff = (a_deg - b_deg).rem_euclid(360.0);
    if diff > 180.0 {
        diff -= 360.0;
    }
    diff
}

/// Julian date of a UTC instant.
pub fn julian_date(time: chrono::DateTime<chrono::Utc>) -> f64 {
    let unix_seconds =
        time.timestamp() as f64 + f64::from(time.timestamp_subsec_nanos()) * 1e-9;
    unix_seconds / 86_400.0 + 2_440_587.5
}

/// Greenwich mean sidereal time (radians), IAU 1982.
pub fn gmst(time: chrono::DateTime<chrono::Utc>) -> f64 {
    let t = (julian_date(time) - 2_451_545.0) / 36_525.0;
    let seconds = 67_310.548_41
        + (876_600.0 * 3_600.0 + 8_640_184.812_866) * t
        + 0.093_104 * t * t
        - 6.2e-6 * t * t * t;
    let degrees = (seconds.rem_euclid(86_400.0)) / 240.0;
    degrees.to_radians()
}

/// Rotate a TEME vector into the earth-fixed frame at sidereal angle `theta`.
pub fn teme_to_ecef(r: Vec3, theta: f64) -> Vec3 {
    let (sin_t, cos_t) = theta.sin_cos();
    [
        cos_t * r[0] + sin_t * r[1],
        -sin_t * r[0] + cos_t * r[1],
        r[2],
    ]
}

/// Rotate a TEME velocity into the earth-fixed frame, removing the rotation
/// of the frame itself.
pub fn teme_velocity_to_ecef(v: Vec3, r_ecef: Vec3, theta: f64) -> Vec3 {
    let rotated = teme_to_ecef(v, theta);
    [
        rotated[0] + EARTH_OMEGA * r_ecef[1],
        rotated[1] - EARTH_OMEGA * r_ecef[0],
        rotated[2],
    ]
}

/// Look angles and range of a target relative to an observer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LookAngles {
    /// Azimuth east of north, degrees in `[0, 360)`.
    pub az: f64,
    /// Elevation above the horizon, degrees.
    pub el: f64,
    /// Slant range, km.
    pub range: f64,
    /// Range rate, km/s.
    pub range_rate: f64,
}

/// A ground station on the WGS84 ellipsoid.
#[derive(Debug, Clone, Copy)]
pub struct Observer {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
    ecef_km: Vec3,
}

impl Observer {
    pub fn new(latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> Self {
        let phi = latitude_deg.to_radians();
        let lambda = longitude_deg.to_radians();
        let h_km = altitude_m / 1000.0;
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let n = WGS84_A_KM / (1.0 - e2 * phi.sin() * phi.sin()).sqrt();
        let ecef_km = [
            (n + h_km) * phi.cos() * lambda.cos(),
            (n + h_km) * phi.cos() * lambda.sin(),
            (n * (1.0 - e2) + h_km) * phi.sin(),
        ];
        Self {
            latitude_deg,
            longitude_deg,
            altitude_m,
            ecef_km,
        }
    }

    pub fn ecef_km(&self) -> Vec3 {
        self.ecef_km
    }

    /// Look angles toward a satellite with earth-fixed position `r_km` and
    /// velocity `v_km_s`.
    pub fn look_angles(&self, r_km: Vec3, v_km_s: Vec3) -> LookAngles {
        let rho = [
            r_km[0] - self.ecef_km[0],
            r_km[1] - self.ecef_km[1],
            r_km[2] - self.ecef_km[2],
        ];
        let phi = self.latitude_deg.to_radians();
        let lambda = self.longitude_deg.to_radians();
        let (sin_phi, cos_phi) = phi.sin_cos();
        let (sin_lam, cos_lam) = lambda.sin_cos();

        // South-East-Zenith components of the slant vector.
        let s = sin_phi * cos_lam * rho[0] + sin_phi * sin_lam * rho[1] - cos_phi * rho[2];
        let e = -sin_lam * rho[0] + cos_lam * rho[1];
        let z = cos_phi * cos_lam * rho[0] + cos_phi * sin_lam * rho[1] + sin_phi * rho[2];

        let range = (s * s + e * e + z * z).sqrt();
        let el = (z / range).asin().to_degrees();
        let az = wrap_360(e.atan2(-s).to_degrees());
        let range_rate = (rho[0] * v_km_s[0] + rho[1] * v_km_s[1] + rho[2] * v_km_s[2]) / range;

        LookAngles {
            az,
            el,
            range,
            range_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn wrap_360_covers_negative_angles() {
        assert_eq!(wrap_360(0.0), 0.0);
        assert_eq!(wrap_360(360.0), 0.0);
        assert!((wrap_360(-10.0) - 350.0).abs() < 1e-12);
        assert!((wrap_360(725.0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn shortest_diff_takes_the_short_way_around() {
        assert!((shortest_angle_diff(10.0, 350.0) - 20.0).abs() < 1e-12);
        assert!((shortest_angle_diff(350.0, 10.0) + 20.0).abs() < 1e-12);
        assert!((shortest_angle_diff(180.0, 0.0) - 180.0).abs() < 1e-12);
    }

    #[test]
    fn julian_date_of_j2000() {
        let t = chrono::Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        assert!((julian_date(t) - 2_451_545.0).abs() < 1e-9);
    }

    #[test]
    fn gmst_at_j2000_matches_reference() {
        let t = chrono::Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        let expected_deg = 280.460_618_375;
        assert!((gmst(t).to_degrees() - expected_deg).abs() < 1e-6);
    }

    #[test]
    fn observer_on_equator_prime_meridian() {
        let obs = Observer::new(0.0, 0.0, 0.0);
        let ecef = obs.ecef_km();
        assert!((ecef[0] - WGS84_A_KM).abs() < 1e-9);
        assert!(ecef[1].abs() < 1e-9);
        assert!(ecef[2].abs() < 1e-9);
    }

    #[test]
    fn target_straight_up_has_ninety_degree_elevation() {
        let obs = Observer::new(0.0, 0.0, 0.0);
        // 400 km directly above the site, receding radially at 1 km/s.
        let r = [WGS84_A_KM + 400.0, 0.0, 0.0];
        let v = [1.0, 0.0, 0.0];
        let look = obs.look_angles(r, v);
        assert!((look.el - 90.0).abs() < 1e-6);
        assert!((look.range - 400.0).abs() < 1e-6);
        assert!((look.range_rate - 1.0).abs() < 1e-6);
    }

    #[test]
    fn target_due_north_on_horizon() {
        let obs = Observer::new(0.0, 0.0, 0.0);
        // Along +z from an equatorial site: due north, on the horizon.
        let r = [WGS84_A_KM, 0.0, 1000.0];
        let look = obs.look_angles(r, [0.0; 3]);
        assert!((look.az - 0.0).abs() < 1e-6);
        assert!(look.el.abs() < 1e-6);
    }

    #[test]
    fn target_due_east_on_horizon() {
        let obs = Observer::new(0.0, 0.0, 0.0);
        let r = [WGS84_A_KM, 1000.0, 0.0];
        let look = obs.look_angles(r, [0.0; 3]);
        assert!((look.az - 90.0).abs() < 1e-6);
        assert!(look.el.abs() < 1e-6);
    }

    #[test]
    fn teme_rotation_is_orthonormal() {
        let r = [3000.0, -5000.0, 4000.0];
        let rotated = teme_to_ecef(r, 1.234);
        let norm = |v: Vec3| (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        assert!((norm(r) - norm(rotated)).abs() < 1e-9);
        // Zero angle is the identity.
        let same = teme_to_ecef(r, 0.0);
        assert!((same[0] - r[0]).abs() < 1e-12);
        assert!((same[1] - r[1]).abs() < 1e-12);
    }
}
