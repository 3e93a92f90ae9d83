//! TLE propagation to a topocentric kinematic state.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Utc};

use crate::astro::KinematicState;
use crate::astro::geodesy::{self, Observer};

/// Half-width of the finite-difference window used for angular rates.
const RATE_HALF_STEP_MS: i64 = 500;

/// An SGP4 propagator for one catalog object.
pub struct Propagator {
    catalog_id: String,
    tle1: String,
    tle2: String,
    constants: sgp4::Constants,
    epoch: DateTime<Utc>,
}

impl Propagator {
    pub fn from_tle(catalog_id: &str, tle1: &str, tle2: &str) -> Result<Self> {
        let elements = sgp4::Elements::from_tle(None, tle1.as_bytes(), tle2.as_bytes())
            .map_err(|e| anyhow!("invalid TLE for {catalog_id}: {e}"))?;
        let epoch = DateTime::<Utc>::from_naive_utc_and_offset(elements.datetime, Utc);
        let constants = sgp4::Constants::from_elements(&elements)
            .map_err(|e| anyhow!("unpropagatable elements for {catalog_id}: {e}"))?;
        Ok(Self {
            catalog_id: catalog_id.to_string(),
            tle1: tle1.to_string(),
            tle2: tle2.to_string(),
            constants,
            epoch,
        })
    }

    pub fn catalog_id(&self) -> &str {
        &self.catalog_id
    }

    pub fn tle(&self) -> (&str, &str) {
        (&self.tle1, &self.tle2)
    }

    fn look_angles(&self, observer: &Observer, time: DateTime<Utc>) -> Result<geodesy::LookAngles> {
        let minutes = (time - self.epoch).num_milliseconds() as f64 / 60_000.0;
        let prediction = self
            .constants
            .propagate(sgp4::MinutesSinceEpoch(minutes))
            .map_err(|e| anyhow!("propagation failed for {}: {e}", self.catalog_id))?;

        let theta = geodesy::gmst(time);
        let r_ecef = geodesy::teme_to_ecef(prediction.position, theta);
        let v_ecef = geodesy::teme_velocity_to_ecef(prediction.velocity, r_ecef, theta);
        Ok(observer.look_angles(r_ecef, v_ecef))
    }

    /// Elevation of the object at `time`, degrees.
    pub fn elevation(&self, observer: &Observer, time: DateTime<Utc>) -> Result<f64> {
        Ok(self.look_angles(observer, time)?.el)
    }

    /// Full kinematic state at `time`, with angular rates from a central
    /// difference so the azimuth rate is well defined across the north wrap.
    pub fn kinematic_state(
        &self,
        observer: &Observer,
        time: DateTime<Utc>,
    ) -> Result<KinematicState> {
        let now = self.look_angles(observer, time)?;
        let half = Duration::milliseconds(RATE_HALF_STEP_MS);
        let before = self
            .look_angles(observer, time - half)
            .context("rate sample before")?;
        let after = self
            .look_angles(observer, time + half)
            .context("rate sample after")?;
        let dt_secs = 2.0 * RATE_HALF_STEP_MS as f64 / 1000.0;

        Ok(KinematicState {
            az: now.az,
            el: now.el,
            az_rate: geodesy::shortest_angle_diff(after.az, before.az) / dt_secs,
            el_rate: (after.el - before.el) / dt_secs,
            range: now.range,
            range_rate: now.range_rate,
            time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // ISS (ZARYA), epoch 2008-09-20.
    const TLE1: &str =
        "1 25544U 98067A   08264.51782528 -.00002182  00000-0 -11606-4 0  2927";
    const TLE2: &str =
        "2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.72125391563537";

    fn observer() -> Observer {
        Observer::new(20.7464, -156.4305, 103.8)
    }

    #[test]
    fn rejects_malformed_tle() {
        assert!(Propagator::from_tle("bad", "garbage", TLE2).is_err());
    }

    #[test]
    fn state_is_deterministic_for_fixed_tle_and_time() {
        let prop = Propagator::from_tle("25544", TLE1, TLE2).unwrap();
        let t = Utc.with_ymd_and_hms(2008, 9, 20, 14, 0, 0).unwrap();
        let a = prop.kinematic_state(&observer(), t).unwrap();
        let b = prop.kinematic_state(&observer(), t).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn state_is_physically_plausible() {
        let prop = Propagator::from_tle("25544", TLE1, TLE2).unwrap();
        let obs = observer();
        for hour in 0..8 {
            let t = Utc.with_ymd_and_hms(2008, 9, 20, 12 + hour, 0, 0).unwrap();
            let state = prop.kinematic_state(&obs, t).unwrap();
            assert!((0.0..360.0).contains(&state.az), "az {}", state.az);
            assert!((-90.0..=90.0).contains(&state.el), "el {}", state.el);
            // LEO slant ranges from the ground are hundreds to thousands of km.
            assert!(state.range > 300.0 && state.range < 20_000.0, "range {}", state.range);
            assert!(state.range_rate.abs() < 10.0, "range_rate {}", state.range_rate);
        }
    }

    #[test]
    fn rates_are_consistent_with_finite_motion() {
        let prop = Propagator::from_tle("25544", TLE1, TLE2).unwrap();
        let obs = observer();
        let t = Utc.with_ymd_and_hms(2008, 9, 20, 14, 0, 0).unwrap();
        let s0 = prop.kinematic_state(&obs, t).unwrap();
        let s1 = prop
            .kinematic_state(&obs, t + Duration::seconds(10))
            .unwrap();
        let predicted_el = s0.el + s0.el_rate * 10.0;
        // Coarse agreement: the rate should explain most of ten seconds of motion.
        assert!((predicted_el - s1.el).abs() < 1.0);
    }
}
