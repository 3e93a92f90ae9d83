//! Shared fixtures for integration tests.
#![allow(dead_code)] // each test binary uses a different slice of these

use chrono::{DateTime, Duration, TimeZone, Utc};
use skywatch::astro::{InterpolatedOrbit, KinematicState, PassEvent};
use skywatch::task::{Task, build_task};

/// ISS (ZARYA), epoch 2008-09-20.
pub const ISS_TLE1: &str =
    "1 25544U 98067A   08264.51782528 -.00002182  00000-0 -11606-4 0  2927";
pub const ISS_TLE2: &str =
    "2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.72125391563537";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

pub fn pass_event(time: DateTime<Utc>, az: f64, az_rate: f64) -> PassEvent {
    PassEvent {
        time,
        kinematic_state: KinematicState {
            az,
            el: 15.0,
            az_rate,
            el_rate: 0.1,
            range: 1200.0,
            range_rate: -3.5,
            time,
        },
    }
}

/// An orbit whose azimuth track is given explicitly; elevations are flat.
pub fn orbit_with_azimuths(az: &[f64]) -> InterpolatedOrbit {
    InterpolatedOrbit {
        az: az.to_vec(),
        el: vec![20.0; az.len()],
        time: Vec::new(),
    }
}

/// A task with the given satellite and AOS/LOS minutes relative to `t0`.
pub fn task_in_window(sat: &str, aos_min: i64, los_min: i64) -> Task {
    let aos = t0() + Duration::minutes(aos_min);
    let los = t0() + Duration::minutes(los_min);
    let tca = aos + (los - aos) / 2;
    build_task(
        "test",
        sat,
        Some(pass_event(aos, 180.0, 0.2)),
        Some(pass_event(tca, 190.0, 0.2)),
        Some(pass_event(los, 200.0, 0.2)),
        437.8e6,
        orbit_with_azimuths(&[180.0, 190.0, 200.0]),
    )
}
