//! End-to-end scenarios for the rotator pre-positioning geometry.

mod common;

use common::orbit_with_azimuths;
use skywatch::tracker::{AosRotorAngles, aos_rotor_angles, max_rotor_travel, unwrap_az};

#[test]
fn simple_eastward_pass_takes_the_short_side() {
    // AOS az 180, LOS az 200, eastward track: the rotator pre-positions
    // 270 -> 225 -> 180 and the pass sweeps it further from home.
    let orbit = orbit_with_azimuths(&[180.0, 185.0, 190.0, 195.0, 200.0]);
    let AosRotorAngles {
        az_aos,
        az_half,
        el_aos,
    } = aos_rotor_angles(0.15, &orbit).unwrap();
    assert_eq!(az_aos, 180.0);
    assert_eq!(az_half, 225.0);
    assert_eq!(el_aos, 20.0);
}

#[test]
fn northward_crossing_stays_in_range_past_north() {
    // AOS az 350 crossing north eastward: the clockwise approach keeps the
    // whole pass inside [0, 540]; the track loop unwraps to ~370 rather
    // than snapping back to 10.
    let orbit = orbit_with_azimuths(&[350.0, 355.0, 0.0, 5.0, 10.0]);
    let angles = aos_rotor_angles(0.2, &orbit).unwrap();
    assert_eq!(angles.az_aos, 350.0);

    let mut last = angles.az_aos;
    let mut commanded = Vec::new();
    for raw in [350.0, 355.0, 0.0, 5.0, 10.0] {
        last = unwrap_az(raw, last);
        commanded.push(last);
    }
    assert_eq!(commanded, vec![350.0, 355.0, 360.0, 365.0, 370.0]);
    assert!(commanded.iter().all(|az| (0.0..=540.0).contains(az)));
}

#[test]
fn pass_exceeding_travel_both_ways_is_rejected() {
    // A 320-degree clockwise sweep from az 225: 315 degrees of travel
    // clockwise, 275 counter-clockwise. Neither fits.
    let orbit = orbit_with_azimuths(&[225.0, 305.0, 25.0, 105.0, 185.0]);
    let (cw, ccw, _, _) = max_rotor_travel(0.2, &orbit).unwrap();
    assert!(cw > 270.0);
    assert!(ccw > 270.0);
    assert!(aos_rotor_angles(0.2, &orbit).is_err());
}

#[test]
fn rotor_travel_is_direction_aware() {
    // The same azimuth track traversed westward flips the sweep sign and
    // with it the travel costs.
    let orbit = orbit_with_azimuths(&[200.0, 190.0, 180.0]);
    let (cw_east, ccw_east, _, _) = max_rotor_travel(0.1, &orbit).unwrap();
    let (cw_west, ccw_west, _, _) = max_rotor_travel(-0.1, &orbit).unwrap();
    assert_ne!(cw_east, cw_west);
    // Westward from az 200 the pass pulls the rotator further from home.
    assert!(ccw_west > ccw_east);
}

#[test]
fn home_aos_is_a_clockwise_tie() {
    let orbit = orbit_with_azimuths(&[270.0, 275.0, 280.0]);
    let angles = aos_rotor_angles(0.1, &orbit).unwrap();
    assert_eq!(angles.az_aos, 270.0);
    assert_eq!(angles.az_half, 270.0);
}
