//! Rise / culminate / set search against a horizon mask.
//!
//! The search samples an elevation function on a coarse grid, then refines
//! horizon crossings by bisection and culminations by ternary search. It is
//! generic over the sampler so tests can drive synthetic profiles and the
//! astrodynamics service can plug in SGP4.

use chrono::{DateTime, Duration, Utc};

/// Coarse sampling step. Short LEO passes last minutes, so thirty seconds
/// cannot step over one.
const SCAN_STEP_SECS: i64 = 30;
/// Refinement stops once the bracketing interval is this small.
const REFINE_TOLERANCE_SECS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Rose above the mask.
    Aos,
    /// Culminated above the mask.
    Tca,
    /// Fell below the mask.
    Los,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizonEvent {
    pub time: DateTime<Utc>,
    pub kind: EventKind,
}

/// Find rise/culminate/set events in `[start, end]` against `min_elevation`.
///
/// The sampler returns `None` when the elevation cannot be evaluated; such
/// samples are skipped, which can suppress events inside the unpropagatable
/// stretch but never invents one.
pub fn find_events<F>(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    min_elevation: f64,
    mut elevation: F,
) -> Vec<HorizonEvent>
where
    F: FnMut(DateTime<Utc>) -> Option<f64>,
{
    let mut samples: Vec<(DateTime<Utc>, f64)> = Vec::new();
    let step = Duration::seconds(SCAN_STEP_SECS);
    let mut t = start;
    while t <= end {
        if let Some(el) = elevation(t) {
            samples.push((t, el));
        }
        t += step;
    }
    if t - step < end
        && let Some(el) = elevation(end)
    {
        samples.push((end, el));
    }

    let mut events = Vec::new();
    for window in samples.windows(2) {
        let (t0, el0) = window[0];
        let (t1, el1) = window[1];
        if el0 < min_elevation && el1 >= min_elevation {
            let time = refine_crossing(t0, t1, min_elevation, true, &mut elevation);
            events.push(HorizonEvent {
                time,
                kind: EventKind::Aos,
            });
        } else if el0 >= min_elevation && el1 < min_elevation {
            let time = refine_crossing(t0, t1, min_elevation, false, &mut elevation);
            events.push(HorizonEvent {
                time,
                kind: EventKind::Los,
            });
        }
    }

    // Interior local maxima above the mask are culminations.
    for i in 1..samples.len().saturating_sub(1) {
        let (_, prev) = samples[i - 1];
        let (t, el) = samples[i];
        let (_, next) = samples[i + 1];
        if el >= prev && el > next && el >= min_elevation {
            let time = refine_maximum(samples[i - 1].0, samples[i + 1].0, &mut elevation)
                .unwrap_or(t);
            events.push(HorizonEvent {
                time,
                kind: EventKind::Tca,
            });
        }
    }

    events.sort_by_key(|e| e.time);
    events
}

/// Bisect a horizon crossing inside `[lo, hi]`. `rising` selects which side
/// of the mask the refined time lands on; the returned instant is always at
/// or above the mask.
fn refine_crossing<F>(
    mut lo: DateTime<Utc>,
    mut hi: DateTime<Utc>,
    min_elevation: f64,
    rising: bool,
    elevation: &mut F,
) -> DateTime<Utc>
where
    F: FnMut(DateTime<Utc>) -> Option<f64>,
{
    while (hi - lo) > Duration::seconds(REFINE_TOLERANCE_SECS) {
        let mid = lo + (hi - lo) / 2;
        let Some(el) = elevation(mid) else {
            break;
        };
        let above = el >= min_elevation;
        if above == rising {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    if rising { hi } else { lo }
}

/// Ternary-search the elevation maximum inside `[lo, hi]`.
fn refine_maximum<F>(
    mut lo: DateTime<Utc>,
    mut hi: DateTime<Utc>,
    elevation: &mut F,
) -> Option<DateTime<Utc>>
where
    F: FnMut(DateTime<Utc>) -> Option<f64>,
{
    while (hi - lo) > Duration::seconds(REFINE_TOLERANCE_SECS) {
        let third = (hi - lo) / 3;
        let m1 = lo + third;
        let m2 = hi - third;
        let e1 = elevation(m1)?;
        let e2 = elevation(m2)?;
        if e1 < e2 {
            lo = m1;
        } else {
            hi = m2;
        }
    }
    Some(lo + (hi - lo) / 2)
}
