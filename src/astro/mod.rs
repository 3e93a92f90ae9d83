//! Astrodynamics: TLE propagation, pass prediction and orbit interpolation.

pub mod client;
pub mod events;
pub mod geodesy;
pub mod propagator;
pub mod service;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::catalog::DatabaseClient;
use events::{EventKind, find_events};
use geodesy::Observer;
use propagator::Propagator;

pub use client::AstrodynamicsClient;
pub use service::AstrodynamicsService;

/// Samples in an interpolated orbit.
const ORBIT_SAMPLES: usize = 20;
/// The AOS/LOS search window opens slightly before the query time so a pass
/// already in progress is still found.
const SEARCH_LEAD_MINUTES: i64 = 5;
/// Satellites recomputed concurrently per batch.
const RECOMPUTE_BATCH: usize = 50;

/// Instantaneous pointing state of a target relative to the station.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinematicState {
    /// Azimuth east of north, degrees in `[0, 360)`.
    pub az: f64,
    /// Elevation, degrees.
    pub el: f64,
    /// Degrees per second.
    pub az_rate: f64,
    pub el_rate: f64,
    /// Slant range, km.
    pub range: f64,
    /// km/s, positive receding.
    pub range_rate: f64,
    pub time: DateTime<Utc>,
}

/// One horizon event with the state evaluated at its instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PassEvent {
    pub time: DateTime<Utc>,
    pub kinematic_state: KinematicState,
}

/// The AOS/TCA/LOS triple for one pass. All three present and ordered, or
/// whatever subset the search produced (callers treat incomplete as no pass).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMap {
    pub aos: Option<PassEvent>,
    pub tca: Option<PassEvent>,
    pub los: Option<PassEvent>,
}

impl EventMap {
    pub fn is_complete(&self) -> bool {
        self.aos.is_some() && self.tca.is_some() && self.los.is_some()
    }

    pub fn is_ordered(&self) -> bool {
        match (&self.aos, &self.tca, &self.los) {
            (Some(a), Some(t), Some(l)) => a.time < t.time && t.time < l.time,
            _ => false,
        }
    }
}

/// Equally spaced sky-track samples between AOS and LOS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterpolatedOrbit {
    pub az: Vec<f64>,
    pub el: Vec<f64>,
    pub time: Vec<DateTime<Utc>>,
}

impl InterpolatedOrbit {
    pub fn is_empty(&self) -> bool {
        self.az.is_empty()
    }

    pub fn len(&self) -> usize {
        self.az.len()
    }
}

/// One row of a whole-catalog AOS/LOS listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AosLosSummary {
    pub sat_id: String,
    pub aos: DateTime<Utc>,
    pub los: DateTime<Utc>,
}

#[derive(Default)]
struct Caches {
    propagators: HashMap<String, Arc<Propagator>>,
    aos_los: HashMap<String, EventMap>,
    orbits: HashMap<String, InterpolatedOrbit>,
}

impl Caches {
    fn clear(&mut self) {
        self.propagators.clear();
        self.aos_los.clear();
        self.orbits.clear();
    }
}

/// Owner of the propagator/pass/orbit caches and every astrodynamics
/// computation. One coarse mutex serialises cache access; computations touch
/// the cache only through that single lock.
pub struct SpaceTracker {
    observer: Observer,
    min_elevation: f64,
    search_hours: i64,
    db: DatabaseClient,
    caches: Mutex<Caches>,
}

impl SpaceTracker {
    pub fn new(observer: Observer, min_elevation: f64, search_hours: i64, db: DatabaseClient) -> Self {
        Self {
            observer,
            min_elevation,
            search_hours,
            db,
            caches: Mutex::new(Caches::default()),
        }
    }

    async fn propagator_for(
        &self,
        caches: &mut Caches,
        sat_id: &str,
    ) -> Result<Arc<Propagator>> {
        if let Some(prop) = caches.propagators.get(sat_id) {
            return Ok(prop.clone());
        }
        let record = self
            .db
            .query_record(sat_id)
            .await
            .ok_or_else(|| anyhow!("no catalog record for {sat_id}"))?;
        let prop = Arc::new(Propagator::from_tle(sat_id, &record.tle1, &record.tle2)?);
        caches.propagators.insert(sat_id.to_string(), prop.clone());
        Ok(prop)
    }

    pub async fn get_tle(&self, sat_id: &str) -> Result<(String, String)> {
        let mut caches = self.caches.lock().await;
        let prop = self.propagator_for(&mut caches, sat_id).await?;
        let (l1, l2) = prop.tle();
        Ok((l1.to_string(), l2.to_string()))
    }

    /// Kinematic state at `time` (now when omitted). Deterministic for a
    /// fixed TLE and time.
    pub async fn get_kinematic_state(
        &self,
        sat_id: &str,
        time: Option<DateTime<Utc>>,
    ) -> Result<KinematicState> {
        let mut caches = self.caches.lock().await;
        let prop = self.propagator_for(&mut caches, sat_id).await?;
        let time = time.unwrap_or_else(Utc::now);
        prop.kinematic_state(&self.observer, time)
    }

    /// Next AOS/TCA/LOS triple in `[time − 5 min, time + delta_t]`.
    ///
    /// Cached per satellite when queried without an explicit time; only
    /// complete ordered triples are cached.
    pub async fn get_aos_los(
        &self,
        sat_id: &str,
        time: Option<DateTime<Utc>>,
        delta_t_hours: Option<i64>,
    ) -> Result<EventMap> {
        let mut caches = self.caches.lock().await;
        if time.is_none()
            && let Some(cached) = caches.aos_los.get(sat_id)
        {
            return Ok(cached.clone());
        }
        let prop = self.propagator_for(&mut caches, sat_id).await?;
        let base = time.unwrap_or_else(Utc::now);
        let delta_t = delta_t_hours.unwrap_or(self.search_hours);
        let map = self.compute_event_map(&prop, base, delta_t);
        if time.is_none() && map.is_complete() {
            caches.aos_los.insert(sat_id.to_string(), map.clone());
        }
        Ok(map)
    }

    /// N-point sky track between AOS and LOS. Empty when either end is
    /// missing or AOS ≥ LOS. Cached when called without explicit ends.
    pub async fn get_interpolated_orbit(
        &self,
        sat_id: &str,
        aos: Option<DateTime<Utc>>,
        los: Option<DateTime<Utc>>,
    ) -> Result<InterpolatedOrbit> {
        let mut caches = self.caches.lock().await;
        let explicit = aos.is_some() || los.is_some();
        if !explicit
            && let Some(cached) = caches.orbits.get(sat_id)
        {
            return Ok(cached.clone());
        }
        let prop = self.propagator_for(&mut caches, sat_id).await?;

        let (aos, los) = if let (Some(aos), Some(los)) = (aos, los) {
            (Some(aos), Some(los))
        } else {
            let map = match caches.aos_los.get(sat_id) {
                Some(map) => map.clone(),
                None => {
                    let map = self.compute_event_map(&prop, Utc::now(), self.search_hours);
                    if map.is_complete() {
                        caches.aos_los.insert(sat_id.to_string(), map.clone());
                    }
                    map
                }
            };
            (
                map.aos.map(|e| e.time),
                map.los.map(|e| e.time),
            )
        };

        let orbit = self.compute_orbit(&prop, aos, los);
        if !explicit {
            caches.orbits.insert(sat_id.to_string(), orbit.clone());
        }
        Ok(orbit)
    }

    /// Clear every cache and recompute the pass and orbit of every catalog
    /// satellite. Per-satellite failures are logged and skipped.
    pub async fn recompute_all(&self) -> Result<usize> {
        let mut caches = self.caches.lock().await;
        self.recompute_into(&mut caches).await
    }

    /// All cached AOS/LOS pairs with AOS inside `[start, end]`, ascending by
    /// AOS. Triggers a full recompute when the cache is empty.
    pub async fn get_all_aos_los(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AosLosSummary>> {
        let mut caches = self.caches.lock().await;
        if caches.aos_los.is_empty() {
            self.recompute_into(&mut caches).await?;
        }
        let mut rows: Vec<AosLosSummary> = caches
            .aos_los
            .iter()
            .filter_map(|(sat_id, map)| {
                let aos = map.aos.as_ref()?.time;
                let los = map.los.as_ref()?.time;
                (start <= aos && aos <= end).then(|| AosLosSummary {
                    sat_id: sat_id.clone(),
                    aos,
                    los,
                })
            })
            .collect();
        rows.sort_by_key(|r| r.aos);
        Ok(rows)
    }

    async fn recompute_into(&self, caches: &mut Caches) -> Result<usize> {
        caches.clear();
        let sat_ids = self
            .db
            .get_satellite_ids()
            .await
            .ok_or_else(|| anyhow!("database unavailable for recompute"))?;
        let total = sat_ids.len();
        let now = Utc::now();
        let mut computed = 0usize;

        for (batch_index, batch) in sat_ids.chunks(RECOMPUTE_BATCH).enumerate() {
            info!(
                "Recomputing orbits: batch {} ({} of {} satellites)",
                batch_index + 1,
                batch_index * RECOMPUTE_BATCH + batch.len(),
                total
            );
            let records = join_all(batch.iter().map(|id| self.db.query_record(id))).await;
            for (sat_id, record) in batch.iter().zip(records) {
                let Some(record) = record else {
                    warn!("Recompute: no record for {}; skipping", sat_id);
                    continue;
                };
                let prop = match Propagator::from_tle(sat_id, &record.tle1, &record.tle2) {
                    Ok(prop) => Arc::new(prop),
                    Err(e) => {
                        warn!("Recompute: {:#}; skipping", e);
                        continue;
                    }
                };
                let map = self.compute_event_map(&prop, now, self.search_hours);
                caches.propagators.insert(sat_id.clone(), prop.clone());
                if map.is_ordered() {
                    let aos = map.aos.map(|e| e.time);
                    let los = map.los.map(|e| e.time);
                    let orbit = self.compute_orbit(&prop, aos, los);
                    caches.aos_los.insert(sat_id.clone(), map);
                    caches.orbits.insert(sat_id.clone(), orbit);
                    computed += 1;
                }
            }
        }
        info!("Recompute complete: {} of {} satellites with passes", computed, total);
        Ok(computed)
    }

    fn compute_event_map(
        &self,
        prop: &Propagator,
        base: DateTime<Utc>,
        delta_t_hours: i64,
    ) -> EventMap {
        let start = base - Duration::minutes(SEARCH_LEAD_MINUTES);
        let end = base + Duration::hours(delta_t_hours);
        let events = find_events(start, end, self.min_elevation, |t| {
            prop.elevation(&self.observer, t).ok()
        });

        let times_of = |kind: EventKind| -> Vec<DateTime<Utc>> {
            events
                .iter()
                .filter(|e| e.kind == kind)
                .map(|e| e.time)
                .collect()
        };
        let aos_times = times_of(EventKind::Aos);
        let tca_times = times_of(EventKind::Tca);
        let los_times = times_of(EventKind::Los);

        // First ordered triple, earliest AOS then TCA then LOS.
        for &aos in &aos_times {
            for &tca in &tca_times {
                if tca <= aos {
                    continue;
                }
                for &los in &los_times {
                    if tca < los {
                        let event_at = |time| -> Option<PassEvent> {
                            prop.kinematic_state(&self.observer, time)
                                .ok()
                                .map(|kinematic_state| PassEvent {
                                    time,
                                    kinematic_state,
                                })
                        };
                        return EventMap {
                            aos: event_at(aos),
                            tca: event_at(tca),
                            los: event_at(los),
                        };
                    }
                }
            }
        }
        EventMap::default()
    }

    fn compute_orbit(
        &self,
        prop: &Propagator,
        aos: Option<DateTime<Utc>>,
        los: Option<DateTime<Utc>>,
    ) -> InterpolatedOrbit {
        let (Some(aos), Some(los)) = (aos, los) else {
            return InterpolatedOrbit::default();
        };
        if aos >= los {
            return InterpolatedOrbit::default();
        }
        let interval = (los - aos) / (ORBIT_SAMPLES as i32 - 1);
        let mut orbit = InterpolatedOrbit::default();
        for i in 0..ORBIT_SAMPLES {
            let t = aos + interval * i as i32;
            match prop.kinematic_state(&self.observer, t) {
                Ok(state) => {
                    orbit.az.push(state.az);
                    orbit.el.push(state.el);
                    orbit.time.push(t);
                }
                Err(e) => {
                    warn!("Orbit sample failed: {:#}", e);
                    return InterpolatedOrbit::default();
                }
            }
        }
        orbit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn event_map_ordering() {
        let state = KinematicState {
            az: 0.0,
            el: 0.0,
            az_rate: 0.0,
            el_rate: 0.0,
            range: 1000.0,
            range_rate: 0.0,
            time: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        };
        let at = |minute: u32| PassEvent {
            time: Utc.with_ymd_and_hms(2026, 3, 1, 0, minute, 0).unwrap(),
            kinematic_state: state,
        };
        let map = EventMap {
            aos: Some(at(0)),
            tca: Some(at(5)),
            los: Some(at(10)),
        };
        assert!(map.is_complete());
        assert!(map.is_ordered());

        let unordered = EventMap {
            aos: Some(at(5)),
            tca: Some(at(0)),
            los: Some(at(10)),
        };
        assert!(!unordered.is_ordered());
        assert!(!EventMap::default().is_complete());
    }

    #[test]
    fn empty_orbit_has_no_samples() {
        let orbit = InterpolatedOrbit::default();
        assert!(orbit.is_empty());
        assert_eq!(orbit.len(), 0);
    }
}
