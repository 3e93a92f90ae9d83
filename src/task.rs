//! Pass tasks: the unit of work the scheduler queues and the orchestrator
//! executes. Tasks are immutable once generated and validated at the
//! generator — the scheduler never sees an invalid one.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::error;
use uuid::Uuid;

use crate::astro::{AstrodynamicsClient, InterpolatedOrbit, PassEvent};
use crate::config::StationConfig;
use crate::radiometrics::RadiometricsClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    LeoTrack,
}

/// Recorder settings for the pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdrParams {
    pub sat_id: String,
    /// Downlink centre frequency, Hz.
    pub freq: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskParameters {
    pub sat_id: String,
    pub aos: Option<PassEvent>,
    pub tca: Option<PassEvent>,
    pub los: Option<PassEvent>,
    pub sdr: SdrParams,
    pub interpolated_orbit: InterpolatedOrbit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub task_type: TaskType,
    pub parameters: TaskParameters,
}

impl Task {
    pub fn aos_time(&self) -> Option<DateTime<Utc>> {
        self.parameters.aos.as_ref().map(|e| e.time)
    }

    pub fn los_time(&self) -> Option<DateTime<Utc>> {
        self.parameters.los.as_ref().map(|e| e.time)
    }

    /// Task validity: `aos < tca < los`, LOS in the future, pass no longer
    /// than `max_pass`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, max_pass: Duration) -> bool {
        let (Some(aos), Some(tca), Some(los)) = (
            self.parameters.aos.as_ref(),
            self.parameters.tca.as_ref(),
            self.parameters.los.as_ref(),
        ) else {
            return false;
        };
        aos.time < tca.time
            && tca.time < los.time
            && los.time > now
            && los.time - aos.time <= max_pass
    }
}

/// Composes astrodynamics and radiometrics answers into a task.
pub struct TaskGenerator {
    astro: AstrodynamicsClient,
    radiometrics: RadiometricsClient,
    source: String,
    max_pass: Duration,
}

impl TaskGenerator {
    pub async fn connect(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let astro = AstrodynamicsClient::connect(config, cancel.clone()).await?;
        let radiometrics = RadiometricsClient::connect(config, cancel.clone()).await?;
        Ok(Self {
            astro,
            radiometrics,
            source: "skywatch".to_string(),
            max_pass: config.max_pass(),
        })
    }

    pub fn astro(&self) -> &AstrodynamicsClient {
        &self.astro
    }

    /// Generate a task for the next pass of `sat_id`. Returns `None` (and
    /// logs why) when the pass cannot be found, has no usable downlink, or
    /// fails validation.
    pub async fn generate(&self, sat_id: &str) -> Option<Task> {
        self.generate_from(sat_id, None).await
    }

    /// Generate a task for the first pass at or after `start_time`.
    pub async fn generate_from(
        &self,
        sat_id: &str,
        start_time: Option<DateTime<Utc>>,
    ) -> Option<Task> {
        let (aos_los, orbit) = match start_time {
            Some(start) => {
                let aos_los = self.astro.get_aos_los_at(sat_id, start).await?;
                let (Some(aos), Some(los)) = (&aos_los.aos, &aos_los.los) else {
                    error!("No pass found for {} from {}", sat_id, start);
                    return None;
                };
                let orbit = self
                    .astro
                    .get_interpolated_orbit_between(sat_id, aos.time, los.time)
                    .await?;
                (aos_los, orbit)
            }
            None => {
                let aos_los = self.astro.get_aos_los(sat_id).await?;
                let orbit = self.astro.get_interpolated_orbit(sat_id).await?;
                (aos_los, orbit)
            }
        };
        let freqs = self.radiometrics.get_downlink_freqs(sat_id).await?;
        let Some(freq) = freqs.first().copied() else {
            error!("No downlink frequencies for {}; task dropped", sat_id);
            return None;
        };

        let task = build_task(
            &self.source,
            sat_id,
            aos_los.aos,
            aos_los.tca,
            aos_los.los,
            freq,
            orbit,
        );

        if task.is_valid_at(Utc::now(), self.max_pass) {
            Some(task)
        } else {
            error!(
                "Generated task {} for {} is invalid (aos {:?}, los {:?}); dropped",
                task.task_id,
                sat_id,
                task.aos_time(),
                task.los_time()
            );
            None
        }
    }

    pub async fn stop(&mut self) {
        self.astro.stop().await;
        self.radiometrics.stop().await;
    }
}

pub fn build_task(
    source: &str,
    sat_id: &str,
    aos: Option<PassEvent>,
    tca: Option<PassEvent>,
    los: Option<PassEvent>,
    freq: f64,
    interpolated_orbit: InterpolatedOrbit,
) -> Task {
    Task {
        task_id: Uuid::new_v4(),
        source: source.to_string(),
        timestamp: Utc::now(),
        task_type: TaskType::LeoTrack,
        parameters: TaskParameters {
            sat_id: sat_id.to_string(),
            aos,
            tca,
            los,
            sdr: SdrParams {
                sat_id: sat_id.to_string(),
                freq,
            },
            interpolated_orbit,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::astro::KinematicState;
    use chrono::TimeZone;

    fn event(time: DateTime<Utc>) -> PassEvent {
        PassEvent {
            time,
            kinematic_state: KinematicState {
                az: 180.0,
                el: 10.0,
                az_rate: 0.1,
                el_rate: 0.1,
                range: 1500.0,
                range_rate: -3.0,
                time,
            },
        }
    }

    fn task_with_window(aos_min: i64, los_min: i64, now: DateTime<Utc>) -> Task {
        build_task(
            "test",
            "25544",
            Some(event(now + Duration::minutes(aos_min))),
            Some(event(now + Duration::minutes((aos_min + los_min) / 2))),
            Some(event(now + Duration::minutes(los_min))),
            145.8e6,
            InterpolatedOrbit::default(),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn ordered_future_pass_is_valid() {
        let task = task_with_window(10, 20, now());
        assert!(task.is_valid_at(now(), Duration::minutes(15)));
    }

    #[test]
    fn pass_entirely_in_the_past_is_invalid() {
        let task = task_with_window(-30, -20, now());
        assert!(!task.is_valid_at(now(), Duration::minutes(15)));
    }

    #[test]
    fn over_long_pass_is_rejected_by_the_configurable_cap() {
        let task = task_with_window(5, 25, now());
        assert!(!task.is_valid_at(now(), Duration::minutes(15)));
        // The same pass is acceptable under a raised cap.
        assert!(task.is_valid_at(now(), Duration::minutes(30)));
    }

    #[test]
    fn missing_events_invalidate() {
        let mut task = task_with_window(10, 20, now());
        task.parameters.tca = None;
        assert!(!task.is_valid_at(now(), Duration::minutes(15)));
        task.parameters.aos = None;
        assert!(!task.is_valid_at(now(), Duration::minutes(15)));
    }

    #[test]
    fn unordered_events_invalidate() {
        let mut task = task_with_window(10, 20, now());
        std::mem::swap(
            &mut task.parameters.aos,
            &mut task.parameters.los,
        );
        assert!(!task.is_valid_at(now(), Duration::minutes(15)));
    }

    #[test]
    fn pass_already_in_progress_is_still_valid() {
        // AOS slightly in the past, LOS ahead: dispatchable.
        let task = task_with_window(-2, 8, now());
        assert!(task.is_valid_at(now(), Duration::minutes(15)));
    }
}
