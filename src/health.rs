//! Health Probe: issues a GET against an agent's health endpoint and classifies the
//! outcome, plus the health-score weighted moving average derived from a rolling
//! window of outcomes.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::HealthError;

/// Default number of samples the health score's weighted moving average considers.
pub const DEFAULT_SCORE_WINDOW: usize = 10;
/// Default `health_score` at/below which an agent is considered unhealthy.
pub const DEFAULT_UNHEALTHY_THRESHOLD: u8 = 30;
/// Default number of consecutive unhealthy samples required to transition to `Degraded`.
pub const DEFAULT_SUSTAINED_DURATION: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthOutcome {
    Healthy,
    Degraded,
    Unreachable,
    InvalidResponse,
}

impl HealthOutcome {
    /// The point value an outcome contributes to the weighted moving average.
    fn score(self) -> f64 {
        match self {
            HealthOutcome::Healthy => 100.0,
            HealthOutcome::Degraded => 50.0,
            HealthOutcome::InvalidResponse => 25.0,
            HealthOutcome::Unreachable => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthSample {
    pub timestamp: SystemTime,
    pub outcome: HealthOutcome,
    pub latency: Duration,
    pub body: Option<String>,
}

/// Body shape the probe attempts to parse from a 2xx response; both fields are optional
/// so a bare `200 OK` with no body, or `{}`, still counts as `Healthy`.
#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    healthy: Option<bool>,
}

/// A minimal synchronous HTTP GET seam so the probe thread never needs an async
/// runtime, and so unit tests can substitute a mock without opening a socket.
pub trait HealthHttpClient: Send + Sync {
    fn get(&self, url: &Url, timeout: Duration) -> Result<HttpProbeResponse, HealthError>;
}

pub struct HttpProbeResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Real [`HealthHttpClient`] backed by a blocking `reqwest::Client`.
pub struct ReqwestHealthClient {
    client: reqwest::blocking::Client,
}

impl ReqwestHealthClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::builder()
                .build()
                .expect("default reqwest client configuration is always valid"),
        }
    }
}

impl Default for ReqwestHealthClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthHttpClient for ReqwestHealthClient {
    fn get(&self, url: &Url, timeout: Duration) -> Result<HttpProbeResponse, HealthError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .map_err(|err| {
                if err.is_timeout() || err.is_connect() {
                    HealthError::Unreachable(err.to_string())
                } else {
                    HealthError::InvalidResponse(err.to_string())
                }
            })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|err| HealthError::InvalidResponse(err.to_string()))?
            .to_vec();
        Ok(HttpProbeResponse { status, body })
    }
}

/// Classifies a completed (or failed) probe into a [`HealthOutcome`], per §4.3's table.
/// `consecutive_http_failures` is the running count of consecutive 4xx/5xx responses
/// for this agent, used to distinguish transient `Degraded` from sustained `Unreachable`.
pub fn classify(
    result: &Result<HttpProbeResponse, HealthError>,
    consecutive_http_failures: u32,
) -> (HealthOutcome, Option<String>) {
    match result {
        Err(HealthError::Unreachable(_)) | Err(HealthError::Timeout) => {
            (HealthOutcome::Unreachable, None)
        }
        Err(HealthError::InvalidResponse(msg)) => (HealthOutcome::InvalidResponse, Some(msg.clone())),
        Ok(response) if (200..300).contains(&response.status) => {
            classify_2xx_body(&response.body)
        }
        Ok(response) => {
            let body = String::from_utf8_lossy(&response.body).to_string();
            if consecutive_http_failures < 3 {
                (HealthOutcome::Degraded, Some(body))
            } else {
                (HealthOutcome::Unreachable, Some(body))
            }
        }
    }
}

fn classify_2xx_body(body: &[u8]) -> (HealthOutcome, Option<String>) {
    if body.is_empty() {
        return (HealthOutcome::Healthy, None);
    }
    match serde_json::from_slice::<HealthBody>(body) {
        Ok(parsed) => {
            let text = String::from_utf8_lossy(body).to_string();
            match parsed.healthy {
                Some(false) => (HealthOutcome::Degraded, Some(text)),
                _ => (HealthOutcome::Healthy, Some(text)),
            }
        }
        Err(_) => (
            HealthOutcome::InvalidResponse,
            Some(String::from_utf8_lossy(body).to_string()),
        ),
    }
}

/// A bounded history of health samples for one agent, exposing the derived health
/// score and sustained-unhealthy detection that the manager consults for restart
/// decisions.
#[derive(Debug, Clone, Default)]
pub struct HealthHistory {
    samples: VecDeque<HealthSample>,
    window: usize,
    consecutive_http_failures: u32,
}

impl HealthHistory {
    pub fn new(window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window),
            window,
            consecutive_http_failures: 0,
        }
    }

    pub fn consecutive_http_failures(&self) -> u32 {
        self.consecutive_http_failures
    }

    pub fn record_http_status_failure(&mut self) {
        self.consecutive_http_failures += 1;
    }

    pub fn record(&mut self, sample: HealthSample) {
        if !matches!(sample.outcome, HealthOutcome::Degraded | HealthOutcome::Unreachable) {
            self.consecutive_http_failures = 0;
        }
        if self.samples.len() >= self.window.max(1) {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&HealthSample> {
        self.samples.back()
    }

    /// Weighted moving average over the retained window: more recent samples carry
    /// linearly more weight, per §4.3.
    pub fn health_score(&self) -> u8 {
        if self.samples.is_empty() {
            return 100;
        }
        let n = self.samples.len();
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for (i, sample) in self.samples.iter().enumerate() {
            let weight = (i + 1) as f64;
            weighted_sum += weight * sample.outcome.score();
            weight_total += weight;
            let _ = n;
        }
        (weighted_sum / weight_total).round() as u8
    }

    /// True once the last `sustained_duration` samples are all below
    /// `unhealthy_threshold` score — the trigger for a `Degraded` lifecycle transition.
    /// Any non-`Healthy` outcome counts: `unhealthy_threshold`'s default (30) sits below
    /// `Degraded`'s score (50), but a persistently `Degraded` agent is still unhealthy,
    /// so the effective cutoff is never allowed below `Degraded`'s score.
    pub fn is_sustained_unhealthy(&self, unhealthy_threshold: u8, sustained_duration: usize) -> bool {
        if self.samples.len() < sustained_duration {
            return false;
        }
        let cutoff = unhealthy_threshold.max(HealthOutcome::Degraded.score().round() as u8);
        self.samples
            .iter()
            .rev()
            .take(sustained_duration)
            .all(|s| (s.outcome.score().round() as u8) <= cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(outcome: HealthOutcome) -> HealthSample {
        HealthSample {
            timestamp: SystemTime::now(),
            outcome,
            latency: Duration::from_millis(5),
            body: None,
        }
    }

    #[test]
    fn plain_2xx_with_no_body_is_healthy() {
        let response = Ok(HttpProbeResponse { status: 200, body: Vec::new() });
        assert_eq!(classify(&response, 0).0, HealthOutcome::Healthy);
    }

    #[test]
    fn explicit_healthy_false_is_degraded() {
        let response = Ok(HttpProbeResponse {
            status: 200,
            body: br#"{"healthy": false}"#.to_vec(),
        });
        assert_eq!(classify(&response, 0).0, HealthOutcome::Degraded);
    }

    #[test]
    fn unparseable_2xx_body_is_invalid_response() {
        let response = Ok(HttpProbeResponse { status: 200, body: b"not json".to_vec() });
        assert_eq!(classify(&response, 0).0, HealthOutcome::InvalidResponse);
    }

    #[test]
    fn server_error_is_degraded_below_threshold_then_unreachable() {
        let response = Ok(HttpProbeResponse { status: 503, body: Vec::new() });
        assert_eq!(classify(&response, 2).0, HealthOutcome::Degraded);
        assert_eq!(classify(&response, 3).0, HealthOutcome::Unreachable);
    }

    #[test]
    fn connection_failure_is_unreachable() {
        let response = Err(HealthError::Unreachable("connection refused".into()));
        assert_eq!(classify(&response, 0).0, HealthOutcome::Unreachable);
    }

    #[test]
    fn health_score_weighs_recent_samples_more_heavily() {
        let mut history = HealthHistory::new(DEFAULT_SCORE_WINDOW);
        history.record(sample(HealthOutcome::Unreachable));
        history.record(sample(HealthOutcome::Healthy));
        // One old Unreachable (weight 1) and one recent Healthy (weight 2): (1*0 + 2*100)/3.
        assert_eq!(history.health_score(), 67);
    }

    #[test]
    fn empty_history_defaults_to_fully_healthy() {
        assert_eq!(HealthHistory::new(DEFAULT_SCORE_WINDOW).health_score(), 100);
    }

    #[test]
    fn sustained_unhealthy_requires_consecutive_low_scores() {
        let mut history = HealthHistory::new(DEFAULT_SCORE_WINDOW);
        history.record(sample(HealthOutcome::Unreachable));
        history.record(sample(HealthOutcome::Healthy));
        history.record(sample(HealthOutcome::Unreachable));
        assert!(!history.is_sustained_unhealthy(DEFAULT_UNHEALTHY_THRESHOLD, 3));

        let mut history = HealthHistory::new(DEFAULT_SCORE_WINDOW);
        for _ in 0..3 {
            history.record(sample(HealthOutcome::Unreachable));
        }
        assert!(history.is_sustained_unhealthy(DEFAULT_UNHEALTHY_THRESHOLD, 3));
    }

    #[test]
    fn sustained_degraded_counts_as_unhealthy_even_above_the_raw_threshold() {
        let mut history = HealthHistory::new(DEFAULT_SCORE_WINDOW);
        for _ in 0..3 {
            history.record(sample(HealthOutcome::Degraded));
        }
        assert!(history.is_sustained_unhealthy(DEFAULT_UNHEALTHY_THRESHOLD, 3));
    }

    #[test]
    fn ring_buffer_window_evicts_oldest() {
        let mut history = HealthHistory::new(2);
        history.record(sample(HealthOutcome::Unreachable));
        history.record(sample(HealthOutcome::Healthy));
        history.record(sample(HealthOutcome::Healthy));
        // Only the last two (both Healthy) remain.
        assert_eq!(history.health_score(), 100);
    }
}
