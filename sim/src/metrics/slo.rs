//! Error budget and SLO tracking
//!
//! Counts are cumulative for the tracker's lifetime. Every status read derives
//! its figures fresh from those counts, so reads never disturb writers'
//! state and two reads with no writes in between agree exactly.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::TrackerError;

/// Slack for floor() against representation error, e.g. 1000 * (1 - 0.999)
const BUDGET_EPSILON: f64 = 1e-9;

/// SLO tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloConfig {
    /// Target success ratio, strictly between 0 and 1
    #[serde(default = "default_target")]
    pub target: f64,

    /// Emit a pattern each time one (endpoint, error type) pair reaches a
    /// multiple of this count. 0 disables detection.
    #[serde(rename = "pattern-threshold", default = "default_pattern_threshold")]
    pub pattern_threshold: u64,

    /// Number of recent errors kept for inspection
    #[serde(rename = "recent-errors", default = "default_recent_errors")]
    pub recent_errors: usize,
}

fn default_target() -> f64 {
    0.999
}

fn default_pattern_threshold() -> u64 {
    10
}

fn default_recent_errors() -> usize {
    100
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            pattern_threshold: default_pattern_threshold(),
            recent_errors: default_recent_errors(),
        }
    }
}

/// Live error budget status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloStatus {
    pub slo: f64,
    pub total_requests: u64,
    pub error_budget_total: u64,
    pub error_budget_consumed: u64,
    pub error_budget_remaining: u64,
    pub current_error_rate: f64,
    pub current_success_rate: f64,
    pub slo_violated: bool,
    pub burn_rate: f64,
    pub endpoint_error_rates: BTreeMap<String, f64>,
}

/// Error counts broken down by status code and error type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorBreakdown {
    pub by_status_code: BTreeMap<u16, u64>,
    pub by_error_type: BTreeMap<String, u64>,
}

/// One recorded error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub status_code: u16,
    pub error_type: String,
    pub message: String,
}

/// A repeated (endpoint, error type) failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub endpoint: String,
    pub error_type: String,
    pub count: u64,
}

impl ErrorPattern {
    /// Compact label, e.g. `/v1/messages:rate_limit`
    pub fn label(&self) -> String {
        format!("{}:{}", self.endpoint, self.error_type)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct EndpointCounts {
    successes: u64,
    errors: u64,
}

#[derive(Debug, Default)]
struct SloState {
    successes: u64,
    errors: u64,
    endpoints: HashMap<String, EndpointCounts>,
    status_codes: HashMap<u16, u64>,
    error_types: HashMap<String, u64>,
    pairs: HashMap<(String, String), u64>,
    recent: VecDeque<ErrorRecord>,
}

/// Error budget tracker
pub struct ErrorMetricsTracker {
    slo: f64,
    pattern_threshold: u64,
    recent_capacity: usize,
    state: RwLock<SloState>,
}

impl ErrorMetricsTracker {
    /// Create a tracker with default pattern and history settings
    pub fn new(slo: f64) -> Result<Self, TrackerError> {
        Self::from_config(&SloConfig {
            target: slo,
            ..Default::default()
        })
    }

    pub fn from_config(config: &SloConfig) -> Result<Self, TrackerError> {
        debug!(?config, "ErrorMetricsTracker::from_config: called");
        // Written this way so NaN is rejected too
        if !(config.target > 0.0 && config.target < 1.0) {
            return Err(TrackerError::InvalidSlo(config.target));
        }
        Ok(Self {
            slo: config.target,
            pattern_threshold: config.pattern_threshold,
            recent_capacity: config.recent_errors,
            state: RwLock::new(SloState::default()),
        })
    }

    pub fn slo(&self) -> f64 {
        self.slo
    }

    fn read(&self) -> RwLockReadGuard<'_, SloState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SloState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a successful request
    pub fn record_success(&self, endpoint: &str) {
        let mut state = self.write();
        state.successes += 1;
        state.endpoints.entry(endpoint.to_string()).or_default().successes += 1;
    }

    /// Record a failed request
    ///
    /// Returns a pattern when this error brings its (endpoint, error type)
    /// count to a multiple of the configured threshold.
    pub fn record_error(
        &self,
        endpoint: &str,
        status_code: u16,
        error_type: &str,
        message: &str,
    ) -> Option<ErrorPattern> {
        debug!(%endpoint, status_code, %error_type, "ErrorMetricsTracker::record_error: called");
        let mut state = self.write();
        state.errors += 1;
        state.endpoints.entry(endpoint.to_string()).or_default().errors += 1;
        *state.status_codes.entry(status_code).or_default() += 1;
        *state.error_types.entry(error_type.to_string()).or_default() += 1;

        if self.recent_capacity > 0 {
            if state.recent.len() == self.recent_capacity {
                state.recent.pop_front();
            }
            state.recent.push_back(ErrorRecord {
                timestamp: Utc::now(),
                endpoint: endpoint.to_string(),
                status_code,
                error_type: error_type.to_string(),
                message: message.to_string(),
            });
        }

        let count = {
            let pair = state
                .pairs
                .entry((endpoint.to_string(), error_type.to_string()))
                .or_default();
            *pair += 1;
            *pair
        };

        if self.pattern_threshold > 0 && count % self.pattern_threshold == 0 {
            debug!(%endpoint, %error_type, count, "ErrorMetricsTracker::record_error: pattern detected");
            return Some(ErrorPattern {
                endpoint: endpoint.to_string(),
                error_type: error_type.to_string(),
                count,
            });
        }
        None
    }

    /// Current error budget status, derived from lifetime counts
    pub fn get_slo_status(&self) -> SloStatus {
        let state = self.read();
        let total = state.successes + state.errors;
        let allowed_error_rate = 1.0 - self.slo;

        let (current_error_rate, current_success_rate) = if total == 0 {
            (0.0, 1.0)
        } else {
            (
                state.errors as f64 / total as f64,
                state.successes as f64 / total as f64,
            )
        };

        let error_budget_total = (total as f64 * allowed_error_rate + BUDGET_EPSILON).floor() as u64;
        let burn_rate = if state.errors == 0 {
            0.0
        } else {
            current_error_rate / allowed_error_rate
        };

        let endpoint_error_rates = state
            .endpoints
            .iter()
            .map(|(endpoint, counts)| {
                let requests = counts.successes + counts.errors;
                let rate = if requests == 0 {
                    0.0
                } else {
                    counts.errors as f64 / requests as f64
                };
                (endpoint.clone(), rate)
            })
            .collect();

        SloStatus {
            slo: self.slo,
            total_requests: total,
            error_budget_total,
            error_budget_consumed: state.errors,
            error_budget_remaining: error_budget_total.saturating_sub(state.errors),
            current_error_rate,
            current_success_rate,
            slo_violated: current_success_rate < self.slo,
            burn_rate,
            endpoint_error_rates,
        }
    }

    /// Error counts by status code and error type
    pub fn error_breakdown(&self) -> ErrorBreakdown {
        let state = self.read();
        ErrorBreakdown {
            by_status_code: state.status_codes.iter().map(|(k, v)| (*k, *v)).collect(),
            by_error_type: state.error_types.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }

    /// Most recent errors, newest first
    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorRecord> {
        self.read().recent.iter().rev().take(limit).cloned().collect()
    }

    /// Clear all counts
    pub fn reset(&self) {
        *self.write() = SloState::default();
        info!(slo = self.slo, "ErrorMetricsTracker reset");
    }
}
