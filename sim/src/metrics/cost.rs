//! Cost accounting against periodic budget limits
//!
//! Budgets are observational. Recording a cost never fails because of a
//! budget; crossing a ceiling is reported back to the caller, which may
//! publish it or act on it.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::TrackerError;

/// What a limit measures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BudgetLimitType {
    /// Spend across all models
    TotalSpend,
    /// Spend on one model
    ModelSpend { model: String },
    /// Largest single cost seen in the period
    PerRequestCost,
}

impl BudgetLimitType {
    fn applies_to(&self, model: &str) -> bool {
        match self {
            BudgetLimitType::TotalSpend | BudgetLimitType::PerRequestCost => true,
            BudgetLimitType::ModelSpend { model: scoped } => scoped == model,
        }
    }
}

/// Period over which spend accumulates before resetting, in UTC
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    Daily,
    /// ISO weeks, starting Monday
    Weekly,
    Monthly,
    #[default]
    Lifetime,
}

impl BudgetPeriod {
    /// Start of the period containing `at`; `None` for lifetime budgets
    pub fn start_of(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let date = at.date_naive();
        let start = match self {
            BudgetPeriod::Lifetime => return None,
            BudgetPeriod::Daily => date,
            BudgetPeriod::Weekly => date
                .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
                .unwrap_or(date),
            BudgetPeriod::Monthly => NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date),
        };
        Some(start.and_time(NaiveTime::MIN).and_utc())
    }
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BudgetPeriod::Daily => "daily",
            BudgetPeriod::Weekly => "weekly",
            BudgetPeriod::Monthly => "monthly",
            BudgetPeriod::Lifetime => "lifetime",
        };
        write!(f, "{}", s)
    }
}

/// A configured budget limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetLimit {
    pub name: String,
    #[serde(rename = "limit-type")]
    pub limit_type: BudgetLimitType,
    #[serde(default)]
    pub period: BudgetPeriod,
    pub ceiling: f64,
}

impl BudgetLimit {
    pub fn new(name: impl Into<String>, limit_type: BudgetLimitType, period: BudgetPeriod, ceiling: f64) -> Self {
        Self {
            name: name.into(),
            limit_type,
            period,
            ceiling,
        }
    }
}

/// Per-model token pricing in currency units per 1000 tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    #[serde(rename = "prompt-per-1k")]
    pub prompt_per_1k: f64,
    #[serde(rename = "completion-per-1k")]
    pub completion_per_1k: f64,
}

impl ModelPricing {
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.prompt_per_1k
            + (completion_tokens as f64 / 1000.0) * self.completion_per_1k
    }
}

/// Budget limits and pricing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default)]
    pub limits: Vec<BudgetLimit>,
    #[serde(default = "default_pricing")]
    pub pricing: BTreeMap<String, ModelPricing>,
}

fn default_pricing() -> BTreeMap<String, ModelPricing> {
    [
        ("gpt-4", 0.03, 0.06),
        ("gpt-4o", 0.005, 0.015),
        ("gpt-3.5-turbo", 0.0005, 0.0015),
        ("claude-3-opus", 0.015, 0.075),
        ("claude-3-sonnet", 0.003, 0.015),
        ("claude-3-haiku", 0.00025, 0.00125),
    ]
    .into_iter()
    .map(|(model, prompt_per_1k, completion_per_1k)| {
        (
            model.to_string(),
            ModelPricing {
                prompt_per_1k,
                completion_per_1k,
            },
        )
    })
    .collect()
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            limits: Vec::new(),
            pricing: default_pricing(),
        }
    }
}

/// Signal raised the first time a limit crosses its ceiling within a period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetExceeded {
    pub limit: String,
    pub consumed: f64,
    pub ceiling: f64,
    pub period_start: Option<DateTime<Utc>>,
}

/// Consumption of one limit in its current period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub name: String,
    pub limit_type: BudgetLimitType,
    pub period: BudgetPeriod,
    pub period_start: Option<DateTime<Utc>>,
    pub ceiling: f64,
    pub consumed: f64,
    pub remaining: f64,
    pub exceeded: bool,
}

/// Spend attributed to one model over the tracker's lifetime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    pub cost: f64,
    pub tokens: u64,
    pub requests: u64,
}

/// Lifetime totals plus current budget status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_cost: f64,
    pub total_tokens: u64,
    pub requests: u64,
    pub by_model: BTreeMap<String, ModelCost>,
    pub budgets: Vec<BudgetStatus>,
}

/// Spend for one limit in one period
#[derive(Debug, Clone)]
struct Bucket {
    period_start: Option<DateTime<Utc>>,
    consumed: f64,
    reported: bool,
}

#[derive(Debug, Default)]
struct CostState {
    /// Parallel to `CostTracker::limits`; `None` until the first matching cost
    buckets: Vec<Option<Bucket>>,
    total_cost: f64,
    total_tokens: u64,
    requests: u64,
    by_model: BTreeMap<String, ModelCost>,
}

/// Cost and budget tracker
pub struct CostTracker {
    limits: Vec<BudgetLimit>,
    pricing: BTreeMap<String, ModelPricing>,
    state: Mutex<CostState>,
}

impl CostTracker {
    /// Create a tracker, validating the limits
    pub fn new(limits: Vec<BudgetLimit>) -> Result<Self, TrackerError> {
        Self::from_config(&BudgetConfig {
            limits,
            ..Default::default()
        })
    }

    pub fn from_config(config: &BudgetConfig) -> Result<Self, TrackerError> {
        debug!(limits = config.limits.len(), "CostTracker::from_config: called");
        validate_limits(&config.limits)?;
        Ok(Self {
            limits: config.limits.clone(),
            pricing: config.pricing.clone(),
            state: Mutex::new(CostState {
                buckets: vec![None; config.limits.len()],
                ..Default::default()
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, CostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cost of a request from the pricing table, if the model is priced
    pub fn estimate_cost(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> Option<f64> {
        self.pricing
            .get(model)
            .map(|p| p.cost(prompt_tokens, completion_tokens))
    }

    /// Account a cost against every matching limit
    ///
    /// Returns the limits that crossed their ceiling with this cost. Costs
    /// stamped in a period older than a limit's current bucket still count
    /// toward lifetime totals but not toward that limit.
    pub fn record_cost(&self, model: &str, cost: f64, tokens: u64, timestamp: DateTime<Utc>) -> Vec<BudgetExceeded> {
        debug!(%model, cost, tokens, "CostTracker::record_cost: called");
        if !cost.is_finite() || cost < 0.0 {
            warn!(%model, cost, "CostTracker::record_cost: ignoring invalid cost");
            return Vec::new();
        }

        let mut state = self.lock();
        state.total_cost += cost;
        state.total_tokens += tokens;
        state.requests += 1;
        let entry = state.by_model.entry(model.to_string()).or_default();
        entry.cost += cost;
        entry.tokens += tokens;
        entry.requests += 1;

        let mut exceeded = Vec::new();
        for (limit, slot) in self.limits.iter().zip(state.buckets.iter_mut()) {
            if !limit.limit_type.applies_to(model) {
                continue;
            }

            let period_start = limit.period.start_of(timestamp);
            let bucket = slot.get_or_insert_with(|| Bucket {
                period_start,
                consumed: 0.0,
                reported: false,
            });

            if period_start > bucket.period_start {
                debug!(limit = %limit.name, ?period_start, "CostTracker::record_cost: period rollover");
                *bucket = Bucket {
                    period_start,
                    consumed: 0.0,
                    reported: false,
                };
            } else if period_start < bucket.period_start {
                debug!(limit = %limit.name, %timestamp, "CostTracker::record_cost: cost from a past period");
                continue;
            }

            bucket.consumed = match limit.limit_type {
                BudgetLimitType::PerRequestCost => bucket.consumed.max(cost),
                _ => bucket.consumed + cost,
            };

            if bucket.consumed > limit.ceiling && !bucket.reported {
                bucket.reported = true;
                warn!(
                    limit = %limit.name,
                    consumed = bucket.consumed,
                    ceiling = limit.ceiling,
                    "CostTracker: budget exceeded"
                );
                exceeded.push(BudgetExceeded {
                    limit: limit.name.clone(),
                    consumed: bucket.consumed,
                    ceiling: limit.ceiling,
                    period_start,
                });
            }
        }
        exceeded
    }

    /// Status of a limit as of now
    pub fn check_budget(&self, name: &str) -> Result<BudgetStatus, TrackerError> {
        self.check_budget_at(name, Utc::now())
    }

    /// Status of a limit as of `now`; a bucket from an elapsed period reads as empty
    pub fn check_budget_at(&self, name: &str, now: DateTime<Utc>) -> Result<BudgetStatus, TrackerError> {
        let index = self
            .limits
            .iter()
            .position(|l| l.name == name)
            .ok_or_else(|| TrackerError::UnknownLimit(name.to_string()))?;
        let state = self.lock();
        Ok(self.status_of(index, &state, now))
    }

    fn status_of(&self, index: usize, state: &CostState, now: DateTime<Utc>) -> BudgetStatus {
        let limit = &self.limits[index];
        let period_start = limit.period.start_of(now);
        let consumed = match &state.buckets[index] {
            Some(bucket) if bucket.period_start >= period_start => bucket.consumed,
            _ => 0.0,
        };
        BudgetStatus {
            name: limit.name.clone(),
            limit_type: limit.limit_type.clone(),
            period: limit.period,
            period_start,
            ceiling: limit.ceiling,
            consumed,
            remaining: (limit.ceiling - consumed).max(0.0),
            exceeded: consumed > limit.ceiling,
        }
    }

    /// Lifetime totals and every limit's status as of now
    pub fn summary(&self) -> CostSummary {
        let now = Utc::now();
        let state = self.lock();
        CostSummary {
            total_cost: state.total_cost,
            total_tokens: state.total_tokens,
            requests: state.requests,
            by_model: state.by_model.clone(),
            budgets: (0..self.limits.len())
                .map(|i| self.status_of(i, &state, now))
                .collect(),
        }
    }

    /// Clear all spend
    pub fn reset(&self) {
        let mut state = self.lock();
        *state = CostState {
            buckets: vec![None; self.limits.len()],
            ..Default::default()
        };
        info!("CostTracker reset");
    }
}

fn validate_limits(limits: &[BudgetLimit]) -> Result<(), TrackerError> {
    let mut names = HashSet::new();
    for limit in limits {
        let invalid = |reason: &str| TrackerError::InvalidLimit {
            name: limit.name.clone(),
            reason: reason.to_string(),
        };
        if limit.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if !names.insert(limit.name.as_str()) {
            return Err(invalid("duplicate name"));
        }
        if !limit.ceiling.is_finite() || limit.ceiling < 0.0 {
            return Err(invalid("ceiling must be a finite non-negative number"));
        }
        if let BudgetLimitType::ModelSpend { model } = &limit.limit_type
            && model.trim().is_empty()
        {
            return Err(invalid("model-spend limit needs a model"));
        }
    }
    Ok(())
}
