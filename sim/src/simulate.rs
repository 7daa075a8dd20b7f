//! Synthetic request load
//!
//! Stands in for the API layer and timing model: concurrent request tasks
//! emit the same lifecycle events real handlers would. Stream timings are
//! simulated on a virtual clock and carried in each event's timestamp, so a
//! run finishes quickly without distorting TTFT or inter-token figures.
//! With `real-time` set the tasks actually sleep for those gaps.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::events::{EventEmitter, EventPayload, SimEvent};
use crate::observability::Observability;

/// Fallback price per 1k tokens for models missing from the pricing table
const FALLBACK_PRICE_PER_1K: f64 = 0.002;

/// Error responses the simulator can produce: (status, error type, message)
const FAILURES: [(u16, &str, &str); 4] = [
    (429, "rate_limit_error", "Rate limit exceeded"),
    (500, "server_error", "Internal server error"),
    (503, "overloaded_error", "Service temporarily overloaded"),
    (504, "timeout_error", "Upstream generation timed out"),
];

/// Synthetic load settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Total requests to simulate
    pub requests: usize,

    /// Requests in flight at once
    pub concurrency: usize,

    /// Probability a request fails
    #[serde(rename = "error-rate")]
    pub error_rate: f64,

    /// Probability a successful request streams its response
    #[serde(rename = "stream-ratio")]
    pub stream_ratio: f64,

    /// Probability of a prompt cache hit
    #[serde(rename = "cache-hit-rate")]
    pub cache_hit_rate: f64,

    /// Seed for reproducible runs; random when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    pub models: Vec<String>,

    pub endpoints: Vec<String>,

    /// Completion length range, inclusive
    #[serde(rename = "min-tokens")]
    pub min_tokens: u64,
    #[serde(rename = "max-tokens")]
    pub max_tokens: u64,

    /// Mean time to first token in milliseconds
    #[serde(rename = "ttft-ms")]
    pub ttft_ms: f64,

    /// Mean gap between tokens in milliseconds
    #[serde(rename = "inter-token-ms")]
    pub inter_token_ms: f64,

    /// Sleep for simulated durations instead of using a virtual clock
    #[serde(rename = "real-time")]
    pub real_time: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            concurrency: 8,
            error_rate: 0.05,
            stream_ratio: 0.6,
            cache_hit_rate: 0.2,
            seed: None,
            models: vec![
                "gpt-4".to_string(),
                "gpt-3.5-turbo".to_string(),
                "claude-3-haiku".to_string(),
            ],
            endpoints: vec!["/v1/chat/completions".to_string(), "/v1/messages".to_string()],
            min_tokens: 8,
            max_tokens: 64,
            ttft_ms: 150.0,
            inter_token_ms: 25.0,
            real_time: false,
        }
    }
}

/// Outcome of a simulation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub requests: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub streamed: usize,
    pub tokens: u64,
    pub elapsed_ms: u64,
}

/// Everything decided about one request before it runs
#[derive(Debug, Clone)]
struct RequestPlan {
    request_id: String,
    endpoint: String,
    model: String,
    cache_key: String,
    cache_hit: bool,
    prompt_tokens: u64,
    outcome: PlannedOutcome,
}

#[derive(Debug, Clone)]
enum PlannedOutcome {
    Failure { status_code: u16, error_type: &'static str, message: &'static str },
    Complete { tokens: u64, latency_ms: f64, cost: f64 },
    Stream { ttft_ms: f64, gaps_ms: Vec<f64>, cost: f64 },
}

impl PlannedOutcome {
    fn tokens(&self) -> u64 {
        match self {
            PlannedOutcome::Failure { .. } => 0,
            PlannedOutcome::Complete { tokens, .. } => *tokens,
            PlannedOutcome::Stream { gaps_ms, .. } => gaps_ms.len() as u64 + 1,
        }
    }
}

fn validate(config: &SimulationConfig) -> Result<()> {
    let probabilities = [
        ("error-rate", config.error_rate),
        ("stream-ratio", config.stream_ratio),
        ("cache-hit-rate", config.cache_hit_rate),
    ];
    for (name, value) in probabilities {
        if !(0.0..=1.0).contains(&value) {
            eyre::bail!("{} must be between 0 and 1, got {}", name, value);
        }
    }
    if config.models.is_empty() || config.endpoints.is_empty() {
        eyre::bail!("simulation needs at least one model and one endpoint");
    }
    if config.min_tokens == 0 || config.min_tokens > config.max_tokens {
        eyre::bail!(
            "token range must satisfy 0 < min-tokens <= max-tokens, got {}..={}",
            config.min_tokens,
            config.max_tokens
        );
    }
    let timings = [config.ttft_ms, config.inter_token_ms];
    if timings.iter().any(|t| !t.is_finite() || *t < 0.0) {
        eyre::bail!("ttft-ms and inter-token-ms must be non-negative");
    }
    Ok(())
}

/// Jitter a mean uniformly within +/- 50%
fn jitter(rng: &mut StdRng, mean: f64) -> f64 {
    mean * rng.random_range(0.5..=1.5)
}

fn plan_request(index: usize, seed: u64, config: &SimulationConfig, observability: &Observability) -> RequestPlan {
    // Per-request RNG keeps a seeded run identical regardless of task scheduling
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(index as u64));
    let endpoint = config.endpoints[rng.random_range(0..config.endpoints.len())].clone();
    let model = config.models[rng.random_range(0..config.models.len())].clone();
    let prompt_tokens = rng.random_range(16..=512);
    let cache_key = format!("prompt-{:04}", rng.random_range(0..64u32));
    let cache_hit = rng.random_bool(config.cache_hit_rate);

    let outcome = if rng.random_bool(config.error_rate) {
        let (status_code, error_type, message) = FAILURES[rng.random_range(0..FAILURES.len())];
        PlannedOutcome::Failure {
            status_code,
            error_type,
            message,
        }
    } else {
        let tokens = rng.random_range(config.min_tokens..=config.max_tokens);
        let cost = observability
            .cost_tracker()
            .estimate_cost(&model, prompt_tokens, tokens)
            .unwrap_or_else(|| (prompt_tokens + tokens) as f64 / 1000.0 * FALLBACK_PRICE_PER_1K);
        if rng.random_bool(config.stream_ratio) {
            let ttft_ms = jitter(&mut rng, config.ttft_ms);
            let gaps_ms = (1..tokens).map(|_| jitter(&mut rng, config.inter_token_ms)).collect();
            PlannedOutcome::Stream { ttft_ms, gaps_ms, cost }
        } else {
            let latency_ms = jitter(&mut rng, config.ttft_ms) + tokens as f64 * jitter(&mut rng, config.inter_token_ms);
            PlannedOutcome::Complete {
                tokens,
                latency_ms,
                cost,
            }
        }
    };

    RequestPlan {
        request_id: format!("req-{:06}", index),
        endpoint,
        model,
        cache_key,
        cache_hit,
        prompt_tokens,
        outcome,
    }
}

/// Clock for one request: virtual offsets from its start, or real sleeps
struct RequestClock {
    start: DateTime<Utc>,
    elapsed_ms: f64,
    real_time: bool,
}

impl RequestClock {
    fn new(real_time: bool) -> Self {
        Self {
            start: Utc::now(),
            elapsed_ms: 0.0,
            real_time,
        }
    }

    async fn advance(&mut self, ms: f64) -> DateTime<Utc> {
        self.elapsed_ms += ms;
        if self.real_time {
            tokio::time::sleep(Duration::from_secs_f64(ms / 1000.0)).await;
            Utc::now()
        } else {
            // Let other request tasks interleave their events
            tokio::task::yield_now().await;
            self.start + chrono::Duration::microseconds((self.elapsed_ms * 1000.0) as i64)
        }
    }

    fn now(&self) -> DateTime<Utc> {
        if self.real_time {
            Utc::now()
        } else {
            self.start + chrono::Duration::microseconds((self.elapsed_ms * 1000.0) as i64)
        }
    }
}

/// Every event of a request is stamped from its clock
async fn run_request(plan: RequestPlan, emitter: EventEmitter, real_time: bool) {
    debug!(request_id = %plan.request_id, "run_request: called");
    let mut clock = RequestClock::new(real_time);
    let started = clock.now();
    emitter.emit_event(SimEvent::at(
        EventPayload::RequestStarted {
            request_id: plan.request_id.clone(),
            endpoint: plan.endpoint.clone(),
            model: plan.model.clone(),
        },
        started,
    ));
    emitter.emit_event(SimEvent::at(
        EventPayload::CacheHit {
            key: plan.cache_key.clone(),
            hit: plan.cache_hit,
        },
        started,
    ));

    match plan.outcome {
        PlannedOutcome::Failure {
            status_code,
            error_type,
            message,
        } => {
            emitter.emit_event(SimEvent::at(
                EventPayload::ErrorOccurred {
                    endpoint: plan.endpoint.clone(),
                    status_code,
                    error_type: error_type.to_string(),
                    message: message.to_string(),
                },
                started,
            ));
            emitter.emit_event(SimEvent::at(
                EventPayload::RequestFailed {
                    request_id: plan.request_id.clone(),
                    endpoint: plan.endpoint.clone(),
                    error_type: error_type.to_string(),
                    status_code,
                },
                started,
            ));
        }
        PlannedOutcome::Complete {
            tokens,
            latency_ms,
            cost,
        } => {
            let done = clock.advance(latency_ms).await;
            emitter.emit_event(SimEvent::at(
                EventPayload::LatencyMeasured {
                    endpoint: plan.endpoint.clone(),
                    latency_ms,
                },
                done,
            ));
            emitter.emit_event(SimEvent::at(
                EventPayload::CostCalculated {
                    model: plan.model.clone(),
                    cost,
                    tokens: plan.prompt_tokens + tokens,
                },
                done,
            ));
            emitter.emit_event(SimEvent::at(
                EventPayload::RequestCompleted {
                    request_id: plan.request_id.clone(),
                    endpoint: plan.endpoint.clone(),
                    latency_ms,
                    tokens,
                },
                done,
            ));
        }
        PlannedOutcome::Stream { ttft_ms, gaps_ms, cost } => {
            let stream_id = format!("stream-{}", plan.request_id);
            let tokens = gaps_ms.len() as u64 + 1;
            emitter.emit_event(SimEvent::at(
                EventPayload::StreamStarted {
                    stream_id: stream_id.clone(),
                },
                clock.now(),
            ));

            let at = clock.advance(ttft_ms).await;
            emitter.emit_event(SimEvent::at(
                EventPayload::FirstTokenGenerated {
                    stream_id: stream_id.clone(),
                    ttft_ms,
                },
                at,
            ));
            for (i, gap) in gaps_ms.iter().enumerate() {
                let at = clock.advance(*gap).await;
                emitter.emit_event(SimEvent::at(
                    EventPayload::StreamingTokenGenerated {
                        stream_id: stream_id.clone(),
                        token_index: i as u64 + 2,
                        inter_token_ms: *gap,
                    },
                    at,
                ));
            }

            let done = clock.now();
            let latency_ms = clock.elapsed_ms;
            emitter.emit_event(SimEvent::at(
                EventPayload::StreamCompleted {
                    stream_id: stream_id.clone(),
                },
                done,
            ));
            emitter.emit_event(SimEvent::at(
                EventPayload::CostCalculated {
                    model: plan.model.clone(),
                    cost,
                    tokens: plan.prompt_tokens + tokens,
                },
                done,
            ));
            emitter.emit_event(SimEvent::at(
                EventPayload::RequestCompleted {
                    request_id: plan.request_id.clone(),
                    endpoint: plan.endpoint.clone(),
                    latency_ms,
                    tokens,
                },
                done,
            ));
        }
    }
}

/// Drive `config.requests` simulated requests through the observability hub
///
/// The hub must already be started. Returns once every request has run and
/// the bus has delivered everything they emitted.
pub async fn run_simulation(observability: &Observability, config: &SimulationConfig) -> Result<SimulationReport> {
    debug!(?config, "run_simulation: called");
    validate(config).context("Invalid simulation config")?;

    let seed = config.seed.unwrap_or_else(rand::random);
    let started = Instant::now();
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut report = SimulationReport {
        seed,
        requests: config.requests,
        ..Default::default()
    };

    let mut handles = Vec::with_capacity(config.requests);
    for index in 0..config.requests {
        let plan = plan_request(index, seed, config, observability);
        match &plan.outcome {
            PlannedOutcome::Failure { .. } => report.failed += 1,
            PlannedOutcome::Stream { .. } => {
                report.succeeded += 1;
                report.streamed += 1;
            }
            PlannedOutcome::Complete { .. } => report.succeeded += 1,
        }
        report.tokens += plan.outcome.tokens();

        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .context("Failed to acquire request slot")?;
        let emitter = observability.emitter();
        let real_time = config.real_time;
        handles.push(tokio::spawn(async move {
            run_request(plan, emitter, real_time).await;
            // Release permit when done
            drop(permit);
        }));
    }

    for result in join_all(handles).await {
        result.context("Simulated request task failed")?;
    }
    observability.wait_idle().await;

    report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(
        seed,
        requests = report.requests,
        failed = report.failed,
        elapsed_ms = report.elapsed_ms,
        "Simulation complete"
    );
    Ok(report)
}
