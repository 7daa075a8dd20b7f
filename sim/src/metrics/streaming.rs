//! Streaming latency tracking (TTFT, inter-token latency, tokens/sec)
//!
//! Each stream accumulates working state from `start_stream` until it is
//! completed or abandoned. Completion folds the stream into a bounded window
//! of [`StreamRecord`]s and drops the working state, so memory is bounded by
//! the window plus whatever is in flight. Streams that stop reporting are
//! expired as abandoned once they have been silent past the stale horizon.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::TrackerError;
use super::stats::Percentiles;

/// Streaming tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Completed streams kept for percentile computation
    #[serde(rename = "window-size", default = "default_window_size")]
    pub window_size: usize,

    /// Active streams silent for longer than this are expired as abandoned
    #[serde(rename = "stale-after-ms", default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

fn default_window_size() -> usize {
    1_000
}

fn default_stale_after_ms() -> u64 {
    300_000
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

/// A finished stream as kept in the window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub stream_id: String,
    /// None when the stream completed without producing a token
    pub ttft_ms: Option<f64>,
    pub inter_token_ms: Vec<f64>,
    pub tokens: u64,
    pub duration_ms: f64,
    pub tokens_per_second: f64,
    pub completed_at: DateTime<Utc>,
}

/// Aggregate view over the window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingStats {
    /// Streams in the window
    pub sample_count: usize,
    pub active_streams: usize,
    /// Streams completed over the tracker's lifetime
    pub completed_total: u64,
    pub abandoned_total: u64,
    pub ttft: Option<Percentiles>,
    pub inter_token: Option<Percentiles>,
    pub tokens_per_second: Option<Percentiles>,
}

#[derive(Debug)]
struct ActiveStream {
    started_at: DateTime<Utc>,
    first_token_at: Option<DateTime<Utc>>,
    last_token_at: Option<DateTime<Utc>>,
    tokens: u64,
    gaps: Vec<f64>,
}

impl ActiveStream {
    fn last_seen(&self) -> DateTime<Utc> {
        self.last_token_at.or(self.first_token_at).unwrap_or(self.started_at)
    }
}

#[derive(Debug, Default)]
struct StreamingState {
    active: HashMap<String, ActiveStream>,
    window: VecDeque<StreamRecord>,
    windowed_ids: HashSet<String>,
    completed_total: u64,
    abandoned_total: u64,
}

impl StreamingState {
    /// Look up a stream in flight, classifying the miss
    fn active_mut(&mut self, stream_id: &str) -> Result<&mut ActiveStream, TrackerError> {
        if self.windowed_ids.contains(stream_id) {
            return Err(TrackerError::StreamAlreadyCompleted(stream_id.to_string()));
        }
        self.active
            .get_mut(stream_id)
            .ok_or_else(|| TrackerError::UnknownStream(stream_id.to_string()))
    }

    /// Remove streams last seen before `cutoff`, counting them as abandoned
    fn expire_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let stale: Vec<String> = self
            .active
            .iter()
            .filter(|(_, stream)| stream.last_seen() < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for stream_id in &stale {
            if let Some(stream) = self.active.remove(stream_id) {
                warn!(
                    %stream_id,
                    started_at = %stream.started_at,
                    tokens = stream.tokens,
                    "StreamingMetricsTracker: expired stale stream"
                );
            }
        }
        self.abandoned_total += stale.len() as u64;
        stale.len()
    }
}

/// Milliseconds from `from` to `to`, clamped at zero for out-of-order timestamps
fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let micros = (to - from).num_microseconds().unwrap_or(i64::MAX);
    if micros < 0 {
        warn!(%from, %to, "StreamingMetricsTracker: timestamps out of order, clamping to zero");
        return 0.0;
    }
    micros as f64 / 1000.0
}

/// Per-stream latency tracker with windowed percentiles
pub struct StreamingMetricsTracker {
    window_size: usize,
    stale_after: chrono::Duration,
    state: Mutex<StreamingState>,
}

impl StreamingMetricsTracker {
    /// Create a tracker keeping `window_size` completed streams (at least one)
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            stale_after: chrono::Duration::milliseconds(default_stale_after_ms() as i64),
            state: Mutex::new(StreamingState::default()),
        }
    }

    pub fn from_config(config: &StreamingConfig) -> Self {
        Self::new(config.window_size).with_stale_after_ms(config.stale_after_ms)
    }

    /// Override how long an active stream may stay silent
    pub fn with_stale_after_ms(mut self, stale_after_ms: u64) -> Self {
        self.stale_after = i64::try_from(stale_after_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .unwrap_or(chrono::Duration::MAX);
        self
    }

    fn lock(&self) -> MutexGuard<'_, StreamingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin tracking a stream
    pub fn start_stream(&self, stream_id: &str, at: DateTime<Utc>) -> Result<(), TrackerError> {
        debug!(%stream_id, "StreamingMetricsTracker::start_stream: called");
        let mut state = self.lock();
        if let Some(cutoff) = at.checked_sub_signed(self.stale_after) {
            state.expire_before(cutoff);
        }
        if state.active.contains_key(stream_id) || state.windowed_ids.contains(stream_id) {
            return Err(TrackerError::DuplicateStream(stream_id.to_string()));
        }
        state.active.insert(
            stream_id.to_string(),
            ActiveStream {
                started_at: at,
                first_token_at: None,
                last_token_at: None,
                tokens: 0,
                gaps: Vec::new(),
            },
        );
        Ok(())
    }

    /// Record the first token; returns TTFT in milliseconds
    pub fn record_first_token(&self, stream_id: &str, at: DateTime<Utc>) -> Result<f64, TrackerError> {
        let mut state = self.lock();
        let stream = state.active_mut(stream_id)?;
        if stream.first_token_at.is_some() {
            return Err(TrackerError::FirstTokenAlreadyRecorded(stream_id.to_string()));
        }
        stream.first_token_at = Some(at);
        stream.last_token_at = Some(at);
        stream.tokens = 1;
        Ok(millis_between(stream.started_at, at))
    }

    /// Record one further token; returns the gap since the previous token when known
    pub fn record_token(&self, stream_id: &str, at: DateTime<Utc>) -> Result<Option<f64>, TrackerError> {
        let mut state = self.lock();
        let stream = state.active_mut(stream_id)?;
        if stream.first_token_at.is_none() {
            return Err(TrackerError::FirstTokenMissing(stream_id.to_string()));
        }
        let gap = stream.last_token_at.map(|prev| millis_between(prev, at));
        if let Some(gap) = gap {
            stream.gaps.push(gap);
        }
        stream.last_token_at = Some(at);
        stream.tokens += 1;
        Ok(gap)
    }

    /// Record several tokens delivered at once
    ///
    /// Batches carry no per-token timing, so no gaps are recorded and the
    /// next single token starts a fresh gap sequence.
    pub fn record_tokens(&self, stream_id: &str, count: u64) -> Result<(), TrackerError> {
        let mut state = self.lock();
        let stream = state.active_mut(stream_id)?;
        if stream.first_token_at.is_none() {
            return Err(TrackerError::FirstTokenMissing(stream_id.to_string()));
        }
        stream.tokens += count;
        stream.last_token_at = None;
        Ok(())
    }

    /// Finish a stream and fold it into the window
    pub fn complete_stream(&self, stream_id: &str, at: DateTime<Utc>) -> Result<StreamRecord, TrackerError> {
        debug!(%stream_id, "StreamingMetricsTracker::complete_stream: called");
        let mut state = self.lock();
        state.active_mut(stream_id)?;
        let stream = state
            .active
            .remove(stream_id)
            .ok_or_else(|| TrackerError::UnknownStream(stream_id.to_string()))?;

        let duration_ms = millis_between(stream.started_at, at);
        let tokens_per_second = if duration_ms > 0.0 {
            stream.tokens as f64 / (duration_ms / 1000.0)
        } else {
            0.0
        };
        let record = StreamRecord {
            stream_id: stream_id.to_string(),
            ttft_ms: stream.first_token_at.map(|t| millis_between(stream.started_at, t)),
            inter_token_ms: stream.gaps,
            tokens: stream.tokens,
            duration_ms,
            tokens_per_second,
            completed_at: at,
        };

        if state.window.len() == self.window_size
            && let Some(evicted) = state.window.pop_front()
        {
            state.windowed_ids.remove(&evicted.stream_id);
        }
        state.windowed_ids.insert(stream_id.to_string());
        state.window.push_back(record.clone());
        state.completed_total += 1;

        debug!(
            %stream_id,
            tokens = record.tokens,
            duration_ms,
            tokens_per_second,
            "StreamingMetricsTracker::complete_stream: recorded"
        );
        Ok(record)
    }

    /// Drop a stream in flight without recording it
    pub fn abandon_stream(&self, stream_id: &str) -> Result<(), TrackerError> {
        let mut state = self.lock();
        state.active_mut(stream_id)?;
        state.active.remove(stream_id);
        state.abandoned_total += 1;
        debug!(%stream_id, "StreamingMetricsTracker::abandon_stream: abandoned");
        Ok(())
    }

    /// Abandon every active stream silent for longer than the stale horizon
    ///
    /// Also runs on each `start_stream`, so streams whose completion was lost
    /// do not accumulate while new ones keep arriving.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> usize {
        match now.checked_sub_signed(self.stale_after) {
            Some(cutoff) => self.lock().expire_before(cutoff),
            None => 0,
        }
    }

    /// Percentiles over the windowed streams
    pub fn get_aggregate_stats(&self) -> StreamingStats {
        let state = self.lock();
        let window = &state.window;
        StreamingStats {
            sample_count: window.len(),
            active_streams: state.active.len(),
            completed_total: state.completed_total,
            abandoned_total: state.abandoned_total,
            ttft: Percentiles::from_samples(window.iter().filter_map(|r| r.ttft_ms)),
            inter_token: Percentiles::from_samples(window.iter().flat_map(|r| r.inter_token_ms.iter().copied())),
            tokens_per_second: Percentiles::from_samples(
                window.iter().filter(|r| r.tokens > 0).map(|r| r.tokens_per_second),
            ),
        }
    }
}
