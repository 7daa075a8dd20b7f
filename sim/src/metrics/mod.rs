//! Statistical aggregators fed by the event bus
//!
//! - [`ErrorMetricsTracker`]: error budget, burn rate and SLO status
//! - [`StreamingMetricsTracker`]: TTFT, inter-token latency and tokens/sec percentiles
//! - [`CostTracker`]: spend against daily/weekly/monthly/lifetime budget limits
//!
//! All tracker methods are synchronous and hold their lock only for the
//! duration of the update or read, so they are safe to call from bus
//! handlers and status endpoints at the same time.

mod cost;
mod error;
mod slo;
mod stats;
mod streaming;

pub use cost::{
    BudgetConfig, BudgetExceeded, BudgetLimit, BudgetLimitType, BudgetPeriod, BudgetStatus, CostSummary, CostTracker,
    ModelCost, ModelPricing,
};
pub use error::TrackerError;
pub use slo::{ErrorBreakdown, ErrorMetricsTracker, ErrorPattern, ErrorRecord, SloConfig, SloStatus};
pub use stats::Percentiles;
pub use streaming::{StreamRecord, StreamingConfig, StreamingMetricsTracker, StreamingStats};
