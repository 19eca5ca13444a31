//! # Metric hooks
//!
//! With the `metrics` feature enabled, the pool records OpenTelemetry
//! instruments through the *global* meter provider. Install a provider (the
//! `callpool` binary does this in its own telemetry module) before creating a
//! pool, otherwise the no-op global provider swallows everything.
//!
//! Handles are created lazily on first use. Without the feature every hook
//! compiles to an empty function.

#[cfg(feature = "metrics")]
use opentelemetry::{
    KeyValue,
    metrics::{Counter, UpDownCounter},
};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

/// How a task's result slot was completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
    Cancelled,
}

#[cfg_attr(not(feature = "metrics"), allow(dead_code))]
impl Outcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(feature = "metrics")]
struct Handles {
    tasks_submitted: Counter<u64>,
    tasks_rejected: Counter<u64>,
    task_outcomes: Counter<u64>,
    calls_inflight: UpDownCounter<i64>,
    responses_released: Counter<u64>,
}

#[cfg(feature = "metrics")]
static HANDLES: OnceLock<Handles> = OnceLock::new();

#[cfg(feature = "metrics")]
fn handles() -> &'static Handles {
    HANDLES.get_or_init(|| {
        let meter = opentelemetry::global::meter("callpool");
        Handles {
            tasks_submitted: meter
                .u64_counter("tasks_submitted")
                .with_description("Tasks accepted into the queue")
                .build(),
            tasks_rejected: meter
                .u64_counter("tasks_rejected")
                .with_description("Tasks refused because the queue was closed or full")
                .build(),
            task_outcomes: meter
                .u64_counter("task_outcomes")
                .with_description("Completed result slots by outcome")
                .build(),
            calls_inflight: meter
                .i64_up_down_counter("calls_inflight")
                .with_description("Transport calls currently executing")
                .build(),
            responses_released: meter
                .u64_counter("responses_released")
                .with_description("Unclaimed responses closed by the pool")
                .build(),
        }
    })
}

#[cfg(feature = "metrics")]
pub fn increment_tasks_submitted() {
    handles().tasks_submitted.add(1, &[]);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_tasks_submitted() {}

#[cfg(feature = "metrics")]
pub fn increment_tasks_rejected() {
    handles().tasks_rejected.add(1, &[]);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_tasks_rejected() {}

#[cfg(feature = "metrics")]
pub fn record_outcome(outcome: Outcome) {
    handles()
        .task_outcomes
        .add(1, &[KeyValue::new("outcome", outcome.as_str())]);
}

#[cfg(not(feature = "metrics"))]
pub fn record_outcome(_outcome: Outcome) {}

#[cfg(feature = "metrics")]
pub fn increment_calls_inflight() {
    handles().calls_inflight.add(1, &[]);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_calls_inflight() {}

#[cfg(feature = "metrics")]
pub fn decrement_calls_inflight() {
    handles().calls_inflight.add(-1, &[]);
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_calls_inflight() {}

#[cfg(feature = "metrics")]
pub fn increment_responses_released() {
    handles().responses_released.add(1, &[]);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_responses_released() {}
