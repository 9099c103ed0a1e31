//! Process-wide counters and duration accumulators.
//!
//! A single [`Metrics`] is created at startup and shared via `Arc`
//! with every session.  Updates are independent atomic adds; no
//! cross-field consistency is promised.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    WsConnections,
    WsDisconnects,
    WsUserMessages,
    WsBusyRejections,
    AnthropicRequests,
    AnthropicErrors,
    ToolRequests,
    ToolApprovals,
    ToolErrors,
}

impl Counter {
    pub const ALL: [Counter; 9] = [
        Counter::WsConnections,
        Counter::WsDisconnects,
        Counter::WsUserMessages,
        Counter::WsBusyRejections,
        Counter::AnthropicRequests,
        Counter::AnthropicErrors,
        Counter::ToolRequests,
        Counter::ToolApprovals,
        Counter::ToolErrors,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::WsConnections => "ws_connections_total",
            Counter::WsDisconnects => "ws_disconnects_total",
            Counter::WsUserMessages => "ws_user_messages_total",
            Counter::WsBusyRejections => "ws_busy_rejections_total",
            Counter::AnthropicRequests => "anthropic_requests_total",
            Counter::AnthropicErrors => "anthropic_errors_total",
            Counter::ToolRequests => "tool_requests_total",
            Counter::ToolApprovals => "tool_approvals_total",
            Counter::ToolErrors => "tool_errors_total",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    AnthropicStream,
    AnthropicResume,
}

impl Timer {
    pub const ALL: [Timer; 2] = [Timer::AnthropicStream, Timer::AnthropicResume];

    pub fn name(self) -> &'static str {
        match self {
            Timer::AnthropicStream => "anthropic_stream_duration_ms",
            Timer::AnthropicResume => "anthropic_resume_duration_ms",
        }
    }
}

#[derive(Debug, Default)]
struct DurationCell {
    count: AtomicU64,
    sum_micros: AtomicU64,
}

#[derive(Debug, Default)]
pub struct Metrics {
    counters: [AtomicU64; Counter::ALL.len()],
    timers: [DurationCell; Timer::ALL.len()],
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, counter: Counter) {
        self.counters[counter as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn counter(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }

    pub fn observe(&self, timer: Timer, elapsed: Duration) {
        let cell = &self.timers[timer as usize];
        cell.count.fetch_add(1, Ordering::Relaxed);
        cell.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Number of observations and their sum in milliseconds.
    pub fn timer(&self, timer: Timer) -> (u64, f64) {
        let cell = &self.timers[timer as usize];
        (
            cell.count.load(Ordering::Relaxed),
            cell.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0,
        )
    }

    /// Prometheus text exposition.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for c in Counter::ALL {
            let _ = writeln!(out, "# TYPE {} counter", c.name());
            let _ = writeln!(out, "{} {}", c.name(), self.counter(c));
        }
        for t in Timer::ALL {
            let (count, sum) = self.timer(t);
            let _ = writeln!(out, "# TYPE {} summary", t.name());
            let _ = writeln!(out, "{}_count {}", t.name(), count);
            let _ = writeln!(out, "{}_sum {:.3}", t.name(), sum);
        }
        out
    }
}
