use serde::Serialize;
use std::time::{Duration, Instant};

/// Raw event counts for one queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counters {
    pushed: u64,
    evicted: u64,
    delivered: u64,
    empty_pops: u64,
    bytes: u64,
}

/// Hand-off statistics for a frame exchange queue, kept under the queue's
/// stats lock.
pub struct DiagnosticStats {
    counters: Counters,
    started: Instant,
    last_push: Option<Instant>,
    last_latency: Duration,
    peak_latency: Duration,
}

/// Point-in-time view of [`DiagnosticStats`], serialised camelCase.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSnapshot {
    pub fps: f64,
    pub frame_count: u64,
    pub drop_count: u64,
    pub drop_rate: f64,
    pub delivered_count: u64,
    pub empty_pop_count: u64,
    pub latency_ms: f64,
    pub peak_latency_ms: f64,
    pub bandwidth_bps: u64,
}

impl DiagnosticStats {
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
            started: Instant::now(),
            last_push: None,
            last_latency: Duration::ZERO,
            peak_latency: Duration::ZERO,
        }
    }

    /// A frame of `bytes` was accepted by `push`.
    pub fn record_frame(&mut self, bytes: usize) {
        self.counters.pushed += 1;
        self.counters.bytes += bytes as u64;
        self.last_push = Some(Instant::now());
    }

    /// A waiting frame was evicted to make room.
    pub fn record_drop(&mut self) {
        self.counters.evicted += 1;
    }

    /// A frame left the queue after spending `queued_for` in it.
    pub fn record_delivery(&mut self, queued_for: Duration) {
        self.counters.delivered += 1;
        self.last_latency = queued_for;
        self.peak_latency = self.peak_latency.max(queued_for);
    }

    /// `pop` returned the empty sentinel.
    pub fn record_empty_pop(&mut self) {
        self.counters.empty_pops += 1;
    }

    fn per_second(&self, count: u64) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs < 0.001 {
            0.0
        } else {
            count as f64 / secs
        }
    }

    /// Pushes per second since creation or the last reset.
    pub fn fps(&self) -> f64 {
        self.per_second(self.counters.pushed)
    }

    /// Evicted frames as a percentage of pushed frames.
    pub fn drop_rate(&self) -> f64 {
        match self.counters.pushed {
            0 => 0.0,
            pushed => self.counters.evicted as f64 * 100.0 / pushed as f64,
        }
    }

    /// Queue residency of the most recently delivered frame.
    pub fn latency_ms(&self) -> f64 {
        self.last_latency.as_secs_f64() * 1000.0
    }

    pub fn peak_latency_ms(&self) -> f64 {
        self.peak_latency.as_secs_f64() * 1000.0
    }

    /// Pushed bytes per second.
    pub fn bandwidth_bps(&self) -> u64 {
        self.per_second(self.counters.bytes) as u64
    }

    /// Time since the most recent push.
    pub fn since_last_frame(&self) -> Option<Duration> {
        self.last_push.map(|t| t.elapsed())
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn snapshot(&self) -> DiagnosticSnapshot {
        let c = self.counters;
        DiagnosticSnapshot {
            fps: self.fps(),
            frame_count: c.pushed,
            drop_count: c.evicted,
            drop_rate: self.drop_rate(),
            delivered_count: c.delivered,
            empty_pop_count: c.empty_pops,
            latency_ms: self.latency_ms(),
            peak_latency_ms: self.peak_latency_ms(),
            bandwidth_bps: self.bandwidth_bps(),
        }
    }
}

impl Default for DiagnosticStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fresh_stats_are_zero() {
        let stats = DiagnosticStats::new();
        assert_eq!(stats.counters, Counters::default());
        assert_eq!(stats.drop_rate(), 0.0);
        assert!(stats.since_last_frame().is_none());
    }

    #[test]
    fn pushes_accumulate_frames_and_bytes() {
        let mut stats = DiagnosticStats::new();
        stats.record_frame(640 * 480 * 4);
        stats.record_frame(640 * 480 * 4);

        let snap = stats.snapshot();
        assert_eq!(snap.frame_count, 2);
        assert_eq!(stats.counters.bytes, 2 * 640 * 480 * 4);
        assert!(stats.since_last_frame().is_some());
    }

    #[test]
    fn one_eviction_in_four_pushes_is_25_percent() {
        let mut stats = DiagnosticStats::new();
        for _ in 0..4 {
            stats.record_frame(16);
        }
        stats.record_drop();
        assert!((stats.drop_rate() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn delivery_keeps_last_and_peak_latency() {
        let mut stats = DiagnosticStats::new();
        stats.record_delivery(Duration::from_micros(4000));
        stats.record_delivery(Duration::from_micros(1500));

        assert_eq!(stats.snapshot().delivered_count, 2);
        assert!((stats.latency_ms() - 1.5).abs() < 1e-9);
        assert!((stats.peak_latency_ms() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn rates_become_positive_after_traffic() {
        let mut stats = DiagnosticStats::new();
        stats.record_frame(10_000);
        thread::sleep(Duration::from_millis(20));
        assert!(stats.fps() > 0.0);
        assert!(stats.bandwidth_bps() > 0);
    }

    #[test]
    fn reset_starts_over() {
        let mut stats = DiagnosticStats::new();
        stats.record_frame(1);
        stats.record_drop();
        stats.record_empty_pop();
        stats.record_delivery(Duration::from_millis(3));

        stats.reset();
        assert_eq!(stats.counters, Counters::default());
        assert_eq!(stats.peak_latency_ms(), 0.0);
    }

    #[test]
    fn snapshot_uses_camel_case_keys() {
        let mut stats = DiagnosticStats::new();
        stats.record_frame(5000);
        stats.record_empty_pop();

        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["frameCount"], 1);
        assert_eq!(json["emptyPopCount"], 1);
        assert!(json["peakLatencyMs"].is_number());
    }
}
