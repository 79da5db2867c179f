//! Replay scheduler.
//!
//! One run is a single cooperative loop over three sources:
//! - the cancellation token
//! - a periodic heartbeat tick
//! - the next queued record
//!
//! Sends are never concurrent within a run. Consecutive successful sends are
//! spaced by at least the configured cadence; a failed send does not move
//! the pacing clock.

use crate::parser::ParsedRecord;
use crate::transport::{EventSink, TransportError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Replay configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Minimum gap between successful sends
    pub cadence: Duration,
    /// Liveness ping period, independent of cadence. Zero disables
    /// periodic heartbeats; the bootstrap heartbeat is always sent.
    pub heartbeat_interval: Duration,
}

impl ReplayConfig {
    /// Set the cadence
    #[must_use]
    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    /// Set the heartbeat interval
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            cadence: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplayPhase {
    /// Not started
    Idle,
    /// Bootstrap heartbeat in flight
    HeartbeatWarmup,
    /// Delivering records
    Streaming,
    /// Cancellation observed
    Cancelled,
    /// Queue exhausted
    Drained,
    /// Run finished
    Done,
}

/// How a run ended. Both are successful outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplayOutcome {
    /// Every queued record was attempted
    Drained,
    /// Stopped early by cancellation
    Cancelled,
}

impl ReplayOutcome {
    const fn phase(self) -> ReplayPhase {
        match self {
            Self::Drained => ReplayPhase::Drained,
            Self::Cancelled => ReplayPhase::Cancelled,
        }
    }
}

/// Counters for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    /// How the run ended
    pub outcome: ReplayOutcome,
    /// Records accepted by the sink
    pub sent: usize,
    /// Records the sink rejected
    pub failed: usize,
    /// Heartbeats acknowledged, including the bootstrap one
    pub heartbeats_sent: usize,
    /// Periodic heartbeats that failed
    pub heartbeats_failed: usize,
}

impl ReplaySummary {
    fn new() -> Self {
        Self {
            outcome: ReplayOutcome::Drained,
            sent: 0,
            failed: 0,
            heartbeats_sent: 0,
            heartbeats_failed: 0,
        }
    }
}

/// Replay errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    /// Ingestion boundary unreachable before streaming began
    #[error("bootstrap heartbeat failed: {0}")]
    Bootstrap(#[source] TransportError),
}

/// Paced replay of parsed records into a sink
pub struct ReplayScheduler<S> {
    sink: S,
    config: ReplayConfig,
    span: Span,
}

impl<S: EventSink> ReplayScheduler<S> {
    /// Create a new scheduler
    #[must_use]
    pub fn new(sink: S, config: ReplayConfig) -> Self {
        Self {
            sink,
            config,
            span: tracing::info_span!("replay"),
        }
    }

    /// Emit log events under the given span
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Get the sink
    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Get the config
    #[must_use]
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Replay an already ordered record sequence
    ///
    /// # Errors
    ///
    /// Returns error if the bootstrap heartbeat fails
    pub async fn replay_all(
        &self,
        records: Vec<ParsedRecord>,
        cancel: CancellationToken,
    ) -> Result<ReplaySummary, ReplayError> {
        let (tx, rx) = mpsc::channel(records.len().max(1));
        for record in records {
            // Capacity covers every record, so this cannot fill up.
            if tx.try_send(record).is_err() {
                break;
            }
        }
        drop(tx);
        self.replay(rx, cancel).await
    }

    /// Replay records from a queue until it closes or the run is cancelled
    ///
    /// # Errors
    ///
    /// Returns error if the bootstrap heartbeat fails
    pub async fn replay(
        &self,
        mut queue: mpsc::Receiver<ParsedRecord>,
        cancel: CancellationToken,
    ) -> Result<ReplaySummary, ReplayError> {
        let mut phase = ReplayPhase::Idle;
        let mut summary = ReplaySummary::new();

        self.enter(&mut phase, ReplayPhase::HeartbeatWarmup);
        let warmup = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.sink.send_heartbeat() => Some(result),
        };
        match warmup {
            None => return Ok(self.finish(&mut phase, summary, ReplayOutcome::Cancelled)),
            Some(Err(err)) => {
                tracing::error!(parent: &self.span, error = %err, "bootstrap heartbeat failed");
                self.enter(&mut phase, ReplayPhase::Done);
                return Err(ReplayError::Bootstrap(err));
            }
            Some(Ok(())) => summary.heartbeats_sent += 1,
        }

        self.enter(&mut phase, ReplayPhase::Streaming);
        let cadence = self.config.cadence;
        let period = self.config.heartbeat_interval;
        let mut heartbeat = (!period.is_zero()).then(|| {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks
        });
        let mut last_sent: Option<Instant> = None;

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break ReplayOutcome::Cancelled,
                () = next_tick(&mut heartbeat) => {
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break ReplayOutcome::Cancelled,
                        result = self.sink.send_heartbeat() => result,
                    };
                    match result {
                        Ok(()) => {
                            summary.heartbeats_sent += 1;
                            tracing::info!(parent: &self.span, "heartbeat sent successfully");
                        }
                        Err(err) => {
                            summary.heartbeats_failed += 1;
                            tracing::error!(parent: &self.span, error = %err, "heartbeat failed");
                        }
                    }
                }
                next = queue.recv() => {
                    let Some(record) = next else {
                        break ReplayOutcome::Drained;
                    };

                    if let Some(last) = last_sent {
                        let elapsed = last.elapsed();
                        if elapsed < cadence {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => break ReplayOutcome::Cancelled,
                                _ = tokio::time::sleep(cadence - elapsed) => {}
                            }
                        }
                    }

                    let ParsedRecord { line_number, envelope, original_timestamp } = record;
                    let message_guid = envelope.header.message_guid.clone();
                    let message_type = envelope
                        .kind()
                        .map_or_else(|| "Unknown".to_string(), |kind| kind.to_string());

                    let started = Instant::now();
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break ReplayOutcome::Cancelled,
                        result = self.sink.send_message(envelope) => result,
                    };
                    match result {
                        Ok(()) => {
                            last_sent = Some(started);
                            summary.sent += 1;
                            tracing::info!(
                                parent: &self.span,
                                message_number = line_number,
                                remaining = queue.len(),
                                message_type = %message_type,
                                original_timestamp = %original_timestamp,
                                "sent message"
                            );
                        }
                        Err(err) => {
                            summary.failed += 1;
                            tracing::error!(
                                parent: &self.span,
                                message_number = line_number,
                                message_guid = %message_guid,
                                error = %err,
                                "failed to send message"
                            );
                        }
                    }
                }
            }
        };

        Ok(self.finish(&mut phase, summary, outcome))
    }

    fn finish(
        &self,
        phase: &mut ReplayPhase,
        mut summary: ReplaySummary,
        outcome: ReplayOutcome,
    ) -> ReplaySummary {
        self.enter(phase, outcome.phase());
        summary.outcome = outcome;
        tracing::info!(
            parent: &self.span,
            outcome = ?outcome,
            sent = summary.sent,
            failed = summary.failed,
            heartbeats_sent = summary.heartbeats_sent,
            heartbeats_failed = summary.heartbeats_failed,
            "replay finished"
        );
        self.enter(phase, ReplayPhase::Done);
        summary
    }

    fn enter(&self, phase: &mut ReplayPhase, next: ReplayPhase) {
        tracing::debug!(parent: &self.span, from = ?phase, to = ?next, "replay phase");
        *phase = next;
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticks) => {
            ticks.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use touchline_core::{EventEnvelope, Header, MatchStateUpdate};

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, Instant)>>,
        heartbeats: AtomicUsize,
        fail_bootstrap: bool,
        fail_ticks: bool,
        stall_ticks: bool,
        fail_guids: HashSet<String>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl RecordingSink {
        fn guids(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(g, _)| g.clone()).collect()
        }

        fn times(&self) -> Vec<Instant> {
            self.sent.lock().unwrap().iter().map(|(_, t)| *t).collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn send_heartbeat(&self) -> Result<(), TransportError> {
            let n = self.heartbeats.fetch_add(1, Ordering::SeqCst);
            if n > 0 && self.stall_ticks {
                std::future::pending::<()>().await;
            }
            if (n == 0 && self.fail_bootstrap) || (n > 0 && self.fail_ticks) {
                return Err(TransportError::Request("connection refused".to_string()));
            }
            Ok(())
        }

        async fn send_message(&self, envelope: EventEnvelope) -> Result<(), TransportError> {
            let guid = envelope.header.message_guid;
            if self.fail_guids.contains(&guid) {
                return Err(TransportError::Status {
                    operation: "message processing",
                    status: 500,
                    body: Some("boom".to_string()),
                });
            }
            let count = {
                let mut sent = self.sent.lock().unwrap();
                sent.push((guid, Instant::now()));
                sent.len()
            };
            if let Some((after, token)) = &self.cancel_after {
                if count == *after {
                    token.cancel();
                }
            }
            Ok(())
        }
    }

    fn records(n: usize) -> Vec<ParsedRecord> {
        (0..n)
            .map(|i| {
                let ts = "2024-09-16T00:00:00Z".parse().unwrap();
                let envelope = EventEnvelope::match_state(
                    Header::new(format!("g{i}"), ts),
                    MatchStateUpdate {
                        fixture_id: uuid::Uuid::new_v4().to_string(),
                        ..Default::default()
                    },
                );
                ParsedRecord::admit(i + 1, envelope).unwrap()
            })
            .collect()
    }

    fn config(cadence_ms: u64) -> ReplayConfig {
        ReplayConfig::default().with_cadence(Duration::from_millis(cadence_ms))
    }

    #[test]
    fn test_replay_config_default() {
        let config = ReplayConfig::default();
        assert_eq!(config.cadence, Duration::from_millis(100));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_in_order_with_pacing() {
        let scheduler = ReplayScheduler::new(RecordingSink::default(), config(100));
        let start = Instant::now();

        let summary = scheduler
            .replay_all(records(5), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.outcome, ReplayOutcome::Drained);
        assert_eq!(summary.sent, 5);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.heartbeats_sent, 1);
        assert_eq!(scheduler.sink().guids(), vec!["g0", "g1", "g2", "g3", "g4"]);

        let times = scheduler.sink().times();
        assert!(times[0].duration_since(start) < Duration::from_millis(100));
        for pair in times.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(100));
        }
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_input_drains() {
        let scheduler = ReplayScheduler::new(RecordingSink::default(), config(100));
        let summary = scheduler
            .replay_all(Vec::new(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.outcome, ReplayOutcome::Drained);
        assert_eq!(summary.sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_heartbeat_failure_is_fatal() {
        let sink = RecordingSink {
            fail_bootstrap: true,
            ..Default::default()
        };
        let scheduler = ReplayScheduler::new(sink, config(100));

        let err = scheduler
            .replay_all(records(3), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ReplayError::Bootstrap(TransportError::Request(_))));
        assert!(scheduler.sink().guids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_does_not_halt_or_advance_pacing() {
        let sink = RecordingSink {
            fail_guids: HashSet::from(["g0".to_string()]),
            ..Default::default()
        };
        let scheduler = ReplayScheduler::new(sink, config(100));
        let start = Instant::now();

        let summary = scheduler
            .replay_all(records(3), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.sent, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(scheduler.sink().guids(), vec!["g1", "g2"]);

        let times = scheduler.sink().times();
        // g0 failed, so g1 is the first paced send
        assert_eq!(times[0].duration_since(start), Duration::ZERO);
        assert!(times[1].duration_since(times[0]) >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_replay() {
        let cancel = CancellationToken::new();
        let sink = RecordingSink {
            cancel_after: Some((2, cancel.clone())),
            ..Default::default()
        };
        let scheduler = ReplayScheduler::new(sink, config(100));

        let summary = scheduler.replay_all(records(5), cancel).await.unwrap();

        assert_eq!(summary.outcome, ReplayOutcome::Cancelled);
        assert_eq!(summary.sent, 2);
        assert_eq!(scheduler.sink().guids(), vec!["g0", "g1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let scheduler = ReplayScheduler::new(RecordingSink::default(), config(100));

        let summary = scheduler.replay_all(records(3), cancel).await.unwrap();

        assert_eq!(summary.outcome, ReplayOutcome::Cancelled);
        assert_eq!(summary.heartbeats_sent, 0);
        assert_eq!(scheduler.sink().heartbeats.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_for_records() {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let scheduler = ReplayScheduler::new(RecordingSink::default(), config(100));

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let summary = scheduler.replay(rx, cancel).await.unwrap();
        assert_eq!(summary.outcome, ReplayOutcome::Cancelled);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_heartbeats() {
        let config = config(400).with_heartbeat_interval(Duration::from_secs(1));
        let scheduler = ReplayScheduler::new(RecordingSink::default(), config);

        let summary = scheduler
            .replay_all(records(5), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.sent, 5);
        assert!(summary.heartbeats_sent >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_heartbeat_failure_is_not_fatal() {
        let sink = RecordingSink {
            fail_ticks: true,
            ..Default::default()
        };
        let config = config(400).with_heartbeat_interval(Duration::from_secs(1));
        let scheduler = ReplayScheduler::new(sink, config);

        let summary = scheduler
            .replay_all(records(5), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.outcome, ReplayOutcome::Drained);
        assert_eq!(summary.sent, 5);
        assert_eq!(summary.heartbeats_sent, 1);
        assert!(summary.heartbeats_failed >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_heartbeat_interval_disables_periodic_heartbeats() {
        let config = config(100).with_heartbeat_interval(Duration::ZERO);
        let scheduler = ReplayScheduler::new(RecordingSink::default(), config);

        let summary = scheduler
            .replay_all(records(3), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.outcome, ReplayOutcome::Drained);
        assert_eq!(summary.sent, 3);
        assert_eq!(summary.heartbeats_sent, 1);
        assert_eq!(scheduler.sink().heartbeats.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_pacing_wait() {
        let cancel = CancellationToken::new();
        let scheduler = ReplayScheduler::new(RecordingSink::default(), config(10_000));
        let start = Instant::now();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let summary = scheduler.replay_all(records(3), cancel).await.unwrap();

        assert_eq!(summary.outcome, ReplayOutcome::Cancelled);
        assert_eq!(summary.sent, 1);
        assert_eq!(scheduler.sink().guids(), vec!["g0"]);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_periodic_heartbeat() {
        let sink = RecordingSink {
            stall_ticks: true,
            ..Default::default()
        };
        let config = config(100).with_heartbeat_interval(Duration::from_secs(1));
        let scheduler = ReplayScheduler::new(sink, config);
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            canceller.cancel();
        });

        let summary = scheduler.replay(rx, cancel).await.unwrap();

        assert_eq!(summary.outcome, ReplayOutcome::Cancelled);
        // bootstrap plus the stalled tick
        assert_eq!(scheduler.sink().heartbeats.load(Ordering::SeqCst), 2);
        assert_eq!(summary.heartbeats_sent, 1);
        assert!(start.elapsed() < Duration::from_secs(4));
        drop(tx);
    }
}
