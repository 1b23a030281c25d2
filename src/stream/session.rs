// =============================================================================
// Stream Session — per-connection polling loop
// =============================================================================
//
// Lifecycle:  Idle --start()--> Active --stop() / loop exit--> Stopped
//
// While Active, a dedicated task repeats:
//   1. read the current timeframe (once per cycle),
//   2. scan the universe at that timeframe,
//   3. push the snapshot (or a single error event if the scan failed),
//   4. sleep for the cadence.
//
// The timeframe lives in a `watch` channel: control messages replace it
// atomically and the loop only observes the new value at the top of the next
// cycle, so a scan already in flight is never altered.
//
// Stopping aborts the task. Abort takes effect at whichever await is pending
// (a fetch inside the scan, the send, or the cadence sleep), so nothing is
// pushed once the session is Stopped.
// =============================================================================

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use futures_util::{Sink, SinkExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::scanner::UniverseScanner;
use crate::types::IndicatorSnapshot;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Active,
    Stopped,
}

/// Messages pushed to streaming clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Snapshot {
        seq: u64,
        interval: String,
        generated_at: DateTime<Utc>,
        entries: IndicatorSnapshot,
    },
    Error {
        seq: u64,
        message: String,
    },
    Timeframe {
        seq: u64,
        timeframe: String,
    },
}

/// Inbound control message: `{"timeframe": "1h"}`.
#[derive(Debug, Deserialize)]
pub struct ControlMessage {
    pub timeframe: String,
}

/// Write half of the connection plus the per-connection sequence counter.
/// Shared by the polling task and the connection handler.
struct Outbound<S> {
    sink: Mutex<S>,
    sequence: AtomicU64,
}

impl<S> Outbound<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    /// Serialise and send one event; `build` receives the next sequence number.
    async fn send_event(&self, build: impl FnOnce(u64) -> StreamEvent) -> anyhow::Result<()> {
        let mut sink = self.sink.lock().await;
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let event = build(seq);

        match serde_json::to_string(&event) {
            Ok(json) => {
                sink.send(Message::Text(json.into()))
                    .await
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
                debug!(seq, "stream event sent");
                Ok(())
            }
            Err(e) => {
                // Serialisation errors are not network errors; don't disconnect.
                warn!(error = %e, "Failed to serialize stream event");
                Ok(())
            }
        }
    }

    async fn send_raw(&self, msg: Message) -> anyhow::Result<()> {
        self.sink
            .lock()
            .await
            .send(msg)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// One connected client.
pub struct StreamSession<S> {
    id: Uuid,
    state: SessionState,
    timeframe: watch::Sender<String>,
    outbound: Arc<Outbound<S>>,
    abort: Option<AbortHandle>,
}

impl<S> StreamSession<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    /// Create an Idle session writing to `sink`.
    pub fn new(sink: S, default_timeframe: impl Into<String>) -> Self {
        let (timeframe, _) = watch::channel(default_timeframe.into());
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
            timeframe,
            outbound: Arc::new(Outbound {
                sink: Mutex::new(sink),
                sequence: AtomicU64::new(0),
            }),
            abort: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state. A loop that exited on its own (send failure)
    /// reports Stopped.
    pub fn state(&self) -> SessionState {
        match (&self.state, &self.abort) {
            (SessionState::Active, Some(abort)) if abort.is_finished() => SessionState::Stopped,
            (state, _) => *state,
        }
    }

    /// Spawn the polling loop. Returns `None` unless the session is Idle.
    pub fn start(
        &mut self,
        scanner: Arc<UniverseScanner>,
        cadence: Duration,
    ) -> Option<JoinHandle<()>> {
        if self.state != SessionState::Idle {
            warn!(session = %self.id, state = ?self.state, "session cannot be restarted");
            return None;
        }

        let task = tokio::spawn(run_poll_loop(
            self.id,
            scanner,
            self.outbound.clone(),
            self.timeframe.subscribe(),
            cadence,
        ));
        self.abort = Some(task.abort_handle());
        self.state = SessionState::Active;
        Some(task)
    }

    /// Replace the timeframe used from the next cycle on.
    pub fn set_timeframe(&self, timeframe: impl Into<String>) {
        let timeframe = timeframe.into();
        let previous = self.timeframe.send_replace(timeframe.clone());
        info!(session = %self.id, from = %previous, to = %timeframe, "timeframe changed");
    }

    pub fn timeframe(&self) -> String {
        self.timeframe.borrow().clone()
    }

    /// Receiver observing this session's timeframe (used by the registry).
    pub fn timeframe_watch(&self) -> watch::Receiver<String> {
        self.timeframe.subscribe()
    }

    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.abort.clone()
    }

    /// Apply a raw control message from the client and acknowledge it.
    /// Malformed messages are answered with an error event; the session keeps
    /// running. Errors only on a failed send.
    pub async fn handle_control(&self, text: &str) -> anyhow::Result<()> {
        match serde_json::from_str::<ControlMessage>(text) {
            Ok(ControlMessage { timeframe }) if !timeframe.trim().is_empty() => {
                self.set_timeframe(timeframe.clone());
                self.outbound
                    .send_event(|seq| StreamEvent::Timeframe { seq, timeframe })
                    .await
            }
            Ok(_) => {
                self.outbound
                    .send_event(|seq| StreamEvent::Error {
                        seq,
                        message: "timeframe must not be empty".to_string(),
                    })
                    .await
            }
            Err(e) => {
                debug!(session = %self.id, error = %e, "unparseable control message");
                self.outbound
                    .send_event(|seq| StreamEvent::Error {
                        seq,
                        message: format!("invalid control message: {e}"),
                    })
                    .await
            }
        }
    }

    /// Send a frame outside the polling loop (e.g. Pong).
    pub async fn send_raw(&self, msg: Message) -> anyhow::Result<()> {
        self.outbound.send_raw(msg).await
    }

    /// Transition to Stopped, cancelling any pending scan or wait.
    pub fn stop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
        if self.state != SessionState::Stopped {
            debug!(session = %self.id, "session stopped");
        }
        self.state = SessionState::Stopped;
    }
}

impl<S> Drop for StreamSession<S> {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}

/// Body of the per-session task.
async fn run_poll_loop<S>(
    id: Uuid,
    scanner: Arc<UniverseScanner>,
    outbound: Arc<Outbound<S>>,
    mut timeframe: watch::Receiver<String>,
    cadence: Duration,
) where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    loop {
        let interval = timeframe.borrow_and_update().clone();

        let sent = match scanner.scan(&interval).await {
            Ok(entries) => {
                outbound
                    .send_event(|seq| StreamEvent::Snapshot {
                        seq,
                        interval: interval.clone(),
                        generated_at: Utc::now(),
                        entries,
                    })
                    .await
            }
            Err(e) => {
                warn!(session = %id, interval = %interval, error = %e, "scan failed");
                outbound
                    .send_event(|seq| StreamEvent::Error {
                        seq,
                        message: e.to_string(),
                    })
                    .await
            }
        };

        if let Err(e) = sent {
            debug!(session = %id, error = %e, "stream send failed — ending poll loop");
            break;
        }

        tokio::time::sleep(cadence).await;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::market_data::testing::{wave, FakeSource};
    use crate::rsi_store::PreviousRsiStore;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Instant};

    const CADENCE: Duration = Duration::from_secs(8);

    fn channel_sink() -> (
        impl Sink<Message, Error = String> + Unpin + Send + 'static,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Box::pin(futures_util::sink::unfold(tx, |tx, msg: Message| async move {
            tx.send(msg).map_err(|e| e.to_string())?;
            Ok::<_, String>(tx)
        }));
        (sink, rx)
    }

    fn scanner_for(source: Arc<FakeSource>) -> Arc<UniverseScanner> {
        Arc::new(UniverseScanner::new(
            source,
            Arc::new(PreviousRsiStore::new()),
            100,
            16,
        ))
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Message>) -> StreamEvent {
        match rx.recv().await.expect("channel closed") {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    fn snapshot_interval(event: &StreamEvent) -> &str {
        match event {
            StreamEvent::Snapshot { interval, .. } => interval,
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pushes_immediately_then_on_cadence() {
        let source = Arc::new(FakeSource::new(&["BTCUSDT"]).with_bars("BTCUSDT", wave(40, 0.0)));
        let (sink, mut rx) = channel_sink();
        let mut session = StreamSession::new(sink, "30m");
        assert_eq!(session.state(), SessionState::Idle);

        let started = Instant::now();
        session.start(scanner_for(source), CADENCE).unwrap();
        assert_eq!(session.state(), SessionState::Active);

        let first = next_event(&mut rx).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        match &first {
            StreamEvent::Snapshot { seq, interval, entries, .. } => {
                assert_eq!(*seq, 1);
                assert_eq!(interval, "30m");
                assert_eq!(entries.len(), 1);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }

        let second = next_event(&mut rx).await;
        assert!(started.elapsed() >= CADENCE);
        assert!(matches!(second, StreamEvent::Snapshot { seq: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn timeframe_change_applies_to_next_cycle_only() {
        let source = Arc::new(
            FakeSource::new(&["BTCUSDT"])
                .with_bars("BTCUSDT", wave(40, 0.0))
                .with_delay("BTCUSDT", Duration::from_secs(2)),
        );
        let (sink, mut rx) = channel_sink();
        let mut session = StreamSession::new(sink, "30m");
        session.start(scanner_for(source.clone()), CADENCE).unwrap();

        // Change mid-scan: the in-flight scan keeps its interval.
        tokio::time::sleep(Duration::from_secs(1)).await;
        session.set_timeframe("1h");
        assert_eq!(session.timeframe(), "1h");

        assert_eq!(snapshot_interval(&next_event(&mut rx).await), "30m");
        assert_eq!(snapshot_interval(&next_event(&mut rx).await), "1h");
        assert_eq!(source.intervals_seen(), vec!["30m", "1h"]);
    }

    #[tokio::test(start_paused = true)]
    async fn control_message_is_acknowledged() {
        let source = Arc::new(FakeSource::new(&["BTCUSDT"]).with_bars("BTCUSDT", wave(40, 0.0)));
        let (sink, mut rx) = channel_sink();
        let mut session = StreamSession::new(sink, "30m");
        session.start(scanner_for(source), CADENCE).unwrap();
        next_event(&mut rx).await;

        session.handle_control(r#"{"timeframe":"15m"}"#).await.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Timeframe { seq: 2, timeframe: "15m".into() }
        );
        assert_eq!(snapshot_interval(&next_event(&mut rx).await), "15m");
    }

    #[tokio::test]
    async fn timeframe_is_kept_verbatim() {
        let (sink, mut rx) = channel_sink();
        let session = StreamSession::new(sink, "30m");

        session.handle_control(r#"{"timeframe":" 1h "}"#).await.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            StreamEvent::Timeframe { seq: 1, timeframe: " 1h ".into() }
        );
        assert_eq!(session.timeframe(), " 1h ");
    }

    #[tokio::test]
    async fn malformed_control_message_keeps_timeframe() {
        let (sink, mut rx) = channel_sink();
        let session = StreamSession::new(sink, "30m");

        session.handle_control("not json").await.unwrap();
        assert!(matches!(next_event(&mut rx).await, StreamEvent::Error { .. }));

        session.handle_control(r#"{"timeframe":"  "}"#).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, StreamEvent::Error { .. }));

        assert_eq!(session.timeframe(), "30m");
    }

    #[tokio::test(start_paused = true)]
    async fn scan_failure_pushes_error_and_keeps_running() {
        let source = Arc::new(FakeSource::new(&["BTCUSDT"]).with_bars("BTCUSDT", wave(40, 0.0)));
        source.fail_listing(SourceError::Unavailable("exchange down".into()));

        let (sink, mut rx) = channel_sink();
        let mut session = StreamSession::new(sink, "30m");
        session.start(scanner_for(source.clone()), CADENCE).unwrap();

        match next_event(&mut rx).await {
            StreamEvent::Error { message, .. } => assert!(message.contains("exchange down")),
            other => panic!("expected error event, got {other:?}"),
        }

        source.restore_listing(&["BTCUSDT"]);
        assert_eq!(snapshot_interval(&next_event(&mut rx).await), "30m");
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_wait_prevents_further_pushes() {
        let source = Arc::new(FakeSource::new(&["BTCUSDT"]).with_bars("BTCUSDT", wave(40, 0.0)));
        let (sink, mut rx) = channel_sink();
        let mut session = StreamSession::new(sink, "30m");
        session.start(scanner_for(source.clone()), CADENCE).unwrap();

        next_event(&mut rx).await;
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);

        assert!(timeout(CADENCE * 5, rx.recv()).await.is_err());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_scan_discards_in_flight_snapshot() {
        let source = Arc::new(
            FakeSource::new(&["BTCUSDT"])
                .with_bars("BTCUSDT", wave(40, 0.0))
                .with_delay("BTCUSDT", Duration::from_secs(5)),
        );
        let (sink, mut rx) = channel_sink();
        let mut session = StreamSession::new(sink, "30m");
        let task = session.start(scanner_for(source), CADENCE).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        session.stop();

        assert!(task.await.unwrap_err().is_cancelled());
        assert!(timeout(CADENCE * 2, rx.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn no_restart_after_stop() {
        let source = Arc::new(FakeSource::new(&["BTCUSDT"]).with_bars("BTCUSDT", wave(40, 0.0)));
        let (sink, _rx) = channel_sink();
        let mut session = StreamSession::new(sink, "30m");
        let scanner = scanner_for(source);

        assert!(session.start(scanner.clone(), CADENCE).is_some());
        assert!(session.start(scanner.clone(), CADENCE).is_none());
        session.stop();
        assert!(session.start(scanner, CADENCE).is_none());
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_one_session_leaves_others_running() {
        let source = Arc::new(FakeSource::new(&["BTCUSDT"]).with_bars("BTCUSDT", wave(40, 0.0)));
        let scanner = scanner_for(source);

        let (sink_a, mut rx_a) = channel_sink();
        let (sink_b, mut rx_b) = channel_sink();
        let mut a = StreamSession::new(sink_a, "30m");
        let mut b = StreamSession::new(sink_b, "1h");
        a.start(scanner.clone(), CADENCE).unwrap();
        b.start(scanner, CADENCE).unwrap();

        next_event(&mut rx_a).await;
        next_event(&mut rx_b).await;
        a.stop();

        let started = Instant::now();
        for expected_seq in 2..=4 {
            match next_event(&mut rx_b).await {
                StreamEvent::Snapshot { seq, interval, .. } => {
                    assert_eq!(seq, expected_seq);
                    assert_eq!(interval, "1h");
                }
                other => panic!("expected snapshot, got {other:?}"),
            }
        }
        assert!(started.elapsed() >= CADENCE * 3);
        assert!(started.elapsed() < CADENCE * 4);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_ends_when_client_is_gone() {
        let source = Arc::new(FakeSource::new(&["BTCUSDT"]).with_bars("BTCUSDT", wave(40, 0.0)));
        let (sink, rx) = channel_sink();
        drop(rx);

        let mut session = StreamSession::new(sink, "30m");
        let task = session.start(scanner_for(source), CADENCE).unwrap();
        task.await.unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
    }
}
