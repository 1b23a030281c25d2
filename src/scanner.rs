// =============================================================================
// Universe Scanner — one indicator snapshot across every tradable symbol
// =============================================================================
//
// A scan lists the universe, then runs the per-symbol pipeline for all symbols
// concurrently:
//
//   fetch bars -> closes -> previous RSI -> RSI -> store RSI -> ATR -> entry
//
// Per-symbol failures (fetch error, unknown symbol, short history) become
// `SnapshotEntry::Failure` rows; they never abort the batch. Only a failure to
// list the universe fails the scan.
//
// Entries are collected by index (`join_all` preserves input order), so the
// snapshot always follows the symbol list regardless of completion order.
// Each scan bounds its own fetches with a fresh semaphore, so a large universe
// does not open one request per symbol at once and concurrent scans from
// different sessions never wait on each other's permits.
// =============================================================================

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{ScanError, SourceError, SymbolError};
use crate::indicators::{compute_atr, compute_rsi};
use crate::market_data::MarketDataSource;
use crate::rsi_store::PreviousRsiStore;
use crate::types::{IndicatorReading, IndicatorSnapshot, SnapshotEntry, SymbolFailure};

pub struct UniverseScanner {
    source: Arc<dyn MarketDataSource>,
    store: Arc<PreviousRsiStore>,
    bar_limit: u32,
    max_concurrent_fetches: usize,
}

impl UniverseScanner {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        store: Arc<PreviousRsiStore>,
        bar_limit: u32,
        max_concurrent_fetches: usize,
    ) -> Self {
        Self {
            source,
            store,
            bar_limit,
            max_concurrent_fetches: max_concurrent_fetches.max(1),
        }
    }

    pub fn store(&self) -> &Arc<PreviousRsiStore> {
        &self.store
    }

    /// Compute a snapshot for every tradable symbol at `interval`.
    pub async fn scan(&self, interval: &str) -> Result<IndicatorSnapshot, ScanError> {
        let started = Instant::now();
        let symbols = self.source.list_tradable_symbols().await?;

        let permits = Semaphore::new(self.max_concurrent_fetches);
        let entries: IndicatorSnapshot = join_all(
            symbols
                .iter()
                .map(|symbol| self.scan_symbol(&permits, symbol, interval)),
        )
        .await;

        let failed: Vec<&str> = entries
            .iter()
            .filter(|e| !e.is_ok())
            .map(SnapshotEntry::symbol)
            .collect();
        if !failed.is_empty() {
            debug!(interval, symbols = ?failed, "symbols without a reading");
        }

        let ok = entries.len() - failed.len();
        info!(
            interval,
            symbols = entries.len(),
            ok,
            failed = failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scan complete"
        );

        Ok(entries)
    }

    async fn scan_symbol(
        &self,
        permits: &Semaphore,
        symbol: &str,
        interval: &str,
    ) -> SnapshotEntry {
        match self.evaluate(permits, symbol, interval).await {
            Ok(reading) => SnapshotEntry::Reading(reading),
            Err(e) => {
                debug!(symbol, interval, error = %e, "symbol skipped");
                SnapshotEntry::Failure(SymbolFailure {
                    symbol: symbol.to_string(),
                    error: e.to_string(),
                })
            }
        }
    }

    async fn evaluate(
        &self,
        permits: &Semaphore,
        symbol: &str,
        interval: &str,
    ) -> Result<IndicatorReading, SymbolError> {
        let bars = {
            let _permit = permits
                .acquire()
                .await
                .map_err(|_| SourceError::Unavailable("scanner is shutting down".to_string()))?;
            self.source.fetch_bars(symbol, interval, self.bar_limit).await?
        };

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        // No await between read and write: the previous value is the one
        // current at the moment this symbol's RSI is recorded.
        let previous = self.store.get(symbol);
        let rsi = compute_rsi(&closes, previous)?;
        self.store.set(symbol, rsi.value);

        let atr = compute_atr(&bars)?;

        Ok(IndicatorReading {
            symbol: symbol.to_string(),
            rsi: rsi.value,
            atr,
            direction: rsi.direction,
            interval: interval.to_string(),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::testing::{bars_from_closes, wave, FakeSource};
    use crate::types::{Direction, RsiCategory};
    use std::time::Duration;

    fn build(source: FakeSource, permits: usize) -> (UniverseScanner, Arc<FakeSource>) {
        let source = Arc::new(source);
        let scanner = UniverseScanner::new(
            source.clone(),
            Arc::new(PreviousRsiStore::new()),
            100,
            permits,
        );
        (scanner, source)
    }

    #[tokio::test]
    async fn one_failing_symbol_is_isolated() {
        let source = FakeSource::new(&["AAA", "BBB", "CCC", "DDD"])
            .with_bars("AAA", wave(40, 0.0))
            .with_error("BBB", SourceError::Unavailable("timeout".into()))
            .with_bars("CCC", wave(40, 5.0))
            .with_bars("DDD", wave(40, 10.0));
        let (scanner, _) = build(source, 16);

        let snapshot = scanner.scan("15m").await.unwrap();
        let symbols: Vec<&str> = snapshot.iter().map(|e| e.symbol()).collect();
        assert_eq!(symbols, vec!["AAA", "BBB", "CCC", "DDD"]);

        assert!(snapshot[0].is_ok());
        assert!(snapshot[2].is_ok());
        assert!(snapshot[3].is_ok());
        match &snapshot[1] {
            SnapshotEntry::Failure(f) => assert!(f.error.contains("timeout")),
            other => panic!("expected failure entry, got {other:?}"),
        }
        if let SnapshotEntry::Reading(r) = &snapshot[0] {
            assert_eq!(r.interval, "15m");
        }
    }

    #[tokio::test]
    async fn failing_symbol_does_not_change_other_entries() {
        let healthy = FakeSource::new(&["AAA", "CCC"])
            .with_bars("AAA", wave(40, 0.0))
            .with_bars("CCC", wave(40, 5.0));
        let (healthy, _) = build(healthy, 16);
        let baseline = healthy.scan("30m").await.unwrap();

        let mixed = FakeSource::new(&["AAA", "BBB", "CCC"])
            .with_bars("AAA", wave(40, 0.0))
            .with_bars("CCC", wave(40, 5.0));
        let (mixed, _) = build(mixed, 16);
        let snapshot = mixed.scan("30m").await.unwrap();

        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0], baseline[0]);
        assert_eq!(snapshot[2], baseline[1]);
        assert!(!snapshot[1].is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn order_follows_symbol_list_not_completion() {
        let source = FakeSource::new(&["SLOW", "MID", "FAST"])
            .with_bars("SLOW", wave(40, 0.0))
            .with_bars("MID", wave(40, 1.0))
            .with_bars("FAST", wave(40, 2.0))
            .with_delay("SLOW", Duration::from_millis(300))
            .with_delay("MID", Duration::from_millis(200))
            .with_delay("FAST", Duration::from_millis(100));
        let (scanner, _) = build(source, 16);

        let snapshot = scanner.scan("1m").await.unwrap();
        let symbols: Vec<&str> = snapshot.iter().map(|e| e.symbol()).collect();
        assert_eq!(symbols, vec!["SLOW", "MID", "FAST"]);
    }

    #[tokio::test(start_paused = true)]
    async fn symbols_are_fetched_concurrently() {
        let mut source = FakeSource::new(&["A", "B", "C", "D"]);
        for s in ["A", "B", "C", "D"] {
            source = source
                .with_bars(s, wave(40, 0.0))
                .with_delay(s, Duration::from_millis(100));
        }
        let (scanner, _) = build(source, 16);

        let started = Instant::now();
        scanner.scan("1m").await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_concurrency_is_bounded() {
        let mut source = FakeSource::new(&["A", "B", "C", "D"]);
        for s in ["A", "B", "C", "D"] {
            source = source
                .with_bars(s, wave(40, 0.0))
                .with_delay(s, Duration::from_millis(100));
        }
        let (scanner, _) = build(source, 1);

        let started = Instant::now();
        let snapshot = scanner.scan("1m").await.unwrap();
        assert_eq!(snapshot.len(), 4);
        assert!(started.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_scans_do_not_share_the_fetch_bound() {
        let mut source = FakeSource::new(&["A", "B"]);
        for s in ["A", "B"] {
            source = source
                .with_bars(s, wave(40, 0.0))
                .with_delay(s, Duration::from_millis(100));
        }
        let (scanner, _) = build(source, 1);

        let started = Instant::now();
        let (first, second) = tokio::join!(scanner.scan("30m"), scanner.scan("1h"));
        assert_eq!(first.unwrap().len(), 2);
        assert_eq!(second.unwrap().len(), 2);

        // Each scan runs its two fetches back to back; the scans overlap.
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn listing_failure_fails_the_scan() {
        let (scanner, source) = build(FakeSource::new(&["A"]), 16);
        source.fail_listing(SourceError::Unavailable("502".into()));

        assert_eq!(
            scanner.scan("30m").await,
            Err(ScanError::Source(SourceError::Unavailable("502".into())))
        );
        assert_eq!(source.fetches.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn short_history_is_an_entry_error_and_leaves_store_untouched() {
        let source = FakeSource::new(&["SHORT"]).with_bars("SHORT", wave(10, 0.0));
        let (scanner, _) = build(source, 16);

        let snapshot = scanner.scan("30m").await.unwrap();
        match &snapshot[0] {
            SnapshotEntry::Failure(f) => assert!(f.error.contains("insufficient data")),
            other => panic!("expected failure entry, got {other:?}"),
        }
        assert_eq!(scanner.store().get("SHORT"), None);
    }

    #[tokio::test]
    async fn direction_tracks_previous_scan() {
        let closes = [
            44.0, 44.25, 44.5, 43.75, 44.65, 45.12, 45.22, 45.64, 46.21, 46.25, 45.71, 46.45,
            45.78, 45.35, 44.03, 44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        let source = FakeSource::new(&["BTCUSDT"]).with_bars("BTCUSDT", bars_from_closes(&closes, 0.5));
        let (scanner, _) = build(source, 16);

        let first = scanner.scan("30m").await.unwrap();
        let SnapshotEntry::Reading(first) = &first[0] else {
            panic!("expected reading");
        };
        assert_eq!(first.rsi, 44.6);
        assert_eq!(first.direction, Direction::Unknown);
        assert_eq!(scanner.store().get("BTCUSDT"), Some(44.6));

        let second = scanner.scan("30m").await.unwrap();
        let SnapshotEntry::Reading(second) = &second[0] else {
            panic!("expected reading");
        };
        assert_eq!(second.direction, Direction::NoChange);

        // A previous overbought reading (e.g. from another interval) shows up
        // as a transition.
        scanner.store().set("BTCUSDT", 80.0);
        let third = scanner.scan("1h").await.unwrap();
        let SnapshotEntry::Reading(third) = &third[0] else {
            panic!("expected reading");
        };
        assert_eq!(
            third.direction,
            Direction::Transition(RsiCategory::Overbought, RsiCategory::Neutral)
        );
    }

    #[tokio::test]
    async fn interval_is_passed_through_verbatim() {
        let source = FakeSource::new(&["A"]).with_bars("A", wave(40, 0.0));
        let (scanner, source) = build(source, 16);
        scanner.scan("4h").await.unwrap();
        assert_eq!(source.intervals_seen(), vec!["4h"]);
    }
}
