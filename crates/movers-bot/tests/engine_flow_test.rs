//! End-to-end engine flow.
//!
//! Scripted market data drives the scan loop while live feeds connect to
//! the local ticker mock: a mover enters, receives ticks, leaves and has its
//! connection released.

mod integration;
use integration::common::mock_ws::MockWsServer;

use movers_bot::{AppConfig, Application};
use movers_core::{InstrumentKey, Price, ScanPhase, Segment};
use movers_feed::{StreamConfig, TickerStreamSource};
use movers_registry::MockMarketData;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

#[tokio::test]
async fn test_mover_lifecycle_over_websocket() {
    movers_ws::init_crypto();
    let server = MockWsServer::start().await;

    let (mover, calm) = (
        InstrumentKey::new("PEPEUSDT", Segment::Linear),
        InstrumentKey::new("BTCUSDT", Segment::Linear),
    );
    let market = Arc::new(MockMarketData::new());
    market.set_universe(vec![mover.clone(), calm.clone()]);
    market.set_closes(&mover, dec!(0.001), dec!(0.00125));
    market.set_closes(&calm, dec!(43000), dec!(43100));

    let mut config = AppConfig::default();
    config.ws_base_url = server.url();
    config.scan_loop.scan_interval_secs = 1;
    config.feed.stop_grace_ms = 1_000;
    let streams = Arc::new(TickerStreamSource::new(StreamConfig {
        connect_timeout_ms: 2_000,
        ..config.stream_config()
    }));

    let app = Application::with_sources(config, market.clone(), streams);
    let handle = app.handle();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(app.run_until(shutdown.clone()));

    // enters and subscribes
    assert!(server.wait_for(WAIT, |s| s.is_subscribed("tickers.PEPEUSDT")).await);
    assert!(!server.is_subscribed("tickers.BTCUSDT"));
    let snap = handle.snapshot();
    assert_eq!(snap.active.len(), 1);
    assert_eq!(snap.active[0].key, mover);
    assert_eq!(snap.active[0].record.max_abs_change_pct, dec!(25));

    // live ticks reach the store
    server.push_ticker("tickers.PEPEUSDT", 1_700_000_000_000, "0.0015");
    assert!(
        wait_until(|| {
            handle.snapshot().active.first().and_then(|v| v.latest_price).map(|s| s.price)
                == Some(Price::new(dec!(0.0015)))
        })
        .await
    );
    assert_eq!(handle.snapshot().active[0].change_since_entry_pct, Some(dec!(20)));

    // drops below the threshold on a later scan
    market.set_closes(&mover, dec!(0.00125), dec!(0.0013));
    assert!(wait_until(|| handle.snapshot().archived.len() == 1).await);
    assert!(server.wait_for(WAIT, |s| s.active_connections() == 0).await);
    assert_eq!(server.close_frames(), 1);

    let archived = &handle.snapshot().archived[0];
    assert_eq!(archived.key, mover);
    assert!(archived.record.left_at.unwrap() >= archived.record.entered_at);
    assert_eq!(archived.record.max_abs_change_pct, dec!(25));

    shutdown.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(handle.status().phase, ScanPhase::Stopped);
    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_releases_all_connections() {
    movers_ws::init_crypto();
    let server = MockWsServer::start().await;

    let keys: Vec<_> = ["AAAUSDT", "BBBUSDT", "CCCUSDT"]
        .iter()
        .map(|s| InstrumentKey::new(*s, Segment::Spot))
        .collect();
    let market = Arc::new(MockMarketData::new());
    market.set_universe(keys.clone());
    for key in &keys {
        market.set_closes(key, dec!(10), dec!(8));
    }

    let mut config = AppConfig::default();
    config.ws_base_url = server.url();
    let streams = Arc::new(TickerStreamSource::new(config.stream_config()));
    let app = Application::with_sources(config, market, streams);
    let handle = app.handle();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(app.run_until(shutdown.clone()));

    assert!(server.wait_for(WAIT, |s| s.active_connections() == 3).await);
    assert_eq!(handle.status().active_count, 3);
    assert!(server.paths().iter().all(|p| p == "/spot"));

    shutdown.cancel();
    task.await.unwrap().unwrap();

    assert!(server.wait_for(WAIT, |s| s.active_connections() == 0).await);
    assert_eq!(server.close_frames(), 3);
    // episodes stay open; only the feeds stop
    assert_eq!(handle.snapshot().active.len(), 3);
    server.shutdown().await;
}
