use chrono::TimeZone;
use chrono_tz::America::New_York;

use common::{Direction, FeedKind, Instrument, SessionWindows, Trade};
use strategy::{DispatchEvent, Dispatcher, StrategyFileConfig};

fn ny(h: u32, m: u32) -> i64 {
    New_York
        .with_ymd_and_hms(2024, 3, 4, h, m, 0)
        .unwrap()
        .timestamp_millis()
}

fn eurusd() -> Instrument {
    Instrument {
        id: "EURUSD".into(),
        feed: FeedKind::Finnhub,
        feed_symbol: "OANDA:EUR_USD".into(),
        pip_size: 0.0001,
        decimals: 5,
        tp_pips: 20.0,
        sl_pips: 25.0,
    }
}

/// Four ticks inside one minute: open, high, low, close.
fn minute(d: &mut Dispatcher, ts: i64, o: f64, h: f64, l: f64, c: f64, out: &mut Vec<DispatchEvent>) {
    for (i, p) in [o, h, l, c].into_iter().enumerate() {
        out.extend(d.process_tick(p, ts + i as i64 * 15_000));
    }
}

fn trades(events: &[DispatchEvent]) -> Vec<Trade> {
    events
        .iter()
        .filter_map(|e| match e {
            DispatchEvent::TradeOpened(t) => Some(t.clone()),
            _ => None,
        })
        .collect()
}

/// Asia range [1.1000, 1.1050], London sweep to 1.1060 closing at 1.1040, then a
/// bearish displacement to 1.1010. Returns the events seen up to the tick that
/// closes the displacement candle.
fn run_to_armed(d: &mut Dispatcher) -> Vec<DispatchEvent> {
    let mut events = Vec::new();
    let start = ny(0, 0);
    for i in 0..150 {
        let ts = start + i * 60_000;
        match i {
            10 => minute(d, ts, 1.1025, 1.1050, 1.1024, 1.1025, &mut events),
            20 => minute(d, ts, 1.1025, 1.1026, 1.1000, 1.1025, &mut events),
            _ => minute(d, ts, 1.1025, 1.1028, 1.1022, 1.1025, &mut events),
        }
    }
    minute(d, ny(2, 30), 1.1035, 1.1060, 1.1030, 1.1040, &mut events);
    minute(d, ny(2, 31), 1.1040, 1.1042, 1.1008, 1.1010, &mut events);
    events.extend(d.process_tick(1.1012, ny(2, 32)));
    events
}

#[test]
fn po3_sell_fires_exactly_once_at_zone_midpoint() {
    let cfg = StrategyFileConfig::parse(
        r#"
        [[strategy]]
        type = "po3"
        "#,
    )
    .unwrap();
    let mut d = Dispatcher::new(eurusd(), SessionWindows::default(), &cfg).unwrap();

    let mut events = run_to_armed(&mut d);
    let sessions = d.sessions();
    assert_eq!(sessions.asia_high, Some(1.1050));
    assert_eq!(sessions.asia_low, Some(1.1000));
    assert!(sessions.asia_locked);
    assert!(trades(&events).is_empty());
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, DispatchEvent::SnapshotReady(_)))
            .count(),
        1
    );

    // below the zone, then the midpoint of the 50-100% body retracement
    events.extend(d.process_tick(1.1020, ny(2, 32) + 10_000));
    events.extend(d.process_tick(1.10325, ny(2, 32) + 20_000));
    events.extend(d.process_tick(1.10325, ny(2, 32) + 30_000));
    events.extend(d.process_tick(1.1035, ny(2, 33)));

    let opened = trades(&events);
    assert_eq!(opened.len(), 1);
    let t = &opened[0];
    assert_eq!(t.strategy, "PO3");
    assert_eq!(t.direction, Direction::Sell);
    assert_eq!(t.entry_price, 1.10325);
    assert_eq!(t.entry_time_ms, ny(2, 32) + 20_000);
    assert!((t.stop_price - 1.10575).abs() < 1e-9);
    assert!((t.target_price - 1.10125).abs() < 1e-9);
    assert_eq!(t.variant_label, "TP20/SL25");
    assert_eq!(t.sessions.asia_high, Some(1.1050));
}

#[test]
fn po3_native_stops_use_sweep_extreme_and_first_target() {
    let cfg = StrategyFileConfig::parse(
        r#"
        [[strategy]]
        type = "po3"
        stops = "native"
        "#,
    )
    .unwrap();
    let mut d = Dispatcher::new(eurusd(), SessionWindows::default(), &cfg).unwrap();

    let mut events = run_to_armed(&mut d);
    events.extend(d.process_tick(1.1030, ny(2, 32) + 10_000));

    let opened = trades(&events);
    assert_eq!(opened.len(), 1);
    let t = &opened[0];
    assert_eq!(t.variant_label, "Native");
    assert!((t.stop_price - 1.1065).abs() < 1e-9);
    assert!((t.target_price - 1.1000).abs() < 1e-9);
}

#[test]
fn next_day_resets_and_archives_once() {
    let cfg = StrategyFileConfig::parse("").unwrap();
    let mut d = Dispatcher::new(eurusd(), SessionWindows::default(), &cfg).unwrap();
    let mut events = Vec::new();

    minute(&mut d, ny(22, 0), 1.1000, 1.1100, 1.0900, 1.1050, &mut events);
    for m in 1..30 {
        minute(&mut d, ny(22, m), 1.1050, 1.1060, 1.1040, 1.1050, &mut events);
    }
    let next_day = ny(0, 0) + 24 * 3_600_000;
    minute(&mut d, next_day, 1.1050, 1.1055, 1.1045, 1.1052, &mut events);
    minute(&mut d, next_day + 60_000, 1.1052, 1.1055, 1.1045, 1.1052, &mut events);

    let s = d.sessions();
    assert_eq!(s.prev_day_high, Some(1.1100));
    assert_eq!(s.prev_day_low, Some(1.0900));
    assert_eq!(s.prev_day_close, Some(1.1050));
    assert_eq!(s.daily_open, Some(1.1050));
    assert_eq!(s.today_high, Some(1.1055));
}
