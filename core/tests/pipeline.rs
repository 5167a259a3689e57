//! Period pipeline invariants over full runs.

use trove_sim_core::{
    engine::SimEngine,
    error::SimError,
    event::SimEvent,
    ledger::Ledger,
    snapshot::{SimSnapshot, SNAPSHOT_INTERVAL},
    types::WHALE,
};

fn run(run_id: &str, seed: u64) -> SimEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut engine = SimEngine::build_test(run_id.into(), seed).unwrap();
    engine.run_to_horizon().unwrap();
    engine
}

#[test]
fn setup_opens_whale_and_initial_cohort() {
    let mut engine = SimEngine::build_test("setup-test".into(), 42).unwrap();
    engine.initialize().unwrap();

    let config = engine.config().clone();
    let state = engine.state();
    assert!(state.pool.is_active(WHALE));
    // Whale plus every initial borrower the ledger accepted.
    assert_eq!(
        state.pool.active_count(),
        1 + config.initial_borrowers - state.summary.skipped
    );
    assert!((engine.ledger().stability_deposit(WHALE) - config.stability.initial_deposit).abs() < 1e-6);

    let events = engine.store_events_for_period("setup-test", 0).unwrap();
    assert_eq!(events[0].event_type, "run_initialized");
    assert!(events.iter().any(|e| e.phase == "setup" && e.event_type == "position_opened"));
}

#[test]
fn active_count_identity_holds_every_period() {
    let engine = run("identity-test", 42);
    let reporter = engine.reporter().unwrap();
    assert_eq!(reporter.history().len() as u64, engine.config().horizon);

    for r in reporter.history() {
        assert_eq!(
            r.active_count,
            r.active_at_start + r.opened - r.liquidated - r.closed,
            "identity broken in period {}",
            r.period
        );
    }
}

#[test]
fn active_accounts_match_ledger_positions() {
    let engine = run("sync-test", 3);
    let mut active = engine.state().pool.query_active().to_vec();
    active.sort_unstable();
    assert_eq!(active, engine.ledger().open_positions());

    for &id in engine.state().pool.query_active() {
        let account = engine.state().pool.get(id).unwrap();
        let position = engine.ledger().query_position_state(id).unwrap();
        assert_eq!(account.collateral, position.collateral);
        assert_eq!(account.debt, position.debt);
    }
}

#[test]
fn liquidated_collateral_is_monotonic_and_bounded() {
    let engine = run("monotonic-test", 1234);
    let history = engine.reporter().unwrap().history();

    let mut prev = 0.0;
    for r in history {
        let agg = &r.aggregates;
        assert!(agg.coll_liquidated >= prev, "period {} went backwards", r.period);
        assert!(agg.coll_liquidated <= agg.coll_added * (1.0 + 1e-9));
        prev = agg.coll_liquidated;
    }
}

#[test]
fn stable_price_is_positive_and_capped() {
    let engine = run("price-test", 5);
    let ceiling = engine.config().market.price_ceiling;
    for r in engine.reporter().unwrap().history() {
        assert!(r.stable_price > 0.0 && r.stable_price.is_finite());
        assert!(r.stable_price <= ceiling);
    }
}

#[test]
fn each_period_emits_events_in_phase_order() {
    let engine = run("order-test", 11);
    let order = [
        "engine",
        "price_update",
        "liquidation",
        "settlement",
        "closure",
        "adjustment",
        "opening",
        "stability",
        "price_discovery",
        "redemption",
    ];
    let rank = |phase: &str| order.iter().position(|p| *p == phase).unwrap();

    let events = engine.store_events_for_period("order-test", 3).unwrap();
    assert_eq!(events.first().unwrap().event_type, "period_started");
    assert_eq!(events.last().unwrap().event_type, "period_completed");
    let inner = &events[1..events.len() - 1];
    for pair in inner.windows(2) {
        assert!(rank(&pair[0].phase) <= rank(&pair[1].phase));
    }
    for phase in ["price_update", "settlement", "price_discovery"] {
        assert!(inner.iter().any(|e| e.phase == phase), "no event from {phase}");
    }
}

#[test]
fn events_round_trip_from_the_store() {
    let engine = run("payload-test", 8);
    let events = engine.store_events_for_period("payload-test", 2).unwrap();
    for entry in events {
        let event: SimEvent = serde_json::from_str(&entry.payload).unwrap();
        assert_eq!(event.type_name(), entry.event_type);
    }
}

#[test]
fn reports_and_snapshots_are_persisted() {
    let engine = run("persist-test", 21);
    let horizon = engine.config().horizon;
    let reports = engine.store().period_reports("persist-test").unwrap();
    assert_eq!(reports.len() as u64, horizon);
    let periods: Vec<_> = reports.iter().map(|r| r.period).collect();
    assert_eq!(periods, (1..=horizon).collect::<Vec<_>>());
    let observed = engine.reporter().unwrap().history();
    for (stored, seen) in reports.iter().zip(observed) {
        assert_eq!(stored.active_count, seen.active_count);
        assert_eq!(stored.liquidated, seen.liquidated);
    }

    let (period, json) = engine
        .store()
        .latest_snapshot_before("persist-test", SNAPSHOT_INTERVAL + 1)
        .unwrap()
        .expect("snapshot at the interval");
    assert_eq!(period, SNAPSHOT_INTERVAL);
    let snapshot: SimSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(snapshot.clock.current_period, SNAPSHOT_INTERVAL);
    assert_eq!(
        snapshot.active.len() + snapshot.inactive.len(),
        engine.state().pool.len()
    );

    let (last, _) = engine
        .store()
        .latest_snapshot_before("persist-test", horizon)
        .unwrap()
        .unwrap();
    assert_eq!(last, horizon);
}

#[test]
fn running_past_the_horizon_is_an_error() {
    let mut engine = run("horizon-test", 2);
    assert!(engine.clock.is_finished());
    let err = engine.run_period().unwrap_err();
    assert!(matches!(err, SimError::HorizonExhausted { .. }));
    // run_periods stops quietly instead.
    engine.run_periods(3).unwrap();
}
