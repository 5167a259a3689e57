//! THE MOST IMPORTANT TEST IN THE PROJECT.
//!
//! Two engines, same seed, same configuration.
//! They must produce byte-identical event logs and period reports.
//! Any divergence is a blocker: do not merge until fixed.

use trove_sim_core::engine::SimEngine;

fn build_engine(seed: u64) -> SimEngine {
    SimEngine::build_test(format!("det-test-{seed}"), seed).expect("build engine")
}

fn collect_event_log(engine: &SimEngine) -> Vec<String> {
    // All event payloads in period+id order, setup included.
    (0..=engine.clock.current_period)
        .flat_map(|period| {
            engine
                .store_events_for_period(&engine.run_id, period)
                .expect("read events")
                .into_iter()
                .map(|e| format!("{}|{}|{}", e.phase, e.event_type, e.payload))
        })
        .collect()
}

#[test]
fn same_seed_produces_identical_event_logs() {
    const SEED: u64 = 0xDEAD_BEEF_CAFE_1234;

    let mut engine_a = build_engine(SEED);
    let mut engine_b = build_engine(SEED);

    engine_a.run_to_horizon().expect("engine_a run");
    engine_b.run_to_horizon().expect("engine_b run");

    let log_a = collect_event_log(&engine_a);
    let log_b = collect_event_log(&engine_b);

    assert_eq!(
        log_a.len(), log_b.len(),
        "Event log lengths differ: {} vs {}",
        log_a.len(), log_b.len()
    );
    for (i, (a, b)) in log_a.iter().zip(log_b.iter()).enumerate() {
        assert_eq!(a, b, "Event log diverged at entry {i}:\n  A: {a}\n  B: {b}");
    }

    let reports_a = engine_a.store().period_reports(&engine_a.run_id).unwrap();
    let reports_b = engine_b.store().period_reports(&engine_b.run_id).unwrap();
    assert_eq!(reports_a, reports_b);
}

#[test]
fn different_seeds_produce_different_logs() {
    let mut engine_a = build_engine(42);
    let mut engine_b = build_engine(99);

    engine_a.run_periods(5).expect("run a");
    engine_b.run_periods(5).expect("run b");

    // Period 0 carries the seed itself; compare only what the seed drove.
    let oracle_prices = |engine: &SimEngine| -> Vec<String> {
        (1..=engine.clock.current_period)
            .flat_map(|period| {
                engine
                    .store_events_for_period(&engine.run_id, period)
                    .expect("read events")
                    .into_iter()
                    .filter(|e| e.event_type == "oracle_price_set")
                    .map(|e| e.payload)
            })
            .collect()
    };
    let prices_a = oracle_prices(&engine_a);
    let prices_b = oracle_prices(&engine_b);

    assert_eq!(prices_a.len(), 5);
    assert_eq!(prices_a.len(), prices_b.len());
    assert_ne!(prices_a, prices_b, "Different seeds drew identical price paths, seed is not being used");
}

#[test]
fn stepping_matches_a_single_run() {
    let mut stepped = build_engine(7);
    let mut whole = build_engine(7);

    for _ in 0..4 {
        stepped.run_periods(5).unwrap();
    }
    whole.run_to_horizon().unwrap();

    assert_eq!(collect_event_log(&stepped), collect_event_log(&whole));
}
