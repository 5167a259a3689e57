//! Property tests over seeds and price volatility.

use proptest::prelude::*;
use trove_sim_core::{config::SimConfig, engine::SimEngine};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn stable_price_stays_positive_for_any_seed(seed in any::<u64>()) {
        let mut engine = SimEngine::build_test(format!("prop-price-{seed}"), seed).unwrap();
        engine.run_to_horizon().unwrap();
        for r in engine.reporter().unwrap().history() {
            prop_assert!(r.stable_price.is_finite() && r.stable_price > 0.0);
        }
    }

    #[test]
    fn invariants_hold_under_volatile_prices(seed in any::<u64>(), sd in 0.0f64..0.25) {
        let mut config = SimConfig::default_test();
        config.price.sd = sd;
        let mut engine = SimEngine::build_test_with(format!("prop-vol-{seed}"), seed, config).unwrap();
        engine.run_to_horizon().unwrap();

        let mut prev_liquidated = 0.0;
        for r in engine.reporter().unwrap().history() {
            prop_assert_eq!(r.active_count, r.active_at_start + r.opened - r.liquidated - r.closed);
            prop_assert!(r.aggregates.coll_liquidated >= prev_liquidated);
            prop_assert!(r.aggregates.coll_liquidated <= r.aggregates.coll_added * (1.0 + 1e-9));
            prev_liquidated = r.aggregates.coll_liquidated;
        }
    }
}
