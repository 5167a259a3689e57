//! The simulation engine: drives the period pipeline.
//!
//! SETUP (period 0, once):
//!   oracle price, whale position and stability deposit, initial cohort
//!
//! EXECUTION ORDER per period (fixed, documented, never reordered):
//!   1. Price update
//!   2. Liquidation
//!   3. Stability pool return settlement
//!   4. Closure
//!   5. Adjustment
//!   6. Opening
//!   7. Stability pool update
//!   8. Price discovery
//!   9. Redemption
//!   then the end-of-period checks, the report, observers
//!
//! RULES:
//!   - Phases execute in registration order, once per period.
//!   - Each phase sees the events emitted earlier in the period.
//!   - No phase calls another phase's functions directly.
//!   - All randomness flows through the RngBank.
//!   - All state changes are recorded in the event log.
//!   - The active sequence is only re-sorted between periods.

use crate::{
    account_pool::PositionAttrs,
    adjustment_phase::AdjustmentPhase,
    clock::SimClock,
    closure_phase::ClosurePhase,
    config::SimConfig,
    error::{InvariantKind, SimError, SimResult},
    event::{EventLogEntry, SimEvent},
    ledger::{Ledger, MemoryLedger},
    liquidation_phase::LiquidationPhase,
    opening_phase::{open_borrower, OpeningPhase},
    phase::{absorb, SimPhase},
    price_discovery_phase::PriceDiscoveryPhase,
    price_update_phase::PriceUpdatePhase,
    redemption_phase::RedemptionPhase,
    reporter::{AggregateReporter, PeriodObserver, PeriodReport},
    rng::{PhaseSlot, RngBank},
    settlement_phase::SettlementPhase,
    snapshot::{SimSnapshot, SNAPSHOT_INTERVAL},
    stability_phase::StabilityPhase,
    state::SimulationState,
    stochastic::{OpeningDistributions, PricePath},
    store::SimStore,
    types::{Period, RunId, WHALE},
};

const ENGINE: &str = "engine";
const SETUP: &str = "setup";

pub struct SimEngine {
    pub run_id:   RunId,
    pub clock:    SimClock,
    pub rng_bank: RngBank,
    seed:         u64,
    config:       SimConfig,
    phases:       Vec<(PhaseSlot, Box<dyn SimPhase>)>,
    observers:    Vec<Box<dyn PeriodObserver>>,
    state:        SimulationState,
    ledger:       Box<dyn Ledger>,
    store:        SimStore,
    initialized:  bool,
}

impl SimEngine {
    /// An engine with no phases registered. The price path is drawn
    /// from the seed right away.
    pub fn new(
        run_id: RunId,
        seed: u64,
        config: SimConfig,
        ledger: Box<dyn Ledger>,
        store: SimStore,
    ) -> SimResult<Self> {
        config.validate()?;
        let rng_bank = RngBank::new(seed);
        let mut path_rng = rng_bank.for_phase_at_period(PhaseSlot::PricePath, 0);
        let price_path = PricePath::generate(&config.price, config.horizon, &mut path_rng);
        Ok(Self {
            clock: SimClock::new(run_id.clone(), config.horizon),
            rng_bank,
            seed,
            phases: Vec::new(),
            observers: Vec::new(),
            state: SimulationState::new(config.population, price_path),
            ledger,
            store,
            initialized: false,
            config,
            run_id,
        })
    }

    /// Build a fully wired engine against the in-memory reference ledger.
    pub fn build(run_id: RunId, seed: u64, config: SimConfig, store: SimStore) -> SimResult<Self> {
        let ledger = Box::new(MemoryLedger::new(config.ledger.clone()));
        Self::build_with_ledger(run_id, seed, config, ledger, store)
    }

    /// Build a fully wired engine against any ledger implementation.
    pub fn build_with_ledger(
        run_id: RunId,
        seed: u64,
        config: SimConfig,
        ledger: Box<dyn Ledger>,
        store: SimStore,
    ) -> SimResult<Self> {
        let mut engine = SimEngine::new(run_id, seed, config, ledger, store)?;
        let c = engine.config.clone();

        // EXECUTION ORDER: fixed, never reordered.
        engine.register(PhaseSlot::PriceUpdate, Box::new(PriceUpdatePhase::new()));
        engine.register(
            PhaseSlot::Liquidation,
            Box::new(LiquidationPhase::new(c.liquidation_cr, c.stability.airdrop_per_period)),
        );
        engine.register(PhaseSlot::Settlement, Box::new(SettlementPhase::new()));
        engine.register(PhaseSlot::Closure, Box::new(ClosurePhase::new(c.closure.clone())));
        engine.register(PhaseSlot::Adjustment, Box::new(AdjustmentPhase::new(c.adjustment.clone())));
        engine.register(
            PhaseSlot::Opening,
            Box::new(OpeningPhase::new(
                c.opening.clone(),
                c.liquidation_cr,
                c.max_fee,
                c.population,
            )?),
        );
        engine.register(PhaseSlot::Stability, Box::new(StabilityPhase::new(c.stability.clone())));
        engine.register(PhaseSlot::PriceDiscovery, Box::new(PriceDiscoveryPhase::new(c.market.clone())));
        engine.register(
            PhaseSlot::Redemption,
            Box::new(RedemptionPhase::new(c.redemption.clone(), c.max_fee)),
        );

        engine.add_observer(Box::new(AggregateReporter::new()));
        Ok(engine)
    }

    /// In-memory store, default test config, run row inserted.
    pub fn build_test(run_id: RunId, seed: u64) -> SimResult<Self> {
        Self::build_test_with(run_id, seed, SimConfig::default_test())
    }

    pub fn build_test_with(run_id: RunId, seed: u64, config: SimConfig) -> SimResult<Self> {
        let store = SimStore::in_memory()?;
        store.migrate()?;
        store.insert_run(&run_id, seed, env!("CARGO_PKG_VERSION"))?;
        Self::build(run_id, seed, config, store)
    }

    /// Replace the generated price path. Only valid before the run starts;
    /// the horizon follows the new path.
    pub fn with_price_path(mut self, path: PricePath) -> SimResult<Self> {
        if self.initialized {
            return Err(SimError::Config(
                "price path cannot be replaced once the run has started".into(),
            ));
        }
        if path.horizon() == 0 {
            return Err(SimError::Config("price path must cover at least one period".into()));
        }
        self.clock.horizon = path.horizon();
        self.state = SimulationState::new(self.config.population, path);
        Ok(self)
    }

    /// Register a phase. Call in the documented execution order.
    pub fn register(&mut self, slot: PhaseSlot, phase: Box<dyn SimPhase>) {
        self.phases.push((slot, phase));
    }

    pub fn add_observer(&mut self, observer: Box<dyn PeriodObserver>) {
        self.observers.push(observer);
    }

    /// Period 0: open the whale, seed the stability pool and open the
    /// initial cohort. Runs at most once; `run_period` calls it lazily.
    pub fn initialize(&mut self) -> SimResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.state.begin_period(0);
        persist(
            &self.store,
            &self.run_id,
            0,
            ENGINE,
            &[SimEvent::RunInitialized { run_id: self.run_id.clone(), seed: self.seed }],
        )?;

        let events = self.setup()?;
        persist(&self.store, &self.run_id, 0, SETUP, &events)?;
        self.end_of_period_checks(0)?;
        self.initialized = true;

        log::info!(
            "run={} seed={} initialized: {} active, {} periods ahead",
            self.run_id,
            self.seed,
            self.state.pool.active_count(),
            self.clock.remaining(),
        );
        Ok(())
    }

    fn setup(&mut self) -> SimResult<Vec<SimEvent>> {
        let mut events = Vec::new();
        let price = self.state.price_path.initial();
        let whale = self.config.whale.clone();
        let ledger = self.ledger.as_mut();
        let state = &mut self.state;

        ledger.set_oracle_price(price).map_err(|e| SimError::ledger(0, e))?;
        state.market.ether_price = price;
        state.summary.ether_price = price;
        events.push(SimEvent::OraclePriceSet { period: 0, price });

        let fee_rate = ledger.borrowing_rate();
        ledger
            .open_position(self.config.max_fee, whale.debt, whale.collateral, WHALE)
            .map_err(|e| SimError::Config(format!("whale position refused: {e}")))?;
        let position = ledger.query_position_state(WHALE).map_err(|e| SimError::ledger(0, e))?;
        state.pool.move_to_active(
            WHALE,
            PositionAttrs {
                collateral:  position.collateral,
                debt:        position.debt,
                target_cr:   position.cr,
                inattention: 1.0,
                price,
            },
            0,
        )?;
        state.aggregates.coll_added += whale.collateral;
        state.aggregates.openings += 1;
        state.aggregates.issuance_fees += whale.debt * fee_rate;
        state.summary.coll_added += whale.collateral;
        state.summary.opened.push(WHALE);
        events.push(SimEvent::PositionOpened {
            period: 0,
            account: WHALE,
            collateral: whale.collateral,
            debt: position.debt,
            target_cr: position.cr,
            fee_rate,
        });

        let deposit = self.config.stability.initial_deposit;
        if deposit > 0.0 {
            let provided = ledger.provide_stability_deposit(WHALE, deposit);
            if absorb(provided, 0, SETUP, Some(WHALE), state, &mut events)?.is_some() {
                events.push(SimEvent::StabilityDepositChanged {
                    period: 0,
                    account: WHALE,
                    delta: deposit,
                    deposit: ledger.stability_deposit(WHALE),
                });
            }
        }

        let distributions =
            OpeningDistributions::from_config(&self.config.opening, self.config.liquidation_cr)?;
        let mut rng = self.rng_bank.for_phase_at_period(PhaseSlot::Setup, 0);
        for _ in 0..self.config.initial_borrowers {
            let eligible = state.pool.inactive_borrowers();
            if eligible.is_empty() {
                break;
            }
            let id = eligible[rng.next_u64_below(eligible.len() as u64) as usize];
            let draw = distributions.draw(&mut rng);
            open_borrower(id, draw, self.config.max_fee, 0, SETUP, state, ledger, &mut events)?;
        }
        state.market.issuance_fee = ledger.borrowing_rate();
        state.summary.active_after_opening = state.pool.active_count();
        Ok(events)
    }

    /// Run one period through all nine phases.
    pub fn run_period(&mut self) -> SimResult<PeriodReport> {
        self.initialize()?;
        if self.clock.is_finished() {
            return Err(SimError::HorizonExhausted { horizon: self.clock.horizon });
        }

        let period = self.clock.advance();
        self.state.begin_period(period);
        let started = SimEvent::PeriodStarted { period };
        persist(&self.store, &self.run_id, period, ENGINE, std::slice::from_ref(&started))?;
        let mut period_events = vec![started];

        // Each phase sees all events emitted so far this period.
        for (slot, phase) in &mut self.phases {
            let mut rng = self.rng_bank.for_phase_at_period(*slot, period);
            let new_events = phase.update(
                period,
                &period_events,
                &mut self.state,
                self.ledger.as_mut(),
                &mut rng,
            )?;
            persist(&self.store, &self.run_id, period, phase.name(), &new_events)?;
            period_events.extend(new_events);
        }

        self.end_of_period_checks(period)?;

        let completed = SimEvent::PeriodCompleted { period };
        persist(&self.store, &self.run_id, period, ENGINE, std::slice::from_ref(&completed))?;

        let global = self
            .ledger
            .query_global_state()
            .map_err(|e| SimError::ledger(period, e))?;
        let report = PeriodReport::from_state(&self.state, global);
        self.store.save_period_report(&self.run_id, &report)?;
        for observer in &mut self.observers {
            observer.on_period_complete(&report);
        }

        if period % SNAPSHOT_INTERVAL == 0 || self.clock.is_finished() {
            self.take_snapshot(period)?;
        }

        log::debug!(
            "period={period} done: ether={:.2} stable={:.4} active={} liquidated={} closed={} opened={}",
            report.ether_price,
            report.stable_price,
            report.active_count,
            report.liquidated,
            report.closed,
            report.opened,
        );
        Ok(report)
    }

    /// Run `n` periods, stopping early at the horizon.
    pub fn run_periods(&mut self, n: u64) -> SimResult<()> {
        for _ in 0..n {
            if self.clock.is_finished() {
                break;
            }
            self.run_period()?;
        }
        Ok(())
    }

    pub fn run_to_horizon(&mut self) -> SimResult<()> {
        self.run_periods(self.clock.remaining())?;
        log::info!(
            "run={} finished after {} periods",
            self.run_id,
            self.clock.current_period
        );
        Ok(())
    }

    fn end_of_period_checks(&mut self, period: Period) -> SimResult<()> {
        if let Err(reason) = self.state.pool.check_partition() {
            return Err(self
                .state
                .invariant_violation(period, InvariantKind::PartitionBroken { reason }));
        }

        let mut active = self.state.pool.query_active().to_vec();
        active.sort_unstable();
        let open = self.ledger.open_positions();
        if active != open {
            return Err(self.state.invariant_violation(
                period,
                InvariantKind::LedgerOutOfSync { active, ledger: open },
            ));
        }

        // Redistribution and redemption move positions behind the pool's back.
        for id in active {
            let position = self
                .ledger
                .query_position_state(id)
                .map_err(|e| SimError::ledger(period, e))?;
            self.state.pool.sync_position(id, position.collateral, position.debt)?;
        }

        let agg = &self.state.aggregates;
        if agg.coll_liquidated > agg.coll_added * (1.0 + 1e-9) {
            let kind = InvariantKind::AccountingMismatch {
                coll_liquidated: agg.coll_liquidated,
                coll_added:      agg.coll_added,
            };
            return Err(self.state.invariant_violation(period, kind));
        }

        self.state.pool.resort_active(self.config.active_sort);
        Ok(())
    }

    fn take_snapshot(&self, period: Period) -> SimResult<()> {
        let snapshot = SimSnapshot::capture(&self.run_id, &self.clock, &self.state);
        let json = serde_json::to_string(&snapshot)?;
        self.store.save_snapshot(&self.run_id, period, &json)?;
        log::debug!("Snapshot saved at period {period}");
        Ok(())
    }

    // ── Read access ────────────────────────────────────────────

    /// Query events for a specific period from the store.
    /// Used by the determinism test and replay tooling.
    pub fn store_events_for_period(
        &self,
        run_id: &str,
        period: Period,
    ) -> SimResult<Vec<EventLogEntry>> {
        self.store.events_for_period(run_id, period)
    }

    pub fn store(&self) -> &SimStore {
        &self.store
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn ledger(&self) -> &dyn Ledger {
        self.ledger.as_ref()
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The built-in AggregateReporter, if registered.
    pub fn reporter(&self) -> Option<&AggregateReporter> {
        self.observers
            .iter()
            .find_map(|o| o.as_any().downcast_ref::<AggregateReporter>())
    }

    /// Look up a registered phase by concrete type. Tests and tooling only.
    pub fn phase<T: 'static>(&self) -> Option<&T> {
        self.phases
            .iter()
            .find_map(|(_, p)| p.as_any().downcast_ref::<T>())
    }
}

/// Append `events` to the event log under `phase`.
fn persist(
    store: &SimStore,
    run_id: &str,
    period: Period,
    phase: &str,
    events: &[SimEvent],
) -> SimResult<()> {
    for event in events {
        let entry = EventLogEntry {
            id:         None,
            run_id:     run_id.to_string(),
            period,
            phase:      phase.to_string(),
            event_type: event.type_name().to_string(),
            payload:    serde_json::to_string(event)?,
        };
        store.append_event(&entry)?;
    }
    Ok(())
}
