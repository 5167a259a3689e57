//! sim-runner: headless runner for the trove simulation.
//!
//! Usage:
//!   sim-runner --seed 42 --periods 100 --config data/simulation.json --db run.db
//!   sim-runner --seed 42 --ipc-mode     (JSON lines on stdin/stdout)

use anyhow::{Context, Result};
use std::env;
use std::io::{self, BufRead, Write};
use trove_sim_core::{
    config::SimConfig,
    engine::SimEngine,
    reporter::PeriodReport,
    state::AggregateState,
    store::SimStore,
    stochastic::Expectations,
    types::Period,
};
use uuid::Uuid;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    Step { count: u64 },
    RunToEnd,
    Quit,
}

#[derive(serde::Serialize)]
struct RunState<'a> {
    run_id:         &'a str,
    period:         Period,
    horizon:        Period,
    active:         usize,
    inactive:       usize,
    ether_price:    f64,
    stable_price:   f64,
    totals:         AggregateState,
    last_report:    Option<&'a PeriodReport>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let config_path = flag_value(&args, "--config").unwrap_or("./data/simulation.json");

    let mut config = SimConfig::load(config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;
    config.horizon = parse_arg(&args, "--periods", config.horizon);
    config.validate()?;

    let run_id = format!("run-{seed}-{}", Uuid::new_v4().simple());

    if !ipc_mode {
        println!("trove-sim: sim-runner");
        println!("  run_id:   {run_id}");
        println!("  seed:     {seed}");
        println!("  periods:  {}", config.horizon);
        println!("  config:   {config_path}");
        println!("  db:       {db}");
        println!("  started:  {}", chrono::Utc::now().to_rfc3339());
        println!();
        print_expectations(&config);
    }

    let store = SimStore::open(db)?;
    store.migrate()?;
    store.insert_run(&run_id, seed, env!("CARGO_PKG_VERSION"))?;

    let mut engine = SimEngine::build(run_id.clone(), seed, config, store)?;

    if ipc_mode {
        run_ipc_loop(&mut engine)?;
    } else {
        let outcome = engine.run_to_horizon();
        print_summary(&engine)?;
        outcome?;
    }
    Ok(())
}

fn run_ipc_loop(engine: &mut SimEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        let result = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::GetState => Ok(()),
            IpcCommand::Step { count } => engine.run_periods(count),
            IpcCommand::RunToEnd => engine.run_to_horizon(),
        };
        match result {
            Ok(()) => writeln!(stdout, "{}", serde_json::to_string(&run_state(engine))?)?,
            Err(e) => {
                // A failed period leaves the run unusable; report and stop.
                log::error!("ipc: run aborted: {e}");
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string(), "fatal": true }))?;
                stdout.flush()?;
                return Err(e.into());
            }
        }
        stdout.flush()?;
    }
    Ok(())
}

fn run_state(engine: &SimEngine) -> RunState<'_> {
    let state = engine.state();
    let reporter = engine.reporter();
    RunState {
        run_id:       &engine.run_id,
        period:       engine.clock.current_period,
        horizon:      engine.clock.horizon,
        active:       state.pool.active_count(),
        inactive:     state.pool.inactive_count(),
        ether_price:  state.market.ether_price,
        stable_price: state.market.stable_price,
        totals:       reporter.map(|r| r.totals()).unwrap_or_default(),
        last_report:  reporter.and_then(|r| r.latest()),
    }
}

fn print_expectations(config: &SimConfig) {
    let e = Expectations::new(&config.price, &config.opening, config.horizon);
    println!("=== EXPECTATIONS ===");
    println!("  ether price at period {}: {:.2}", config.horizon, e.final_ether_price);
    println!("  E(collateral)  = {:.2}   SD = {:.2}", e.collateral_mean, e.collateral_sd);
    println!("  E(target CR)   = {:.2}%  SD = {:.2}%", e.target_cr_mean * 100.0, e.target_cr_sd * 100.0);
    println!("  E(inattention) = {:.2}%  SD = {:.2}%", e.inattention_mean * 100.0, e.inattention_sd * 100.0);
    println!();
}

fn print_summary(engine: &SimEngine) -> Result<()> {
    let Some(reporter) = engine.reporter() else {
        println!("(no reporter registered)");
        return Ok(());
    };
    let totals = reporter.totals();
    let state = engine.state();

    println!("=== RUN SUMMARY ===");
    println!("  run_id:            {}", engine.run_id);
    println!("  periods run:       {}", engine.clock.current_period);
    println!("  active / inactive: {} / {}", state.pool.active_count(), state.pool.inactive_count());
    println!("  openings:          {}", totals.openings);
    println!("  closures:          {}", totals.closures);
    println!("  liquidations:      {}", totals.liquidations);
    println!("  coll added:        {:.2}", totals.coll_added);
    println!("  coll withdrawn:    {:.2}", totals.coll_withdrawn);
    println!("  coll liquidated:   {:.2} ({:.2}%)", totals.coll_liquidated, reporter.liquidated_ratio() * 100.0);
    println!("  stable redeemed:   {:.2}", totals.stable_redeemed);
    println!("  issuance fees:     {:.2}", totals.issuance_fees);
    if let Some(min) = reporter.min_stable_price() {
        println!("  min stable price:  {min:.4}");
    }

    println!();
    println!("=== LAST PERIODS ===");
    let history = reporter.history();
    if history.is_empty() {
        println!("  (No periods completed yet)");
    } else {
        for r in history.iter().rev().take(5).rev() {
            println!(
                "  period {:>4} | ether {:>10.2} | stable {:.4} | active {:>4} | liq {:>3} | open {:>3}",
                r.period, r.ether_price, r.stable_price, r.active_count, r.liquidated, r.opened
            );
        }
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    flag_value(args, flag)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
