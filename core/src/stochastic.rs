//! Stochastic process generators.
//!
//! Produces the exogenous ether price path and every per-period
//! draw the phases consume. All draws are clamped here so that no
//! degenerate value (zero price, CR below the liquidation line,
//! negative size) can leak into the pipeline.

use crate::{
    config::{OpeningConfig, PriceProcessConfig},
    error::{SimError, SimResult},
    rng::PhaseRng,
    types::Period,
};
use rand_distr::{ChiSquared, Gamma, Normal, Poisson};
use serde::{Deserialize, Serialize};

/// Shocks below this would flip the price sign.
const MIN_SHOCK: f64 = -0.95;
const MIN_SHAPE: f64 = 1e-6;
const LIQUIDITY_NOISE_BOUND: f64 = 0.9;

/// Replace a non-positive or non-finite parameter with `fallback`.
fn positive_or(value: f64, fallback: f64, what: &str) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        log::warn!("stochastic: {what}={value} is degenerate, clamping to {fallback}");
        fallback
    }
}

// ── Price path ─────────────────────────────────────────────────────

/// Ether price per period. Index 0 is the setup price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePath {
    points: Vec<f64>,
}

impl PricePath {
    /// `p[t] = p[t-1] * (1 + shock) * (1 + drift)`, shock ~ Normal(0, sd).
    pub fn generate(config: &PriceProcessConfig, horizon: Period, rng: &mut PhaseRng) -> Self {
        let floor = positive_or(config.floor, 1.0, "price.floor");
        let initial = positive_or(config.initial, floor, "price.initial").max(floor);
        let sd = if config.sd.is_finite() && config.sd >= 0.0 {
            config.sd
        } else {
            log::warn!("stochastic: price.sd={} is degenerate, using 0", config.sd);
            0.0
        };
        let drift = if config.drift.is_finite() { config.drift.max(MIN_SHOCK) } else { 0.0 };
        let normal = Normal::new(0.0, sd).ok();

        let mut points = Vec::with_capacity(horizon as usize + 1);
        points.push(initial);
        let mut price = initial;
        for _ in 0..horizon {
            let shock = match &normal {
                Some(n) if sd > 0.0 => {
                    let z: f64 = rng.sample(n);
                    z.max(MIN_SHOCK)
                }
                _ => 0.0,
            };
            price = (price * (1.0 + shock) * (1.0 + drift)).max(floor);
            points.push(price);
        }
        Self { points }
    }

    /// A fixed path, mainly for scenario tests.
    pub fn from_points(points: Vec<f64>) -> SimResult<Self> {
        if points.is_empty() {
            return Err(SimError::Config("price path needs at least the setup price".into()));
        }
        if let Some(bad) = points.iter().find(|p| !(p.is_finite() && **p > 0.0)) {
            return Err(SimError::Config(format!("price path point {bad} is not positive")));
        }
        Ok(Self { points })
    }

    /// A path that stays at `price` for `horizon` periods.
    pub fn flat(price: f64, horizon: Period) -> SimResult<Self> {
        Self::from_points(vec![price; horizon as usize + 1])
    }

    pub fn at(&self, period: Period) -> Option<f64> {
        self.points.get(period as usize).copied()
    }

    pub fn initial(&self) -> f64 {
        self.points[0]
    }

    /// Number of simulated periods the path covers.
    pub fn horizon(&self) -> Period {
        (self.points.len() - 1) as Period
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }
}

// ── Opening draws ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpeningDraw {
    pub collateral:  f64,
    pub target_cr:   f64,
    pub inattention: f64,
}

/// Distributions sized once from config, sampled every period.
#[derive(Debug, Clone)]
pub struct OpeningDistributions {
    collateral:      Gamma<f64>,
    target_cr_chi:   ChiSquared<f64>,
    inattention:     Gamma<f64>,
    collateral_min:  f64,
    collateral_max:  f64,
    target_cr_a:     f64,
    target_cr_b:     f64,
    target_cr_min:   f64,
    inattention_min: f64,
    inattention_max: f64,
}

impl OpeningDistributions {
    pub fn from_config(config: &OpeningConfig, liquidation_cr: f64) -> SimResult<Self> {
        let k = positive_or(config.collateral_gamma_k, MIN_SHAPE, "collateral_gamma_k");
        let theta = positive_or(config.collateral_gamma_theta, MIN_SHAPE, "collateral_gamma_theta");
        let df = positive_or(config.target_cr_chi_square_df, MIN_SHAPE, "target_cr_chi_square_df");
        let tau_k = positive_or(config.inattention_gamma_k, MIN_SHAPE, "inattention_gamma_k");
        let tau_theta =
            positive_or(config.inattention_gamma_theta, MIN_SHAPE, "inattention_gamma_theta");

        let collateral_min = positive_or(config.collateral_min, 1e-9, "collateral_min");
        let collateral_max = config.collateral_max.max(collateral_min);
        let inattention_min = config.inattention_min.clamp(0.0, 1.0);
        let inattention_max = config.inattention_max.clamp(inattention_min, 1.0);

        let dist_err = |e: &dyn std::fmt::Display| SimError::Config(format!("opening distribution: {e}"));
        Ok(Self {
            collateral: Gamma::new(k, theta).map_err(|e| dist_err(&e))?,
            target_cr_chi: ChiSquared::new(df).map_err(|e| dist_err(&e))?,
            inattention: Gamma::new(tau_k, tau_theta).map_err(|e| dist_err(&e))?,
            collateral_min,
            collateral_max,
            target_cr_a: config.target_cr_a,
            target_cr_b: config.target_cr_b.max(0.0),
            target_cr_min: liquidation_cr + config.cr_buffer.max(0.0),
            inattention_min,
            inattention_max,
        })
    }

    /// Collateral ~ Gamma(k, θ); target CR = a + b·χ²(df); τ ~ Gamma(k_τ, θ_τ).
    pub fn draw(&self, rng: &mut PhaseRng) -> OpeningDraw {
        let raw_collateral: f64 = rng.sample(&self.collateral);
        let chi: f64 = rng.sample(&self.target_cr_chi);
        let raw_inattention: f64 = rng.sample(&self.inattention);

        let collateral = raw_collateral.clamp(self.collateral_min, self.collateral_max);
        let target_cr = (self.target_cr_a + self.target_cr_b * chi).max(self.target_cr_min);
        let inattention = raw_inattention.clamp(self.inattention_min, self.inattention_max);
        OpeningDraw {
            collateral,
            target_cr,
            inattention,
        }
    }
}

/// Number of inactive accounts that try to open this period.
/// Demand scales with the inactive share of the borrower population.
pub fn opening_count(
    config: &OpeningConfig,
    stable_price: f64,
    issuance_fee: f64,
    inactive: usize,
    population: usize,
    rng: &mut PhaseRng,
) -> usize {
    if inactive == 0 || population == 0 {
        return 0;
    }
    let inactive_share = (inactive as f64 / population as f64).min(1.0);
    let price_factor = stable_price.max(0.0).powf(config.price_sensitivity);
    let fee_factor = (1.0 - config.fee_sensitivity * issuance_fee).max(0.0);
    let rate = config.base_rate.max(0.0) * inactive_share * price_factor * fee_factor;
    if !(rate.is_finite() && rate > 0.0) {
        return 0;
    }
    match Poisson::new(rate) {
        Ok(poisson) => {
            let n: f64 = rng.sample(&poisson);
            (n as usize).min(inactive)
        }
        Err(e) => {
            log::warn!("stochastic: poisson rate {rate} rejected ({e}), no openings");
            0
        }
    }
}

/// Whether an account pays attention this period. `inattention` is the
/// probability of ignoring the price move.
pub fn attention_draw(inattention: f64, rng: &mut PhaseRng) -> bool {
    !rng.chance(inattention.clamp(0.0, 1.0))
}

/// Multiplicative noise on liquidity-pool demand, bounded to ±90%.
pub fn liquidity_noise(sd: f64, rng: &mut PhaseRng) -> f64 {
    if !(sd.is_finite() && sd > 0.0) {
        return 0.0;
    }
    match Normal::new(0.0, sd) {
        Ok(normal) => {
            let z: f64 = rng.sample(&normal);
            z.clamp(-LIQUIDITY_NOISE_BOUND, LIQUIDITY_NOISE_BOUND)
        }
        Err(_) => 0.0,
    }
}

// ── Expectations ───────────────────────────────────────────────────

/// Theoretical moments of the generators, ignoring clamps and floors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Expectations {
    pub collateral_mean:  f64,
    pub collateral_sd:    f64,
    pub target_cr_mean:   f64,
    pub target_cr_sd:     f64,
    pub inattention_mean: f64,
    pub inattention_sd:   f64,
    /// Mean ether price at the end of the horizon.
    pub final_ether_price: f64,
}

impl Expectations {
    pub fn new(price: &PriceProcessConfig, opening: &OpeningConfig, horizon: Period) -> Self {
        let gamma = |k: f64, theta: f64| (k * theta, k.max(0.0).sqrt() * theta);
        let (collateral_mean, collateral_sd) =
            gamma(opening.collateral_gamma_k, opening.collateral_gamma_theta);
        let (inattention_mean, inattention_sd) =
            gamma(opening.inattention_gamma_k, opening.inattention_gamma_theta);
        let df = opening.target_cr_chi_square_df;
        let exponent = i32::try_from(horizon).unwrap_or(i32::MAX);
        Self {
            collateral_mean,
            collateral_sd,
            target_cr_mean: opening.target_cr_a + opening.target_cr_b * df,
            target_cr_sd: opening.target_cr_b * (2.0 * df.max(0.0)).sqrt(),
            inattention_mean,
            inattention_sd,
            final_ether_price: price.initial * (1.0 + price.drift).powi(exponent),
        }
    }
}
