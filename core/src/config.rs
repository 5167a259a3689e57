use crate::{
    error::{SimError, SimResult},
    types::Period,
};
use serde::{Deserialize, Serialize};

// ── Exogenous ether price ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceProcessConfig {
    pub initial: f64,
    /// Per-period multiplicative drift.
    pub drift: f64,
    /// Standard deviation of the per-period normal shock.
    pub sd: f64,
    /// Hard floor; the path never goes below it.
    pub floor: f64,
}

// ── Trove opening ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpeningConfig {
    /// Expected number of openings per period at peg and zero fee.
    pub base_rate: f64,
    /// Openings scale with stable_price ^ price_sensitivity.
    pub price_sensitivity: f64,
    /// Openings scale with (1 - fee_sensitivity * issuance_fee).
    pub fee_sensitivity: f64,
    pub collateral_gamma_k: f64,
    pub collateral_gamma_theta: f64,
    pub collateral_min: f64,
    pub collateral_max: f64,
    pub target_cr_a: f64,
    pub target_cr_b: f64,
    pub target_cr_chi_square_df: f64,
    /// Target CR is never drawn below liquidation_cr + cr_buffer.
    pub cr_buffer: f64,
    pub inattention_gamma_k: f64,
    pub inattention_gamma_theta: f64,
    pub inattention_min: f64,
    pub inattention_max: f64,
}

// ── Trove closure and adjustment ───────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosureConfig {
    /// Close once CR > target_cr * (1 + payoff_margin).
    pub payoff_margin: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentConfig {
    /// Chance that an under-collateralized borrower repays debt
    /// instead of topping up collateral.
    pub repay_probability: f64,
    /// Chance that an over-collateralized borrower withdraws collateral
    /// instead of drawing more debt.
    pub withdraw_probability: f64,
}

// ── Stability pool ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityConfig {
    pub initial_deposit: f64,
    /// Per-period return depositors expect from elsewhere.
    pub natural_rate: f64,
    pub elasticity: f64,
    pub max_deposit: f64,
    /// Deposit changes smaller than this are not sent to the ledger.
    pub min_change: f64,
    /// Value of the token reward airdropped to the pool each period.
    pub airdrop_per_period: f64,
}

// ── Stablecoin market ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Liquidity-pool demand at a price of 1.0.
    pub liquidity_depth: f64,
    pub elasticity: f64,
    pub sd_liquidity: f64,
    /// Upper bound set by the minimum-CR arbitrage.
    pub price_ceiling: f64,
    /// Lower bound on the circulating float used in the clearing formula.
    pub min_float: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionConfig {
    pub fee: f64,
    pub sensitivity: f64,
    pub max_supply_share: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleConfig {
    pub collateral: f64,
    pub debt: f64,
}

/// Parameters of the in-memory reference ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerParams {
    pub mcr: f64,
    pub min_net_debt: f64,
    pub borrowing_fee_floor: f64,
    pub borrowing_fee_cap: f64,
    pub redemption_fee_floor: f64,
    /// Multiplier applied to the base rate on every price update.
    pub base_rate_decay: f64,
    /// Reward tokens accrued to depositors on every price update.
    pub reward_per_update: f64,
}

impl Default for LedgerParams {
    fn default() -> Self {
        Self {
            mcr:                  1.1,
            min_net_debt:         1800.0,
            borrowing_fee_floor:  0.005,
            borrowing_fee_cap:    0.05,
            redemption_fee_floor: 0.005,
            base_rate_decay:      0.94,
            reward_per_update:    1000.0,
        }
    }
}

/// Order in which the active sequence is presented between periods.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActiveSortKey {
    #[default]
    None,
    InitialCr,
    TargetCr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub horizon: Period,
    /// Borrower accounts, not counting the whale.
    pub population: usize,
    /// Borrowers that open during setup, before period 1.
    pub initial_borrowers: usize,
    pub liquidation_cr: f64,
    pub max_fee: f64,
    pub price: PriceProcessConfig,
    pub opening: OpeningConfig,
    pub closure: ClosureConfig,
    pub adjustment: AdjustmentConfig,
    pub stability: StabilityConfig,
    pub market: MarketConfig,
    pub redemption: RedemptionConfig,
    pub whale: WhaleConfig,
    #[serde(default)]
    pub ledger: LedgerParams,
    #[serde(default)]
    pub active_sort: ActiveSortKey,
}

impl SimConfig {
    /// Load from a JSON file.
    /// In tests, use SimConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: SimConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameter sets the pipeline cannot run with.
    /// Distribution shapes are not checked here; the generators clamp them.
    pub fn validate(&self) -> SimResult<()> {
        let fail = |msg: &str| Err(SimError::Config(msg.to_string()));
        if self.horizon == 0 {
            return fail("horizon must be at least one period");
        }
        if self.initial_borrowers > self.population {
            return fail("initial_borrowers cannot exceed population");
        }
        if !(self.price.initial > 0.0 && self.price.floor > 0.0) {
            return fail("price.initial and price.floor must be positive");
        }
        if !(self.liquidation_cr >= 1.0) {
            return fail("liquidation_cr must be at least 1.0");
        }
        if !(self.market.elasticity > 0.0) {
            return fail("market.elasticity must be positive");
        }
        if !(self.market.liquidity_depth > 0.0 && self.market.min_float > 0.0) {
            return fail("market.liquidity_depth and market.min_float must be positive");
        }
        if !(self.market.price_ceiling > 0.0) {
            return fail("market.price_ceiling must be positive");
        }
        for p in [self.adjustment.repay_probability, self.adjustment.withdraw_probability] {
            if !(0.0..=1.0).contains(&p) {
                return fail("adjustment probabilities must lie in [0, 1]");
            }
        }
        if !(0.0..1.0).contains(&self.redemption.fee) {
            return fail("redemption.fee must lie in [0, 1)");
        }
        if !(self.whale.collateral > 0.0 && self.whale.debt > 0.0) {
            return fail("whale position must be non-empty");
        }
        if self.stability.initial_deposit < 0.0 || self.stability.max_deposit < 0.0 {
            return fail("stability deposits cannot be negative");
        }
        Ok(())
    }

    /// Small, fast configuration used by the test suite.
    pub fn default_test() -> Self {
        Self {
            horizon:           20,
            population:        40,
            initial_borrowers: 10,
            liquidation_cr:    1.1,
            max_fee:           0.05,
            price: PriceProcessConfig {
                initial: 2000.0,
                drift:   0.0,
                sd:      0.02,
                floor:   1.0,
            },
            opening: OpeningConfig {
                base_rate:               4.0,
                price_sensitivity:       4.0,
                fee_sensitivity:         10.0,
                collateral_gamma_k:      10.0,
                collateral_gamma_theta:  5.0,
                collateral_min:          5.0,
                collateral_max:          500.0,
                target_cr_a:             1.1,
                target_cr_b:             0.03,
                target_cr_chi_square_df: 16.0,
                cr_buffer:               0.1,
                inattention_gamma_k:     4.0,
                inattention_gamma_theta: 0.08,
                inattention_min:         0.01,
                inattention_max:         0.9,
            },
            closure: ClosureConfig { payoff_margin: 0.5 },
            adjustment: AdjustmentConfig {
                repay_probability:    0.3,
                withdraw_probability: 0.5,
            },
            stability: StabilityConfig {
                initial_deposit:    2_000_000.0,
                natural_rate:       0.0002,
                elasticity:         2.0,
                max_deposit:        8_000_000.0,
                min_change:         1.0,
                airdrop_per_period: 500.0,
            },
            market: MarketConfig {
                liquidity_depth: 9_000_000.0,
                elasticity:      4.0,
                sd_liquidity:    0.02,
                price_ceiling:   1.1,
                min_float:       1.0,
            },
            redemption: RedemptionConfig {
                fee:              0.005,
                sensitivity:      1.0,
                max_supply_share: 0.05,
            },
            whale: WhaleConfig {
                collateral: 30_000.0,
                debt:       10_000_000.0,
            },
            ledger:      LedgerParams::default(),
            active_sort: ActiveSortKey::None,
        }
    }
}
