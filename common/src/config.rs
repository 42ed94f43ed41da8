use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BacktestError, Result};

/// Commission charged per fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommissionModel {
    #[default]
    Zero,
    /// Flat amount per fill
    Fixed { amount: f64 },
    /// Interactive Brokers style tiered per-share fee
    PerShare,
    /// Fraction of traded notional
    Proportional { rate: f64 },
}

/// Fill price slippage simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlippageConfig {
    /// Enable slippage simulation
    pub enabled: bool,
    /// Minimum slippage (can be negative for favorable fills)
    pub min_pct: f64,
    /// Maximum slippage (typically positive, unfavorable)
    pub max_pct: f64,
    /// Probability of unfavorable slippage (0.0 - 1.0)
    pub adverse_probability: f64,
    /// RNG seed so runs are reproducible
    pub seed: u64,
}

impl Default for SlippageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // Slippage: -0.1% to +0.2%, 70% chance of adverse
            min_pct: -0.001,
            max_pct: 0.002,
            adverse_probability: 0.7,
            seed: 42,
        }
    }
}

/// Simulated execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub commission: CommissionModel,
    #[serde(default)]
    pub slippage: SlippageConfig,
    /// Exchange name stamped on fills
    #[serde(default = "default_exchange")]
    pub exchange: String,
}

fn default_exchange() -> String {
    "ARCA".to_string()
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            commission: CommissionModel::default(),
            slippage: SlippageConfig::default(),
            exchange: default_exchange(),
        }
    }
}

/// Strategy selection with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    BuyAndHold,
    MovingAverageCross {
        short_window: usize,
        long_window: usize,
    },
    Forecast {
        lags: usize,
    },
    KalmanPairs {
        quantity: u64,
        delta: f64,
        observation_variance: f64,
    },
    Sentiment {
        buy_threshold: i64,
        sell_threshold: i64,
        quantity: u64,
    },
    /// Z-score bands on a weighted basket; `weights` follow `symbols`
    CointegrationBollinger {
        lookback: usize,
        weights: Vec<f64>,
        entry_z: f64,
        exit_z: f64,
        quantity: u64,
    },
    MonthlyRebalance {
        weights: BTreeMap<String, f64>,
    },
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::MovingAverageCross {
            short_window: 10,
            long_window: 30,
        }
    }
}

/// Long-only regime filter on orders
///
/// Buys are vetoed while annualised volatility of the last `lookback`
/// returns is above `volatility_threshold` (percent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeFilterConfig {
    pub volatility_threshold: f64,
    pub lookback: usize,
}

/// Backtest parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestParameters {
    pub symbols: Vec<String>,
    pub initial_capital: f64,
    /// Timestamp of the initial holdings snapshot; defaults to the first bar
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// Pause between rounds in milliseconds
    #[serde(default)]
    pub heartbeat_ms: u64,
    /// Bars per year used to annualise ratios (252 for daily bars)
    pub periods_per_year: f64,
    /// Units per trade for fixed-quantity sizing
    pub order_quantity: u64,
    /// Where to write the equity curve CSV, if anywhere
    #[serde(default)]
    pub equity_output: Option<PathBuf>,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub regime_filter: Option<RegimeFilterConfig>,
}

impl Default for BacktestParameters {
    fn default() -> Self {
        Self {
            symbols: vec!["SPY".to_string()],
            initial_capital: 100_000.0,
            start_date: None,
            heartbeat_ms: 0,
            periods_per_year: 252.0,
            order_quantity: 100,
            equity_output: None,
            strategy: StrategyConfig::default(),
            execution: ExecutionConfig::default(),
            regime_filter: None,
        }
    }
}

impl BacktestParameters {
    /// Load parameters from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            BacktestError::DataLoadError(format!("{}: {}", path.display(), e))
        })?;
        let params: Self = serde_json::from_reader(BufReader::new(file))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(BacktestError::InvalidParameter(
                "at least one symbol is required".to_string(),
            ));
        }
        if !(self.initial_capital > 0.0) {
            return Err(BacktestError::InvalidParameter(format!(
                "initial capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if !(self.periods_per_year > 0.0) {
            return Err(BacktestError::InvalidParameter(format!(
                "periods per year must be positive, got {}",
                self.periods_per_year
            )));
        }
        if self.order_quantity == 0 {
            return Err(BacktestError::InvalidParameter(
                "order quantity must be at least 1".to_string(),
            ));
        }
        if let Some(filter) = &self.regime_filter {
            if filter.lookback < 2 || !(filter.volatility_threshold > 0.0) {
                return Err(BacktestError::InvalidParameter(format!(
                    "regime filter needs lookback >= 2 and a positive threshold, got {}/{}",
                    filter.lookback, filter.volatility_threshold
                )));
            }
        }
        match &self.strategy {
            StrategyConfig::MovingAverageCross {
                short_window,
                long_window,
            } if *short_window == 0 || short_window >= long_window => {
                Err(BacktestError::InvalidParameter(format!(
                    "moving average windows must satisfy 0 < short < long, got {}/{}",
                    short_window, long_window
                )))
            }
            StrategyConfig::Forecast { lags } if *lags == 0 => Err(
                BacktestError::InvalidParameter("forecast lags must be at least 1".to_string()),
            ),
            StrategyConfig::KalmanPairs { .. } if self.symbols.len() != 2 => {
                Err(BacktestError::InvalidParameter(format!(
                    "kalman pairs needs exactly two symbols, got {}",
                    self.symbols.len()
                )))
            }
            StrategyConfig::KalmanPairs { delta, .. } if !(*delta > 0.0 && *delta < 1.0) => {
                Err(BacktestError::InvalidParameter(format!(
                    "kalman delta must lie in (0, 1), got {}",
                    delta
                )))
            }
            StrategyConfig::CointegrationBollinger { weights, .. }
                if weights.len() != self.symbols.len() =>
            {
                Err(BacktestError::InvalidParameter(format!(
                    "{} hedge weights for {} symbols",
                    weights.len(),
                    self.symbols.len()
                )))
            }
            StrategyConfig::CointegrationBollinger {
                lookback,
                entry_z,
                exit_z,
                ..
            } if *lookback < 2 || !(*exit_z >= 0.0 && exit_z < entry_z) => {
                Err(BacktestError::InvalidParameter(format!(
                    "cointegration bands need lookback >= 2 and 0 <= exit_z < entry_z, got {}/{}/{}",
                    lookback, entry_z, exit_z
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn with_capital(mut self, capital: f64) -> Self {
        self.initial_capital = capital;
        self
    }

    pub fn with_symbols<S: Into<String>>(mut self, symbols: impl IntoIterator<Item = S>) -> Self {
        self.symbols = symbols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_order_quantity(mut self, quantity: u64) -> Self {
        self.order_quantity = quantity;
        self
    }

    pub fn with_commission(mut self, commission: CommissionModel) -> Self {
        self.execution.commission = commission;
        self
    }

    pub fn with_equity_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.equity_output = Some(path.into());
        self
    }

    pub fn with_regime_filter(mut self, volatility_threshold: f64, lookback: usize) -> Self {
        self.regime_filter = Some(RegimeFilterConfig {
            volatility_threshold,
            lookback,
        });
        self
    }
}
