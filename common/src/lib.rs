pub mod config;
pub mod error;
pub mod types;

pub use config::{
    BacktestParameters, CommissionModel, ExecutionConfig, RegimeFilterConfig, SlippageConfig,
    StrategyConfig,
};
pub use error::{BacktestError, Result};
pub use types::*;
