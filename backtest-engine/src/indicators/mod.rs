pub mod rolling;

pub use rolling::{lagged_returns_pct, RollingWindow};
