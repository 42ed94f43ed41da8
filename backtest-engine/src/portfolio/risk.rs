//! Order refinement after sizing
//!
//! A risk manager sees each sized order and returns the orders that should
//! actually be sent: unchanged, rewritten, split, or none at all.

use std::collections::BTreeSet;

use common::{BarField, OrderSide, Result};
use tracing::info;

use crate::data::DataHandler;
use crate::event::OrderEvent;
use crate::metrics::annualised_volatility;
use crate::portfolio::sizer::SizingContext;

pub trait RiskManager {
    fn refine_orders(
        &mut self,
        order: OrderEvent,
        ctx: &SizingContext,
        feed: &dyn DataHandler,
    ) -> Result<Vec<OrderEvent>>;
}

/// Passes every order through untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveRiskManager;

impl RiskManager for NaiveRiskManager {
    fn refine_orders(
        &mut self,
        order: OrderEvent,
        _ctx: &SizingContext,
        _feed: &dyn DataHandler,
    ) -> Result<Vec<OrderEvent>> {
        Ok(vec![order])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Desirable,
    Undesirable,
}

/// Opaque market regime model (e.g. a fitted hidden Markov model)
pub trait RegimeClassifier {
    /// Classify the latest regime from a series of period returns, oldest first
    fn classify(&self, returns: &[f64]) -> Regime;
}

/// Calls the regime undesirable when annualised volatility exceeds a threshold
#[derive(Debug, Clone)]
pub struct VolatilityRegimeClassifier {
    /// Annualised volatility in percent
    pub threshold: f64,
    pub periods_per_year: f64,
}

impl RegimeClassifier for VolatilityRegimeClassifier {
    fn classify(&self, returns: &[f64]) -> Regime {
        if annualised_volatility(returns, self.periods_per_year) > self.threshold {
            Regime::Undesirable
        } else {
            Regime::Desirable
        }
    }
}

/// Long-only regime filter
///
/// Buys go through only in the desirable regime. Sells go through in either
/// regime, but only to close a position this manager let in. Admission is
/// tracked per symbol.
pub struct RegimeFilterRiskManager {
    classifier: Box<dyn RegimeClassifier>,
    lookback: usize,
    admitted: BTreeSet<String>,
}

impl RegimeFilterRiskManager {
    pub fn new(classifier: Box<dyn RegimeClassifier>, lookback: usize) -> Self {
        Self {
            classifier,
            lookback: lookback.max(2),
            admitted: BTreeSet::new(),
        }
    }

    fn determine_regime(&self, symbol: &str, feed: &dyn DataHandler) -> Result<Regime> {
        let prices = feed.latest_bars_values(symbol, BarField::AdjClose, self.lookback + 1)?;
        let returns: Vec<f64> = prices
            .windows(2)
            .filter(|w| w[0] != 0.0)
            .map(|w| w[1] / w[0] - 1.0)
            .collect();
        Ok(self.classifier.classify(&returns))
    }
}

impl RiskManager for RegimeFilterRiskManager {
    fn refine_orders(
        &mut self,
        order: OrderEvent,
        _ctx: &SizingContext,
        feed: &dyn DataHandler,
    ) -> Result<Vec<OrderEvent>> {
        let regime = self.determine_regime(&order.symbol, feed)?;
        let orders = match (order.direction, regime) {
            (OrderSide::Buy, Regime::Desirable) => {
                self.admitted.insert(order.symbol.clone());
                vec![order]
            }
            (OrderSide::Buy, Regime::Undesirable) => {
                info!(symbol = %order.symbol, "buy vetoed in undesirable regime");
                Vec::new()
            }
            (OrderSide::Sell, _) if self.admitted.remove(&order.symbol) => vec![order],
            (OrderSide::Sell, _) => Vec::new(),
        };
        Ok(orders)
    }
}
