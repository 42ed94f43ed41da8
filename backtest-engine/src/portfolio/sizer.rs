//! Signal → order sizing policies

use std::collections::BTreeMap;

use common::{Direction, OrderSide};

use crate::event::{OrderEvent, SignalEvent};

/// Portfolio state a sizer or risk manager may look at
#[derive(Debug, Clone, Copy)]
pub struct SizingContext {
    /// Signed quantity currently held in the signal's symbol
    pub current_quantity: i64,
    /// Latest price of the signal's symbol, if any bar has arrived
    pub price: Option<f64>,
    /// Cash plus marked value of all positions
    pub equity: f64,
}

pub trait PositionSizer {
    /// Order for `signal`, or `None` when the signal should not trade
    fn size_order(&self, signal: &SignalEvent, ctx: &SizingContext) -> Option<OrderEvent>;
}

/// Order that flattens a nonzero position
fn flatten(symbol: &str, current_quantity: i64) -> Option<OrderEvent> {
    match current_quantity {
        0 => None,
        q if q > 0 => Some(OrderEvent::market(symbol, q.unsigned_abs(), OrderSide::Sell)),
        q => Some(OrderEvent::market(symbol, q.unsigned_abs(), OrderSide::Buy)),
    }
}

/// Constant quantity per trade, no risk or margin checks
///
/// LONG and SHORT only open from flat; EXIT closes the whole position.
#[derive(Debug, Clone)]
pub struct FixedQuantitySizer {
    quantity: u64,
}

impl FixedQuantitySizer {
    pub fn new(quantity: u64) -> Self {
        Self { quantity }
    }
}

impl Default for FixedQuantitySizer {
    fn default() -> Self {
        Self::new(100)
    }
}

impl PositionSizer for FixedQuantitySizer {
    fn size_order(&self, signal: &SignalEvent, ctx: &SizingContext) -> Option<OrderEvent> {
        match (signal.direction, ctx.current_quantity) {
            (Direction::Long, 0) => Some(OrderEvent::market(
                &signal.symbol,
                self.quantity,
                OrderSide::Buy,
            )),
            (Direction::Short, 0) => Some(OrderEvent::market(
                &signal.symbol,
                self.quantity,
                OrderSide::Sell,
            )),
            (Direction::Exit, q) => flatten(&signal.symbol, q),
            _ => None,
        }
    }
}

/// Uses the strategy's suggested quantity, falling back to a default
///
/// Same open-from-flat rule as [`FixedQuantitySizer`].
#[derive(Debug, Clone)]
pub struct SuggestedQuantitySizer {
    default_quantity: u64,
}

impl SuggestedQuantitySizer {
    pub fn new(default_quantity: u64) -> Self {
        Self { default_quantity }
    }
}

impl PositionSizer for SuggestedQuantitySizer {
    fn size_order(&self, signal: &SignalEvent, ctx: &SizingContext) -> Option<OrderEvent> {
        let quantity = signal.suggested_quantity.unwrap_or(self.default_quantity);
        if quantity == 0 && signal.direction != Direction::Exit {
            return None;
        }
        match (signal.direction, ctx.current_quantity) {
            (Direction::Long, 0) => Some(OrderEvent::market(&signal.symbol, quantity, OrderSide::Buy)),
            (Direction::Short, 0) => {
                Some(OrderEvent::market(&signal.symbol, quantity, OrderSide::Sell))
            }
            (Direction::Exit, q) => flatten(&signal.symbol, q),
            _ => None,
        }
    }
}

/// Dollar-weighted allocation; EXIT liquidates, LONG buys `weight * equity`
///
/// Long only. Symbols without a weight are never bought.
#[derive(Debug, Clone)]
pub struct LiquidateRebalanceSizer {
    weights: BTreeMap<String, f64>,
}

impl LiquidateRebalanceSizer {
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        Self { weights }
    }
}

impl PositionSizer for LiquidateRebalanceSizer {
    fn size_order(&self, signal: &SignalEvent, ctx: &SizingContext) -> Option<OrderEvent> {
        match signal.direction {
            Direction::Exit => flatten(&signal.symbol, ctx.current_quantity),
            Direction::Long => {
                let weight = *self.weights.get(&signal.symbol)?;
                let price = ctx.price.filter(|p| *p > 0.0)?;
                let quantity = (weight * ctx.equity / price).floor();
                if quantity >= 1.0 {
                    Some(OrderEvent::market(&signal.symbol, quantity as u64, OrderSide::Buy))
                } else {
                    None
                }
            }
            Direction::Short => None,
        }
    }
}
