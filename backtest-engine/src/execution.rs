//! Simulated order execution
//!
//! Every order is filled in full, immediately, at the latest bar's adjusted
//! close. Optional commission models and seeded adverse slippage are
//! applied on top.

use common::{CommissionModel, ExecutionConfig, OrderSide, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::data::DataHandler;
use crate::event::{EventQueue, FillEvent, OrderEvent};

/// Turns orders into fills
pub trait ExecutionHandler {
    /// Emit exactly one fill for `order`
    fn execute_order(
        &mut self,
        order: &OrderEvent,
        feed: &dyn DataHandler,
        queue: &mut EventQueue,
    ) -> Result<()>;
}

/// Commission for a fill of `quantity` units at `price`
pub fn commission_for(model: &CommissionModel, quantity: u64, price: f64) -> f64 {
    match model {
        CommissionModel::Zero => 0.0,
        CommissionModel::Fixed { amount } => *amount,
        CommissionModel::PerShare => {
            let qty = quantity as f64;
            let per_share = if quantity <= 500 { 0.013 } else { 0.008 };
            (per_share * qty).max(1.3)
        }
        CommissionModel::Proportional { rate } => rate * quantity as f64 * price,
    }
}

/// Instant fill at the latest price
pub struct SimulatedExecutionHandler {
    config: ExecutionConfig,
    rng: StdRng,
}

impl SimulatedExecutionHandler {
    pub fn new(config: ExecutionConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.slippage.seed);
        Self { config, rng }
    }

    /// Slippage per unit; adverse means paying more on buys, receiving less on sells
    fn calculate_slippage(&mut self, price: f64, side: OrderSide) -> f64 {
        let slippage = &self.config.slippage;
        if !slippage.enabled {
            return 0.0;
        }

        let is_adverse = self.rng.gen::<f64>() < slippage.adverse_probability;
        let slippage_pct = if is_adverse {
            let max = slippage.max_pct.abs();
            if max > 0.0 {
                self.rng.gen_range(0.0..max)
            } else {
                0.0
            }
        } else {
            let min = slippage.min_pct;
            if min < 0.0 {
                self.rng.gen_range(min..0.0)
            } else {
                0.0
            }
        };

        price * slippage_pct * side.sign() as f64
    }
}

impl ExecutionHandler for SimulatedExecutionHandler {
    fn execute_order(
        &mut self,
        order: &OrderEvent,
        feed: &dyn DataHandler,
        queue: &mut EventQueue,
    ) -> Result<()> {
        let bar = feed.latest_bar(&order.symbol)?;
        let base_price = bar.adj_close();
        let slippage = self.calculate_slippage(base_price, order.direction);

        // Keep the fill inside the bar's range
        let fill_cost = if slippage != 0.0 {
            (base_price + slippage).max(bar.low).min(bar.high)
        } else {
            base_price
        };
        let commission = commission_for(&self.config.commission, order.quantity, fill_cost);

        debug!(
            symbol = %order.symbol,
            side = %order.direction,
            quantity = order.quantity,
            fill_cost,
            commission,
            "order filled"
        );

        queue.push(FillEvent {
            symbol: order.symbol.clone(),
            timestamp: bar.timestamp,
            exchange: self.config.exchange.clone(),
            quantity: order.quantity,
            direction: order.direction,
            fill_cost,
            commission,
        });
        Ok(())
    }
}
