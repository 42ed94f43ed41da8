//! Events exchanged between feed, strategy, portfolio and execution
//!
//! Every event is produced by one component, queued once, and consumed once
//! by the engine's dispatch loop.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use common::{Direction, OrderSide, OrderType};

/// New bar data is available for `symbol`
#[derive(Debug, Clone, PartialEq)]
pub struct MarketEvent {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
}

/// Strategy decision for one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub strength: f64,
    /// Quantity proposed by the strategy; only some sizers honour it
    pub suggested_quantity: Option<u64>,
}

impl SignalEvent {
    pub fn new(symbol: impl Into<String>, timestamp: DateTime<Utc>, direction: Direction) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            direction,
            strength: 1.0,
            suggested_quantity: None,
        }
    }

    pub fn with_quantity(mut self, quantity: u64) -> Self {
        self.suggested_quantity = Some(quantity);
        self
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }
}

/// Order to be sent to the execution handler
#[derive(Debug, Clone, PartialEq)]
pub struct OrderEvent {
    pub symbol: String,
    pub order_type: OrderType,
    pub quantity: u64,
    pub direction: OrderSide,
}

impl OrderEvent {
    pub fn market(symbol: impl Into<String>, quantity: u64, direction: OrderSide) -> Self {
        Self {
            symbol: symbol.into(),
            order_type: OrderType::Market,
            quantity,
            direction,
        }
    }
}

/// Executed order as reported by the execution handler
#[derive(Debug, Clone, PartialEq)]
pub struct FillEvent {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub exchange: String,
    pub quantity: u64,
    pub direction: OrderSide,
    /// Price per unit
    pub fill_cost: f64,
    pub commission: f64,
}

/// External sentiment reading for a symbol
#[derive(Debug, Clone, PartialEq)]
pub struct SentimentEvent {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub sentiment: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Market(MarketEvent),
    Signal(SignalEvent),
    Order(OrderEvent),
    Fill(FillEvent),
    Sentiment(SentimentEvent),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Market(_) => "MARKET",
            Event::Signal(_) => "SIGNAL",
            Event::Order(_) => "ORDER",
            Event::Fill(_) => "FILL",
            Event::Sentiment(_) => "SENTIMENT",
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Event::Market(e) => &e.symbol,
            Event::Signal(e) => &e.symbol,
            Event::Order(e) => &e.symbol,
            Event::Fill(e) => &e.symbol,
            Event::Sentiment(e) => &e.symbol,
        }
    }
}

impl From<MarketEvent> for Event {
    fn from(e: MarketEvent) -> Self {
        Event::Market(e)
    }
}

impl From<SignalEvent> for Event {
    fn from(e: SignalEvent) -> Self {
        Event::Signal(e)
    }
}

impl From<OrderEvent> for Event {
    fn from(e: OrderEvent) -> Self {
        Event::Order(e)
    }
}

impl From<FillEvent> for Event {
    fn from(e: FillEvent) -> Self {
        Event::Fill(e)
    }
}

impl From<SentimentEvent> for Event {
    fn from(e: SentimentEvent) -> Self {
        Event::Sentiment(e)
    }
}

/// FIFO event queue drained synchronously by the engine
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: impl Into<Event>) {
        self.events.push_back(event.into());
    }

    /// Non-blocking pop; `None` just means this round is over
    pub fn poll(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut queue = EventQueue::new();
        queue.push(MarketEvent {
            symbol: "SPY".to_string(),
            timestamp: ts(),
        });
        queue.push(SignalEvent::new("SPY", ts(), Direction::Long));
        queue.push(OrderEvent::market("SPY", 100, OrderSide::Buy));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.poll().unwrap().kind(), "MARKET");
        assert_eq!(queue.poll().unwrap().kind(), "SIGNAL");
        assert_eq!(queue.poll().unwrap().kind(), "ORDER");
        assert!(queue.poll().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_signal_builder() {
        let signal = SignalEvent::new("IEI", ts(), Direction::Short)
            .with_quantity(1_998)
            .with_strength(0.5);
        assert_eq!(signal.suggested_quantity, Some(1_998));
        assert_eq!(signal.strength, 0.5);
        assert_eq!(Event::from(signal).symbol(), "IEI");
    }
}
