//! Upstream Payload Types
//!
//! Typed representations of what the brokerage session delivers: market data
//! ticks, portfolio deltas, and the three news shapes. Prices are `Decimal`
//! for financial precision; timestamps are UTC.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::resource::ResourceId;

// =============================================================================
// Contracts
// =============================================================================

/// Security type of a tradeable contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SecType {
    /// Stock / equity.
    Stk,
    /// Forex pair.
    Cash,
    /// Option.
    Opt,
    /// Future.
    Fut,
    /// Index.
    Ind,
}

impl SecType {
    /// Parse a security type, case-insensitively. Unknown values fall back
    /// to `Stk`, matching upstream tool defaults.
    #[must_use]
    pub fn parse_or_stock(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "CASH" => Self::Cash,
            "OPT" => Self::Opt,
            "FUT" => Self::Fut,
            "IND" => Self::Ind,
            _ => Self::Stk,
        }
    }
}

/// Minimal contract description used to open upstream subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Ticker symbol, or base currency for forex.
    pub symbol: String,
    /// Security type.
    pub sec_type: SecType,
    /// Routing exchange.
    pub exchange: String,
    /// Quote currency.
    pub currency: String,
}

impl ContractSpec {
    /// A stock contract with SMART routing in USD.
    pub fn stock(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            sec_type: SecType::Stk,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
        }
    }

    /// A forex pair on IDEALPRO, e.g. `forex("USD", "JPY")`.
    pub fn forex(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            symbol: base.into(),
            sec_type: SecType::Cash,
            exchange: "IDEALPRO".to_string(),
            currency: quote.into(),
        }
    }

    /// Cache key for this contract.
    ///
    /// Forex pairs are currency-qualified (`USD.JPY`) so that the same base
    /// currency against different quotes yields distinct resources; all other
    /// security types key on the symbol alone.
    #[must_use]
    pub fn resource_id(&self) -> ResourceId {
        if self.sec_type == SecType::Cash {
            ResourceId::new(format!("{}.{}", self.symbol, self.currency))
        } else {
            ResourceId::new(self.symbol.clone())
        }
    }
}

// =============================================================================
// Market Data
// =============================================================================

/// One market data tick for a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketTick {
    /// Upstream tick timestamp.
    pub time: DateTime<Utc>,
    /// Last trade price.
    pub last: Option<Decimal>,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Previous close.
    pub close: Option<Decimal>,
    /// Cumulative volume.
    pub volume: Option<i64>,
    /// Size at the best bid.
    pub bid_size: Option<i64>,
    /// Size at the best ask.
    pub ask_size: Option<i64>,
}

// =============================================================================
// Portfolio
// =============================================================================

/// One portfolio or account-value change for an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountDelta {
    /// A position changed.
    Position {
        /// Contract symbol.
        symbol: String,
        /// Signed position size.
        position: Decimal,
        /// Current market price.
        market_price: Decimal,
        /// Current market value.
        market_value: Decimal,
        /// Average acquisition cost.
        average_cost: Decimal,
        /// Unrealized profit and loss.
        unrealized_pnl: Decimal,
    },
    /// An account value changed.
    AccountValue {
        /// Value key, e.g. `NetLiquidation`.
        key: String,
        /// Value as reported upstream.
        value: String,
        /// Currency of the value.
        currency: String,
    },
}

// =============================================================================
// News
// =============================================================================

/// An exchange news bulletin as delivered upstream. Bulletins carry no
/// timestamp of their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsBulletin {
    /// Upstream message id.
    pub msg_id: i32,
    /// Upstream message type code.
    pub msg_type: i32,
    /// Bulletin text.
    pub message: String,
    /// Originating exchange.
    pub exchange: String,
}

/// A news headline tick from a ticker or provider feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsTick {
    /// Headline timestamp.
    pub time: DateTime<Utc>,
    /// News provider code, e.g. `BZ`, `DJ`.
    pub provider_code: String,
    /// Provider-scoped article id.
    pub article_id: String,
    /// Headline text.
    pub headline: String,
}

/// A news provider available for broadtape subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsProvider {
    /// Provider code.
    pub code: String,
    /// Human-readable provider name.
    pub name: String,
}

/// A normalized news item as cached and served to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    /// Item timestamp (headline time, or arrival time for bulletins).
    pub timestamp: DateTime<Utc>,
    /// Provider code or originating exchange.
    pub provider_code: String,
    /// Article or bulletin id.
    pub article_id: String,
    /// Headline text.
    pub headline: String,
    /// Symbol the item was received for, when from a ticker feed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_symbol: Option<String>,
}

/// Bounded ring buffer of news items, oldest-first.
///
/// Pushing onto a full buffer evicts the oldest item, so memory stays bounded
/// no matter how long a stream runs.
#[derive(Debug, Clone)]
pub struct NewsBuffer {
    items: VecDeque<NewsItem>,
    capacity: usize,
}

impl NewsBuffer {
    /// Create a buffer holding at most `capacity` items (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an item, evicting the oldest when full.
    pub fn push(&mut self, item: NewsItem) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Items in insertion order, oldest first.
    pub fn items(&self) -> impl Iterator<Item = &NewsItem> {
        self.items.iter()
    }

    /// Number of buffered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of items retained.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

// =============================================================================
// Tests
// =============================================================================
