//! Resource Identity and Stream Lifecycle Types
//!
//! Every supervised stream is addressed by a `(Family, ResourceId)` pair and
//! exposed to consumers as a `ResourceUri`. Singleton families (bulletins,
//! broadtape) have exactly one resource and render without an id segment.

use std::fmt;

use serde::Serialize;

/// Sentinel resource id for the ticker-news aggregation view.
pub const AGGREGATE_ID: &str = "*";

// =============================================================================
// Family
// =============================================================================

/// The five supervised stream families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// Per-contract market data ticks.
    MarketData,
    /// Per-account portfolio and account-value updates.
    Portfolio,
    /// Exchange news bulletins (singleton).
    NewsBulletins,
    /// Per-symbol news headlines.
    TickerNews,
    /// Aggregated multi-provider news feed (singleton).
    BroadtapeNews,
}

impl Family {
    /// Stable string form, used in URIs, JSON output, and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MarketData => "market-data",
            Self::Portfolio => "portfolio",
            Self::NewsBulletins => "news-bulletins",
            Self::TickerNews => "ticker-news",
            Self::BroadtapeNews => "broadtape-news",
        }
    }

    /// Whether this family has exactly one resource.
    #[must_use]
    pub const fn is_singleton(self) -> bool {
        matches!(self, Self::NewsBulletins | Self::BroadtapeNews)
    }

    /// All families, in display order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::MarketData,
            Self::Portfolio,
            Self::NewsBulletins,
            Self::TickerNews,
            Self::BroadtapeNews,
        ]
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ResourceId
// =============================================================================

/// Identifier of one resource within a family.
///
/// Market data uses the contract symbol (currency-qualified for forex, e.g.
/// `USD.JPY`), portfolio uses the account id, ticker news uses the plain
/// symbol, and the singleton families use a fixed id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a resource id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// =============================================================================
// ResourceUri
// =============================================================================

/// Consumer-facing URI for a supervised resource.
///
/// Rendered as `tws://{family}/{id}`, or `tws://{family}` for singleton
/// families.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceUri(String);

impl ResourceUri {
    /// URI scheme for all hub resources.
    pub const SCHEME: &'static str = "tws";

    /// Build the URI for a `(family, id)` pair.
    #[must_use]
    pub fn new(family: Family, id: &ResourceId) -> Self {
        if family.is_singleton() {
            Self(format!("{}://{}", Self::SCHEME, family.as_str()))
        } else {
            Self(format!("{}://{}/{id}", Self::SCHEME, family.as_str()))
        }
    }

    /// The URI as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// StreamState
// =============================================================================

/// Lifecycle state of a supervised stream task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    /// The background task is consuming upstream events.
    Running,
    /// The upstream feed ended on its own.
    Completed,
    /// The task was cancelled by an explicit stop or shutdown.
    Cancelled,
    /// The task hit a fatal upstream error; the reason is retained.
    Failed(String),
}

impl StreamState {
    /// Stable lowercase label for JSON output.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
        }
    }

    /// Whether the task is still consuming events.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Tests
// =============================================================================
