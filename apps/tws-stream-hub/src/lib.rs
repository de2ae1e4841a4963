#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! TWS Stream Hub - Streaming Resource Subsystem
//!
//! Converts upstream brokerage event streams into three coordinated surfaces:
//! a queryable cache of per-resource snapshots, push notifications on every
//! cache change, and supervised background tasks with cooperative
//! cancellation. Five stream families share one generic engine: market data,
//! portfolio updates, news bulletins, per-ticker news, and aggregated
//! broadtape news.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core resource and payload types
//!   - `resource`: Families, resource ids, URIs, stream states
//!   - `streaming`: Upstream payload types (ticks, deltas, news buffers)
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Upstream session, per-subscription channels, notification sink
//!   - `supervisor`: Generic per-family registry and stream task engine
//!   - `families`: The five concrete family implementations
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `facade`: JSON-facing hub over all five supervisors
//!   - `notify`: Push/broadcast notification sinks
//!   - `config`: Environment-driven configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`: Prometheus metrics
//!   - `telemetry`: Tracing subscriber setup
//!
//! # Data Flow
//!
//! ```text
//! Upstream session ──► Subscription<Event> ──► StreamSupervisor ──► cache
//!                                                    │
//!                                                    └──► NotificationSink ──► subscribers
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core resource and payload types with no external services.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::resource::{AGGREGATE_ID, Family, ResourceId, ResourceUri, StreamState};
pub use domain::streaming::{
    AccountDelta, ContractSpec, MarketTick, NewsBuffer, NewsBulletin, NewsItem, NewsProvider,
    NewsTick, SecType,
};

// Application ports
pub use application::ports::{
    FeedError, FeedEvent, NotificationSink, Subscription, UpstreamError, UpstreamSession,
};

// Supervisor (for integration tests and embedders)
pub use application::supervisor::{
    FoldOutcome, StartOutcome, StopOutcome, StreamFamily, StreamSnapshot, StreamSummary,
    StreamSupervisor,
};

// Stream families
pub use application::families::{
    BROADTAPE_RESOURCE_ID, BULLETINS_RESOURCE_ID, BroadtapeNewsFamily, BulletinParams,
    MarketDataFamily, MarketSnapshot, NewsBulletinsFamily, PortfolioFamily, PortfolioSnapshot,
    TickerNewsFamily,
};

// Facade
pub use infrastructure::facade::StreamHub;

// Notification sinks
pub use infrastructure::notify::{
    CategoryBroadcaster, FanoutNotifier, PushNotifier, ResourceUpdated, SubscriberId,
};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, HubConfig, NewsSettings, ServerSettings, StreamSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::init as init_telemetry;
