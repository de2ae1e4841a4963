//! Application Ports
//!
//! Interfaces between the stream engine and the outside world: the upstream
//! brokerage session, per-subscription event channels, and the notification
//! sink that fans out cache-change events.

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::resource::{Family, ResourceUri};
use crate::domain::streaming::{
    AccountDelta, ContractSpec, MarketTick, NewsBulletin, NewsProvider, NewsTick,
};

// =============================================================================
// Errors
// =============================================================================

/// Upstream condition codes that are advisory, not errors: farm connection
/// status, market data status, and the like.
const ADVISORY_CODES: [i32; 10] = [105, 110, 165, 321, 329, 399, 404, 434, 492, 10167];

/// Whether an upstream condition code is an advisory warning rather than a
/// real failure. The 2100-2199 block is status chatter.
#[must_use]
pub fn is_advisory_code(code: i32) -> bool {
    ADVISORY_CODES.contains(&code) || (2100..2200).contains(&code)
}

/// An error event delivered in-band on a feed channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Advisory condition; the stream keeps running.
    #[error("advisory condition {code} from upstream: {message}")]
    Transient {
        /// Upstream condition code.
        code: i32,
        /// Upstream message text.
        message: String,
    },
    /// Fatal error; the stream task terminates.
    #[error("fatal upstream error {code}: {message}")]
    Fatal {
        /// Upstream error code.
        code: i32,
        /// Upstream message text.
        message: String,
    },
}

impl FeedError {
    /// Classify an upstream code into a transient or fatal feed error.
    pub fn from_code(code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        if is_advisory_code(code) {
            Self::Transient { code, message }
        } else {
            Self::Fatal { code, message }
        }
    }

    /// Whether the stream should keep running after this error.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Failure to open an upstream subscription.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The session is not connected.
    #[error("not connected to upstream session")]
    NotConnected,
    /// The upstream rejected or dropped the subscription request.
    #[error("upstream subscription failed: {0}")]
    SubscriptionFailed(String),
    /// No news providers are available for broadtape aggregation.
    #[error("no news providers available")]
    NoProviders,
}

// =============================================================================
// Subscription
// =============================================================================

/// One event on a feed channel: a payload or an in-band error.
pub type FeedEvent<T> = Result<T, FeedError>;

type CloseFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// An open upstream subscription: a private event channel plus an async
/// close hook that releases the upstream resources.
///
/// Each subscription owns its channel; streams never share a callback bus.
pub struct Subscription<T> {
    events: mpsc::Receiver<FeedEvent<T>>,
    close: Option<CloseFn>,
}

impl<T> Subscription<T> {
    /// Wrap a receiver with an async close hook.
    pub fn new(
        events: mpsc::Receiver<FeedEvent<T>>,
        close: impl FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    ) -> Self {
        Self {
            events,
            close: Some(Box::new(close)),
        }
    }

    /// Wrap a bare receiver; closing is a no-op beyond dropping the channel.
    #[must_use]
    pub const fn from_channel(events: mpsc::Receiver<FeedEvent<T>>) -> Self {
        Self {
            events,
            close: None,
        }
    }

    /// Receive the next event. `None` means the feed ended.
    pub async fn recv(&mut self) -> Option<FeedEvent<T>> {
        self.events.recv().await
    }

    /// Release the upstream subscription.
    pub async fn close(mut self) {
        if let Some(close) = self.close.take() {
            close().await;
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("has_close_hook", &self.close.is_some())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Upstream Session
// =============================================================================

/// The brokerage session the hub consumes events from.
///
/// One `open_*` method per stream family. Each call allocates a fresh
/// [`Subscription`] with its own channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamSession: Send + Sync {
    /// Whether the session is currently connected.
    fn is_connected(&self) -> bool;

    /// Open a market data feed for a contract.
    async fn open_market_data(
        &self,
        contract: &ContractSpec,
    ) -> Result<Subscription<MarketTick>, UpstreamError>;

    /// Open portfolio and account-value updates for an account.
    async fn open_account_updates(
        &self,
        account: &str,
    ) -> Result<Subscription<AccountDelta>, UpstreamError>;

    /// Open the exchange news bulletin feed.
    async fn open_news_bulletins(
        &self,
        all_messages: bool,
    ) -> Result<Subscription<NewsBulletin>, UpstreamError>;

    /// Open a headline feed for one contract.
    async fn open_ticker_news(
        &self,
        contract: &ContractSpec,
    ) -> Result<Subscription<NewsTick>, UpstreamError>;

    /// Enumerate available news providers.
    async fn news_providers(&self) -> Result<Vec<NewsProvider>, UpstreamError>;

    /// Open the broadtape feed of one news provider.
    async fn open_provider_feed(
        &self,
        provider: &NewsProvider,
    ) -> Result<Subscription<NewsTick>, UpstreamError>;
}

// =============================================================================
// Notification Sink
// =============================================================================

/// Receives a notification every time a resource's cached payload changes.
///
/// Called from stream tasks; implementations must not block.
pub trait NotificationSink: Send + Sync {
    /// A resource's cached payload was updated.
    fn notify(&self, family: Family, uri: &ResourceUri);
}

// =============================================================================
// Tests
// =============================================================================
