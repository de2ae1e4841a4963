//! Stream Family Implementations
//!
//! The five concrete [`StreamFamily`] behaviors. Market data and portfolio
//! cache last-value snapshots; the three news families share the bounded
//! [`NewsBuffer`] payload and differ in how they open their upstream feeds
//! and stamp their items.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Subscription, UpstreamError, UpstreamSession};
use crate::application::supervisor::{FoldOutcome, StreamFamily};
use crate::domain::resource::{AGGREGATE_ID, Family, ResourceId, ResourceUri};
use crate::domain::streaming::{
    AccountDelta, ContractSpec, MarketTick, NewsBuffer, NewsBulletin, NewsItem, NewsTick,
};

/// Resource id of the bulletin singleton.
pub const BULLETINS_RESOURCE_ID: &str = "bulletins";

/// Resource id of the broadtape singleton.
pub const BROADTAPE_RESOURCE_ID: &str = "broadtape";

/// Channel depth for the merged broadtape feed.
const BROADTAPE_MERGE_CAPACITY: usize = 256;

// =============================================================================
// Market Data
// =============================================================================

/// Last-tick snapshot cached per contract.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    /// Most recent tick, `None` before the first event.
    pub tick: Option<MarketTick>,
}

/// Per-contract market data ticks, deduplicated on tick timestamp.
pub struct MarketDataFamily;

#[async_trait]
impl StreamFamily for MarketDataFamily {
    type Params = ContractSpec;
    type Event = MarketTick;
    type Payload = MarketSnapshot;

    fn family(&self) -> Family {
        Family::MarketData
    }

    fn resource_id(&self, params: &Self::Params) -> ResourceId {
        params.resource_id()
    }

    fn initial_payload(&self) -> Self::Payload {
        MarketSnapshot::default()
    }

    async fn open(
        &self,
        session: &dyn UpstreamSession,
        params: &Self::Params,
    ) -> Result<Subscription<Self::Event>, UpstreamError> {
        session.open_market_data(params).await
    }

    fn fold(
        &self,
        _id: &ResourceId,
        payload: &mut Self::Payload,
        event: Self::Event,
    ) -> FoldOutcome {
        // Upstream replays the same tick snapshot on unrelated field changes;
        // an unchanged timestamp means no new market data.
        if payload
            .tick
            .as_ref()
            .is_some_and(|previous| previous.time == event.time)
        {
            return FoldOutcome::Unchanged;
        }
        payload.tick = Some(event);
        FoldOutcome::Updated
    }
}

// =============================================================================
// Portfolio
// =============================================================================

/// Last-delta snapshot cached per account.
#[derive(Debug, Clone, Default)]
pub struct PortfolioSnapshot {
    /// Most recent portfolio or account-value change.
    pub last: Option<AccountDelta>,
}

/// Per-account portfolio and account-value updates.
pub struct PortfolioFamily;

#[async_trait]
impl StreamFamily for PortfolioFamily {
    type Params = String;
    type Event = AccountDelta;
    type Payload = PortfolioSnapshot;

    fn family(&self) -> Family {
        Family::Portfolio
    }

    fn resource_id(&self, params: &Self::Params) -> ResourceId {
        ResourceId::new(params.clone())
    }

    fn initial_payload(&self) -> Self::Payload {
        PortfolioSnapshot::default()
    }

    async fn open(
        &self,
        session: &dyn UpstreamSession,
        params: &Self::Params,
    ) -> Result<Subscription<Self::Event>, UpstreamError> {
        session.open_account_updates(params).await
    }

    fn fold(
        &self,
        _id: &ResourceId,
        payload: &mut Self::Payload,
        event: Self::Event,
    ) -> FoldOutcome {
        payload.last = Some(event);
        FoldOutcome::Updated
    }
}

// =============================================================================
// News Bulletins
// =============================================================================

/// Parameters for the bulletin singleton.
#[derive(Debug, Clone, Copy)]
pub struct BulletinParams {
    /// Request all pending bulletins, not just new ones.
    pub all_messages: bool,
}

impl Default for BulletinParams {
    fn default() -> Self {
        Self { all_messages: true }
    }
}

/// Exchange news bulletins, buffered in arrival order.
pub struct NewsBulletinsFamily {
    capacity: usize,
}

impl NewsBulletinsFamily {
    /// Create the family with the given buffer capacity.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self { capacity }
    }
}

#[async_trait]
impl StreamFamily for NewsBulletinsFamily {
    type Params = BulletinParams;
    type Event = NewsBulletin;
    type Payload = NewsBuffer;

    fn family(&self) -> Family {
        Family::NewsBulletins
    }

    fn resource_id(&self, _params: &Self::Params) -> ResourceId {
        ResourceId::from(BULLETINS_RESOURCE_ID)
    }

    fn initial_payload(&self) -> Self::Payload {
        NewsBuffer::with_capacity(self.capacity)
    }

    async fn open(
        &self,
        session: &dyn UpstreamSession,
        params: &Self::Params,
    ) -> Result<Subscription<Self::Event>, UpstreamError> {
        session.open_news_bulletins(params.all_messages).await
    }

    fn fold(
        &self,
        _id: &ResourceId,
        payload: &mut Self::Payload,
        event: Self::Event,
    ) -> FoldOutcome {
        // Bulletins carry no upstream timestamp; stamp at arrival.
        payload.push(NewsItem {
            timestamp: Utc::now(),
            provider_code: event.exchange,
            article_id: event.msg_id.to_string(),
            headline: event.message,
            source_symbol: None,
        });
        FoldOutcome::Updated
    }
}

// =============================================================================
// Ticker News
// =============================================================================

/// Per-symbol news headlines, with an opt-in aggregation view across all
/// subscribed symbols.
pub struct TickerNewsFamily {
    capacity: usize,
    aggregate_enabled: Arc<AtomicBool>,
}

impl TickerNewsFamily {
    /// Create the family with the given per-symbol buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            aggregate_enabled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the `*` aggregation view is enabled.
    #[must_use]
    pub fn aggregate_enabled(&self) -> bool {
        self.aggregate_enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable the `*` aggregation view.
    pub fn set_aggregate_enabled(&self, enabled: bool) {
        self.aggregate_enabled.store(enabled, Ordering::SeqCst);
    }
}

#[async_trait]
impl StreamFamily for TickerNewsFamily {
    type Params = ContractSpec;
    type Event = NewsTick;
    type Payload = NewsBuffer;

    fn family(&self) -> Family {
        Family::TickerNews
    }

    fn resource_id(&self, params: &Self::Params) -> ResourceId {
        ResourceId::new(params.symbol.clone())
    }

    fn initial_payload(&self) -> Self::Payload {
        NewsBuffer::with_capacity(self.capacity)
    }

    async fn open(
        &self,
        session: &dyn UpstreamSession,
        params: &Self::Params,
    ) -> Result<Subscription<Self::Event>, UpstreamError> {
        session.open_ticker_news(params).await
    }

    fn fold(
        &self,
        id: &ResourceId,
        payload: &mut Self::Payload,
        event: Self::Event,
    ) -> FoldOutcome {
        payload.push(NewsItem {
            timestamp: event.time,
            provider_code: event.provider_code,
            article_id: event.article_id,
            headline: event.headline,
            source_symbol: Some(id.to_string()),
        });
        FoldOutcome::Updated
    }

    fn extra_notify_uri(&self) -> Option<ResourceUri> {
        if self.aggregate_enabled() {
            Some(ResourceUri::new(
                Family::TickerNews,
                &ResourceId::from(AGGREGATE_ID),
            ))
        } else {
            None
        }
    }
}

// =============================================================================
// Broadtape News
// =============================================================================

/// Aggregated broadtape headlines from every available news provider,
/// merged into one buffered feed.
pub struct BroadtapeNewsFamily {
    capacity: usize,
}

impl BroadtapeNewsFamily {
    /// Create the family with the given buffer capacity.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self { capacity }
    }
}

#[async_trait]
impl StreamFamily for BroadtapeNewsFamily {
    type Params = ();
    type Event = NewsTick;
    type Payload = NewsBuffer;

    fn family(&self) -> Family {
        Family::BroadtapeNews
    }

    fn resource_id(&self, _params: &Self::Params) -> ResourceId {
        ResourceId::from(BROADTAPE_RESOURCE_ID)
    }

    fn initial_payload(&self) -> Self::Payload {
        NewsBuffer::with_capacity(self.capacity)
    }

    /// Enumerate providers and open every provider feed, merging them into
    /// one channel via forwarder tasks. Closing the merged subscription
    /// cancels the forwarders, which close their provider feeds in turn.
    async fn open(
        &self,
        session: &dyn UpstreamSession,
        _params: &Self::Params,
    ) -> Result<Subscription<Self::Event>, UpstreamError> {
        let providers = session.news_providers().await?;
        if providers.is_empty() {
            return Err(UpstreamError::NoProviders);
        }

        let (tx, rx) = mpsc::channel(BROADTAPE_MERGE_CAPACITY);
        let cancel = CancellationToken::new();
        let mut opened = 0usize;

        for provider in &providers {
            match session.open_provider_feed(provider).await {
                Ok(mut feed) => {
                    opened += 1;
                    let tx = tx.clone();
                    let cancel = cancel.clone();
                    let code = provider.code.clone();
                    tokio::spawn(async move {
                        loop {
                            tokio::select! {
                                () = cancel.cancelled() => {
                                    feed.close().await;
                                    return;
                                }
                                event = feed.recv() => match event {
                                    Some(event) => {
                                        if tx.send(event).await.is_err() {
                                            feed.close().await;
                                            return;
                                        }
                                    }
                                    None => {
                                        tracing::debug!(
                                            provider = %code,
                                            "provider feed ended"
                                        );
                                        return;
                                    }
                                }
                            }
                        }
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        provider = %provider.code,
                        %error,
                        "failed to open provider feed; skipping"
                    );
                }
            }
        }

        if opened == 0 {
            return Err(UpstreamError::SubscriptionFailed(
                "all provider feeds failed to open".to_string(),
            ));
        }

        tracing::debug!(providers = opened, "broadtape merge opened");
        let close_cancel = cancel;
        Ok(Subscription::new(rx, move || {
            async move {
                close_cancel.cancel();
            }
            .boxed()
        }))
    }

    fn fold(
        &self,
        _id: &ResourceId,
        payload: &mut Self::Payload,
        event: Self::Event,
    ) -> FoldOutcome {
        payload.push(NewsItem {
            timestamp: event.time,
            provider_code: event.provider_code,
            article_id: event.article_id,
            headline: event.headline,
            source_symbol: None,
        });
        FoldOutcome::Updated
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use rust_decimal::Decimal;

    use super::*;

    fn tick(seconds: i64, last: i64) -> MarketTick {
        MarketTick {
            time: DateTime::from_timestamp(seconds, 0).unwrap(),
            last: Some(Decimal::new(last, 2)),
            bid: None,
            ask: None,
            close: None,
            volume: None,
            bid_size: None,
            ask_size: None,
        }
    }

    #[test]
    fn market_fold_keeps_latest_tick() {
        let family = MarketDataFamily;
        let id = ResourceId::from("AAPL");
        let mut payload = MarketSnapshot::default();

        assert_eq!(
            family.fold(&id, &mut payload, tick(1, 15005)),
            FoldOutcome::Updated
        );
        assert_eq!(
            family.fold(&id, &mut payload, tick(2, 15010)),
            FoldOutcome::Updated
        );
        assert_eq!(
            payload.tick.as_ref().unwrap().last,
            Some(Decimal::new(15010, 2))
        );
    }

    #[test]
    fn market_fold_discards_equal_timestamp() {
        let family = MarketDataFamily;
        let id = ResourceId::from("AAPL");
        let mut payload = MarketSnapshot::default();

        family.fold(&id, &mut payload, tick(1, 15005));
        // Same timestamp, different payload: treated as a replay.
        assert_eq!(
            family.fold(&id, &mut payload, tick(1, 19999)),
            FoldOutcome::Unchanged
        );
        assert_eq!(
            payload.tick.as_ref().unwrap().last,
            Some(Decimal::new(15005, 2))
        );
    }

    #[test]
    fn portfolio_fold_always_updates() {
        let family = PortfolioFamily;
        let id = ResourceId::from("DU1234567");
        let mut payload = PortfolioSnapshot::default();

        let delta = AccountDelta::AccountValue {
            key: "NetLiquidation".to_string(),
            value: "250000.00".to_string(),
            currency: "USD".to_string(),
        };
        assert_eq!(
            family.fold(&id, &mut payload, delta.clone()),
            FoldOutcome::Updated
        );
        assert_eq!(payload.last, Some(delta));
    }

    #[test]
    fn bulletin_fold_stamps_arrival_and_maps_fields() {
        let family = NewsBulletinsFamily::new(50);
        let id = ResourceId::from(BULLETINS_RESOURCE_ID);
        let mut payload = family.initial_payload();

        let before = Utc::now();
        family.fold(
            &id,
            &mut payload,
            NewsBulletin {
                msg_id: 17,
                msg_type: 1,
                message: "trading halted".to_string(),
                exchange: "NYSE".to_string(),
            },
        );
        let item = payload.items().next().unwrap();
        assert_eq!(item.article_id, "17");
        assert_eq!(item.provider_code, "NYSE");
        assert_eq!(item.headline, "trading halted");
        assert!(item.source_symbol.is_none());
        assert!(item.timestamp >= before);
    }

    #[test]
    fn ticker_fold_tags_source_symbol() {
        let family = TickerNewsFamily::new(100);
        let id = ResourceId::from("TSLA");
        let mut payload = family.initial_payload();

        family.fold(
            &id,
            &mut payload,
            NewsTick {
                time: DateTime::from_timestamp(5, 0).unwrap(),
                provider_code: "BZ".to_string(),
                article_id: "BZ$1".to_string(),
                headline: "deliveries beat".to_string(),
            },
        );
        let item = payload.items().next().unwrap();
        assert_eq!(item.source_symbol.as_deref(), Some("TSLA"));
    }

    #[test]
    fn ticker_extra_uri_follows_aggregation_flag() {
        let family = TickerNewsFamily::new(100);
        assert!(family.extra_notify_uri().is_none());

        family.set_aggregate_enabled(true);
        let uri = family.extra_notify_uri().unwrap();
        assert_eq!(uri.as_str(), "tws://ticker-news/*");

        family.set_aggregate_enabled(false);
        assert!(family.extra_notify_uri().is_none());
    }

    #[test]
    fn singleton_resource_ids() {
        assert_eq!(
            NewsBulletinsFamily::new(50)
                .resource_id(&BulletinParams::default())
                .as_str(),
            "bulletins"
        );
        assert_eq!(
            BroadtapeNewsFamily::new(1000).resource_id(&()).as_str(),
            "broadtape"
        );
    }
}
