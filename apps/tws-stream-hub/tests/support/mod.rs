//! Shared test doubles: an in-memory upstream session and a recording
//! notification sink.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use futures::FutureExt;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use tws_stream_hub::{
    AccountDelta, ContractSpec, Family, FeedEvent, HubConfig, MarketTick, NewsBulletin, NewsItem,
    NewsProvider, NewsTick, NotificationSink, ResourceUpdated, ResourceUri, StreamHub,
    Subscription, UpstreamError, UpstreamSession,
};

const FEED_CAPACITY: usize = 64;

// =============================================================================
// FakeSession
// =============================================================================

/// In-memory upstream session. Tests push events into the senders stored at
/// `open_*` time; close hooks count invocations so teardown can be asserted.
pub struct FakeSession {
    connected: AtomicBool,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
    market: Mutex<HashMap<String, mpsc::Sender<FeedEvent<MarketTick>>>>,
    accounts: Mutex<HashMap<String, mpsc::Sender<FeedEvent<AccountDelta>>>>,
    bulletins: Mutex<Option<mpsc::Sender<FeedEvent<NewsBulletin>>>>,
    ticker: Mutex<HashMap<String, mpsc::Sender<FeedEvent<NewsTick>>>>,
    providers: Vec<NewsProvider>,
    provider_feeds: Mutex<HashMap<String, mpsc::Sender<FeedEvent<NewsTick>>>>,
}

impl FakeSession {
    pub fn connected() -> Arc<Self> {
        Arc::new(Self::build(true, Vec::new()))
    }

    pub fn disconnected() -> Arc<Self> {
        Arc::new(Self::build(false, Vec::new()))
    }

    pub fn with_providers(codes: &[&str]) -> Arc<Self> {
        let providers = codes
            .iter()
            .map(|code| NewsProvider {
                code: (*code).to_string(),
                name: format!("{code} newswire"),
            })
            .collect();
        Arc::new(Self::build(true, providers))
    }

    fn build(connected: bool, providers: Vec<NewsProvider>) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            market: Mutex::new(HashMap::new()),
            accounts: Mutex::new(HashMap::new()),
            bulletins: Mutex::new(None),
            ticker: Mutex::new(HashMap::new()),
            providers,
            provider_feeds: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Number of upstream subscriptions opened (provider feeds included).
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of close hooks that have run.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn subscription<T>(&self, rx: mpsc::Receiver<FeedEvent<T>>) -> Subscription<T> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let closes = Arc::clone(&self.closes);
        Subscription::new(rx, move || {
            async move {
                closes.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    pub async fn push_market(&self, key: &str, event: FeedEvent<MarketTick>) {
        let tx = wait_for(|| self.market.lock().get(key).cloned()).await;
        tx.send(event).await.unwrap();
    }

    pub async fn push_account(&self, account: &str, event: FeedEvent<AccountDelta>) {
        let tx = wait_for(|| self.accounts.lock().get(account).cloned()).await;
        tx.send(event).await.unwrap();
    }

    pub async fn push_bulletin(&self, event: FeedEvent<NewsBulletin>) {
        let tx = wait_for(|| self.bulletins.lock().clone()).await;
        tx.send(event).await.unwrap();
    }

    pub async fn push_ticker_news(&self, symbol: &str, event: FeedEvent<NewsTick>) {
        let tx = wait_for(|| self.ticker.lock().get(symbol).cloned()).await;
        tx.send(event).await.unwrap();
    }

    pub async fn push_provider_news(&self, provider: &str, event: FeedEvent<NewsTick>) {
        let tx = wait_for(|| self.provider_feeds.lock().get(provider).cloned()).await;
        tx.send(event).await.unwrap();
    }

    /// Drop the market feed sender, ending the upstream feed.
    pub async fn end_market_feed(&self, key: &str) {
        wait_for(|| self.market.lock().get(key).cloned()).await;
        self.market.lock().remove(key);
    }
}

#[async_trait]
impl UpstreamSession for FakeSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn open_market_data(
        &self,
        contract: &ContractSpec,
    ) -> Result<Subscription<MarketTick>, UpstreamError> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        self.market
            .lock()
            .insert(contract.resource_id().to_string(), tx);
        Ok(self.subscription(rx))
    }

    async fn open_account_updates(
        &self,
        account: &str,
    ) -> Result<Subscription<AccountDelta>, UpstreamError> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        self.accounts.lock().insert(account.to_string(), tx);
        Ok(self.subscription(rx))
    }

    async fn open_news_bulletins(
        &self,
        _all_messages: bool,
    ) -> Result<Subscription<NewsBulletin>, UpstreamError> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        *self.bulletins.lock() = Some(tx);
        Ok(self.subscription(rx))
    }

    async fn open_ticker_news(
        &self,
        contract: &ContractSpec,
    ) -> Result<Subscription<NewsTick>, UpstreamError> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        self.ticker.lock().insert(contract.symbol.clone(), tx);
        Ok(self.subscription(rx))
    }

    async fn news_providers(&self) -> Result<Vec<NewsProvider>, UpstreamError> {
        Ok(self.providers.clone())
    }

    async fn open_provider_feed(
        &self,
        provider: &NewsProvider,
    ) -> Result<Subscription<NewsTick>, UpstreamError> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        self.provider_feeds.lock().insert(provider.code.clone(), tx);
        Ok(self.subscription(rx))
    }
}

// =============================================================================
// RecordingSink
// =============================================================================

/// Notification sink that records every delivery.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ResourceUpdated>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_for(&self, uri: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.uri.as_str() == uri)
            .count()
    }

    pub fn uris(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| e.uri.as_str().to_string())
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, family: Family, uri: &ResourceUri) {
        self.events.lock().push(ResourceUpdated {
            family,
            uri: uri.clone(),
        });
    }
}

// =============================================================================
// Helpers
// =============================================================================

pub fn hub_with(session: Arc<FakeSession>, sink: Arc<RecordingSink>) -> StreamHub {
    StreamHub::new(session, sink, &HubConfig::default())
}

pub fn hub_with_config(
    session: Arc<FakeSession>,
    sink: Arc<RecordingSink>,
    config: &HubConfig,
) -> StreamHub {
    StreamHub::new(session, sink, config)
}

pub fn tick(seconds: i64, last_cents: i64) -> MarketTick {
    MarketTick {
        time: DateTime::from_timestamp(seconds, 0).unwrap(),
        last: Some(Decimal::new(last_cents, 2)),
        bid: Some(Decimal::new(last_cents - 1, 2)),
        ask: Some(Decimal::new(last_cents + 1, 2)),
        close: None,
        volume: Some(1000),
        bid_size: Some(3),
        ask_size: Some(5),
    }
}

pub fn news_tick(seconds: i64, provider: &str, article: &str, headline: &str) -> NewsTick {
    NewsTick {
        time: DateTime::from_timestamp(seconds, 0).unwrap(),
        provider_code: provider.to_string(),
        article_id: article.to_string(),
        headline: headline.to_string(),
    }
}

pub fn item_headlines(items: &[NewsItem]) -> Vec<String> {
    items.iter().map(|i| i.headline.clone()).collect()
}

/// Poll until `f` yields `Some`, or panic after ~2 seconds.
pub async fn wait_for<T>(f: impl Fn() -> Option<T>) -> T {
    for _ in 0..400 {
        if let Some(value) = f() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for condition");
}

/// Poll until `f` is true, or panic after ~2 seconds.
pub async fn eventually(f: impl Fn() -> bool, what: &str) {
    for _ in 0..400 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within timeout: {what}");
}
