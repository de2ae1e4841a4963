//! Stream Hub Facade
//!
//! One object over all five family supervisors, exposing the JSON contract
//! consumers see: `start_*` / `stop_*` / `read_*` per family, stream listing,
//! and shutdown. Timestamps are rendered as epoch milliseconds, `0` before
//! the first event.
//!
//! The ticker-news `*` id addresses the aggregation view: starting it flips a
//! flag (no upstream subscription), reading it merges every subscribed
//! symbol's buffer newest-first, and stopping it tears down all ticker
//! streams and clears the flag.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::application::families::{
    BROADTAPE_RESOURCE_ID, BULLETINS_RESOURCE_ID, BroadtapeNewsFamily, BulletinParams,
    MarketDataFamily, NewsBulletinsFamily, PortfolioFamily, TickerNewsFamily,
};
use crate::application::ports::{NotificationSink, UpstreamSession};
use crate::application::supervisor::{
    StartOutcome, StopOutcome, StreamSummary, StreamSupervisor,
};
use crate::domain::resource::{AGGREGATE_ID, Family, ResourceId, ResourceUri, StreamState};
use crate::domain::streaming::{ContractSpec, NewsItem};
use crate::infrastructure::config::HubConfig;

// =============================================================================
// StreamHub
// =============================================================================

/// The streaming-resource hub: five supervised families behind one JSON
/// contract.
pub struct StreamHub {
    session: Arc<dyn UpstreamSession>,
    market_data: StreamSupervisor<MarketDataFamily>,
    portfolio: StreamSupervisor<PortfolioFamily>,
    news_bulletins: StreamSupervisor<NewsBulletinsFamily>,
    ticker_news: StreamSupervisor<TickerNewsFamily>,
    broadtape_news: StreamSupervisor<BroadtapeNewsFamily>,
    aggregate_read_limit: usize,
}

impl StreamHub {
    /// Build the hub over an upstream session and a notification sink.
    #[must_use]
    pub fn new(
        session: Arc<dyn UpstreamSession>,
        notifier: Arc<dyn NotificationSink>,
        config: &HubConfig,
    ) -> Self {
        let join_timeout = config.streams.join_timeout;
        Self {
            market_data: StreamSupervisor::new(
                MarketDataFamily,
                Arc::clone(&session),
                Arc::clone(&notifier),
                join_timeout,
            ),
            portfolio: StreamSupervisor::new(
                PortfolioFamily,
                Arc::clone(&session),
                Arc::clone(&notifier),
                join_timeout,
            ),
            news_bulletins: StreamSupervisor::new(
                NewsBulletinsFamily::new(config.news.bulletins_capacity),
                Arc::clone(&session),
                Arc::clone(&notifier),
                join_timeout,
            ),
            ticker_news: StreamSupervisor::new(
                TickerNewsFamily::new(config.news.ticker_capacity),
                Arc::clone(&session),
                Arc::clone(&notifier),
                join_timeout,
            ),
            broadtape_news: StreamSupervisor::new(
                BroadtapeNewsFamily::new(config.news.broadtape_capacity),
                Arc::clone(&session),
                notifier,
                join_timeout,
            ),
            aggregate_read_limit: config.news.aggregate_read_limit,
            session,
        }
    }

    /// Whether the upstream session is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    // =========================================================================
    // Market Data
    // =========================================================================

    /// Start streaming market data for a contract.
    pub fn start_market_data(&self, contract: ContractSpec) -> Value {
        let id = contract.resource_id();
        let mut response = start_json(&self.market_data.start(contract.clone()));
        annotate(&mut response, "resource_id", json!(id));
        annotate(&mut response, "contract", json!(contract));
        response
    }

    /// Stop the market data stream for a resource id.
    pub async fn stop_market_data(&self, id: &str) -> Value {
        let id = ResourceId::from(id);
        stop_json(self.market_data.stop(&id).await, &id)
    }

    /// Read the cached market data snapshot for a resource id.
    #[must_use]
    pub fn read_market_data(&self, id: &str) -> Value {
        let id = ResourceId::from(id);
        self.market_data.read(&id).map_or_else(
            || not_subscribed(&id),
            |snapshot| {
                let data = snapshot
                    .payload
                    .tick
                    .as_ref()
                    .map_or_else(|| json!({}), |tick| json!(tick));
                json!({
                    "resource_id": id,
                    "subscribed": true,
                    "data": data,
                    "last_update": millis(snapshot.updated_at),
                    "state": snapshot.state.label(),
                    "contract": snapshot.params,
                })
            },
        )
    }

    // =========================================================================
    // Portfolio
    // =========================================================================

    /// Start streaming portfolio updates for an account.
    pub fn start_portfolio(&self, account: &str) -> Value {
        let id = ResourceId::from(account);
        let mut response = start_json(&self.portfolio.start(account.to_string()));
        annotate(&mut response, "resource_id", json!(id));
        annotate(&mut response, "account", json!(account));
        response
    }

    /// Stop the portfolio stream for an account.
    pub async fn stop_portfolio(&self, account: &str) -> Value {
        let id = ResourceId::from(account);
        stop_json(self.portfolio.stop(&id).await, &id)
    }

    /// Read the cached portfolio snapshot for an account.
    #[must_use]
    pub fn read_portfolio(&self, account: &str) -> Value {
        let id = ResourceId::from(account);
        self.portfolio.read(&id).map_or_else(
            || not_subscribed(&id),
            |snapshot| {
                let data = snapshot
                    .payload
                    .last
                    .as_ref()
                    .map_or_else(|| json!({}), |delta| json!(delta));
                json!({
                    "account": id,
                    "subscribed": true,
                    "data": data,
                    "last_update": millis(snapshot.updated_at),
                    "state": snapshot.state.label(),
                })
            },
        )
    }

    // =========================================================================
    // News Bulletins
    // =========================================================================

    /// Start the exchange bulletin stream.
    pub fn start_news_bulletins(&self, all_messages: bool) -> Value {
        let mut response = start_json(&self.news_bulletins.start(BulletinParams { all_messages }));
        annotate(&mut response, "resource_id", json!(BULLETINS_RESOURCE_ID));
        response
    }

    /// Stop the exchange bulletin stream.
    pub async fn stop_news_bulletins(&self) -> Value {
        let id = ResourceId::from(BULLETINS_RESOURCE_ID);
        stop_json(self.news_bulletins.stop(&id).await, &id)
    }

    /// Read the buffered bulletins.
    #[must_use]
    pub fn read_news_bulletins(&self) -> Value {
        let id = ResourceId::from(BULLETINS_RESOURCE_ID);
        self.news_bulletins.read(&id).map_or_else(
            || not_subscribed(&id),
            |snapshot| {
                let items: Vec<&NewsItem> = snapshot.payload.items().collect();
                json!({
                    "subscribed": true,
                    "count": items.len(),
                    "items": items,
                    "last_update": millis(snapshot.updated_at),
                    "state": snapshot.state.label(),
                })
            },
        )
    }

    // =========================================================================
    // Ticker News
    // =========================================================================

    /// Start a ticker news stream, or enable the `*` aggregation view.
    ///
    /// `*` only flips the aggregation flag; it never opens an upstream
    /// subscription of its own.
    pub fn start_ticker_news(&self, contract: ContractSpec) -> Value {
        if contract.symbol == AGGREGATE_ID {
            return self.enable_aggregation();
        }
        let id = ResourceId::new(contract.symbol.clone());
        let mut response = start_json(&self.ticker_news.start(contract));
        annotate(&mut response, "resource_id", json!(id));
        response
    }

    fn enable_aggregation(&self) -> Value {
        if !self.session.is_connected() {
            return json!({ "status": "error", "error": "not connected" });
        }
        let uri = aggregate_uri();
        let family = self.ticker_news.family_ref();
        if family.aggregate_enabled() {
            return json!({
                "status": "already_subscribed",
                "resource_uri": uri,
            });
        }
        family.set_aggregate_enabled(true);
        tracing::info!("ticker news aggregation enabled");
        json!({
            "status": "subscribed",
            "resource_id": AGGREGATE_ID,
            "resource_uri": uri,
            "note": "aggregates symbols with active ticker news streams",
        })
    }

    /// Stop a ticker news stream, or tear down all of them for `*`.
    pub async fn stop_ticker_news(&self, symbol: &str) -> Value {
        if symbol == AGGREGATE_ID {
            let family = self.ticker_news.family_ref();
            family.set_aggregate_enabled(false);
            let stopped = self.ticker_news.stop_all().await;
            tracing::info!(stopped, "ticker news aggregation disabled");
            return json!({
                "status": "stopped",
                "resource_id": AGGREGATE_ID,
                "stopped_streams": stopped,
            });
        }
        let id = ResourceId::from(symbol);
        stop_json(self.ticker_news.stop(&id).await, &id)
    }

    /// Read buffered news for one symbol, or the merged `*` view.
    #[must_use]
    pub fn read_ticker_news(&self, symbol: &str) -> Value {
        if symbol == AGGREGATE_ID {
            return self.read_aggregated_news();
        }
        let id = ResourceId::from(symbol);
        self.ticker_news.read(&id).map_or_else(
            || not_subscribed(&id),
            |snapshot| {
                let items: Vec<&NewsItem> = snapshot.payload.items().collect();
                json!({
                    "symbol": id,
                    "subscribed": true,
                    "count": items.len(),
                    "items": items,
                    "last_update": millis(snapshot.updated_at),
                    "state": snapshot.state.label(),
                })
            },
        )
    }

    /// Merge every subscribed symbol's buffer, newest first, capped at the
    /// configured limit.
    fn read_aggregated_news(&self) -> Value {
        let snapshots = self.ticker_news.snapshots();
        if snapshots.is_empty() && !self.ticker_news.family_ref().aggregate_enabled() {
            return json!({ "subscribed": false, "error": "no subscriptions active" });
        }

        let mut symbols: Vec<String> = snapshots.iter().map(|(id, _)| id.to_string()).collect();
        symbols.sort();

        let mut items: Vec<NewsItem> = snapshots
            .iter()
            .flat_map(|(_, snapshot)| snapshot.payload.items().cloned().collect::<Vec<_>>())
            .collect();
        let total = items.len();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        items.truncate(self.aggregate_read_limit);

        json!({
            "symbol": AGGREGATE_ID,
            "subscribed": true,
            "subscribed_symbols": symbols,
            "total_count": total,
            "count": items.len(),
            "items": items,
        })
    }

    // =========================================================================
    // Broadtape News
    // =========================================================================

    /// Start the aggregated broadtape stream across all news providers.
    pub fn start_broadtape_news(&self) -> Value {
        let mut response = start_json(&self.broadtape_news.start(()));
        annotate(&mut response, "resource_id", json!(BROADTAPE_RESOURCE_ID));
        response
    }

    /// Stop the broadtape stream.
    pub async fn stop_broadtape_news(&self) -> Value {
        let id = ResourceId::from(BROADTAPE_RESOURCE_ID);
        stop_json(self.broadtape_news.stop(&id).await, &id)
    }

    /// Read the buffered broadtape headlines.
    #[must_use]
    pub fn read_broadtape_news(&self) -> Value {
        let id = ResourceId::from(BROADTAPE_RESOURCE_ID);
        self.broadtape_news.read(&id).map_or_else(
            || not_subscribed(&id),
            |snapshot| {
                let items: Vec<&NewsItem> = snapshot.payload.items().collect();
                json!({
                    "subscribed": true,
                    "count": items.len(),
                    "items": items,
                    "last_update": millis(snapshot.updated_at),
                    "state": snapshot.state.label(),
                })
            },
        )
    }

    // =========================================================================
    // Listing and Shutdown
    // =========================================================================

    /// Listing entries for every registered stream across all families.
    #[must_use]
    pub fn summaries(&self) -> Vec<StreamSummary> {
        let mut all = Vec::new();
        all.extend(self.market_data.summaries());
        all.extend(self.portfolio.summaries());
        all.extend(self.news_bulletins.summaries());
        all.extend(self.ticker_news.summaries());
        all.extend(self.broadtape_news.summaries());
        all
    }

    /// Total number of registered streams.
    #[must_use]
    pub fn total_streams(&self) -> usize {
        self.market_data.registered_count()
            + self.portfolio.registered_count()
            + self.news_bulletins.registered_count()
            + self.ticker_news.registered_count()
            + self.broadtape_news.registered_count()
    }

    /// List every registered stream, grouped by family.
    #[must_use]
    pub fn list_active_streams(&self) -> Value {
        let mut families = serde_json::Map::new();
        let mut total = 0usize;
        for family in Family::all() {
            let summaries = self.summaries_for(*family);
            total += summaries.len();
            families.insert(
                family.as_str().to_string(),
                json!({
                    "count": summaries.len(),
                    "streams": summaries.iter().map(summary_json).collect::<Vec<_>>(),
                }),
            );
        }
        json!({
            "connected": self.is_connected(),
            "total": total,
            "aggregation_enabled": self.ticker_news.family_ref().aggregate_enabled(),
            "families": families,
        })
    }

    fn summaries_for(&self, family: Family) -> Vec<StreamSummary> {
        match family {
            Family::MarketData => self.market_data.summaries(),
            Family::Portfolio => self.portfolio.summaries(),
            Family::NewsBulletins => self.news_bulletins.summaries(),
            Family::TickerNews => self.ticker_news.summaries(),
            Family::BroadtapeNews => self.broadtape_news.summaries(),
        }
    }

    /// Stop every stream in every family and clear the aggregation flag.
    pub async fn shutdown(&self) -> Value {
        self.ticker_news.family_ref().set_aggregate_enabled(false);
        let mut stopped = 0;
        stopped += self.market_data.stop_all().await;
        stopped += self.portfolio.stop_all().await;
        stopped += self.news_bulletins.stop_all().await;
        stopped += self.ticker_news.stop_all().await;
        stopped += self.broadtape_news.stop_all().await;
        tracing::info!(stopped, "stream hub shut down");
        json!({ "status": "shutdown", "stopped_streams": stopped })
    }
}

// =============================================================================
// JSON Helpers
// =============================================================================

fn millis(updated_at: Option<DateTime<Utc>>) -> i64 {
    updated_at.map_or(0, |t| t.timestamp_millis())
}

fn aggregate_uri() -> ResourceUri {
    ResourceUri::new(Family::TickerNews, &ResourceId::from(AGGREGATE_ID))
}

fn start_json(outcome: &StartOutcome) -> Value {
    match outcome {
        StartOutcome::Subscribed { uri } => json!({
            "status": "subscribed",
            "resource_uri": uri,
        }),
        StartOutcome::AlreadySubscribed { uri } => json!({
            "status": "already_subscribed",
            "resource_uri": uri,
        }),
        StartOutcome::NotConnected => json!({
            "status": "error",
            "error": "not connected",
        }),
    }
}

fn stop_json(outcome: StopOutcome, id: &ResourceId) -> Value {
    match outcome {
        StopOutcome::Stopped => json!({
            "status": "stopped",
            "resource_id": id,
        }),
        StopOutcome::NotSubscribed => json!({
            "status": "error",
            "error": format!("no active stream for {id}"),
        }),
    }
}

fn not_subscribed(id: &ResourceId) -> Value {
    json!({
        "subscribed": false,
        "error": format!("no active stream for {id}"),
    })
}

/// Add a field to a successful response; error responses pass through
/// untouched.
fn annotate(response: &mut Value, key: &str, value: Value) {
    if response.get("error").is_some() {
        return;
    }
    if let Some(map) = response.as_object_mut() {
        map.insert(key.to_string(), value);
    }
}

fn summary_json(summary: &StreamSummary) -> Value {
    let mut value = json!({
        "resource_id": summary.resource_id,
        "uri": summary.uri,
        "state": summary.state.label(),
        "created_at": summary.created_at.to_rfc3339(),
        "last_update": millis(summary.updated_at),
    });
    if let StreamState::Failed(reason) = &summary.state {
        if let Some(map) = value.as_object_mut() {
            map.insert("error".to_string(), json!(reason));
        }
    }
    value
}

// =============================================================================
// Tests
// =============================================================================
