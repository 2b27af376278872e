use chrono::{DateTime, TimeZone, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::client::ResilientMarketClient;
use crate::error::ClientResult;
use crate::provider::MarketDataProvider;
use crate::types::Market;

/// Sort keys for ranking qualifying markets, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankKey {
    Liquidity,
    Volume,
    CreatedAt,
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Base asset tickers, e.g. ["BTC", "ETH"]
    pub assets: Vec<String>,
    /// Contract window the question must mention
    pub duration_minutes: u32,
    /// Tie-break order among qualifying markets
    pub rank_by: Vec<RankKey>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            assets: vec![
                "BTC".to_string(),
                "ETH".to_string(),
                "SOL".to_string(),
                "XRP".to_string(),
            ],
            duration_minutes: 15,
            rank_by: vec![RankKey::Liquidity, RankKey::Volume, RankKey::CreatedAt],
        }
    }
}

/// A market that matched the target contract shape
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredMarket {
    /// Ticker from `DiscoveryConfig::assets`
    pub asset: String,
    pub market: Market,
}

const UNIT_TOKENS: &[&str] = &["m", "min", "mins", "minute", "minutes"];

/// Full names the questions use instead of tickers
fn asset_aliases(ticker: &str) -> &'static [&'static str] {
    match ticker {
        "BTC" => &["bitcoin"],
        "ETH" => &["ethereum", "ether"],
        "SOL" => &["solana"],
        "XRP" => &["ripple"],
        "DOGE" => &["dogecoin"],
        _ => &[],
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Selects 15-min Up/Down markets for the configured assets
pub struct MarketDiscovery {
    config: DiscoveryConfig,
}

impl MarketDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Does the question name the configured window, e.g. "15 minute" or "15m"?
    pub fn mentions_duration(&self, question: &str) -> bool {
        let duration = self.config.duration_minutes.to_string();
        let words = words(question);

        let joined = words.iter().any(|w| {
            w.strip_prefix(duration.as_str())
                .map(|unit| UNIT_TOKENS.contains(&unit))
                .unwrap_or(false)
        });
        let separate = words.iter().any(|w| *w == duration)
            && words.iter().any(|w| UNIT_TOKENS.contains(&w.as_str()));

        joined || separate
    }

    /// First configured asset the question refers to, by ticker or full name
    pub fn asset_of(&self, question: &str) -> Option<String> {
        let words = words(question);
        self.config
            .assets
            .iter()
            .find(|ticker| {
                let ticker_lower = ticker.to_lowercase();
                words.iter().any(|w| {
                    *w == ticker_lower || asset_aliases(&ticker.to_uppercase()).contains(&w.as_str())
                })
            })
            .cloned()
    }

    /// Configured asset for a `<asset>-updown-<N>m-<ts>` slug of the
    /// configured window, e.g. "btc-updown-15m-1762310700"
    pub fn asset_of_slug(&self, slug: &str) -> Option<String> {
        let slug = slug.to_lowercase();
        let mut parts = slug.split('-');
        let (prefix, kind, window, ts) = (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || kind != "updown" || ts.parse::<i64>().is_err() {
            return None;
        }
        if window != format!("{}m", self.config.duration_minutes) {
            return None;
        }
        self.config
            .assets
            .iter()
            .find(|ticker| {
                ticker.to_lowercase() == prefix
                    || asset_aliases(&ticker.to_uppercase()).contains(&prefix)
            })
            .cloned()
    }

    /// Market matches the target shape: window, asset, active binary Up/Down.
    /// Live window markets carry the window only in the slug; their titles
    /// read "Bitcoin Up or Down - November 4, 9:45PM-10:00PM ET".
    pub fn qualify(&self, market: &Market, now: DateTime<Utc>) -> Option<DiscoveredMarket> {
        if !market.active || market.is_expired(now) || !market.is_binary_up_down() {
            return None;
        }
        let asset = match self.asset_of_slug(&market.slug) {
            Some(asset) => asset,
            None if self.mentions_duration(&market.question) => self.asset_of(&market.question)?,
            None => return None,
        };
        Some(DiscoveredMarket {
            asset,
            market: market.clone(),
        })
    }

    /// Slug of the `asset` market for the window containing `now`
    pub fn window_slug(&self, asset: &str, now: DateTime<Utc>) -> String {
        let start = window_start(now, self.config.duration_minutes);
        format!(
            "{}-updown-{}m-{}",
            asset.to_lowercase(),
            self.config.duration_minutes,
            start.timestamp()
        )
    }

    /// Qualifying markets, ranked highest first. Empty when nothing matches.
    pub fn filter(&self, markets: &[Market], now: DateTime<Utc>) -> Vec<DiscoveredMarket> {
        let mut found: Vec<DiscoveredMarket> =
            markets.iter().filter_map(|m| self.qualify(m, now)).collect();
        found.sort_by(|a, b| self.compare(&b.market, &a.market));

        debug!(
            "{} of {} markets match the {}-minute shape",
            found.len(),
            markets.len(),
            self.config.duration_minutes
        );
        found
    }

    /// Qualifying markets for the given assets only
    pub fn filter_assets(
        &self,
        markets: &[Market],
        assets: &[String],
        now: DateTime<Utc>,
    ) -> Vec<DiscoveredMarket> {
        let wanted: HashSet<String> = assets.iter().map(|a| a.to_uppercase()).collect();
        self.filter(markets, now)
            .into_iter()
            .filter(|d| wanted.is_empty() || wanted.contains(&d.asset.to_uppercase()))
            .collect()
    }

    /// Top-ranked market per asset, in ranking order
    pub fn best_per_asset(&self, markets: &[Market], now: DateTime<Utc>) -> Vec<DiscoveredMarket> {
        let mut seen = HashSet::new();
        self.filter(markets, now)
            .into_iter()
            .filter(|d| seen.insert(d.asset.clone()))
            .collect()
    }

    /// Fetch the market list through the client and filter it. Assets with
    /// no match in the list are looked up by their current window slug,
    /// since the list is capped and may miss the live window.
    pub async fn discover<P: MarketDataProvider>(
        &self,
        client: &ResilientMarketClient<P>,
        assets: &[String],
    ) -> ClientResult<Vec<DiscoveredMarket>> {
        let now = Utc::now();
        let mut markets = client.list_markets_or_stale().await?;
        let listed = self.filter_assets(&markets, assets, now);

        let wanted = if assets.is_empty() { &self.config.assets[..] } else { assets };
        let mut added = false;
        for asset in wanted {
            if listed.iter().any(|d| d.asset.eq_ignore_ascii_case(asset)) {
                continue;
            }
            let slug = self.window_slug(asset, now);
            match client.get_market_by_slug(&slug).await {
                Ok(Some(market)) => {
                    debug!("Found {} window market by slug {}", asset, slug);
                    markets.push(market);
                    added = true;
                }
                Ok(None) => debug!("No market with slug {}", slug),
                Err(e) => warn!("Slug lookup for {} failed: {}", slug, e),
            }
        }

        let found = if added {
            self.filter_assets(&markets, assets, now)
        } else {
            listed
        };
        if let Some(best) = found.first() {
            info!(
                "Selected {} market: {} (liquidity {}, volume {})",
                best.asset, best.market.question, best.market.liquidity, best.market.volume
            );
        }
        Ok(found)
    }

    fn compare(&self, a: &Market, b: &Market) -> Ordering {
        for key in &self.config.rank_by {
            let ord = match key {
                RankKey::Liquidity => a.liquidity.cmp(&b.liquidity),
                RankKey::Volume => a.volume.cmp(&b.volume),
                // Unknown creation time ranks below any known one
                RankKey::CreatedAt => a.created_at.cmp(&b.created_at),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Start of the window containing `now`
pub fn window_start(now: DateTime<Utc>, duration_minutes: u32) -> DateTime<Utc> {
    let len = i64::from(duration_minutes.max(1)) * 60;
    let ts = (now.timestamp() / len) * len;
    Utc.timestamp_opt(ts, 0).single().unwrap_or(now)
}

/// Start of the window after the one containing `now`
pub fn next_window_start(now: DateTime<Utc>, duration_minutes: u32) -> DateTime<Utc> {
    window_start(now, duration_minutes) + chrono::Duration::minutes(i64::from(duration_minutes.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::connection::ConnectionConfig;
    use crate::retry::RetryPolicy;
    use crate::testkit::{btc_market, market, up_down_prices, ScriptedProvider};
    use rust_decimal_macros::dec;

    fn discovery() -> MarketDiscovery {
        MarketDiscovery::new(DiscoveryConfig::default())
    }

    #[test]
    fn test_duration_tokens() {
        let d = discovery();
        assert!(d.mentions_duration("Bitcoin Up or Down - 15 minute"));
        assert!(d.mentions_duration("BTC 15m Up/Down"));
        assert!(d.mentions_duration("ETH up or down in 15 mins?"));
        assert!(!d.mentions_duration("Bitcoin Up or Down - 1 hour"));
        assert!(!d.mentions_duration("Will BTC hit 150k in 5 minutes"));
        assert!(!d.mentions_duration("Bitcoin above 15 on Friday"));
    }

    #[test]
    fn test_asset_detection() {
        let d = discovery();
        assert_eq!(d.asset_of("Bitcoin Up or Down - 15 minute"), Some("BTC".to_string()));
        assert_eq!(d.asset_of("ETH 15m Up or Down"), Some("ETH".to_string()));
        assert_eq!(d.asset_of("Solana Up or Down"), Some("SOL".to_string()));
        assert_eq!(d.asset_of("Dogecoin Up or Down - 15 minute"), None);
        // "soldier" must not match SOL
        assert_eq!(d.asset_of("Toy soldier up or down 15 min"), None);
    }

    #[test]
    fn test_filter_rejects_wrong_shape() {
        let d = discovery();
        let now = Utc::now();

        let good = market("good", "Bitcoin Up or Down - 15 minute", dec!(10), dec!(1));
        let mut inactive = good.clone();
        inactive.id = "inactive".to_string();
        inactive.active = false;
        let mut three_tokens = good.clone();
        three_tokens.id = "three".to_string();
        three_tokens.tokens.extend(up_down_prices(dec!(0.3)).into_iter().take(1));
        let mut expired = good.clone();
        expired.id = "expired".to_string();
        expired.end_time = Some(now - chrono::Duration::minutes(1));
        let hourly = market("hourly", "Bitcoin Up or Down - 1 hour", dec!(10), dec!(1));

        let found = d.filter(&[good, inactive, three_tokens, expired, hourly], now);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].market.id, "good");
        assert_eq!(found[0].asset, "BTC");
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let d = discovery();
        let markets = vec![market("x", "Will it rain tomorrow?", dec!(1), dec!(1))];
        assert!(d.filter(&markets, Utc::now()).is_empty());
    }

    #[test]
    fn test_ranking_liquidity_then_volume_then_recency() {
        let d = discovery();
        let now = Utc::now();
        let q = "Bitcoin Up or Down - 15 minute";

        let low = market("low", q, dec!(100), dec!(999));
        let high_a = market("high-a", q, dec!(500), dec!(10));
        let high_b = market("high-b", q, dec!(500), dec!(20));
        let mut high_b_newer = market("high-b-newer", q, dec!(500), dec!(20));
        high_b_newer.created_at = Some(now - chrono::Duration::minutes(1));
        let mut high_b_older = high_b_newer.clone();
        high_b_older.id = "high-b-older".to_string();
        high_b_older.created_at = Some(now - chrono::Duration::minutes(30));

        let found = d.filter(&[low, high_a, high_b, high_b_older, high_b_newer], now);
        let ids: Vec<&str> = found.iter().map(|f| f.market.id.as_str()).collect();
        assert_eq!(ids, vec!["high-b-newer", "high-b-older", "high-b", "high-a", "low"]);
    }

    #[test]
    fn test_best_per_asset_and_asset_filter() {
        let d = discovery();
        let now = Utc::now();
        let markets = vec![
            market("btc-1", "Bitcoin Up or Down - 15 minute", dec!(50), dec!(1)),
            market("btc-2", "Bitcoin Up or Down - 15 minute", dec!(80), dec!(1)),
            market("eth-1", "Ethereum Up or Down - 15 minute", dec!(60), dec!(1)),
        ];

        let best = d.best_per_asset(&markets, now);
        let ids: Vec<&str> = best.iter().map(|f| f.market.id.as_str()).collect();
        assert_eq!(ids, vec!["btc-2", "eth-1"]);

        let eth_only = d.filter_assets(&markets, &["eth".to_string()], now);
        assert_eq!(eth_only.len(), 1);
        assert_eq!(eth_only[0].asset, "ETH");
    }

    fn window_market(id: &str, question: &str, slug: &str) -> Market {
        let mut m = market(id, question, dec!(100), dec!(10));
        m.slug = slug.to_string();
        m
    }

    #[test]
    fn test_live_window_title_matched_by_slug() {
        let d = discovery();
        let live = window_market(
            "btc-live",
            "Bitcoin Up or Down - November 4, 9:45PM-10:00PM ET",
            "btc-updown-15m-1762310700",
        );
        let hourly = window_market(
            "btc-hourly",
            "Bitcoin Up or Down - November 4, 9PM ET",
            "btc-updown-1h-1762308000",
        );
        let found = d.filter(&[live, hourly], Utc::now());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].market.id, "btc-live");
        assert_eq!(found[0].asset, "BTC");
    }

    #[test]
    fn test_slug_shapes() {
        let d = discovery();
        assert_eq!(d.asset_of_slug("eth-updown-15m-1762310700"), Some("ETH".to_string()));
        assert_eq!(d.asset_of_slug("BTC-UPDOWN-15M-1762310700"), Some("BTC".to_string()));
        assert_eq!(d.asset_of_slug("btc-updown-5m-1762310700"), None);
        assert_eq!(d.asset_of_slug("doge-updown-15m-1762310700"), None);
        assert_eq!(d.asset_of_slug("btc-updown-15m-soon"), None);
        assert_eq!(d.asset_of_slug("will-btc-hit-150k"), None);
    }

    #[test]
    fn test_window_slug_uses_window_start() {
        let d = discovery();
        let now = Utc.timestamp_opt(1_762_310_700 + 130, 0).unwrap();
        assert_eq!(d.window_slug("BTC", now), "btc-updown-15m-1762310700");
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_falls_back_to_window_slug() {
        let provider = ScriptedProvider::new(vec![market("x", "Will it rain?", dec!(1), dec!(1))]);
        let live = window_market(
            "eth-live",
            "Ethereum Up or Down - November 4, 9:45PM-10:00PM ET",
            "eth-updown-15m-1762310700",
        );
        provider.by_slug.push(Ok(Some(live)));
        let client = ResilientMarketClient::new(
            provider,
            RetryPolicy::default(),
            ConnectionConfig::default(),
            CacheConfig::default(),
        );

        let found = discovery().discover(&client, &["ETH".to_string()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].market.id, "eth-live");

        let slugs = client.provider().slugs_requested.lock().clone();
        assert_eq!(slugs.len(), 1);
        assert!(slugs[0].starts_with("eth-updown-15m-"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_skips_slug_lookup_when_listed() {
        let client = ResilientMarketClient::new(
            ScriptedProvider::new(vec![btc_market("btc-1")]),
            RetryPolicy::default(),
            ConnectionConfig::default(),
            CacheConfig::default(),
        );
        let found = discovery().discover(&client, &["BTC".to_string()]).await.unwrap();
        assert_eq!(found[0].market.id, "btc-1");
        assert_eq!(client.provider().by_slug.calls(), 0);
    }

    #[test]
    fn test_window_boundaries() {
        let now = Utc.timestamp_opt(1_700_000_123, 0).unwrap();
        let start = window_start(now, 15);
        assert_eq!(start.timestamp() % 900, 0);
        assert!(start <= now);
        assert_eq!(next_window_start(now, 15) - start, chrono::Duration::minutes(15));
    }
}
