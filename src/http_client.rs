// =============================================================================
// Market HTTP Client — profile search, activity feed, order book probe
// =============================================================================
//
// A single `reqwest::Client` shared across the three upstream GET endpoints
// this engine consumes. No request is signed — these are public read
// endpoints; signing and order submission live entirely behind the
// execution adapter (see `execution.rs`).
// =============================================================================

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::types::{parse_numeric, BookSnapshot, TradeItem};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// A profile-directory entry returned by the handle search endpoint.
#[derive(Debug, Clone)]
pub struct Profile {
    pub pseudonym: String,
    pub proxy_wallet: Option<String>,
}

/// HTTP client for the three upstream read endpoints this engine consumes.
#[derive(Clone)]
pub struct MarketClient {
    client: reqwest::Client,
    profile_base: String,
    activity_base: String,
    book_base: String,
}

impl MarketClient {
    pub fn new(profile_base: &str, activity_base: &str, book_base: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            profile_base: profile_base.to_string(),
            activity_base: activity_base.to_string(),
            book_base: book_base.to_string(),
        }
    }

    /// GET the profile directory, filtered by a free-text query.
    #[instrument(skip(self), name = "market::search_profiles")]
    pub async fn search_profiles(&self, query: &str) -> Result<Vec<Profile>> {
        let resp = self
            .client
            .get(&self.profile_base)
            .query(&[
                ("q", query),
                ("search_profiles", "true"),
                ("limit_per_type", "20"),
            ])
            .send()
            .await
            .context("GET profile search request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse profile search response")?;

        if !status.is_success() {
            anyhow::bail!("profile search returned {}: {}", status, body);
        }

        let profiles = body
            .get("profiles")
            .and_then(|v| v.as_array())
            .context("profile search response missing 'profiles' array")?;

        let parsed = profiles
            .iter()
            .filter_map(|p| {
                let pseudonym = p.get("pseudonym")?.as_str()?.to_string();
                let proxy_wallet = p
                    .get("proxyWallet")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                Some(Profile {
                    pseudonym,
                    proxy_wallet,
                })
            })
            .collect::<Vec<_>>();

        debug!(count = parsed.len(), "profiles retrieved");
        Ok(parsed)
    }

    /// GET the source's recent trade activity, sorted by timestamp descending.
    #[instrument(skip(self), name = "market::get_activity")]
    pub async fn get_activity(&self, user: &str, limit: u32) -> Result<Vec<TradeItem>> {
        let limit_str = limit.to_string();
        let resp = self
            .client
            .get(&self.activity_base)
            .query(&[
                ("user", user),
                ("type", "TRADE"),
                ("limit", limit_str.as_str()),
                ("offset", "0"),
                ("sortBy", "TIMESTAMP"),
                ("sortDirection", "DESC"),
            ])
            .send()
            .await
            .context("GET activity request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse activity response")?;

        if !status.is_success() {
            anyhow::bail!("activity fetch returned {}: {}", status, body);
        }

        let items = body.as_array().context("activity response is not an array")?;
        let parsed = items.iter().filter_map(TradeItem::from_json).collect::<Vec<_>>();

        debug!(user, fetched = items.len(), parsed = parsed.len(), "activity fetched");
        Ok(parsed)
    }

    /// GET a one-shot order-book probe for a single asset.
    #[instrument(skip(self), name = "market::get_book")]
    pub async fn get_book(&self, token_id: &str, now_ms: u64) -> Result<BookSnapshot> {
        let resp = self
            .client
            .get(&self.book_base)
            .query(&[("token_id", token_id)])
            .send()
            .await
            .context("GET order book request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse order book response")?;

        if !status.is_success() {
            anyhow::bail!("book probe returned {}: {}", status, body);
        }

        let best_bid = body
            .get("bids")
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .and_then(|lvl| lvl.get("price"))
            .and_then(parse_numeric);
        let best_ask = body
            .get("asks")
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .and_then(|lvl| lvl.get("price"))
            .and_then(parse_numeric);

        if best_bid.is_none() && best_ask.is_none() {
            warn!(token_id, "book probe returned no levels on either side");
        }

        Ok(BookSnapshot {
            best_bid,
            best_ask,
            updated_at_ms: now_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_can_be_constructed_with_arbitrary_bases() {
        let _c = MarketClient::new(
            "https://example.test/profiles",
            "https://example.test/activity",
            "https://example.test/book",
        );
    }
}
