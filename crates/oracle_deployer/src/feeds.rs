//! HTTP sources for the relayer: requests from a tzkt indexer and 24h
//! tickers from the Binance API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::{
    error::{DeployError, Result},
    relay::{PriceFeed, RequestSource, Ticker},
    storage::PriceRequest,
};

const USER_AGENT: &str = concat!("oracle-deployer/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(feed_error)
}

fn feed_error(err: reqwest::Error) -> DeployError {
    if err.is_connect() || err.is_timeout() {
        DeployError::Network(err.to_string())
    } else {
        DeployError::Feed(err.to_string())
    }
}

/// Big map keys as served by tzkt's `/v1/bigmaps/{id}/keys/{key}`.
pub struct TzktRequests {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct BigMapKey {
    value: PriceRequest,
}

impl TzktRequests {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl RequestSource for TzktRequests {
    async fn request(&self, big_map: u64, id: u64) -> Result<Option<PriceRequest>> {
        let url = format!("{}/v1/bigmaps/{}/keys/{}", self.base_url, big_map, id);
        let response = self.client.get(&url).send().await.map_err(feed_error)?;
        // tzkt answers 204 for keys it has not indexed
        if matches!(
            response.status(),
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND
        ) {
            return Ok(None);
        }
        let key: BigMapKey = response
            .error_for_status()
            .map_err(feed_error)?
            .json()
            .await
            .map_err(feed_error)?;
        Ok(Some(key.value))
    }
}

pub struct BinanceFeed {
    client: Client,
    base_url: String,
}

impl BinanceFeed {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl PriceFeed for BinanceFeed {
    async fn ticker(&self, pair: &str) -> Result<Ticker> {
        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        self.client
            .get(&url)
            .query(&[("symbol", pair)])
            .send()
            .await
            .map_err(feed_error)?
            .error_for_status()
            .map_err(feed_error)?
            .json()
            .await
            .map_err(feed_error)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use mockito::Matcher;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    use super::*;

    const REQUEST: &str = r#"{
        "id": 1201, "active": true, "hash": "exprtcNVhi2QU1cA3sMtnfrLAsaKCFhBnAybEFgnFNZSU3xq5K3Y9W",
        "key": "3",
        "value": {
            "pair": "ETHBTC",
            "status": false,
            "target_address": "KT18rhCbsJfURefvjwR6UHnBN3DgobiLw46h",
            "target_entrypoint": "receive"
        },
        "firstLevel": 101, "lastLevel": 101, "updates": 1
    }"#;

    const TICKER: &str = r#"{
        "symbol": "ETHBTC", "priceChange": "0.00010000", "lastPrice": "0.05123400",
        "lowPrice": "0.05000000", "highPrice": "0.05200001", "volume": "31234.56780000",
        "quoteVolume": "1601.23456789", "openTime": 1640995200000,
        "closeTime": 1641081599999, "count": 48213
    }"#;

    #[tokio::test]
    async fn reads_requests_from_the_indexer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/bigmaps/84085/keys/3")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(REQUEST)
            .expect(1)
            .create();

        let source = TzktRequests::new(&format!("{}/", server.url())).unwrap();
        let request = source.request(84085, 3).await.unwrap();
        assert_eq!(
            request,
            Some(PriceRequest {
                pair: "ETHBTC".to_owned(),
                target_address: "KT18rhCbsJfURefvjwR6UHnBN3DgobiLw46h".to_owned(),
                target_entrypoint: "receive".to_owned(),
                status: false,
            })
        );
        mock.assert();
    }

    #[tokio::test]
    async fn unindexed_request_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/bigmaps/84085/keys/4")
            .with_status(204)
            .create();

        let source = TzktRequests::new(&server.url()).unwrap();
        assert_eq!(source.request(84085, 4).await.unwrap(), None);
    }

    #[tokio::test]
    async fn indexer_failures_are_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/bigmaps/84085/keys/5")
            .with_status(500)
            .create();

        let source = TzktRequests::new(&server.url()).unwrap();
        let err = source.request(84085, 5).await.unwrap_err();
        assert!(matches!(err, DeployError::Feed(_)));

        let unreachable = TzktRequests::new("http://127.0.0.1:1").unwrap();
        let err = unreachable.request(84085, 5).await.unwrap_err();
        assert!(matches!(err, DeployError::Network(_)));
    }

    #[tokio::test]
    async fn fetches_the_24h_ticker_of_a_pair() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/ticker/24hr")
            .match_query(Matcher::UrlEncoded("symbol".into(), "ETHBTC".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(TICKER)
            .expect(1)
            .create();

        let feed = BinanceFeed::new(&server.url()).unwrap();
        let ticker = feed.ticker("ETHBTC").await.unwrap();
        assert_eq!(ticker.open_time, 1640995200000);
        assert_eq!(ticker.last_price, Decimal::from_str("0.051234").unwrap());
        assert_eq!(ticker.quote_volume, Decimal::from_str("1601.23456789").unwrap());
        mock.assert();
    }

    #[tokio::test]
    async fn unknown_symbol_is_a_feed_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v3/ticker/24hr")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCETH".into()))
            .with_status(400)
            .with_body(r#"{"code":-1121,"msg":"Invalid symbol."}"#)
            .create();

        let feed = BinanceFeed::new(&server.url()).unwrap();
        let err = feed.ticker("BTCETH").await.unwrap_err();
        assert!(matches!(err, DeployError::Feed(_)));
    }
}
