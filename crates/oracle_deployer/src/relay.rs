//! Serves the price requests recorded by a deployed oracle.
//!
//! The relayer polls the oracle's `counter`, reads each new request from the
//! `requests` big_map through an indexer, fetches the 24h ticker of the
//! requested pair and pushes it to the oracle's update entrypoint. Requests
//! are served in id order; a failed request is retried on the next poll.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tezos_crypto_rs::hash::ContractKt1Hash;

use crate::{
    deployer::DEFAULT_BURN_CAP,
    encoding::{encode, Value},
    error::{DeployError, Result},
    ledger::{decoded_storage, CallRequest, Ledger},
    micheline::MichelineError,
    program::Program,
    storage::{InitialStorage, OracleStorage, PriceRequest},
};

pub const DEFAULT_ENTRYPOINT: &str = "update";
pub const DEFAULT_INDEXER_URL: &str = "https://api.hangzhounet.tzkt.io";
pub const DEFAULT_PRICE_API_URL: &str = "https://api.binance.com";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 100;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 20;
pub const DEFAULT_RELAY_CONFIRMATIONS: u32 = 1;
/// Prices travel as integers scaled by `10^PRICE_DECIMALS`.
pub const PRICE_DECIMALS: u32 = 8;

/// Relayer section of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayParams {
    /// Oracle to serve, unless given on the command line
    pub oracle: Option<String>,
    pub entrypoint: String,
    /// tzkt API root
    pub indexer_url: String,
    /// Binance API root
    pub price_api_url: String,
    pub poll_interval_secs: u64,
    pub retry_delay_secs: u64,
    pub confirmations: u32,
    /// First request id to serve. Defaults to the oracle's counter at start.
    pub from_request: Option<u64>,
}

impl Default for RelayParams {
    fn default() -> Self {
        Self {
            oracle: None,
            entrypoint: DEFAULT_ENTRYPOINT.to_owned(),
            indexer_url: DEFAULT_INDEXER_URL.to_owned(),
            price_api_url: DEFAULT_PRICE_API_URL.to_owned(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            confirmations: DEFAULT_RELAY_CONFIRMATIONS,
            from_request: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelaySettings {
    pub entrypoint: String,
    pub confirmations: u32,
    pub burn_cap: f64,
    pub poll_interval: Duration,
    pub retry_delay: Duration,
    pub from_request: Option<u64>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            entrypoint: DEFAULT_ENTRYPOINT.to_owned(),
            confirmations: DEFAULT_RELAY_CONFIRMATIONS,
            burn_cap: DEFAULT_BURN_CAP,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            from_request: None,
        }
    }
}

/// 24h rolling window statistics of one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    /// Milliseconds since the epoch
    pub open_time: i64,
    /// Milliseconds since the epoch
    pub close_time: i64,
    pub last_price: Decimal,
    pub low_price: Decimal,
    pub high_price: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
}

/// Reads requests from the oracle's `requests` big_map.
#[async_trait]
pub trait RequestSource: Send + Sync {
    /// `None` while the indexer has not seen request `id` yet.
    async fn request(&self, big_map: u64, id: u64) -> Result<Option<PriceRequest>>;
}

#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn ticker(&self, pair: &str) -> Result<Ticker>;
}

/// Argument of the oracle's update entrypoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceUpdate {
    pub pair: String,
    /// Seconds since the epoch
    pub open_time: i64,
    /// Seconds since the epoch
    pub close_time: i64,
    pub last_price: u64,
    pub low_price: u64,
    pub high_price: u64,
    pub volume: u64,
    pub quote_volume: u64,
    pub request_id: u64,
    /// `address%entrypoint` the oracle forwards the price to
    pub target: String,
}

impl PriceUpdate {
    pub fn new(request_id: u64, request: &PriceRequest, ticker: &Ticker) -> Result<Self> {
        Ok(Self {
            pair: request.pair.clone(),
            open_time: ticker.open_time / 1000,
            close_time: ticker.close_time / 1000,
            last_price: scaled(ticker.last_price, "lastPrice")?,
            low_price: scaled(ticker.low_price, "lowPrice")?,
            high_price: scaled(ticker.high_price, "highPrice")?,
            volume: scaled(ticker.volume, "volume")?,
            quote_volume: scaled(ticker.quote_volume, "quoteVolume")?,
            request_id,
            target: format!("{}%{}", request.target_address, request.target_entrypoint),
        })
    }

    pub fn to_value(&self) -> Value {
        Value::record([
            ("pair", Value::string(&self.pair)),
            ("open_time", Value::int(self.open_time)),
            ("close_time", Value::int(self.close_time)),
            ("last_price", Value::int(self.last_price)),
            ("low_price", Value::int(self.low_price)),
            ("high_price", Value::int(self.high_price)),
            ("volume", Value::int(self.volume)),
            ("quote_volume", Value::int(self.quote_volume)),
            ("request_id", Value::int(self.request_id)),
            ("target", Value::string(&self.target)),
        ])
    }
}

/// Truncates `value * 10^PRICE_DECIMALS` to an integer.
fn scaled(value: Decimal, field: &str) -> Result<u64> {
    value
        .checked_mul(Decimal::from(10u64.pow(PRICE_DECIMALS)))
        .and_then(|n| u64::try_from(n.trunc()).ok())
        .ok_or_else(|| DeployError::Feed(format!("{field} {value} is out of range")))
}

/// What the relayer needs from the oracle's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleState {
    pub counter: u64,
    /// Id of the `requests` big_map
    pub requests: u64,
}

pub struct Relayer<L, R, F> {
    ledger: L,
    requests: R,
    feed: F,
    oracle: ContractKt1Hash,
    program: Program,
    settings: RelaySettings,
    next_request: Option<u64>,
}

impl<L: Ledger, R: RequestSource, F: PriceFeed> Relayer<L, R, F> {
    /// Fails if `program` has no entrypoint named in `settings`.
    pub fn new(
        ledger: L,
        requests: R,
        feed: F,
        oracle: ContractKt1Hash,
        program: Program,
        settings: RelaySettings,
    ) -> Result<Self> {
        program
            .entrypoint_type(&settings.entrypoint)
            .map_err(|source| DeployError::Parameter {
                entrypoint: settings.entrypoint.clone(),
                source,
            })?;
        Ok(Self {
            ledger,
            requests,
            feed,
            oracle,
            program,
            settings,
            next_request: None,
        })
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn oracle(&self) -> &ContractKt1Hash {
        &self.oracle
    }

    /// Id of the next request to serve, once the first poll has run.
    pub fn next_request(&self) -> Option<u64> {
        self.next_request
    }

    pub async fn oracle_state(&self) -> Result<OracleState> {
        let storage = decoded_storage(
            &self.ledger,
            &self.program,
            &self.oracle,
            OracleStorage::CONTRACT,
        )
        .await?;
        Ok(OracleState {
            counter: storage_u64(&storage, "counter")?,
            requests: storage_u64(&storage, "requests")?,
        })
    }

    /// Serves every request recorded since the last poll and returns how
    /// many were handled. Stops at the first failure, which is retried on
    /// the next poll.
    pub async fn poll_once(&mut self) -> Result<u64> {
        let state = self.oracle_state().await?;
        let from = self.settings.from_request.unwrap_or(state.counter);
        let next = *self.next_request.get_or_insert(from);
        debug!(
            "Oracle {} counter is {}, next request {}",
            self.oracle, state.counter, next
        );
        for id in next..state.counter {
            self.serve(state.requests, id).await?;
            self.next_request = Some(id + 1);
        }
        Ok(state.counter.saturating_sub(next))
    }

    async fn serve(&self, big_map: u64, id: u64) -> Result<()> {
        let request = self
            .requests
            .request(big_map, id)
            .await?
            .ok_or_else(|| DeployError::Feed(format!("request {id} is not indexed yet")))?;
        if request.status {
            info!("Request {} is already fulfilled, skipping", id);
            return Ok(());
        }

        let ticker = self.feed.ticker(&request.pair).await?;
        let update = PriceUpdate::new(id, &request, &ticker)?;
        let entrypoint = &self.settings.entrypoint;
        let argument = self
            .program
            .entrypoint_type(entrypoint)
            .and_then(|ty| encode(ty, &update.to_value()))
            .map_err(|source| DeployError::Parameter {
                entrypoint: entrypoint.clone(),
                source,
            })?;

        let operation = self
            .ledger
            .call(CallRequest {
                contract: &self.oracle,
                entrypoint,
                argument: &argument,
                burn_cap: self.settings.burn_cap,
            })
            .await?;
        info!(
            "Sent {} price for request {} to {}: {}",
            update.pair, id, update.target, operation
        );
        self.ledger
            .wait_for_confirmation(&operation, self.settings.confirmations)
            .await?;
        info!("Request {} fulfilled", id);
        Ok(())
    }

    /// Polls forever, waiting `poll_interval` between polls and
    /// `retry_delay` after a failure.
    pub async fn run(&mut self) {
        loop {
            let pause = match self.poll_once().await {
                Ok(served) => {
                    debug!("Served {} requests", served);
                    self.settings.poll_interval
                }
                Err(e) => {
                    warn!("Relay failed, retrying in {:?}: {}", self.settings.retry_delay, e);
                    self.settings.retry_delay
                }
            };
            tokio::time::sleep(pause).await;
        }
    }
}

fn storage_u64(storage: &Value, field: &str) -> Result<u64> {
    let invalid = |source| DeployError::Storage {
        contract: OracleStorage::CONTRACT,
        source,
    };
    match storage.field(field) {
        Some(Value::Int(n)) => u64::try_from(n).map_err(|_| {
            invalid(MichelineError::TypeMismatch {
                expected: "u64".to_owned(),
                found: format!("int {n}"),
            })
        }),
        Some(other) => Err(invalid(MichelineError::TypeMismatch {
            expected: format!("an int for `{field}`"),
            found: format!("{other:?}"),
        })),
        None => Err(invalid(MichelineError::MissingField(field.to_owned()))),
    }
}
