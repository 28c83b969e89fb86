//! Initial storage records for the Oracle and Client contracts.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tezos_crypto_rs::hash::ContractKt1Hash;

use crate::encoding::Value;

pub const DEFAULT_ADMIN: &str = "tz1c6PPijJnZYjKiSQND4pMtGMg6csGeAiiF";
pub const DEFAULT_PAIR: &str = "ETHBTC";
pub const DEFAULT_REQUEST_PRICE: u64 = 1000;
pub const DEFAULT_QUERY_PRICE: u64 = 1000;
/// Seed value for every numeric field of the client's price snapshot.
pub const PLACEHOLDER_PRICE: u64 = 10;

/// A storage record that can be encoded against a contract's storage type.
pub trait InitialStorage: Serialize {
    /// Contract name, used in logs and as the client alias.
    const CONTRACT: &'static str;

    fn to_value(&self) -> Value;
}

/// Deploy-time parameters of the Oracle contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OracleParams {
    pub admin: String,
    /// Accounts allowed to push prices. Defaults to the admin alone.
    pub whitelist: Option<Vec<String>>,
    /// Fee in mutez charged per price request
    pub request_price: u64,
    pub supported_pairs: Vec<String>,
}

impl Default for OracleParams {
    fn default() -> Self {
        Self {
            admin: DEFAULT_ADMIN.to_owned(),
            whitelist: None,
            request_price: DEFAULT_REQUEST_PRICE,
            supported_pairs: vec![DEFAULT_PAIR.to_owned()],
        }
    }
}

/// Deploy-time parameters of the Client contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientParams {
    /// Fee in mutez the client pays per oracle query
    pub query_price: u64,
    /// Pair of the seed price snapshot
    pub pair: String,
}

impl Default for ClientParams {
    fn default() -> Self {
        Self {
            query_price: DEFAULT_QUERY_PRICE,
            pair: DEFAULT_PAIR.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceSnapshot {
    pub update_time: DateTime<Utc>,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub last_price: u64,
    pub high_price: u64,
    pub low_price: u64,
    pub volume: u64,
    pub quote_volume: u64,
    pub pair: String,
}

impl PriceSnapshot {
    /// Seed data, not market data: every timestamp is `now` and every
    /// numeric field is [`PLACEHOLDER_PRICE`].
    pub fn placeholder(pair: &str, now: DateTime<Utc>) -> Self {
        Self {
            update_time: now,
            open_time: now,
            close_time: now,
            last_price: PLACEHOLDER_PRICE,
            high_price: PLACEHOLDER_PRICE,
            low_price: PLACEHOLDER_PRICE,
            volume: PLACEHOLDER_PRICE,
            quote_volume: PLACEHOLDER_PRICE,
            pair: pair.to_owned(),
        }
    }

    fn to_value(&self) -> Value {
        Value::record([
            ("update_time", timestamp(&self.update_time)),
            ("open_time", timestamp(&self.open_time)),
            ("close_time", timestamp(&self.close_time)),
            ("last_price", Value::int(self.last_price)),
            ("high_price", Value::int(self.high_price)),
            ("low_price", Value::int(self.low_price)),
            ("volume", Value::int(self.volume)),
            ("quote_volume", Value::int(self.quote_volume)),
            ("pair", Value::string(&self.pair)),
        ])
    }
}

fn timestamp(t: &DateTime<Utc>) -> Value {
    Value::string(t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// A pending request as recorded by the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRequest {
    pub pair: String,
    pub target_address: String,
    pub target_entrypoint: String,
    pub status: bool,
}

impl PriceRequest {
    fn to_value(&self) -> Value {
        Value::record([
            ("pair", Value::string(&self.pair)),
            ("target_address", Value::string(&self.target_address)),
            ("target_entrypoint", Value::string(&self.target_entrypoint)),
            ("status", Value::Bool(self.status)),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OracleStorage {
    pub admin: String,
    pub counter: u64,
    pub prices: BTreeMap<String, PriceSnapshot>,
    pub whitelist: Vec<String>,
    pub requests: BTreeMap<u64, PriceRequest>,
    pub request_price: u64,
    pub supported_pairs: Vec<String>,
}

impl OracleStorage {
    pub fn new(params: &OracleParams) -> Self {
        Self {
            admin: params.admin.clone(),
            counter: 0,
            prices: BTreeMap::new(),
            whitelist: params
                .whitelist
                .clone()
                .unwrap_or_else(|| vec![params.admin.clone()]),
            requests: BTreeMap::new(),
            request_price: params.request_price,
            supported_pairs: params.supported_pairs.clone(),
        }
    }
}

impl InitialStorage for OracleStorage {
    const CONTRACT: &'static str = "oracle";

    fn to_value(&self) -> Value {
        Value::record([
            ("admin", Value::string(&self.admin)),
            ("counter", Value::int(self.counter)),
            (
                "prices",
                Value::Map(
                    self.prices
                        .iter()
                        .map(|(k, v)| (Value::string(k), v.to_value()))
                        .collect(),
                ),
            ),
            (
                "whitelist",
                Value::List(self.whitelist.iter().map(Value::string).collect()),
            ),
            (
                "requests",
                Value::Map(
                    self.requests
                        .iter()
                        .map(|(k, v)| (Value::int(*k), v.to_value()))
                        .collect(),
                ),
            ),
            ("request_price", Value::int(self.request_price)),
            (
                "supported_pairs",
                Value::List(self.supported_pairs.iter().map(Value::string).collect()),
            ),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientStorage {
    pub oracle_address: String,
    pub pair: PriceSnapshot,
    pub query_price: u64,
}

impl ClientStorage {
    /// An absent oracle address becomes the empty string, which leaves the
    /// deployed client unable to reach any oracle.
    pub fn new(
        oracle_address: Option<&ContractKt1Hash>,
        params: &ClientParams,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            oracle_address: oracle_address
                .map(ContractKt1Hash::to_base58_check)
                .unwrap_or_default(),
            pair: PriceSnapshot::placeholder(&params.pair, now),
            query_price: params.query_price,
        }
    }
}

impl InitialStorage for ClientStorage {
    const CONTRACT: &'static str = "client";

    fn to_value(&self) -> Value {
        Value::record([
            ("oracle_address", Value::string(&self.oracle_address)),
            ("pair", self.pair.to_value()),
            ("query_price", Value::int(self.query_price)),
        ])
    }
}
