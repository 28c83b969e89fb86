use std::{
    collections::HashMap,
    path::PathBuf,
    str::FromStr,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use oracle_deployer::{
    relay::{PriceFeed, RequestSource, Ticker},
    storage::PriceRequest,
    CallRequest, DeployError, Ledger, Originated, OriginationRequest, Program, RelaySettings,
    Relayer, Result,
};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use tezos_crypto_rs::hash::{ContractKt1Hash, OperationHash};

const ORACLE: &str = "KT18g5SiBpZEhMtyW11tE35UN9EJy2vSb8rC";
const TARGET: &str = "KT18rhCbsJfURefvjwR6UHnBN3DgobiLw46h";
const ADMIN: &str = "tz1c6PPijJnZYjKiSQND4pMtGMg6csGeAiiF";
const UPDATE_OP: &str = "onfYCj5ukLdadXBt5YHPrRsfN8doR2W72Vx7QirMB5AAX1uUFxy";
const BIG_MAP: u64 = 84085;

#[derive(Debug, Clone, PartialEq)]
struct Call {
    contract: String,
    entrypoint: String,
    argument: String,
    burn_cap: f64,
}

/// Serves the oracle's storage with an adjustable counter and records calls.
#[derive(Default)]
struct OracleLedger {
    counter: Mutex<u64>,
    calls: Mutex<Vec<Call>>,
    confirmations: Mutex<Vec<(String, u32)>>,
}

impl OracleLedger {
    fn with_counter(counter: u64) -> Self {
        Self {
            counter: Mutex::new(counter),
            ..Default::default()
        }
    }

    fn set_counter(&self, counter: u64) {
        *self.counter.lock().unwrap() = counter;
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn confirmations(&self) -> Vec<(String, u32)> {
        self.confirmations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Ledger for OracleLedger {
    async fn originate(&self, _request: OriginationRequest<'_>) -> Result<Originated> {
        Err(DeployError::Rejected("relaying originates nothing".to_owned()))
    }

    async fn wait_for_confirmation(&self, operation: &OperationHash, depth: u32) -> Result<()> {
        self.confirmations
            .lock()
            .unwrap()
            .push((operation.to_base58_check(), depth));
        Ok(())
    }

    async fn contract_storage(&self, contract: &ContractKt1Hash) -> Result<String> {
        if contract.to_base58_check() != ORACLE {
            return Err(DeployError::Rejected("unknown contract".to_owned()));
        }
        let counter = *self.counter.lock().unwrap();
        Ok(format!(
            "Pair (Pair (Pair \"{ADMIN}\" {counter}) (Pair {{}} 1000)) \
             (Pair {BIG_MAP} (Pair {{ \"ETHBTC\" }} {{ \"{ADMIN}\" }}))"
        ))
    }

    async fn call(&self, request: CallRequest<'_>) -> Result<OperationHash> {
        self.calls.lock().unwrap().push(Call {
            contract: request.contract.to_base58_check(),
            entrypoint: request.entrypoint.to_owned(),
            argument: request.argument.to_string(),
            burn_cap: request.burn_cap,
        });
        Ok(OperationHash::from_base58_check(UPDATE_OP).unwrap())
    }
}

/// Indexed requests, shared with the test after the relayer takes ownership.
#[derive(Clone, Default)]
struct Requests {
    indexed: Arc<Mutex<HashMap<u64, PriceRequest>>>,
    lookups: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl Requests {
    fn index(&self, id: u64, request: PriceRequest) {
        self.indexed.lock().unwrap().insert(id, request);
    }

    fn lookups(&self) -> Vec<(u64, u64)> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl RequestSource for Requests {
    async fn request(&self, big_map: u64, id: u64) -> Result<Option<PriceRequest>> {
        self.lookups.lock().unwrap().push((big_map, id));
        Ok(self.indexed.lock().unwrap().get(&id).cloned())
    }
}

/// Answers with one fixed ticker, after failing `failures` times.
#[derive(Clone, Default)]
struct Feed {
    failures: Arc<Mutex<u32>>,
    pairs: Arc<Mutex<Vec<String>>>,
}

impl Feed {
    fn failing(times: u32) -> Self {
        let feed = Self::default();
        *feed.failures.lock().unwrap() = times;
        feed
    }

    fn pairs(&self) -> Vec<String> {
        self.pairs.lock().unwrap().clone()
    }
}

#[async_trait]
impl PriceFeed for Feed {
    async fn ticker(&self, pair: &str) -> Result<Ticker> {
        self.pairs.lock().unwrap().push(pair.to_owned());
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(DeployError::Network("connection reset".to_owned()));
        }
        Ok(Ticker {
            open_time: 1640995200000,
            close_time: 1641081599999,
            last_price: Decimal::from_str("0.05123400").unwrap(),
            low_price: Decimal::from_str("0.05").unwrap(),
            high_price: Decimal::from_str("0.05200001").unwrap(),
            volume: Decimal::from_str("31234.5678").unwrap(),
            quote_volume: Decimal::from_str("1601.23456789").unwrap(),
        })
    }
}

fn oracle_program() -> Program {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("resources")
        .join("oracle.tz");
    Program::load(&path).unwrap()
}

fn kt1(address: &str) -> ContractKt1Hash {
    ContractKt1Hash::from_base58_check(address).unwrap()
}

fn price_request(pair: &str, status: bool) -> PriceRequest {
    PriceRequest {
        pair: pair.to_owned(),
        target_address: TARGET.to_owned(),
        target_entrypoint: "receive".to_owned(),
        status,
    }
}

fn relayer(
    ledger: OracleLedger,
    requests: &Requests,
    feed: &Feed,
    settings: RelaySettings,
) -> Relayer<OracleLedger, Requests, Feed> {
    Relayer::new(
        ledger,
        requests.clone(),
        feed.clone(),
        kt1(ORACLE),
        oracle_program(),
        settings,
    )
    .unwrap()
}

fn update_argument(request_id: u64, pair: &str) -> String {
    format!(
        "Pair (Pair (Pair 1641081599 5200001) (Pair 5123400 5000000)) \
         (Pair (Pair 1640995200 \"{pair}\") (Pair 160123456789 \
         (Pair {request_id} (Pair \"{TARGET}%receive\" 3123456780000))))"
    )
}

#[tokio::test]
async fn serves_requests_made_after_start() {
    let requests = Requests::default();
    let feed = Feed::default();
    let mut relayer = relayer(
        OracleLedger::with_counter(1),
        &requests,
        &feed,
        RelaySettings::default(),
    );

    assert_eq!(relayer.poll_once().await.unwrap(), 0);
    assert_eq!(relayer.next_request(), Some(1));
    assert!(relayer.ledger().calls().is_empty());

    requests.index(1, price_request("ETHBTC", false));
    requests.index(2, price_request("XTZUSD", false));
    relayer.ledger().set_counter(3);
    assert_eq!(relayer.poll_once().await.unwrap(), 2);
    assert_eq!(relayer.next_request(), Some(3));

    assert_eq!(requests.lookups(), vec![(BIG_MAP, 1), (BIG_MAP, 2)]);
    assert_eq!(feed.pairs(), vec!["ETHBTC", "XTZUSD"]);
    assert_eq!(
        relayer.ledger().calls(),
        vec![
            Call {
                contract: ORACLE.to_owned(),
                entrypoint: "update".to_owned(),
                argument: update_argument(1, "ETHBTC"),
                burn_cap: 1.0,
            },
            Call {
                contract: ORACLE.to_owned(),
                entrypoint: "update".to_owned(),
                argument: update_argument(2, "XTZUSD"),
                burn_cap: 1.0,
            },
        ]
    );
    assert_eq!(
        relayer.ledger().confirmations(),
        vec![(UPDATE_OP.to_owned(), 1), (UPDATE_OP.to_owned(), 1)]
    );
}

#[tokio::test]
async fn starts_from_configured_request() {
    let requests = Requests::default();
    requests.index(0, price_request("ETHBTC", false));
    requests.index(1, price_request("ETHBTC", false));
    let settings = RelaySettings {
        from_request: Some(0),
        confirmations: 3,
        ..Default::default()
    };
    let mut relayer = relayer(OracleLedger::with_counter(2), &requests, &Feed::default(), settings);

    assert_eq!(relayer.poll_once().await.unwrap(), 2);
    let ids: Vec<_> = requests.lookups().into_iter().map(|(_, id)| id).collect();
    assert_eq!(ids, vec![0, 1]);
    assert!(relayer
        .ledger()
        .confirmations()
        .iter()
        .all(|(_, depth)| *depth == 3));
}

#[tokio::test]
async fn fulfilled_requests_are_skipped() {
    let requests = Requests::default();
    requests.index(0, price_request("ETHBTC", true));
    let feed = Feed::default();
    let settings = RelaySettings {
        from_request: Some(0),
        ..Default::default()
    };
    let mut relayer = relayer(OracleLedger::with_counter(1), &requests, &feed, settings);

    assert_eq!(relayer.poll_once().await.unwrap(), 1);
    assert_eq!(relayer.next_request(), Some(1));
    assert!(feed.pairs().is_empty());
    assert!(relayer.ledger().calls().is_empty());
}

#[tokio::test]
async fn failed_request_is_retried_on_next_poll() {
    let requests = Requests::default();
    requests.index(0, price_request("ETHBTC", false));
    let feed = Feed::failing(1);
    let settings = RelaySettings {
        from_request: Some(0),
        ..Default::default()
    };
    let mut relayer = relayer(OracleLedger::with_counter(1), &requests, &feed, settings);

    let err = relayer.poll_once().await.unwrap_err();
    assert!(matches!(err, DeployError::Network(_)));
    assert_eq!(relayer.next_request(), Some(0));
    assert!(relayer.ledger().calls().is_empty());

    assert_eq!(relayer.poll_once().await.unwrap(), 1);
    assert_eq!(relayer.next_request(), Some(1));
    assert_eq!(relayer.ledger().calls().len(), 1);
    assert_eq!(feed.pairs(), vec!["ETHBTC", "ETHBTC"]);
}

#[tokio::test]
async fn unindexed_request_is_retried_on_next_poll() {
    let requests = Requests::default();
    let settings = RelaySettings {
        from_request: Some(0),
        ..Default::default()
    };
    let mut relayer = relayer(OracleLedger::with_counter(1), &requests, &Feed::default(), settings);

    let err = relayer.poll_once().await.unwrap_err();
    assert!(matches!(err, DeployError::Feed(ref msg) if msg.contains("request 0")));
    assert_eq!(relayer.next_request(), Some(0));

    requests.index(0, price_request("ETHBTC", false));
    assert_eq!(relayer.poll_once().await.unwrap(), 1);
    assert_eq!(relayer.ledger().calls().len(), 1);
}

#[tokio::test]
async fn reads_counter_and_big_map_from_storage() {
    let relayer = relayer(
        OracleLedger::with_counter(7),
        &Requests::default(),
        &Feed::default(),
        RelaySettings::default(),
    );
    let state = relayer.oracle_state().await.unwrap();
    assert_eq!(state.counter, 7);
    assert_eq!(state.requests, BIG_MAP);
}

#[test]
fn unknown_entrypoint_is_rejected_up_front() {
    let settings = RelaySettings {
        entrypoint: "push".to_owned(),
        ..Default::default()
    };
    let result = Relayer::new(
        OracleLedger::default(),
        Requests::default(),
        Feed::default(),
        kt1(ORACLE),
        oracle_program(),
        settings,
    );
    assert!(matches!(
        result,
        Err(DeployError::Parameter { ref entrypoint, .. }) if entrypoint == "push"
    ));
}
