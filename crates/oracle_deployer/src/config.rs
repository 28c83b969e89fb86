use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Json, Serialized},
    Figment,
};
use octez::{r#async::endpoint::Endpoint, OctezClient, OctezClientConfigBuilder};
use serde::{Deserialize, Serialize, Serializer};
use tezos_crypto_rs::hash::ContractKt1Hash;

use crate::{
    deployer::{DeploySettings, DEFAULT_BURN_CAP, DEFAULT_CONFIRMATIONS},
    ledger::parse_contract_address,
    relay::{RelayParams, RelaySettings},
    storage::{ClientParams, OracleParams},
};

pub const ENV_PREFIX: &str = "ORACLE_DEPLOYER_";
pub const DEFAULT_CONFIG_FILE: &str = "oracle-deployer.json";
const DEFAULT_RPC_HOST: &str = "hangzhounet.smartpy.io";
const DEFAULT_SOURCE_ALIAS: &str = "oracle_deployer";

/// Signing key material. Never printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

impl Serialize for SecretKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("<redacted>")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Tezos node RPC endpoint
    pub rpc_endpoint: Endpoint,
    /// Key imported under `source_alias` before deploying. When absent the
    /// alias must already be known to the client.
    pub secret_key: Option<SecretKey>,
    pub source_alias: String,
    /// If None, `octez-client` from $PATH
    pub octez_client_path: Option<PathBuf>,
    /// If None, a temporary base directory
    pub octez_client_dir: Option<PathBuf>,
    pub oracle_program: PathBuf,
    pub client_program: PathBuf,
    pub oracle: OracleParams,
    pub client: ClientParams,
    pub confirmations: u32,
    /// Tez
    pub burn_cap: f64,
    /// Unbounded wait when unset
    pub confirmation_timeout_secs: Option<u64>,
    pub relay: RelayParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_endpoint: Endpoint::https(DEFAULT_RPC_HOST),
            secret_key: None,
            source_alias: DEFAULT_SOURCE_ALIAS.to_owned(),
            octez_client_path: None,
            octez_client_dir: None,
            oracle_program: PathBuf::from("Oracle.json"),
            client_program: PathBuf::from("Client.json"),
            oracle: OracleParams::default(),
            client: ClientParams::default(),
            confirmations: DEFAULT_CONFIRMATIONS,
            burn_cap: DEFAULT_BURN_CAP,
            confirmation_timeout_secs: None,
            relay: RelayParams::default(),
        }
    }
}

impl Config {
    /// Defaults, then the JSON file, then `ORACLE_DEPLOYER_*` variables.
    /// Nested keys use `__`, e.g. `ORACLE_DEPLOYER_ORACLE__ADMIN`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.exists() => {
                bail!("Config file does not exist: {}", path.display())
            }
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Json::file(&file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.oracle.admin.is_empty() {
            bail!("oracle.admin must not be empty");
        }
        if self.oracle.supported_pairs.is_empty() {
            bail!("oracle.supported_pairs must list at least one pair");
        }
        if !(self.burn_cap > 0.0) {
            bail!("burn_cap must be positive");
        }
        if self.source_alias.is_empty() {
            bail!("source_alias must not be empty");
        }
        if self.relay.poll_interval_secs == 0 {
            bail!("relay.poll_interval_secs must be positive");
        }
        self.relay_oracle()?;
        Ok(())
    }

    /// The `relay.oracle` address, if set.
    pub fn relay_oracle(&self) -> Result<Option<ContractKt1Hash>> {
        self.relay
            .oracle
            .as_deref()
            .map(parse_contract_address)
            .transpose()
            .context("relay.oracle must be a KT1 address")
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            entrypoint: self.relay.entrypoint.clone(),
            confirmations: self.relay.confirmations,
            burn_cap: self.burn_cap,
            poll_interval: Duration::from_secs(self.relay.poll_interval_secs),
            retry_delay: Duration::from_secs(self.relay.retry_delay_secs),
            from_request: self.relay.from_request,
        }
    }

    pub fn confirmation_timeout(&self) -> Option<Duration> {
        self.confirmation_timeout_secs.map(Duration::from_secs)
    }

    pub fn deploy_settings(&self) -> DeploySettings {
        DeploySettings {
            oracle: self.oracle.clone(),
            client: self.client.clone(),
            confirmations: self.confirmations,
            burn_cap: self.burn_cap,
        }
    }

    pub fn octez_client(&self) -> Result<OctezClient> {
        let mut builder = OctezClientConfigBuilder::new(self.rpc_endpoint.clone())
            .set_disable_unsafe_disclaimer(true);
        if let Some(path) = &self.octez_client_path {
            builder = builder.set_binary_path(path.clone());
        }
        if let Some(dir) = &self.octez_client_dir {
            builder = builder.set_base_dir(dir.clone());
        }
        Ok(OctezClient::new(
            builder.build().context("Invalid octez-client configuration")?,
        ))
    }
}
