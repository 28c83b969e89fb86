use chrono::Utc;
use log::{info, warn};
use tezos_crypto_rs::hash::ContractKt1Hash;

use crate::{
    encoding::{encode, Value},
    error::{DeployError, Result},
    ledger::{decoded_storage, originate, Ledger, OriginationRequest},
    micheline::{Micheline, MichelineError},
    program::Program,
    storage::{ClientParams, ClientStorage, InitialStorage, OracleParams, OracleStorage},
};

pub const DEFAULT_CONFIRMATIONS: u32 = 2;
pub const DEFAULT_BURN_CAP: f64 = 1.0;

/// Addresses of a completed deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub oracle: ContractKt1Hash,
    pub client: ContractKt1Hash,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeploySettings {
    pub oracle: OracleParams,
    pub client: ClientParams,
    pub confirmations: u32,
    pub burn_cap: f64,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            oracle: OracleParams::default(),
            client: ClientParams::default(),
            confirmations: DEFAULT_CONFIRMATIONS,
            burn_cap: DEFAULT_BURN_CAP,
        }
    }
}

/// Originates the Oracle, then a Client wired to it.
pub struct Deployer<L> {
    ledger: L,
    oracle_program: Program,
    client_program: Program,
    settings: DeploySettings,
}

impl<L: Ledger> Deployer<L> {
    pub fn new(
        ledger: L,
        oracle_program: Program,
        client_program: Program,
        settings: DeploySettings,
    ) -> Self {
        Self {
            ledger,
            oracle_program,
            client_program,
            settings,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn settings(&self) -> &DeploySettings {
        &self.settings
    }

    pub fn oracle_storage(&self) -> OracleStorage {
        OracleStorage::new(&self.settings.oracle)
    }

    pub fn client_storage(&self, oracle_address: Option<&ContractKt1Hash>) -> ClientStorage {
        ClientStorage::new(oracle_address, &self.settings.client, Utc::now())
    }

    pub fn oracle_program(&self) -> &Program {
        &self.oracle_program
    }

    pub fn client_program(&self) -> &Program {
        &self.client_program
    }

    /// Both stages in order. The client stage only runs once the oracle is
    /// confirmed, and takes its address.
    pub async fn run(&self) -> Result<Deployment> {
        let oracle = self.deploy_oracle().await?;
        let client = self
            .deploy_client(Some(&oracle))
            .await
            .map_err(|source| DeployError::ClientAfterOracle {
                oracle: oracle.clone(),
                source: Box::new(source),
            })?;
        Ok(Deployment { oracle, client })
    }

    pub async fn deploy_oracle(&self) -> Result<ContractKt1Hash> {
        let storage = self.oracle_storage();
        self.originate_confirmed(&self.oracle_program, &storage)
            .await
    }

    pub async fn deploy_client(
        &self,
        oracle_address: Option<&ContractKt1Hash>,
    ) -> Result<ContractKt1Hash> {
        if oracle_address.is_none() {
            warn!("No oracle address given, the client will not be able to query prices");
        }
        let storage = self.client_storage(oracle_address);
        self.originate_confirmed(&self.client_program, &storage)
            .await
    }

    async fn originate_confirmed<S: InitialStorage>(
        &self,
        program: &Program,
        storage: &S,
    ) -> Result<ContractKt1Hash> {
        let contract = S::CONTRACT;
        let init = encode_storage(program, storage)?;
        let request = OriginationRequest {
            alias: contract,
            program,
            storage: &init,
            burn_cap: self.settings.burn_cap,
        };
        let handle = originate(&self.ledger, request).await?;
        info!(
            "Waiting for {} {} to be confirmed...",
            contract,
            handle.contract_address()
        );
        handle.confirmation(self.settings.confirmations).await?;
        info!("Confirmed {}: {}", contract, handle.contract_address());
        Ok(handle.into_contract_address())
    }
}

/// Encodes `storage` for `program`, as passed to `--init`.
pub fn encode_storage<S: InitialStorage>(program: &Program, storage: &S) -> Result<Micheline> {
    encode(program.storage_type(), &storage.to_value()).map_err(|source| DeployError::Storage {
        contract: S::CONTRACT,
        source,
    })
}

/// Checks that the on-chain storage of `client`, decoded with `program`,
/// has `oracle` as its `oracle_address`.
pub async fn verify_client<L: Ledger + ?Sized>(
    ledger: &L,
    program: &Program,
    client: &ContractKt1Hash,
    oracle: &ContractKt1Hash,
) -> Result<bool> {
    let storage = decoded_storage(ledger, program, client, ClientStorage::CONTRACT).await?;
    match storage.field("oracle_address") {
        Some(Value::String(address)) => Ok(*address == oracle.to_base58_check()),
        _ => Err(DeployError::Storage {
            contract: ClientStorage::CONTRACT,
            source: MichelineError::MissingField("oracle_address".to_owned()),
        }),
    }
}
