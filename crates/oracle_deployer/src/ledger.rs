use async_trait::async_trait;
use tezos_crypto_rs::hash::{ContractKt1Hash, OperationHash};

use crate::{
    encoding::{decode, Value},
    error::{DeployError, Result},
    micheline::{parse_expr, Micheline, MichelineError},
    program::Program,
};

/// Everything needed to inject one origination.
#[derive(Debug, Clone, Copy)]
pub struct OriginationRequest<'a> {
    /// Local alias the client records the new contract under
    pub alias: &'a str,
    pub program: &'a Program,
    pub storage: &'a Micheline,
    /// Maximum fee, in tez, the source accepts to burn for storage
    pub burn_cap: f64,
}

/// A contract call carrying Michelson data to one entrypoint.
#[derive(Debug, Clone, Copy)]
pub struct CallRequest<'a> {
    pub contract: &'a ContractKt1Hash,
    pub entrypoint: &'a str,
    pub argument: &'a Micheline,
    pub burn_cap: f64,
}

/// An injected, not yet confirmed, origination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Originated {
    pub contract_address: ContractKt1Hash,
    pub operation_hash: OperationHash,
}

/// The chain as seen by the deployer.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn originate(&self, request: OriginationRequest<'_>) -> Result<Originated>;

    /// Resolves once `operation` is included with `depth` blocks on top.
    async fn wait_for_confirmation(&self, operation: &OperationHash, depth: u32) -> Result<()>;

    /// Current storage of `contract`, in Michelson notation.
    async fn contract_storage(&self, contract: &ContractKt1Hash) -> Result<String>;

    /// Injects a zero-amount call, returning its operation hash.
    async fn call(&self, request: CallRequest<'_>) -> Result<OperationHash>;
}

/// Handle on an injected origination.
pub struct OriginationHandle<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
    originated: Originated,
}

impl<'a, L: Ledger + ?Sized> OriginationHandle<'a, L> {
    pub fn contract_address(&self) -> &ContractKt1Hash {
        &self.originated.contract_address
    }

    pub fn operation_hash(&self) -> &OperationHash {
        &self.originated.operation_hash
    }

    pub async fn confirmation(&self, depth: u32) -> Result<()> {
        self.ledger
            .wait_for_confirmation(&self.originated.operation_hash, depth)
            .await
    }

    pub fn into_contract_address(self) -> ContractKt1Hash {
        self.originated.contract_address
    }
}

pub async fn originate<'a, L: Ledger + ?Sized>(
    ledger: &'a L,
    request: OriginationRequest<'_>,
) -> Result<OriginationHandle<'a, L>> {
    let originated = ledger.originate(request).await?;
    Ok(OriginationHandle { ledger, originated })
}

/// Fetches the storage of `contract` and decodes it against the storage
/// type of `program`. `name` labels errors.
pub async fn decoded_storage<L: Ledger + ?Sized>(
    ledger: &L,
    program: &Program,
    contract: &ContractKt1Hash,
    name: &'static str,
) -> Result<Value> {
    let raw = ledger.contract_storage(contract).await?;
    parse_expr(&raw)
        .and_then(|data| decode(program.storage_type(), &data))
        .map_err(|source| DeployError::Storage {
            contract: name,
            source,
        })
}

/// Parses a KT1 address, refusing anything that is not literally one.
///
/// `from_base58_check` only checks the payload length, so a tz1 string would
/// otherwise come back as an unrelated KT1.
pub fn parse_contract_address(s: &str) -> std::result::Result<ContractKt1Hash, MichelineError> {
    let invalid = || MichelineError::InvalidAddress(s.to_owned());
    if !s.starts_with("KT1") {
        return Err(invalid());
    }
    let hash = ContractKt1Hash::from_base58_check(s).map_err(|_| invalid())?;
    if hash.to_base58_check() != s {
        return Err(invalid());
    }
    Ok(hash)
}
