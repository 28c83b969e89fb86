use std::{io::Write, time::Duration};

use async_trait::async_trait;
use octez::OctezClient;
use tezos_crypto_rs::hash::{ContractKt1Hash, OperationHash};

use crate::{
    error::{DeployError, Result},
    ledger::{CallRequest, Ledger, Originated, OriginationRequest},
};

/// [`Ledger`] backed by `octez-client`, signing with the key stored under
/// `source` in the client's base directory.
pub struct OctezLedger {
    client: OctezClient,
    source: String,
    confirmation_timeout: Option<Duration>,
}

impl OctezLedger {
    pub fn new(client: OctezClient, source: impl Into<String>) -> Self {
        Self {
            client,
            source: source.into(),
            confirmation_timeout: None,
        }
    }

    pub fn with_confirmation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn client(&self) -> &OctezClient {
        &self.client
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Registers `secret_key` as the signing key of the source account.
    pub async fn import_source_key(&self, secret_key: &str) -> Result<()> {
        self.client
            .import_secret_key(&self.source, secret_key)
            .await
            .map_err(DeployError::from_client)
    }

    /// Source balance in tez.
    pub async fn source_balance(&self) -> Result<f64> {
        self.client
            .get_balance(&self.source)
            .await
            .map_err(DeployError::from_client)
    }
}

#[async_trait]
impl Ledger for OctezLedger {
    async fn originate(&self, request: OriginationRequest<'_>) -> Result<Originated> {
        let mut script = tempfile::Builder::new()
            .prefix(request.alias)
            .suffix(".tz")
            .tempfile()
            .and_then(|mut file| {
                file.write_all(request.program.code().as_bytes())?;
                Ok(file)
            })
            .map_err(|e| DeployError::Toolkit(format!("failed to write script: {e}")))?;
        script
            .flush()
            .map_err(|e| DeployError::Toolkit(format!("failed to write script: {e}")))?;

        let init = request.storage.to_string();
        log::debug!("Initial storage of {}: {}", request.alias, init);
        let (contract_address, operation_hash) = self
            .client
            .originate_contract(
                request.alias,
                &self.source,
                0.0,
                script.path(),
                &init,
                Some(request.burn_cap),
            )
            .await
            .map_err(DeployError::from_client)?;
        Ok(Originated {
            contract_address,
            operation_hash,
        })
    }

    async fn wait_for_confirmation(&self, operation: &OperationHash, depth: u32) -> Result<()> {
        let wait = self.client.wait_for(operation, Some(depth), None);
        let outcome = match self.confirmation_timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait).await.map_err(|_| {
                DeployError::ConfirmationTimeout {
                    operation: operation.to_base58_check(),
                    timeout_secs: timeout.as_secs(),
                }
            })?,
            None => wait.await,
        };
        outcome.map_err(|e| match DeployError::from_client(e) {
            network @ DeployError::Network(_) => network,
            other => DeployError::Confirmation {
                operation: operation.to_base58_check(),
                reason: other.to_string(),
            },
        })
    }

    async fn contract_storage(&self, contract: &ContractKt1Hash) -> Result<String> {
        self.client
            .get_contract_storage(contract)
            .await
            .map_err(DeployError::from_client)
    }

    async fn call(&self, request: CallRequest<'_>) -> Result<OperationHash> {
        let arg = request.argument.to_string();
        log::debug!(
            "Calling {}%{} with {}",
            request.contract,
            request.entrypoint,
            arg
        );
        self.client
            .call_contract(
                &self.source,
                &request.contract.to_base58_check(),
                0.0,
                request.entrypoint,
                &arg,
                Some(request.burn_cap),
            )
            .await
            .map_err(DeployError::from_client)
    }
}
