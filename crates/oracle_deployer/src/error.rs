use tezos_crypto_rs::hash::ContractKt1Hash;

use crate::micheline::MichelineError;

/// Why a deployment stage failed.
#[derive(thiserror::Error, Debug)]
pub enum DeployError {
    #[error("Could not reach the Tezos node: {0}")]
    Network(String),
    #[error("Operation rejected: {0}")]
    Rejected(String),
    #[error("Operation {operation} was not confirmed within {timeout_secs}s")]
    ConfirmationTimeout { operation: String, timeout_secs: u64 },
    #[error("Failed to confirm operation {operation}: {reason}")]
    Confirmation { operation: String, reason: String },
    #[error("Invalid storage for {contract}: {source}")]
    Storage {
        contract: &'static str,
        #[source]
        source: MichelineError,
    },
    #[error("Invalid argument for entrypoint {entrypoint}: {source}")]
    Parameter {
        entrypoint: String,
        #[source]
        source: MichelineError,
    },
    #[error("Price feed failure: {0}")]
    Feed(String),
    #[error("Invalid contract program: {0}")]
    Program(String),
    #[error("octez-client failure: {0}")]
    Toolkit(String),
    #[error("Client deployment failed, oracle {oracle} is deployed without a client: {source}")]
    ClientAfterOracle {
        oracle: ContractKt1Hash,
        #[source]
        source: Box<DeployError>,
    },
}

impl DeployError {
    /// Classifies an error raised by the `octez` bindings.
    pub(crate) fn from_client(err: anyhow::Error) -> Self {
        match err.downcast_ref::<octez::CommandFailed>() {
            Some(failed) if failed.is_connection_error() => {
                Self::Network(failed.stderr.trim().to_owned())
            }
            Some(failed) => Self::Rejected(failed.stderr.trim().to_owned()),
            None => Self::Toolkit(format!("{err:#}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
