//! Deploys the price Oracle contract and a Client contract wired to it, and
//! relays market prices into the deployed oracle.

pub mod config;
pub mod deployer;
pub mod encoding;
pub mod error;
pub mod feeds;
pub mod ledger;
pub mod micheline;
pub mod octez_ledger;
pub mod program;
pub mod relay;
pub mod storage;

pub use deployer::{DeploySettings, Deployer, Deployment};
pub use error::{DeployError, Result};
pub use ledger::{CallRequest, Ledger, Originated, OriginationHandle, OriginationRequest};
pub use octez_ledger::OctezLedger;
pub use program::Program;
pub use relay::{Relayer, RelaySettings};
