use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use std::{
    ffi::OsStr,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};
use tezos_crypto_rs::hash::{ContractKt1Hash, OperationHash};
use tokio::process::Command;

use super::{base_dir::BaseDir, endpoint::Endpoint};

const DEFAULT_BINARY_PATH: &str = "octez-client";

/// Fragments of octez-client error output that mean the node could not be
/// reached at all.
const CONNECTION_ERRORS: [&str; 6] = [
    "Unable to connect to the node",
    "Connection refused",
    "Failed to connect",
    "Name or service not known",
    "dns error",
    "Rpc request failed",
];

type StdOut = String;

#[derive(Debug, Clone)]
pub struct OctezClientConfig {
    binary_path: PathBuf,
    base_dir: Arc<BaseDir>,
    octez_node_endpoint: Endpoint,
    disable_unsafe_disclaimer: bool,
}

impl OctezClientConfig {
    pub fn base_dir(&self) -> &BaseDir {
        self.base_dir.as_ref()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.octez_node_endpoint
    }
}

pub struct OctezClientConfigBuilder {
    // if None, use the binary in $PATH
    binary_path: Option<PathBuf>,
    // if None, use temp directory
    base_dir: Option<PathBuf>,
    octez_node_endpoint: Endpoint,
    disable_unsafe_disclaimer: bool,
}

impl OctezClientConfigBuilder {
    pub fn new(octez_node_endpoint: Endpoint) -> Self {
        OctezClientConfigBuilder {
            binary_path: None,
            base_dir: None,
            octez_node_endpoint,
            disable_unsafe_disclaimer: false,
        }
    }

    pub fn set_binary_path(mut self, binary_path: PathBuf) -> Self {
        self.binary_path = Some(binary_path);
        self
    }

    pub fn set_base_dir(mut self, base_dir: PathBuf) -> Self {
        self.base_dir = Some(base_dir);
        self
    }

    pub fn set_disable_unsafe_disclaimer(
        mut self,
        disable_unsafe_disclaimer: bool,
    ) -> Self {
        self.disable_unsafe_disclaimer = disable_unsafe_disclaimer;
        self
    }

    pub fn build(self) -> Result<OctezClientConfig> {
        self.validate_binary_path()?;
        Ok(OctezClientConfig {
            binary_path: self.binary_path.unwrap_or(DEFAULT_BINARY_PATH.into()),
            base_dir: Arc::new(match self.base_dir {
                Some(path_buf) => BaseDir::try_from(path_buf)?,
                None => BaseDir::temp()?,
            }),
            octez_node_endpoint: self.octez_node_endpoint,
            disable_unsafe_disclaimer: self.disable_unsafe_disclaimer,
        })
    }

    fn validate_binary_path(&self) -> Result<()> {
        if let Some(binary_path) = &self.binary_path {
            if !binary_path.exists() {
                bail!("Binary path does not exist");
            }
            if !binary_path.is_file() {
                bail!("Binary path is not a file");
            }
        }
        Ok(())
    }
}

/// A client invocation that ran but exited unsuccessfully.
#[derive(Debug)]
pub struct CommandFailed {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl CommandFailed {
    /// True when the client never got an answer from the node.
    pub fn is_connection_error(&self) -> bool {
        CONNECTION_ERRORS
            .iter()
            .any(|fragment| self.stderr.contains(fragment))
    }
}

impl fmt::Display for CommandFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(
                f,
                "Command {} failed with exit code {}: {}",
                self.command,
                code,
                self.stderr.trim()
            ),
            None => write!(f, "Command {} terminated by a signal", self.command),
        }
    }
}

impl std::error::Error for CommandFailed {}

#[derive(Default)]
pub struct TransferOptionsBuilder {
    from: Option<String>,
    to: Option<String>,
    amount: Option<f64>,
    entrypoint: Option<String>,
    arg: Option<String>,
    burn_cap: Option<f64>,
}

impl TransferOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_from(mut self, from: String) -> Self {
        self.from = Some(from);
        self
    }

    pub fn set_to(mut self, to: String) -> Self {
        self.to = Some(to);
        self
    }

    pub fn set_entrypoint(mut self, entrypoint: String) -> Self {
        self.entrypoint = Some(entrypoint);
        self
    }

    pub fn set_arg(mut self, arg: String) -> Self {
        self.arg = Some(arg);
        self
    }

    pub fn set_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn set_burn_cap(mut self, burn_cap: f64) -> Self {
        self.burn_cap = Some(burn_cap);
        self
    }

    pub fn build(self) -> Result<TransferOptions> {
        Ok(TransferOptions {
            from: self.from.ok_or(anyhow!("Missing from"))?,
            to: self.to.ok_or(anyhow!("Missing to"))?,
            amount: self.amount.unwrap_or_default(),
            entrypoint: self.entrypoint,
            arg: self.arg,
            burn_cap: self.burn_cap,
        })
    }
}

pub struct TransferOptions {
    from: String,
    to: String,
    amount: f64,
    entrypoint: Option<String>,
    arg: Option<String>,
    burn_cap: Option<f64>,
}

impl TransferOptions {
    /// Arguments of a `transfer` injected without waiting for inclusion.
    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--wait".to_owned(),
            "none".to_owned(),
            "transfer".to_owned(),
            self.amount.to_string(),
            "from".to_owned(),
            self.from.clone(),
            "to".to_owned(),
            self.to.clone(),
        ];
        if let Some(entrypoint) = &self.entrypoint {
            args.extend(["--entrypoint".to_owned(), entrypoint.clone()]);
        }
        if let Some(arg) = &self.arg {
            args.extend(["--arg".to_owned(), arg.clone()]);
        }
        if let Some(burn_cap) = self.burn_cap {
            args.extend(["--burn-cap".to_owned(), burn_cap.to_string()]);
        }
        args
    }
}

#[derive(Debug)]
pub struct OctezClient {
    binary_path: PathBuf,
    base_dir: Arc<BaseDir>,
    octez_node_endpoint: Endpoint,
    disable_unsafe_disclaimer: bool,
}

impl OctezClient {
    pub fn new(config: OctezClientConfig) -> Self {
        Self {
            binary_path: config.binary_path,
            base_dir: config.base_dir,
            octez_node_endpoint: config.octez_node_endpoint,
            disable_unsafe_disclaimer: config.disable_unsafe_disclaimer,
        }
    }
}

impl OctezClient {
    fn command<S: AsRef<OsStr>, I: IntoIterator<Item = S>>(
        &self,
        args: I,
    ) -> Result<Command> {
        let binary_path = self
            .binary_path
            .to_str()
            .ok_or(anyhow!("binary path must be a valid utf-8 path"))?;
        let mut command = Command::new(binary_path);
        command.args(["--base-dir", self.base_dir.to_utf8()?]);
        command.args(["--endpoint", &self.octez_node_endpoint.to_string()]);
        if self.disable_unsafe_disclaimer {
            command.env("TEZOS_CLIENT_UNSAFE_DISABLE_DISCLAIMER", "Y");
        }
        command.args(args);
        // a dropped wait (e.g. on timeout) must not leave the client running
        command.kill_on_drop(true);
        Ok(command)
    }

    async fn spawn_and_wait_command<S: AsRef<OsStr>, I: IntoIterator<Item = S>>(
        &self,
        args: I,
    ) -> Result<StdOut> {
        let mut command = self.command(args)?;
        log::debug!("Running {:?}", command.as_std());
        let output = command
            .output()
            .await
            .with_context(|| format!("failed to spawn {:?}", self.binary_path))?;
        if output.status.success() {
            let stdout = String::from_utf8(output.stdout)?;
            log::debug!("Output: {}", stdout);
            return Ok(stdout);
        }
        Err(anyhow!(CommandFailed {
            command: format!("{:?}", command.as_std()),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }))
    }

    pub fn base_dir(&self) -> &BaseDir {
        &self.base_dir
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.octez_node_endpoint
    }

    /// Imports `secret_key` under `alias`, replacing any key already known by
    /// that alias. Plain `edsk...` keys are imported as unencrypted.
    pub async fn import_secret_key(&self, alias: &str, secret_key: &str) -> Result<()> {
        let uri = if secret_key.contains(':') {
            secret_key.to_owned()
        } else {
            format!("unencrypted:{secret_key}")
        };
        self.spawn_and_wait_command(["import", "secret", "key", alias, &uri, "--force"])
            .await?;
        Ok(())
    }

    pub async fn get_balance(&self, alias: &str) -> Result<f64> {
        let stdout = self
            .spawn_and_wait_command(["get", "balance", "for", alias])
            .await?;
        Self::extract_digits(&stdout)
    }

    /// Extract digits followed by a space and ꜩ
    /// e.g. 30000 ꜩ -> 30000
    fn extract_digits(input: &str) -> Result<f64> {
        let re = Regex::new(r"(\d+(\.\d+)?)\s*ꜩ").context("Failed to create regex")?;
        if let Some(caps) = re.captures(input) {
            caps.get(1)
                .context("Failed to capture digits")?
                .as_str()
                .parse::<f64>()
                .context("Failed to parse digits as f64")
        } else {
            Err(anyhow::anyhow!("Input string did not match the pattern"))
        }
    }

    /// Injects an origination without waiting for inclusion. The returned
    /// operation hash is what [`OctezClient::wait_for`] takes.
    pub async fn originate_contract(
        &self,
        contract_alias: &str,
        funding_account_src: &str,
        fund_tez: f64,
        contract_path: &Path,
        init_data: &str,
        burn_cap: Option<f64>,
    ) -> Result<(ContractKt1Hash, OperationHash)> {
        let fund_str = fund_tez.to_string();
        let burn_cap_str = burn_cap.map(|v| v.to_string());
        let mut args = vec![
            "--wait",
            "none",
            "originate",
            "contract",
            contract_alias,
            "transferring",
            &fund_str,
            "from",
            funding_account_src,
            "running",
            contract_path
                .to_str()
                .ok_or(anyhow!("failed to convert contract path to string"))?,
            "--init",
            init_data,
            "--force",
        ];
        if let Some(v) = &burn_cap_str {
            args.extend_from_slice(&["--burn-cap", v]);
        }
        let output = self.spawn_and_wait_command(args).await?;

        let operation_hash = parse_operation_hash(&output).context(
            "failed to parse operation hash from execution output",
        )?;
        let contract_address = parse_contract_address(&output).context(
            "failed to parse contract address from execution output",
        )?;
        Ok((contract_address, operation_hash))
    }

    /// Calls `entrypoint` of `contract` with `arg` (Michelson data). Returns
    /// once the operation is injected.
    pub async fn call_contract(
        &self,
        from: &str,
        contract: &str,
        amount: f64,
        entrypoint: &str,
        arg: &str,
        burn_cap: Option<f64>,
    ) -> Result<OperationHash> {
        let mut builder = TransferOptionsBuilder::new()
            .set_from(from.to_owned())
            .set_to(contract.to_owned())
            .set_amount(amount)
            .set_entrypoint(entrypoint.to_owned())
            .set_arg(arg.to_owned());
        if let Some(burn_cap) = burn_cap {
            builder = builder.set_burn_cap(burn_cap);
        }
        self.transfer(builder.build()?).await
    }

    async fn transfer(&self, options: TransferOptions) -> Result<OperationHash> {
        let stdout = self.spawn_and_wait_command(options.args()).await?;
        parse_operation_hash(&stdout)
            .context("failed to parse operation hash from execution output")
    }

    /// Blocks until `operation_hash` is included and `confirmations` blocks
    /// have been baked on top of it.
    pub async fn wait_for(
        &self,
        operation_hash: &OperationHash,
        confirmations: Option<u32>,
        previous_num_blocks: Option<u32>,
    ) -> Result<()> {
        let operation_str = operation_hash.to_base58_check();
        let confirmations_str = confirmations.map(|v| v.to_string());
        let previous_num_blocks_str = previous_num_blocks.map(|v| v.to_string());
        let mut args = vec!["wait", "for", &operation_str, "to", "be", "included"];
        if let Some(v) = &confirmations_str {
            args.extend_from_slice(&["--confirmations", v]);
        }
        if let Some(v) = &previous_num_blocks_str {
            args.extend_from_slice(&["--check-previous", v]);
        }
        self.spawn_and_wait_command(args).await?;
        Ok(())
    }

    /// Current storage of `contract` in Michelson notation.
    pub async fn get_contract_storage(&self, contract: &ContractKt1Hash) -> Result<String> {
        let contract_str = contract.to_base58_check();
        let stdout = self
            .spawn_and_wait_command(["get", "contract", "storage", "for", &contract_str])
            .await?;
        Ok(stdout.trim().to_owned())
    }
}

fn parse_regex(pattern_str: &str, output: &str) -> Result<String> {
    let pattern = Regex::new(pattern_str)?;
    Ok(pattern
        .captures(output)
        .ok_or(anyhow!("input string does not match the pattern"))?
        .get(1)
        .ok_or(anyhow!("cannot find the first match group"))?
        .as_str()
        .to_owned())
}

fn parse_operation_hash(output: &str) -> Result<OperationHash> {
    let raw_operation_hash =
        parse_regex("Operation hash is '(o[1-9A-HJ-NP-Za-km-z]{50})'", output)?;
    Ok(OperationHash::from_base58_check(&raw_operation_hash)?)
}

fn parse_contract_address(output: &str) -> Result<ContractKt1Hash> {
    let raw_contract_hash = parse_regex(
        "New contract (KT1[1-9A-HJ-NP-Za-km-z]{33}) originated.",
        output,
    )?;
    Ok(ContractKt1Hash::from_base58_check(&raw_contract_hash)?)
}
