use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{debug, error, info, warn};
use oracle_deployer::{
    config::Config,
    deployer::{encode_storage, verify_client},
    feeds::{BinanceFeed, TzktRequests},
    ledger::parse_contract_address,
    storage::{ClientStorage, InitialStorage, OracleStorage},
    Deployer, OctezLedger, Program, Relayer,
};
use tezos_crypto_rs::hash::ContractKt1Hash;

#[derive(Debug, Parser)]
#[command(name = "oracle-deployer", version)]
#[command(about = "Originates the price Oracle contract and a Client bound to it")]
struct Cli {
    /// Path to the JSON configuration file. Defaults to ./oracle-deployer.json if present.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Originates the Oracle, then a Client pointing at it. This is the default.
    Deploy,
    /// Originates a Client only.
    DeployClient {
        /// Address of an already deployed Oracle.
        #[arg(long, value_name = "ADDRESS", value_parser = parse_contract)]
        oracle: Option<ContractKt1Hash>,
    },
    /// Prints both initial storages without touching the network.
    Storage,
    /// Checks that a deployed Client references the given Oracle.
    Verify {
        #[arg(long, value_name = "ADDRESS", value_parser = parse_contract)]
        client: ContractKt1Hash,
        #[arg(long, value_name = "ADDRESS", value_parser = parse_contract)]
        oracle: ContractKt1Hash,
    },
    /// Pushes market prices into a deployed Oracle for every new request.
    Relay {
        /// Oracle to serve. Defaults to `relay.oracle` from the config.
        #[arg(long, value_name = "ADDRESS", value_parser = parse_contract)]
        oracle: Option<ContractKt1Hash>,
        /// First request id to serve. Defaults to the oracle's current counter.
        #[arg(long, value_name = "ID")]
        from: Option<u64>,
    },
}

fn parse_contract(s: &str) -> std::result::Result<ContractKt1Hash, String> {
    parse_contract_address(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let cli = Cli::parse();
    debug!("Command: {:?}", cli.command);

    if let Err(err) = exec(cli).await {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn exec(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    match cli.command.unwrap_or(Command::Deploy) {
        Command::Deploy => {
            let deployer = deployer(&config).await?;
            let deployment = deployer.run().await?;
            info!("Oracle deployed at {}", deployment.oracle);
            info!("Client deployed at {}", deployment.client);
            println!("oracle: {}", deployment.oracle);
            println!("client: {}", deployment.client);
        }
        Command::DeployClient { oracle } => {
            let deployer = deployer(&config).await?;
            let client = deployer.deploy_client(oracle.as_ref()).await?;
            info!("Client deployed at {}", client);
            println!("client: {}", client);
        }
        Command::Storage => print_storage(&config)?,
        Command::Verify { client, oracle } => {
            let program = Program::load(&config.client_program)?;
            let ledger = ledger(&config).await?;
            if !verify_client(&ledger, &program, &client, &oracle).await? {
                bail!("Client {} does not reference oracle {}", client, oracle);
            }
            info!("Client {} references oracle {}", client, oracle);
        }
        Command::Relay { oracle, from } => relay(&config, oracle, from).await?,
    }
    Ok(())
}

async fn relay(config: &Config, oracle: Option<ContractKt1Hash>, from: Option<u64>) -> Result<()> {
    let oracle = match oracle {
        Some(oracle) => oracle,
        None => config
            .relay_oracle()?
            .context("No oracle to serve, pass --oracle or set relay.oracle")?,
    };
    let mut settings = config.relay_settings();
    if from.is_some() {
        settings.from_request = from;
    }
    let program = Program::load(&config.oracle_program)?;
    let ledger = ledger(config).await?;
    let requests = TzktRequests::new(&config.relay.indexer_url)?;
    let feed = BinanceFeed::new(&config.relay.price_api_url)?;
    let mut relayer = Relayer::new(ledger, requests, feed, oracle, program, settings)?;

    info!("Relaying price requests of oracle {}", relayer.oracle());
    tokio::select! {
        _ = relayer.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to wait for Ctrl+C")?;
            info!("Shutting down relay...");
        }
    }
    Ok(())
}

async fn ledger(config: &Config) -> Result<OctezLedger> {
    let ledger = OctezLedger::new(config.octez_client()?, &config.source_alias)
        .with_confirmation_timeout(config.confirmation_timeout());
    info!("Using node {}", config.rpc_endpoint);
    if let Some(secret_key) = &config.secret_key {
        ledger
            .import_source_key(secret_key.expose())
            .await
            .context("Failed to import the source key")?;
    }
    Ok(ledger)
}

async fn deployer(config: &Config) -> Result<Deployer<OctezLedger>> {
    let oracle_program = Program::load(&config.oracle_program)?;
    let client_program = Program::load(&config.client_program)?;
    let ledger = ledger(config).await?;
    match ledger.source_balance().await {
        Ok(balance) => info!("Source {} holds {} tez", ledger.source(), balance),
        Err(e) => warn!("Could not read the balance of {}: {}", ledger.source(), e),
    }
    Ok(Deployer::new(
        ledger,
        oracle_program,
        client_program,
        config.deploy_settings(),
    ))
}

fn print_storage(config: &Config) -> Result<()> {
    let settings = config.deploy_settings();
    let oracle = OracleStorage::new(&settings.oracle);
    let client = ClientStorage::new(None, &settings.client, chrono::Utc::now());
    print_one(&config.oracle_program, &oracle)?;
    print_one(&config.client_program, &client)
}

fn print_one<S: InitialStorage>(program: &std::path::Path, storage: &S) -> Result<()> {
    println!("{}:", S::CONTRACT);
    println!("{}", serde_json::to_string_pretty(storage)?);
    match Program::load(program) {
        Ok(program) => println!("{}", encode_storage(&program, storage)?),
        Err(e) => warn!("Skipping Michelson rendering of {}: {}", S::CONTRACT, e),
    }
    Ok(())
}
