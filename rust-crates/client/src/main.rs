use clap::{
    ArgGroup,
    Parser,
    Subcommand,
};
use color_eyre::eyre::Result;
use prize_pool_client::{
    logging,
    pool::PoolId,
};
use std::path::PathBuf;

mod commands;
mod render;

#[derive(Parser, Debug)]
#[command(
    name = "prize-pool",
    about = "Browse, create and play commit-reveal prize pools",
    version,
    group(
        ArgGroup::new("network")
            .args(["testnet", "local"])
            .required(false)
    )
)]
pub struct Args {
    /// Use the Monad testnet (default)
    #[arg(long)]
    testnet: bool,

    /// Use a local node
    #[arg(long)]
    local: bool,

    /// Override the RPC URL for the selected network
    #[arg(long)]
    rpc_url: Option<String>,

    /// Prize pool contract address (defaults to the stored deployment)
    #[arg(long)]
    contract: Option<String>,

    /// Multicall3 address (defaults to the stored deployment, then the canonical one)
    #[arg(long)]
    multicall: Option<String>,

    /// Keystore wallet name, required for write commands
    #[arg(long)]
    wallet: Option<String>,

    /// Override the keystore directory (defaults to ~/.prize-pool/wallets)
    #[arg(long)]
    wallet_dir: Option<String>,

    /// View pools as this address without unlocking a wallet
    #[arg(long, conflicts_with = "wallet")]
    address: Option<String>,

    /// Directory holding the local secret store
    #[arg(long, default_value = ".prize-pool")]
    data_dir: PathBuf,

    /// JSON file with client settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write logs to a daily rolling file in this directory instead of stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List every pool with its status
    Pools {
        /// Keep the list on screen and refresh it as the chain moves
        #[arg(long)]
        watch: bool,
    },
    /// Show one pool, its tickets and what you can do with it
    Pool { id: PoolId },
    /// Pools you bought tickets in
    MyTickets,
    /// Create a pool funded with a deposit in MON
    Create {
        #[arg(long)]
        deposit: String,
    },
    Buy {
        id: PoolId,
        #[arg(long, default_value_t = 1)]
        quantity: u64,
    },
    /// Reveal the winners of a pool you created
    Reveal {
        id: PoolId,
        /// Import this secret before revealing
        #[arg(long)]
        secret: Option<String>,
    },
    /// Claim prizes for all your tickets in a revealed pool
    Claim { id: PoolId },
    /// Withdraw the creator fee of a revealed pool
    Withdraw { id: PoolId },
    /// Refund all your tickets in an expired pool, one transaction per ticket
    Refund { id: PoolId },
    /// Refund the deposit of an expired pool you created
    RefundCreator { id: PoolId },
    #[command(subcommand)]
    Secret(SecretCommand),
    #[command(subcommand)]
    Deployment(DeploymentCommand),
}

#[derive(Subcommand, Debug)]
pub enum SecretCommand {
    /// Print the stored secret of a pool
    Show { id: PoolId },
    /// Store a secret recovered out of band
    Import { id: PoolId, hex: String },
}

#[derive(Subcommand, Debug)]
pub enum DeploymentCommand {
    /// Print the deployment record of the selected network
    Show,
    /// Record the contract deployment of the selected network
    Set {
        #[arg(long)]
        contract: String,
        #[arg(long)]
        multicall: Option<String>,
        #[arg(long)]
        chain_id: Option<u64>,
        #[arg(long)]
        deployment_block: Option<u64>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let _log_guard = logging::init_tracing(args.log_dir.as_deref());
    tracing::info!("starting prize-pool client");
    commands::run(args).await
}
