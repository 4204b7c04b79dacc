use crate::{
    Args,
    Command,
    DeploymentCommand,
    SecretCommand,
    render,
};
use color_eyre::eyre::{
    Report,
    Result,
    WrapErr,
    eyre,
};
use deployments::{
    DeploymentRecord,
    DeploymentStore,
};
use prize_pool_client::{
    actions::{
        Action,
        ViewerHoldings,
        available_actions,
    },
    aggregator::{
        PoolAggregator,
        RefreshOutcome,
    },
    clock::{
        ChainClock,
        ClockReading,
    },
    config::{
        ClientSettings,
        DEFAULT_MULTICALL_ADDRESS,
        NetworkTarget,
    },
    create::{
        CreationPreview,
        validate_deposit,
    },
    ledger::{
        Ledger,
        Web3Ledger,
    },
    orchestrator::{
        Orchestrator,
        OrchestratorEvent,
        WriteError,
    },
    pool::{
        Pool,
        PoolId,
    },
    secrets::{
        SecretVault,
        SledSecretStore,
    },
    service::PoolService,
    status::{
        PoolStatus,
        derive_status,
    },
    tickets::{
        TicketSlots,
        load_holdings,
        load_ticket_slots,
        tickets_bought_by,
    },
    wallets::{
        Keystore,
        wallet_dir,
    },
};
use std::{
    path::PathBuf,
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::{
    info,
    warn,
};
use web3::{
    signing::SecretKey,
    types::Address,
};

const SECRETS_DIR: &str = "secrets";

type Writer = Orchestrator<Web3Ledger, SledSecretStore>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Access {
    ReadOnly,
    /// The wallet or `--address` account, when one was given.
    Viewer,
    Signer,
}

/// Everything one pool page shows.
pub struct PoolView {
    pub pool: Pool,
    pub status: PoolStatus,
    pub clock: ClockReading,
    pub slots: TicketSlots,
    pub viewer: Option<Address>,
    pub holdings: ViewerHoldings,
    pub actions: Vec<Action>,
}

struct Session<'a> {
    args: &'a Args,
    network: NetworkTarget,
    settings: ClientSettings,
}

pub async fn run(args: Args) -> Result<()> {
    let settings = match &args.config {
        Some(path) => ClientSettings::load(path)
            .wrap_err_with(|| format!("Failed to load settings from {}", path.display()))?,
        None => ClientSettings::default(),
    };
    let network = if args.local {
        NetworkTarget::local(args.rpc_url.clone())
    } else {
        NetworkTarget::testnet(args.rpc_url.clone())
    };
    let session = Session {
        args: &args,
        network,
        settings,
    };

    match &args.command {
        Command::Pools { watch } => list_pools(&session, *watch).await,
        Command::Pool { id } => show_pool(&session, *id).await,
        Command::MyTickets => my_tickets(&session).await,
        Command::Create { deposit } => create(&session, deposit).await,
        Command::Buy { id, quantity } => buy(&session, *id, *quantity).await,
        Command::Reveal { id, secret } => reveal(&session, *id, secret.as_deref()).await,
        Command::Claim { id } => claim(&session, *id).await,
        Command::Withdraw { id } => withdraw(&session, *id).await,
        Command::Refund { id } => refund(&session, *id).await,
        Command::RefundCreator { id } => refund_creator(&session, *id).await,
        Command::Secret(command) => secret(&session, command),
        Command::Deployment(command) => deployment(&session, command),
    }
}

impl Session<'_> {
    fn deployment_store(&self) -> Result<DeploymentStore> {
        DeploymentStore::new(self.network.deployment_env()).map_err(|e| eyre!(e))
    }

    fn secrets_path(&self) -> PathBuf {
        self.args
            .data_dir
            .join(self.network.deployment_env().dir_name())
            .join(SECRETS_DIR)
    }

    fn vault(&self) -> Result<SecretVault<SledSecretStore>> {
        let path = self.secrets_path();
        let store = SledSecretStore::open(&path)
            .wrap_err_with(|| format!("Failed to open secret store at {}", path.display()))?;
        Ok(SecretVault::new(store))
    }

    fn keystore(&self) -> Result<Keystore> {
        let name = self
            .args
            .wallet
            .as_deref()
            .ok_or_else(|| eyre!("Specify --wallet <name> to sign transactions"))?;
        Keystore::load(&wallet_dir(self.args.wallet_dir.as_deref()), name)
    }

    fn unlock(&self) -> Result<SecretKey> {
        self.keystore()?.unlock()
    }

    fn ledger(&self, access: Access) -> Result<Web3Ledger> {
        let record = self.deployment_store()?.load().map_err(|e| eyre!(e))?;
        let contract = match (&self.args.contract, &record) {
            (Some(contract), _) => parse_address(contract)?,
            (None, Some(record)) => parse_address(&record.contract_address)?,
            (None, None) => {
                return Err(eyre!(
                    "No contract address for {}; pass --contract or run `prize-pool deployment set`",
                    self.network.deployment_env()
                ));
            }
        };
        let multicall = self
            .args
            .multicall
            .clone()
            .or_else(|| record.as_ref().and_then(|r| r.multicall_address.clone()))
            .unwrap_or_else(|| DEFAULT_MULTICALL_ADDRESS.to_string());
        let multicall = parse_address(&multicall)?;
        let chain_id = record
            .as_ref()
            .and_then(|r| r.chain_id)
            .unwrap_or_else(|| self.network.default_chain_id());

        info!(url = self.network.url(), ?contract, "connecting");
        let ledger = Web3Ledger::connect(self.network.url(), contract, multicall)
            .wrap_err_with(|| format!("Failed to connect to {}", self.network.url()))?
            .with_chain_id(chain_id);
        match access {
            Access::ReadOnly => Ok(ledger),
            Access::Signer => Ok(ledger.with_signer(self.unlock()?)),
            Access::Viewer => match (&self.args.address, &self.args.wallet) {
                (Some(address), _) => Ok(ledger.with_watch_address(parse_address(address)?)),
                (None, Some(_)) => {
                    let keystore = self.keystore()?;
                    match keystore.address() {
                        Some(address) => Ok(ledger.with_watch_address(address)),
                        None => Ok(ledger.with_signer(keystore.unlock()?)),
                    }
                }
                (None, None) => Ok(ledger),
            },
        }
    }

    fn writer(&self) -> Result<(Arc<Web3Ledger>, Writer, mpsc::UnboundedReceiver<OrchestratorEvent>)> {
        let ledger = Arc::new(self.ledger(Access::Signer)?);
        let (orchestrator, events) = Orchestrator::new(ledger.clone(), self.vault()?);
        let orchestrator =
            orchestrator.with_confirmation_timeout(self.settings.confirmation_timeout());
        Ok((ledger, orchestrator, events))
    }
}

fn parse_address(text: &str) -> Result<Address> {
    text.trim()
        .parse::<Address>()
        .map_err(|_| eyre!("Invalid address {text}"))
}

async fn list_pools(session: &Session<'_>, watch: bool) -> Result<()> {
    let settings = &session.settings;
    let ledger = Arc::new(session.ledger(Access::ReadOnly)?);
    let aggregator = PoolAggregator::with_batching(
        ledger.clone(),
        settings.batch_size,
        settings.batch_delay(),
    );
    let clock = ChainClock::new(ledger, settings.clock_poll());

    if !watch {
        let (outcome, reading) = tokio::join!(aggregator.refresh(), clock.poll_once());
        if outcome == RefreshOutcome::CountFailed {
            return Err(eyre!("Failed to read the pool count"));
        }
        let rows = with_statuses(&aggregator.snapshot().pools, reading);
        println!("{}", render::pool_table(&rows, reading));
        return Ok(());
    }

    let service = PoolService::new(aggregator, clock, settings.refresh_interval());
    let mut subscription = service.subscribe();
    loop {
        subscription.mark_seen();
        let state = subscription.pools();
        if state.loading && state.pools.is_empty() {
            println!("Loading pools...");
        } else {
            println!(
                "{}",
                render::pool_table(&subscription.statuses(), subscription.clock())
            );
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = subscription.changed() => {}
        }
    }
    Ok(())
}

fn with_statuses(pools: &[Pool], clock: ClockReading) -> Vec<(Pool, PoolStatus)> {
    pools
        .iter()
        .map(|pool| {
            (
                pool.clone(),
                derive_status(pool, clock.block, clock.timestamp),
            )
        })
        .collect()
}

async fn load_view<L: Ledger>(
    ledger: &Arc<L>,
    settings: &ClientSettings,
    pool_id: PoolId,
) -> Result<PoolView> {
    let aggregator = PoolAggregator::new(ledger.clone());
    let clock = ChainClock::new(ledger.clone(), settings.clock_poll());
    let (pool, reading) = tokio::join!(aggregator.load_one(pool_id), clock.poll_once());
    let pool = pool.wrap_err_with(|| format!("Failed to load pool {pool_id}"))?;
    let status = derive_status(&pool, reading.block, reading.timestamp);
    let slots = load_ticket_slots(ledger.as_ref(), &pool)
        .await
        .wrap_err("Failed to load tickets")?;

    let viewer = ledger.account();
    let holdings = match viewer {
        Some(viewer) => ViewerHoldings {
            tickets_bought: tickets_bought_by(ledger.as_ref(), pool_id, viewer)
                .await
                .wrap_err("Failed to load your purchases")?,
            owned: slots.owned_by(&viewer),
            claimable: if pool.is_revealed {
                slots.claimable_by(&viewer)
            } else {
                Vec::new()
            },
        },
        None => ViewerHoldings::default(),
    };
    let actions = available_actions(&pool, status, viewer, &holdings);
    Ok(PoolView {
        pool,
        status,
        clock: reading,
        slots,
        viewer,
        holdings,
        actions,
    })
}

async fn show_pool(session: &Session<'_>, pool_id: PoolId) -> Result<()> {
    let ledger = Arc::new(session.ledger(Access::Viewer)?);
    let view = load_view(&ledger, &session.settings, pool_id).await?;
    println!("{}", render::pool_detail(&view));
    Ok(())
}

async fn my_tickets(session: &Session<'_>) -> Result<()> {
    let settings = &session.settings;
    let ledger = Arc::new(session.ledger(Access::Viewer)?);
    let viewer = ledger
        .account()
        .ok_or_else(|| eyre!("Pass --wallet or --address to list your tickets"))?;
    let aggregator = PoolAggregator::with_batching(
        ledger.clone(),
        settings.batch_size,
        settings.batch_delay(),
    );
    let clock = ChainClock::new(ledger.clone(), settings.clock_poll());
    let (pools, reading) = tokio::join!(aggregator.load_all(), clock.poll_once());
    let pools = pools.wrap_err("Failed to read the pool count")?;
    let holdings = load_holdings(ledger.as_ref(), &pools, viewer)
        .await
        .wrap_err("Failed to load your purchases")?;
    println!("{}", render::holdings_table(&pools, &holdings, reading));
    Ok(())
}

/// Run a write while printing orchestrator events as they arrive. The flag reports
/// whether a confirmed write asked for a refresh.
async fn drive<T>(
    operation: impl Future<Output = Result<T, WriteError>>,
    events: &mut mpsc::UnboundedReceiver<OrchestratorEvent>,
) -> (Result<T, WriteError>, bool) {
    tokio::pin!(operation);
    let mut refresh = false;
    let mut handle = |event: OrchestratorEvent| {
        if matches!(event, OrchestratorEvent::RefreshRequested { .. }) {
            refresh = true;
        }
        if let Some(line) = render::event_line(&event) {
            println!("{line}");
        }
    };
    let result = loop {
        tokio::select! {
            result = &mut operation => break result,
            Some(event) = events.recv() => handle(event),
        }
    };
    while let Ok(event) = events.try_recv() {
        handle(event);
    }
    (result, refresh)
}

fn user_error(err: WriteError) -> Report {
    warn!(?err, "write failed");
    eyre!(err.user_message())
}

fn require<'v>(view: &'v PoolView, name: &str) -> Result<&'v Action> {
    view.actions
        .iter()
        .find(|action| action.name() == name)
        .ok_or_else(|| {
            eyre!(
                "{name} is not available for pool {} ({})",
                view.pool.id,
                view.status
            )
        })
}

async fn finish_write<T>(
    session: &Session<'_>,
    ledger: &Arc<Web3Ledger>,
    pool_id: PoolId,
    (result, refresh): (Result<T, WriteError>, bool),
) -> Result<T> {
    let value = result.map_err(user_error)?;
    if refresh {
        let view = load_view(ledger, &session.settings, pool_id).await?;
        println!("{}", render::pool_detail(&view));
    }
    Ok(value)
}

async fn create(session: &Session<'_>, deposit_text: &str) -> Result<()> {
    let deposit = validate_deposit(deposit_text).map_err(|err| eyre!(err.to_string()))?;
    let (_ledger, orchestrator, mut events) = session.writer()?;
    println!(
        "{}",
        render::creation_preview(&CreationPreview::for_deposit(deposit))
    );
    println!("{}", render::SECRET_STORAGE_WARNING);

    let (result, _) = drive(orchestrator.create_pool(deposit_text), &mut events).await;
    let outcome = result.map_err(user_error)?;
    println!("{}", render::creation_outcome(&outcome));
    Ok(())
}

async fn buy(session: &Session<'_>, pool_id: PoolId, quantity: u64) -> Result<()> {
    let (ledger, orchestrator, mut events) = session.writer()?;
    let view = load_view(&ledger, &session.settings, pool_id).await?;
    if let Action::Buy { max_quantity } = require(&view, "buy")? {
        if quantity == 0 || quantity > *max_quantity {
            return Err(eyre!(
                "You can buy between 1 and {max_quantity} tickets in pool {pool_id}"
            ));
        }
    }
    let outcome = drive(
        orchestrator.buy(&view.pool, view.status, quantity),
        &mut events,
    )
    .await;
    finish_write(session, &ledger, pool_id, outcome).await?;
    Ok(())
}

async fn reveal(session: &Session<'_>, pool_id: PoolId, secret: Option<&str>) -> Result<()> {
    let (ledger, orchestrator, mut events) = session.writer()?;
    if let Some(hex) = secret {
        orchestrator
            .vault()
            .import(pool_id, hex)
            .wrap_err("Failed to import secret")?;
    }
    let view = load_view(&ledger, &session.settings, pool_id).await?;
    require(&view, "reveal")?;
    let outcome = drive(orchestrator.reveal(&view.pool, view.status), &mut events).await;
    finish_write(session, &ledger, pool_id, outcome).await?;
    Ok(())
}

async fn claim(session: &Session<'_>, pool_id: PoolId) -> Result<()> {
    let (ledger, orchestrator, mut events) = session.writer()?;
    let view = load_view(&ledger, &session.settings, pool_id).await?;
    let Action::ClaimAll { tickets } = require(&view, "claim")? else {
        return Err(eyre!("Nothing to claim in pool {pool_id}"));
    };
    let outcome = drive(
        orchestrator.claim_all(&view.pool, view.status, tickets),
        &mut events,
    )
    .await;
    finish_write(session, &ledger, pool_id, outcome).await?;
    Ok(())
}

async fn withdraw(session: &Session<'_>, pool_id: PoolId) -> Result<()> {
    let (ledger, orchestrator, mut events) = session.writer()?;
    let view = load_view(&ledger, &session.settings, pool_id).await?;
    require(&view, "withdraw")?;
    let outcome = drive(
        orchestrator.creator_withdraw(&view.pool, view.status),
        &mut events,
    )
    .await;
    finish_write(session, &ledger, pool_id, outcome).await?;
    Ok(())
}

async fn refund(session: &Session<'_>, pool_id: PoolId) -> Result<()> {
    let (ledger, orchestrator, mut events) = session.writer()?;
    let view = load_view(&ledger, &session.settings, pool_id).await?;
    let Action::RefundTickets { tickets } = require(&view, "refund")? else {
        return Err(eyre!("No tickets to refund in pool {pool_id}"));
    };
    let outcome = drive(
        orchestrator.refund_tickets(&view.pool, view.status, tickets),
        &mut events,
    )
    .await;
    let summary = finish_write(session, &ledger, pool_id, outcome).await?;
    println!(
        "Refunded {} ticket(s) in pool {}",
        summary.refunded.len(),
        summary.pool_id
    );
    Ok(())
}

async fn refund_creator(session: &Session<'_>, pool_id: PoolId) -> Result<()> {
    let (ledger, orchestrator, mut events) = session.writer()?;
    let view = load_view(&ledger, &session.settings, pool_id).await?;
    require(&view, "refund-creator")?;
    let outcome = drive(
        orchestrator.refund_creator(&view.pool, view.status),
        &mut events,
    )
    .await;
    finish_write(session, &ledger, pool_id, outcome).await?;
    Ok(())
}

fn secret(session: &Session<'_>, command: &SecretCommand) -> Result<()> {
    let vault = session.vault()?;
    match command {
        SecretCommand::Show { id } => {
            match vault.retrieve(*id).wrap_err("Failed to read secret")? {
                Some(secret) => println!("{}", secret.to_hex()),
                None => println!("No secret stored for pool {id}"),
            }
        }
        SecretCommand::Import { id, hex } => {
            vault.import(*id, hex).wrap_err("Failed to import secret")?;
            println!("Stored secret for pool {id}");
        }
    }
    Ok(())
}

fn deployment(session: &Session<'_>, command: &DeploymentCommand) -> Result<()> {
    let store = session.deployment_store()?;
    match command {
        DeploymentCommand::Show => match store.load().map_err(|e| eyre!(e))? {
            Some(record) => println!("{}", render::deployment(&record)),
            None => println!(
                "No deployment recorded for {}",
                session.network.deployment_env()
            ),
        },
        DeploymentCommand::Set {
            contract,
            multicall,
            chain_id,
            deployment_block,
        } => {
            let contract = parse_address(contract)?;
            let mut record =
                DeploymentRecord::new(format!("{contract:?}"), session.network.url());
            record.multicall_address = multicall
                .as_deref()
                .map(parse_address)
                .transpose()?
                .map(|address| format!("{address:?}"));
            record.chain_id = Some(chain_id.unwrap_or_else(|| session.network.default_chain_id()));
            record.deployment_block_height = *deployment_block;
            store.save(&record).map_err(|e| eyre!(e))?;
            println!("Saved deployment to {}", store.path().display());
        }
    }
    Ok(())
}
