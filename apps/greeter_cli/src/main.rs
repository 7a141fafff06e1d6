mod config;
mod render;

use std::{process::ExitCode, sync::Arc};

use anyhow::Result;
use chain_integration::{
    DevChain, DevWallet, JsonRpcClient, JsonRpcWallet, WalletConnector, WalletNotification,
};
use clap::{Parser, Subcommand};
use shared::{domain::Address, protocol::EngineEvent};
use storage::{KeyValueStore, SqliteKvStore};
use sync_core::{ContractSyncEngine, SubmitRequest};
use tokio::sync::{broadcast, broadcast::error::TryRecvError};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    config::Settings,
    render::{render_addresses, render_notice, render_status, StatusView},
};

#[derive(Parser, Debug)]
#[command(name = "greeter", about = "Drive a Greeter contract from the terminal")]
struct Args {
    /// Use an in-process development chain instead of `rpc_url`.
    #[arg(long)]
    dev: bool,
    /// Account to connect with; defaults to the wallet's first account.
    #[arg(long)]
    account: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show session, selected contract, mirrored state and the owner panel.
    Status,
    /// List known contract addresses; `*` marks the selection.
    List,
    /// Remember an address without selecting it.
    Add { address: String },
    /// Select an address and rebind to it.
    Select { address: String },
    Deploy {
        #[arg(long)]
        greeting: Option<String>,
    },
    SetGreeting { text: String },
    Withdraw {
        #[arg(allow_hyphen_values = true)]
        amount_wei: i128,
    },
    Sign {
        #[arg(default_value = "👋")]
        message: String,
    },
    /// Walk through deploy, greet, withdraw and an account switch on a
    /// development chain.
    Demo,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings();
    if let Some(account) = args.account.clone() {
        settings.account = Some(account);
    }
    let database_url = config::prepare_database_url(&settings.database_url)?;
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteKvStore::new(&database_url).await?);
    info!("greeter: store={database_url}");

    let engine = ContractSyncEngine::open(store, settings.engine_options()).await;
    let mut events = engine.subscribe_events();

    let ok = match args.command {
        Command::List => {
            println!("{}", render_addresses(&engine.address_record()));
            true
        }
        Command::Add { address } => engine.add_address(Address::new(address)).await.is_ok(),
        Command::Select { address } => engine
            .select_address(Address::new(address))
            .await
            .is_ok(),
        Command::Demo => run_demo(&engine, &mut events).await?,
        command => {
            let wallet = build_wallet(&settings, args.dev)?;
            let connected = engine.connect_wallet(wallet).await.is_ok();
            let ok = match command {
                Command::Status => true,
                Command::Deploy { greeting } => {
                    let request = match greeting {
                        Some(initial_greeting) => SubmitRequest::Deploy { initial_greeting },
                        None => engine.deploy_request(),
                    };
                    engine.submit(request).await.is_ok()
                }
                Command::SetGreeting { text } => engine
                    .submit(SubmitRequest::SetGreeting { text })
                    .await
                    .is_ok(),
                Command::Withdraw { amount_wei } => engine
                    .submit(SubmitRequest::Withdraw { amount_wei })
                    .await
                    .is_ok(),
                Command::Sign { message } => match engine.sign_message(&message).await {
                    Ok(signature) => {
                        println!("{signature}");
                        true
                    }
                    Err(_) => false,
                },
                Command::List | Command::Add { .. } | Command::Select { .. } | Command::Demo => {
                    true
                }
            };
            print_status(&engine);
            connected && ok
        }
    };

    print_notices(&mut events);
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn build_wallet(settings: &Settings, dev: bool) -> Result<Arc<dyn WalletConnector>> {
    if dev {
        let account = settings
            .account
            .clone()
            .map(Address::new)
            .unwrap_or_else(|| DevChain::account(0));
        return Ok(Arc::new(DevWallet::new(DevChain::new(), account)));
    }

    let wallet = JsonRpcWallet::new(JsonRpcClient::new(settings.rpc_url()?))
        .with_account(settings.account.clone().map(Address::new))
        .with_bytecode(settings.load_bytecode()?)
        .with_poll_interval(settings.confirmation_poll());
    Ok(Arc::new(wallet))
}

async fn run_demo(
    engine: &Arc<ContractSyncEngine>,
    events: &mut broadcast::Receiver<EngineEvent>,
) -> Result<bool> {
    let wallet = Arc::new(DevWallet::new(DevChain::new(), DevChain::account(0)));
    engine.connect_wallet(wallet.clone()).await?;

    engine.submit(engine.deploy_request()).await?;
    print_status(engine);
    engine
        .submit(SubmitRequest::SetGreeting {
            text: "Hola, mundo!".into(),
        })
        .await?;
    engine
        .submit(SubmitRequest::Withdraw {
            amount_wei: i128::try_from(engine.options().greeting_fee_wei)?,
        })
        .await?;
    print_status(engine);
    print_notices(events);

    let viewer = wallet.switch_account(DevChain::account(1)).await;
    engine
        .apply_wallet_notification(WalletNotification::AccountChanged(viewer))
        .await;
    print_status(engine);

    // Not the owner: expected to revert on chain.
    let refused = engine
        .submit(SubmitRequest::Withdraw { amount_wei: 1 })
        .await
        .is_err();
    Ok(refused)
}

fn print_status(engine: &ContractSyncEngine) {
    let session = engine.session();
    let record = engine.address_record();
    let mirror = engine.mirror();
    let binding = engine.current_binding();
    let text = render_status(&StatusView {
        session: &session,
        record: &record,
        bound: binding
            .as_deref()
            .map(|binding| (binding.generation().0, binding.address())),
        mirror: &mirror,
        view: engine.view(),
    });
    println!("{text}\n");
}

fn print_notices(events: &mut broadcast::Receiver<EngineEvent>) {
    loop {
        match events.try_recv() {
            Ok(EngineEvent::Notice(notice)) => println!("{}", render_notice(&notice)),
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
}
