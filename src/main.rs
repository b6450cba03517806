use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;

use vendbot::channels::console::{parse_console_line, ConsoleGateway, ConsoleInput};
use vendbot::channels::whatsapp::WhatsAppGateway;
use vendbot::channels::Gateway;
use vendbot::config::Config;
use vendbot::flows::catalog::PlanCatalog;
use vendbot::flows::db::{MemorySessionStore, SqliteSessionStore};
use vendbot::flows::dispatch::Dispatcher;
use vendbot::flows::load_catalog;
use vendbot::flows::state::{legal_actions, TRANSITIONS};
use vendbot::flows::types::State;
use vendbot::flows::validate::{check_transition_table, find_reachable_states};
use vendbot::observability::Metrics;
use vendbot::webhook::{self, ServerLimits, WebhookState};

/// Data and airtime vending over WhatsApp.
#[derive(Parser, Debug)]
#[command(name = "vendbot", version, about)]
struct Cli {
    /// Path to config.toml
    #[arg(long, global = true)]
    config: Option<String>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the webhook server
    Serve {
        /// Override gateway.host
        #[arg(long)]
        host: Option<String>,
        /// Override gateway.port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the plan catalog and check the transition table
    Catalog,
    /// Show completed flows from the session database
    History {
        /// Only this phone number
        #[arg(long)]
        phone: Option<String>,
        /// Rows to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Rows to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Chat with the bot in this terminal
    Chat {
        /// Phone number to chat as
        #[arg(long, default_value = "2348000000000")]
        phone: String,
    },
}

fn init_tracing(verbose: u8, configured: &str) {
    let level = match verbose {
        0 => configured.parse().unwrap_or(tracing::Level::INFO),
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

/// Refuse to run with an inconsistent transition table.
fn ensure_table() -> Result<()> {
    if let Err(errors) = check_transition_table(TRANSITIONS) {
        let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::bail!("transition table is invalid:\n  {}", msgs.join("\n  "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_tracing(cli.verbose, &config.log_level);

    match cli.command {
        Commands::Serve { host, port } => serve(config, host, port).await,
        Commands::Catalog => print_catalog(&config),
        Commands::History {
            phone,
            limit,
            offset,
        } => print_history(&config, phone.as_deref(), limit, offset),
        Commands::Chat { phone } => chat(config, &phone).await,
    }
}

async fn serve(config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    ensure_table()?;
    config.check_serve_ready()?;

    let catalog = Arc::new(load_catalog(config.catalog_path()?.as_deref())?);
    let store = Arc::new(SqliteSessionStore::open(&config.db_path()?)?);
    tracing::info!("sessions stored in {}", store.db_path().display());

    let gateway = Arc::new(WhatsAppGateway::new(
        config.whatsapp.api_base.clone(),
        config.whatsapp.phone_number_id.clone(),
        config.whatsapp.access_token.clone(),
    ));
    if !gateway.health_check().await {
        tracing::warn!("WhatsApp API did not answer the startup probe; serving anyway");
    }
    let metrics = Arc::new(Metrics::new()?);
    let dispatcher = Dispatcher::new(catalog, store, gateway, metrics)
        .with_support_text(config.support_text.clone());

    let state = WebhookState::new(Arc::new(dispatcher), &config.whatsapp.verify_token);
    let limits = ServerLimits {
        max_body_bytes: config.gateway.max_body_bytes,
        request_timeout: Duration::from_secs(config.gateway.request_timeout_secs),
    };
    let addr = format!(
        "{}:{}",
        host.unwrap_or(config.gateway.host),
        port.unwrap_or(config.gateway.port)
    );
    webhook::serve(&addr, state, limits).await
}

fn print_catalog(config: &Config) -> Result<()> {
    let catalog = load_catalog(config.catalog_path()?.as_deref())?;
    print_plans(&catalog);

    ensure_table()?;
    let reachable = find_reachable_states(TRANSITIONS, State::Start);
    println!("\nTransition table: {} entries, ok", TRANSITIONS.len());
    for state in State::ALL {
        let actions: Vec<&str> = legal_actions(state).iter().map(|a| a.as_str()).collect();
        let note = if reachable.contains(&state) { "" } else { "  (unreachable from START)" };
        println!("  {:<18} {}{note}", state.as_str(), actions.join(", "));
    }
    Ok(())
}

fn print_plans(catalog: &PlanCatalog) {
    for network in catalog.networks() {
        println!("{}", network.name);
        for plan in &network.plans {
            let validity = plan.validity.as_deref().unwrap_or("-");
            println!(
                "  {:<12} ₦{:<6} {:<24} {validity}",
                plan.id, plan.amount, plan.description
            );
        }
    }
    println!("AIRTIME");
    for plan in catalog.airtime_options() {
        println!("  {:<12} ₦{:<6} {}", plan.id, plan.amount, plan.description);
    }
}

fn print_history(config: &Config, phone: Option<&str>, limit: usize, offset: usize) -> Result<()> {
    let store = SqliteSessionStore::open(&config.db_path()?)?;
    let (rows, total) = store.list_history(limit, offset, phone)?;
    println!(
        "{} sessions in {}, {total} completed flows",
        store.session_count()?,
        store.db_path().display()
    );
    for row in &rows {
        println!(
            "  #{:<5} {} {:<15} {:<8} {:<10} {}",
            row.id,
            row.completed_at,
            row.phone,
            row.flow,
            row.outcome,
            row.detail.as_deref().unwrap_or("-")
        );
    }
    if offset + rows.len() < total {
        println!("  ... {} more (use --offset)", total - offset - rows.len());
    }
    Ok(())
}

async fn chat(config: Config, phone: &str) -> Result<()> {
    ensure_table()?;
    let catalog = Arc::new(load_catalog(config.catalog_path()?.as_deref())?);
    let dispatcher = Dispatcher::new(
        catalog,
        Arc::new(MemorySessionStore::new()),
        Arc::new(ConsoleGateway),
        Arc::new(Metrics::new()?),
    )
    .with_support_text(config.support_text);

    println!("Chatting as {phone}. Type text, /button <id>, /list <id> [title], or /quit.");
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_console_line(&line) {
            ConsoleInput::Quit => break,
            ConsoleInput::Skip(hint) => {
                if let Some(hint) = hint {
                    println!("{hint}");
                }
            }
            ConsoleInput::Message(message) => {
                let session = dispatcher.dispatch(phone, &message).await?;
                tracing::debug!("now in {}", session.state);
            }
        }
    }
    Ok(())
}
