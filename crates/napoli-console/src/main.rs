mod config;
mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{load_config, ConsoleConfig, Overrides};
use napoli_core::push::PushEvent;
use napoli_core::DEFAULT_SESSION_NAME;
use napoli_sync::panels::{
    CatalogPanel, ConversationsPanel, InsightsPanel, LeadsPanel, McpPanel, StatsPanel,
    WhatsAppPanel,
};
use napoli_sync::{ConnectionState, OpState, PanelError, SyncService};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const EXPIRE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "napoli-console", about = "Operator console for the Napoli pizzeria backend")]
struct Args {
    #[arg(long, default_value = "", global = true)]
    backend: String,
    #[arg(long, default_value = "", global = true)]
    client_id: String,
    #[arg(long, default_value = "", global = true)]
    reconnect_secs: String,
    #[arg(long, default_value_t = false, global = true)]
    backoff: bool,
    #[arg(long, default_value = "", global = true)]
    op_timeout_secs: String,
    #[arg(long, default_value = "", global = true)]
    log_dir: String,
    #[arg(long, default_value_t = false, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mount every panel and print push events as they arrive.
    Watch {
        /// Stop after this many seconds; 0 runs until ctrl-c.
        #[arg(long, default_value_t = 0)]
        seconds: u64,
    },
    /// WhatsApp gateway sessions.
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// MCP servers.
    Mcp {
        #[command(subcommand)]
        command: McpCommand,
    },
    /// Walk the analytics drill-down, one row index per level.
    Insights { path: Vec<usize> },
}

#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// Start the gateway and wait for the pairing QR code or a connection.
    Connect {
        #[arg(default_value = DEFAULT_SESSION_NAME)]
        name: String,
    },
    Logout {
        #[arg(default_value = DEFAULT_SESSION_NAME)]
        name: String,
    },
    RegenerateToken {
        #[arg(default_value = DEFAULT_SESSION_NAME)]
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum McpCommand {
    List,
    Add { name: String, url: String },
    Test { id: String },
    Sync { id: String },
    Remove { id: String },
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            backend: self.backend.clone(),
            client_id: self.client_id.clone(),
            reconnect_secs: self.reconnect_secs.clone(),
            backoff: self.backoff,
            op_timeout_secs: self.op_timeout_secs.clone(),
            log_dir: self.log_dir.clone(),
            debug: self.debug,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.overrides())?;
    let log_file = logging::init_logging(&config);
    info!(
        event = "console_start",
        backend = %config.sync.backend_url,
        client_id = %config.sync.client_id,
        log_file = ?log_file,
    );

    let service = SyncService::new(config.sync.clone()).context("failed to build sync service")?;
    let result = match args.command {
        Command::Watch { seconds } => watch(&service, seconds).await,
        Command::Session { command } => session(&service, &config, command).await,
        Command::Mcp { command } => mcp(&service, &config, command).await,
        Command::Insights { path } => insights(&service, &path).await,
    };
    service.shutdown();
    if let Err(err) = &result {
        warn!(event = "console_command_failed", error = %err);
    }
    result
}

async fn watch(service: &SyncService, seconds: u64) -> Result<()> {
    let stats = StatsPanel::mount(service);
    let leads = LeadsPanel::mount(service);
    let mcp = McpPanel::mount(service);
    let whatsapp = WhatsAppPanel::mount(service);
    let conversations = ConversationsPanel::mount(service);
    let catalog = CatalogPanel::mount(service);
    let _printer = service.bus().subscribe(print_event);

    report("stats", stats.refresh().await.map(|s| format!("{} active, {} leads", s.active_users, s.leads)));
    report("leads", leads.refresh().await.map(|n| format!("{n} recent")));
    report("mcp", mcp.refresh().await.map(|n| format!("{n} servers")));
    report("catalog", catalog.refresh().await.map(|_| {
        format!("{} menu items, {} documents", catalog.menu().len(), catalog.documents().len())
    }));

    service.connect();
    let mut state = service.connection_state();
    let deadline = (seconds > 0).then(|| Instant::now() + Duration::from_secs(seconds));
    let mut expire_tick = tokio::time::interval(EXPIRE_INTERVAL);
    loop {
        let until_deadline = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = until_deadline => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                println!("push channel: {}", current.as_str());
            }
            _ = expire_tick.tick() => {
                for name in whatsapp.expire_operations() {
                    println!("session {name}: no response from the gateway");
                }
                for key in mcp.expire_operations() {
                    println!("mcp {key}: no response");
                }
            }
        }
    }

    let snapshot = stats.snapshot();
    println!(
        "final: {} active users, {} leads, response time {}, {} conversations",
        snapshot.stats.active_users,
        snapshot.stats.leads,
        snapshot.stats.response_time,
        conversations.conversations().len(),
    );
    Ok(())
}

fn print_event(event: &PushEvent) {
    match &event.entity_id {
        Some(id) => println!("<- {} [{id}]", event.kind),
        None => println!("<- {}", event.kind),
    }
}

fn report(label: &str, result: Result<String, PanelError>) {
    match result {
        Ok(summary) => println!("{label}: {summary}"),
        Err(err) => println!("{label}: unavailable ({err})"),
    }
}

async fn session(service: &SyncService, config: &ConsoleConfig, command: SessionCommand) -> Result<()> {
    let panel = WhatsAppPanel::mount(service);
    match command {
        SessionCommand::Connect { name } => {
            if name != DEFAULT_SESSION_NAME {
                panel.add_session(&name)?;
            }
            service.connect();
            wait_open(service).await;
            let started = panel.start_gateway(&name).await?;
            println!("session {name}: {started}");
            let outcome = wait_terminal(config, || {
                panel.expire_operations();
                panel.connect_state(&name)
            })
            .await;
            if let Some(record) = panel.session(&name) {
                for line in record.logs.iter() {
                    println!("  {line}");
                }
                if let Some(qr) = &record.value.qr_code {
                    println!("pairing qr: {qr}");
                }
                println!("session {name}: {} ({outcome})", record.value.status);
            }
        }
        SessionCommand::Logout { name } => {
            panel.logout(&name).await?;
            println!("session {name}: logged out");
        }
        SessionCommand::RegenerateToken { name } => {
            service.connect();
            panel.regenerate_token(&name).await?;
            println!("session {name}: token regeneration requested");
        }
    }
    Ok(())
}

async fn mcp(service: &SyncService, config: &ConsoleConfig, command: McpCommand) -> Result<()> {
    let panel = McpPanel::mount(service);
    match command {
        McpCommand::List => {
            panel.refresh().await?;
            for server in panel.servers() {
                println!(
                    "{:>4}  {:<20} {:<8} {:>5}ms  {}",
                    server.id,
                    server.name,
                    server.status.as_str(),
                    server.latency_ms,
                    server.url
                );
            }
        }
        McpCommand::Add { name, url } => {
            service.connect();
            wait_open(service).await;
            let queued = panel.register(&name, &url).await?;
            println!("mcp {name}: {queued}");
            let outcome = wait_terminal(config, || {
                panel.expire_operations();
                panel.registration_state(&name)
            })
            .await;
            println!("mcp {name}: {outcome}");
        }
        McpCommand::Test { id } => {
            panel.refresh().await?;
            service.connect();
            wait_open(service).await;
            panel.test_connection(&id).await?;
            let outcome = wait_terminal(config, || {
                panel.expire_operations();
                panel.probe_state(&id)
            })
            .await;
            println!("mcp {id}: {outcome}");
        }
        McpCommand::Sync { id } => {
            panel.refresh().await?;
            panel.sync_connector(&id).await?;
            println!("mcp {id}: synced");
        }
        McpCommand::Remove { id } => {
            panel.refresh().await?;
            panel.remove_server(&id).await?;
            println!("mcp {id}: removed");
        }
    }
    for line in panel.snapshot().activity.iter() {
        println!("  {line}");
    }
    Ok(())
}

async fn insights(service: &SyncService, path: &[usize]) -> Result<()> {
    let panel = InsightsPanel::mount(service);
    panel.load().await?;
    for &index in path {
        if !panel.drill_into(index).await? {
            println!("row {index} is not drillable");
            break;
        }
    }
    println!("{}", panel.trail());
    for item in panel.snapshot().items {
        let label = item.label.as_deref().unwrap_or(&item.name);
        let value = item.value.map(|v| v.to_string()).unwrap_or_default();
        let marker = if item.drillable { ">" } else { " " };
        println!("{marker} {label:<24} {value}");
    }
    Ok(())
}

/// Gives the push channel a moment to open so completion events are not missed.
async fn wait_open(service: &SyncService) {
    let mut state = service.connection_state();
    let opened = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *state.borrow_and_update() == ConnectionState::Open {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    })
    .await;
    if opened.is_err() {
        warn!(event = "push_not_open", state = service.connection().state().as_str());
    }
}

async fn wait_terminal<F>(config: &ConsoleConfig, mut poll: F) -> OpState
where
    F: FnMut() -> OpState,
{
    let limit = config
        .sync
        .operation_timeout
        .map(|timeout| timeout + Duration::from_secs(1));
    let started = Instant::now();
    loop {
        let state = poll();
        if state.is_terminal() {
            return state;
        }
        if limit.is_some_and(|limit| started.elapsed() > limit) {
            return state;
        }
        if interrupted(sleep(POLL_INTERVAL)).await {
            return state;
        }
    }
}

// True when ctrl-c arrived before `wait` finished.
async fn interrupted(wait: impl Future<Output = ()>) -> bool {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        _ = wait => false,
    }
}
