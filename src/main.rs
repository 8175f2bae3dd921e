//! Sandbox gateway CLI: runs the control-plane API and adaptation server,
//! or inspects the gateway's on-disk configuration and credential state.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sandbox_gateway::adaptation::{self, AdaptationState};
use sandbox_gateway::api;
use sandbox_gateway::audit::AuditLogger;
use sandbox_gateway::config::{GatewayConfig, LogFormat};
use sandbox_gateway::credentials::CredentialStore;
use sandbox_gateway::logs::{LogIndex, LogReader};
use sandbox_gateway::policy::{GhCliClient, PolicyEngine};
use sandbox_gateway::rate_limiter::RateLimiter;
use sandbox_gateway::session::SessionManager;
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Outbound-traffic mediation gateway for sandboxed agent containers.
///
/// Mediates everything a sandboxed coding-agent container is allowed to do
/// against the outside world: git pushes, GitHub PR mutations, credential
/// injection toward a single upstream host, and read access to its own
/// task logs. A launcher process registers one session per container via
/// `/session/register`; the container then authenticates every request
/// with the bearer token it was handed back.
///
/// CONFIGURATION:
///     Looked up at `--config` (default `/etc/sandbox-gateway/gateway.toml`),
///     falling back to built-in defaults if the file does not exist.
///     `GATEWAY_LAUNCHER_SECRET`, `GATEWAY_LOG_LEVEL`, and `GATEWAY_UPSTREAM_HOST`
///     override the corresponding file values.
#[derive(Parser)]
#[command(name = "sandbox-gateway", version, about, long_about = None)]
struct Cli {
    /// Path to the gateway's TOML configuration file.
    #[arg(long, global = true, default_value = "/etc/sandbox-gateway/gateway.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control-plane API and adaptation server.
    ///
    /// Both listeners and the periodic session-pruner run as concurrent
    /// tasks until the process receives a shutdown signal.
    #[command(after_help = "\
EXAMPLES:
    sandbox-gateway run
    sandbox-gateway --config /opt/gateway.toml run")]
    Run {
        /// Override the control-plane bind address from configuration.
        #[arg(long)]
        control_plane_addr: Option<SocketAddr>,

        /// Override the adaptation server bind address from configuration.
        #[arg(long)]
        adaptation_addr: Option<SocketAddr>,
    },

    /// Inspect configuration, credential, and session state.
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Inspect or prune the session table from the operator side.
    #[command(subcommand)]
    Session(SessionCommands),
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List every session currently on disk, expired or not.
    #[command(after_help = "\
EXAMPLES:
    sandbox-gateway session list")]
    List,

    /// Remove every expired session from the persistence file.
    #[command(after_help = "\
EXAMPLES:
    sandbox-gateway session prune")]
    Prune,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration with secrets redacted.
    #[command(after_help = "\
EXAMPLES:
    sandbox-gateway config show")]
    Show,

    /// Report whether a credential is currently loaded, without its value.
    #[command(after_help = "\
EXAMPLES:
    sandbox-gateway config credential")]
    Credential,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = GatewayConfig::load(&cli.config)?;

    init_logging(&config)?;

    match cli.command {
        Commands::Run { control_plane_addr, adaptation_addr } => {
            run(config, control_plane_addr, adaptation_addr).await
        }
        Commands::Config(cmd) => {
            handle_config_command(&config, &cmd);
            Ok(())
        }
        Commands::Session(cmd) => handle_session_command(&config, &cmd),
    }
}

/// Wire up every component and run the control-plane API, the adaptation
/// server, and the periodic session-pruner as concurrent tasks.
async fn run(
    config: GatewayConfig,
    control_plane_addr: Option<SocketAddr>,
    adaptation_addr: Option<SocketAddr>,
) -> anyhow::Result<()> {
    let control_plane_addr = control_plane_addr.unwrap_or(config.control_plane_addr);
    let adaptation_addr = adaptation_addr.unwrap_or(config.adaptation_addr);

    std::fs::create_dir_all(&config.state_dir)?;
    if let Some(parent) = config.audit_log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let sessions = Arc::new(SessionManager::new(
        config.state_dir.join("sessions.json"),
        config.session_ttl_secs,
    ));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let policy = Arc::new(PolicyEngine::new(
        Arc::new(GhCliClient),
        config.identity.clone(),
        config.pr_cache_ttl_secs,
    ));
    let audit = Arc::new(AuditLogger::new(config.audit_log_path.clone())?);
    let log_index = Arc::new(LogIndex::new(config.state_dir.join("log-index.json")));
    let log_reader = Arc::new(LogReader::new(config.log_max_lines));
    let credential_store = Arc::new(CredentialStore::new(&config.credential));
    let config = Arc::new(config);

    let app_state = api::AppState {
        config: Arc::clone(&config),
        sessions: Arc::clone(&sessions),
        rate_limiter,
        policy,
        audit,
        log_index,
        log_reader,
        credential_store: Arc::clone(&credential_store),
    };

    let control_plane_listener = TcpListener::bind(control_plane_addr).await?;
    tracing::info!(addr = %control_plane_addr, "control-plane API listening");
    let control_plane = tokio::spawn(async move {
        let router = api::create_router(app_state);
        axum::serve(
            control_plane_listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    });

    let adaptation_listener = TcpListener::bind(adaptation_addr).await?;
    tracing::info!(addr = %adaptation_addr, "adaptation server listening");
    let adaptation_state = Arc::new(AdaptationState {
        credential_store,
        upstream_host: config.upstream_host.clone(),
    });
    let adaptation_task = tokio::spawn(adaptation::run(adaptation_listener, adaptation_state));

    let pruner_sessions = Arc::clone(&sessions);
    let prune_interval = std::time::Duration::from_secs(config.prune_interval_secs);
    let pruner = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(prune_interval);
        loop {
            ticker.tick().await;
            match pruner_sessions.prune_expired() {
                Ok(pruned) if pruned > 0 => {
                    tracing::info!(pruned, "pruned expired sessions");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "session prune sweep failed"),
            }
        }
    });

    tokio::select! {
        result = control_plane => {
            result??;
        }
        result = adaptation_task => {
            result?;
        }
        result = pruner => {
            result?;
        }
        () = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn handle_config_command(config: &GatewayConfig, cmd: &ConfigCommands) {
    match cmd {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&config.redacted()).expect("config serializes"));
        }
        ConfigCommands::Credential => {
            let store = CredentialStore::new(&config.credential);
            match store.current() {
                Some(credential) => println!(
                    "credential loaded: header={} kind={:?}",
                    credential.header_name, credential.kind
                ),
                None => println!("no credential currently loaded from {}", config.credential.source_path.display()),
            }
        }
    }
}

/// Inspect or prune the session table directly, without a running gateway
/// process. Opens the same persistence file the `run` subcommand would.
fn handle_session_command(config: &GatewayConfig, cmd: &SessionCommands) -> anyhow::Result<()> {
    let sessions = SessionManager::new(config.state_dir.join("sessions.json"), config.session_ttl_secs);

    match cmd {
        SessionCommands::List => {
            for session in sessions.list() {
                println!(
                    "{}  container={}  ip={}  expires_at={}",
                    &session.token_hash[..16],
                    session.container_id,
                    session.container_ip,
                    session.expires_at
                );
            }
        }
        SessionCommands::Prune => {
            let pruned = sessions.prune_expired()?;
            println!("pruned {pruned} expired session(s)");
        }
    }
    Ok(())
}

/// Initialize `tracing` with the configured format and level. There is no
/// separate "CLI-only" logging mode: every subcommand shares this setup.
fn init_logging(config: &GatewayConfig) -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
    );

    match config.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .with(env_filter)
                .try_init()?;
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .with(env_filter)
                .try_init()?;
        }
    }

    Ok(())
}
