use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use unichat::chat::{ChatDriver, TokenSink, TurnOutcome};
use unichat::config::Config;
use unichat::discovery::{Discovery, NO_MODELS_MESSAGE};
use unichat::llm::ProviderRegistry;
use unichat::server::{AppState, build_app};
use unichat::session::{Session, spawn_eviction_task};

const DEFAULT_LOG_FILTER: &str = "unichat=info,tower_http=info";
const EVICTION_PERIOD: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "unichat", version, about = "Chat with models served by local providers")]
struct Cli {
    /// Path to the YAML config file. A missing file means defaults.
    #[arg(long, global = true, default_value = "unichat.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the chat page and API (default).
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// List the models every provider offers.
    Models,
    /// Send one message and stream the reply to stdout.
    Chat {
        #[arg(long, short)]
        model: String,
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr so `chat` and `models` output stays clean on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let providers = ProviderRegistry::from_configs(&config.providers);

    match cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
    }) {
        Command::Serve { host, port } => serve(config, providers, host, port).await,
        Command::Models => list_models(providers).await,
        Command::Chat { model, message } => chat_once(config, providers, &model, &message).await,
    }
}

async fn serve(
    mut config: Config,
    providers: ProviderRegistry,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<ExitCode> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let state = AppState::new(providers, &config.server);
    let eviction = spawn_eviction_task(
        state.sessions.clone(),
        config.server.session_idle_timeout(),
        EVICTION_PERIOD,
    );
    let app = build_app(state, config.server.request_timeout_seconds);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    eviction.abort();

    Ok(ExitCode::SUCCESS)
}

async fn list_models(providers: ProviderRegistry) -> anyhow::Result<ExitCode> {
    let discovery = Discovery::new(providers).get_or_discover().await;

    for error in discovery.errors() {
        eprintln!("warning: {error}");
    }
    if discovery.is_empty() {
        eprintln!("error: {NO_MODELS_MESSAGE}");
        return Ok(ExitCode::FAILURE);
    }
    for model in discovery.models() {
        println!("{}\t{}", model.id, model.display_name);
    }

    Ok(ExitCode::SUCCESS)
}

async fn chat_once(
    config: Config,
    providers: ProviderRegistry,
    model: &str,
    message: &str,
) -> anyhow::Result<ExitCode> {
    let discovery = Discovery::new(providers.clone()).get_or_discover().await;
    for error in discovery.errors() {
        eprintln!("warning: {error}");
    }
    if discovery.is_empty() {
        eprintln!("error: {NO_MODELS_MESSAGE}");
        return Ok(ExitCode::FAILURE);
    }

    let driver = ChatDriver::new(providers).with_idle_timeout(config.server.idle_timeout());
    let session = Mutex::new(Session::new(discovery));
    let mut sink = StdoutSink;

    let outcome = driver.send(&session, model, message, &mut sink).await?;
    println!();

    Ok(match outcome {
        TurnOutcome::Completed(_) => ExitCode::SUCCESS,
        TurnOutcome::Failed(_) => ExitCode::FAILURE,
    })
}

/// Prints fragments as they arrive.
struct StdoutSink;

impl TokenSink for StdoutSink {
    fn token(&mut self, fragment: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(fragment.as_bytes());
        let _ = stdout.flush();
    }

    fn error(&mut self, message: &str) {
        eprintln!("{message}");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
