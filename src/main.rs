// src/main.rs
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use polls::clock::SystemClock;
use polls::config::Config;
use polls::db::PgStore;
use polls::models::NewQuestion;
use polls::services;
use polls::store::{MemoryStore, PollStore};
use polls::{create_routes, AppError, AppState};

#[derive(Parser)]
#[command(name = "polls", about = "Poll questions with time-boxed voting")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    #[command(flatten)]
    Admin(AdminCommand),
}

#[derive(Subcommand)]
enum AdminCommand {
    /// Create a user who can log in and vote
    CreateUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Create a question, optionally with choices
    CreateQuestion {
        #[arg(long)]
        text: String,
        /// RFC 3339 instant; defaults to now
        #[arg(long)]
        publish_time: Option<DateTime<Utc>>,
        /// RFC 3339 instant; voting stays open forever when omitted
        #[arg(long)]
        end_time: Option<DateTime<Utc>>,
        #[arg(long = "choice")]
        choices: Vec<String>,
    },
    /// Add a choice to an existing question
    AddChoice {
        #[arg(long)]
        question: i32,
        #[arg(long)]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("polls=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load();

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Admin(command) => admin(command, &config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn PollStore>, AppError> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(PgStore::connect(url, config.max_connections).await?)),
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

async fn serve(config: Config) -> Result<(), AppError> {
    let store = open_store(&config).await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = create_routes(AppState::new(store, Arc::new(SystemClock), config));

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    info!("Server running on {addr}");
    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn admin(command: AdminCommand, config: &Config) -> Result<(), AppError> {
    if config.database_url.is_none() {
        return Err(AppError::Invalid("admin commands need DATABASE_URL".into()));
    }
    let store = open_store(config).await?;

    match command {
        AdminCommand::CreateUser { username, password } => {
            let user = services::create_user(store.as_ref(), &username, &password).await?;
            info!(user_id = user.id, "created user {}", user.username);
        }
        AdminCommand::CreateQuestion {
            text,
            publish_time,
            end_time,
            choices,
        } => {
            let new = NewQuestion {
                text,
                publish_time: publish_time.unwrap_or_else(Utc::now),
                end_time,
            };
            let (question, choices) = services::create_poll(store.as_ref(), new, &choices).await?;
            info!(question_id = question.id, choices = choices.len(), "created question");
        }
        AdminCommand::AddChoice { question, text } => {
            let choice = services::add_choice(store.as_ref(), question, text).await?;
            info!(choice_id = choice.id, question_id = question, "added choice");
        }
    }
    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
