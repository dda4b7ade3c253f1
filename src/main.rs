use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use chrono::Utc;
use clap::Parser;
use libris::ai::LlmClient;
use libris::auth::{Accounts, AuthSettings};
use libris::config::{Cli, Command, Config, default_config_dir, default_config_path};
use libris::db::Database;
use libris::handler::{AppState, router};
use libris::model::Role;
use libris::{seed, unpack_error};
use tokio::{signal, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = Cli::parse();

    // With --config, data (the database file) lives next to the config file.
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("libris.svc starting");

    let cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    let db = Arc::new(Database::new(&cfg, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup database");
        std::process::exit(1);
    }));
    if let Err(e) = db.sync().await {
        tracing::warn!(error = %e, "initial replica sync failed, continuing with local data");
    }
    let auth = Arc::new(AuthSettings::from_config(&cfg.auth));

    match args.command.unwrap_or(Command::Serve) {
        Command::Seed => match seed::run(&db, Utc::now()).await {
            Ok(summary) => println!("Seed completed: created {} books, {} loans", summary.books, summary.loans),
            Err(e) => {
                tracing::error!(error = %unpack_error(&e), "seed failed");
                std::process::exit(1);
            }
        },
        Command::IssueSession { email, name, role } => {
            let role = match role.as_deref().map(str::parse::<Role>) {
                None => None,
                Some(Ok(role)) => Some(role),
                Some(Err(e)) => {
                    eprintln!("{e}; expected MEMBER, LIBRARIAN or ADMIN");
                    std::process::exit(2);
                }
            };
            let accounts = Accounts::new(&db);
            let token = async {
                let user = accounts.upsert_user(&email, name.as_deref(), role).await?;
                accounts.create_session(user.id, &auth, Utc::now()).await
            }
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "failed to issue session");
                std::process::exit(1);
            });
            println!("{token}");
        }
        Command::Serve => serve(&cfg, db, auth).await,
    }
}

async fn serve(cfg: &Config, db: Arc<Database>, auth: Arc<AuthSettings>) {
    let ai = Arc::new(LlmClient::new(&cfg.ai).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup AI client");
        std::process::exit(1);
    }));
    if !ai.is_configured() {
        tracing::info!("no AI api key configured, descriptions use placeholders and suggestions are disabled");
    }

    let address = format!("0.0.0.0:{}", cfg.app.get_port());
    let cancellation_token = CancellationToken::new();
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);

    // Drop expired sessions every 5 minutes
    let purge_db = db.clone();
    let purge_token = cancellation_token.clone();
    let purge_done = shutdown_complete_tx.clone();
    tokio::spawn(async move {
        let _done = purge_done;
        let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match Accounts::new(&purge_db).purge_expired_sessions(Utc::now()).await {
                        Ok(0) => {}
                        Ok(purged) => tracing::info!(purged, "purged expired sessions"),
                        Err(e) => tracing::warn!(error = %e, "failed to purge expired sessions"),
                    }
                }
                _ = purge_token.cancelled() => {
                    tracing::info!("session purge task shutting down");
                    break;
                }
            }
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    let app = router(AppState { db, ai, auth })
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    tracing::info!("libris.svc running on {}", &address);
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "server exited with an error");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
            cancellation_token.cancel();
        }
    }

    drop(shutdown_complete_tx);
    shutdown_complete_rx.recv().await;
    tracing::info!("libris.svc going off, graceful shutdown complete");
}
