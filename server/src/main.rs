mod auth;
mod db_core;
mod embed;
mod error;
mod model;
mod prompt;
mod rate_limiters;
mod request_tracing;
mod routes;
mod search;
mod server_config;
mod state;
#[cfg(all(test, feature = "integration"))]
mod testing;
mod threads;
mod util;
mod workflow;

use std::{env, net::SocketAddr, time::Duration};

use anyhow::Context;
use axum::{extract::FromRef, routing::get, Router};
use embed::{service::EmailEmbeddingService, EmbeddingClient};
use mimalloc::MiMalloc;
use prompt::ollama::OllamaChat;
use rate_limiters::RateLimiters;
use routes::AppRouter;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use search::service::SearchService;
use server_config::cfg;
use tokio::{signal, task::JoinHandle};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workflow::service::WorkflowService;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

#[derive(Clone, FromRef)]
struct ServerState {
    http_client: HttpClient,
    conn: DatabaseConnection,
    rate_limiters: RateLimiters,
    embedding_service: EmailEmbeddingService,
    search_service: SearchService,
    workflow_service: WorkflowService,
}

impl ServerState {
    fn build(conn: DatabaseConnection) -> anyhow::Result<Self> {
        let http_client = reqwest::ClientBuilder::new()
            .use_rustls_tls()
            .timeout(Duration::from_secs(cfg.ollama.request_timeout_secs))
            .build()?;
        let rate_limiters = RateLimiters::from_config();

        let embedding_client = EmbeddingClient::new(http_client.clone(), rate_limiters.clone())?;
        let chat = OllamaChat::new(http_client.clone(), rate_limiters.clone())?;

        Ok(Self {
            embedding_service: EmailEmbeddingService::new(conn.clone(), embedding_client.clone()),
            search_service: SearchService::new(conn.clone(), embedding_client),
            workflow_service: WorkflowService::new(conn.clone(), chat),
            http_client,
            conn,
            rate_limiters,
        })
    }
}

async fn connect() -> anyhow::Result<DatabaseConnection> {
    let db_url = env::var("DATABASE_URL").context("DATABASE_URL is not set in .env file")?;
    let mut db_options = ConnectOptions::new(db_url);
    db_options.sqlx_logging(false);

    let conn = Database::connect(db_options)
        .await
        .context("Database connection failed")?;
    Ok(conn)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    let conn = connect().await?;
    let state = ServerState::build(conn)?;
    let router = AppRouter::create(state.clone());
    let cancel = CancellationToken::new();

    let mut scheduler = JobScheduler::new()
        .await
        .context("Failed to create scheduler")?;

    {
        let service = state.embedding_service.clone();
        let token = cancel.clone();
        scheduler
            .add(Job::new_one_shot(
                Duration::from_secs(5),
                move |_uuid, _l| {
                    state::tasks::run_embedding_loop(service.clone(), token.clone());
                },
            )?)
            .await?;

        // Pick up emails that were stored without a queue entry
        let service = state.embedding_service.clone();
        scheduler
            .add(Job::new_repeated_async(
                Duration::from_secs(cfg.embedding.enqueue_interval_secs.max(1)),
                move |uuid, mut l| {
                    let service = service.clone();
                    Box::pin(async move {
                        if let Err(e) = state::tasks::enqueue_missing_embeddings(&service).await {
                            tracing::error!("Enqueue job {} failed: {:?}", uuid, e);
                        }

                        let next_tick = l.next_tick_for_job(uuid).await;
                        if let Ok(Some(ts)) = next_tick {
                            tracing::debug!("Next time for enqueue job is {:?}", ts)
                        }
                    })
                },
            )?)
            .await?;
    }

    let token = cancel.clone();
    scheduler.set_shutdown_handler(Box::new(move || {
        let token = token.clone();
        Box::pin(async move {
            tracing::info!("Shutting down scheduler");
            token.cancel();
        })
    }));

    let embedder_only = env::var("EMBEDDER_ONLY").is_ok_and(|v| v == "true");
    let server_only = env::var("SERVER_ONLY").is_ok_and(|v| v == "true");

    tracing::info!(
        "EMBEDDER_ONLY={}, SERVER_ONLY={}",
        embedder_only,
        server_only
    );

    if server_only {
        tracing::info!("-------- RUNNING SERVER ONLY --------");
        run_server(router, scheduler).await??;
        return Ok(());
    }

    match scheduler.start().await {
        Ok(_) => tracing::info!("-------- SCHEDULER STARTED --------"),
        Err(e) => tracing::error!("Failed to start scheduler: {:?}", e),
    }

    let watch_handle =
        state::tasks::watch(state.embedding_service.clone(), state.rate_limiters.clone());

    let router = if embedder_only {
        tracing::info!("-------- RUNNING EMBEDDER ONLY --------");
        Router::new().route("/", get(|| async { "OK" }))
    } else {
        router
    };

    let server_handle = run_server(router, scheduler);
    tokio::select! {
        result = server_handle => {
            if let Ok(Err(e)) = result {
                tracing::error!("Server failed: {:?}", e);
            }
            tracing::info!("Server shut down, exiting");
        }
        _ = watch_handle => {
            tracing::info!("Status watch ended");
        }
    }

    cancel.cancel();
    Ok(())
}

async fn shutdown_signal(mut scheduler: JobScheduler) {
    if env::var("NO_SHUTDOWN").unwrap_or("false".to_string()) == "true" {
        return std::future::pending::<()>().await;
    }

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {:?}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {:?}", e);
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

    if let Err(e) = scheduler.shutdown().await {
        tracing::error!("Scheduler shutdown failed: {:?}", e);
    }
    tracing::info!("Cleanups done, shutting down");
}

fn run_server(router: Router, scheduler: JobScheduler) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        let port = env::var("PORT").unwrap_or("5006".to_string());
        tracing::info!("Mailmind server running on http://0.0.0.0:{}", port);
        tracing::info!("{}", *cfg);

        let port = port.parse::<u16>().context("PORT must be a port number")?;
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;
        Ok(())
    })
}
