//! Kiln API Server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kiln_api::services::github::{DEFAULT_API_URL, GitHubContent};
use kiln_api::{AppState, routes};
use kiln_config::ConfigRules;
use kiln_core::events::ErrorSink;
use kiln_core::store::{JobStore, LogStore};
use kiln_executor::KubernetesExecutor;
use kiln_pipeline::{Compiler, Dispatcher, Pipeline, StatusBroker, StatusRecorder, TracingSink};
use kiln_store::{FsLogStore, MemoryJobStore, PgJobStore, create_pool, run_migrations};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kiln-server")]
#[command(about = "Kiln build trigger service", long_about = None)]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "KILN_LISTEN", default_value = "0.0.0.0:3000")]
    listen: SocketAddr,

    /// Namespace job pods are created in
    #[arg(long, env = "KILN_NAMESPACE", default_value = "default")]
    namespace: String,

    /// PostgreSQL URL for the job store; jobs are kept in memory without it
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Directory job logs are stored in
    #[arg(long, env = "KILN_LOG_DIR", default_value = "/var/lib/kiln/logs")]
    log_dir: PathBuf,

    /// Token for the GitHub contents API
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// GitHub API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    github_api_url: String,

    /// Secret for verifying webhook signatures
    #[arg(long, env = "KILN_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,

    /// Fail template compilation after this many seconds
    #[arg(long, env = "KILN_RENDER_TIMEOUT_SECS")]
    render_timeout_secs: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let errors: Arc<dyn ErrorSink> = Arc::new(TracingSink);

    let jobs: Arc<dyn JobStore> = match &args.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let pool = create_pool(url).await?;
            run_migrations(&pool).await?;
            info!("Database connected");
            Arc::new(PgJobStore::new(pool))
        }
        None => {
            info!("No DATABASE_URL set, keeping jobs in memory");
            Arc::new(MemoryJobStore::new())
        }
    };
    let logs: Arc<dyn LogStore> = Arc::new(FsLogStore::open(&args.log_dir).await?);

    let broker = Arc::new(StatusBroker::new());
    StatusRecorder::new(jobs.clone(), errors.clone()).spawn(&broker);

    let executor = Arc::new(
        KubernetesExecutor::try_default(
            args.namespace.clone(),
            broker.clone(),
            logs.clone(),
            errors.clone(),
        )
        .await?,
    );
    executor.spawn_watch();

    let mut compiler = Compiler::new();
    if let Some(secs) = args.render_timeout_secs {
        compiler = compiler.with_timeout(Duration::from_secs(secs));
    }
    let pipeline =
        Arc::new(Pipeline::new(executor, Arc::new(ConfigRules)).with_compiler(compiler));
    let content = Arc::new(GitHubContent::new(args.github_api_url, args.github_token));
    let dispatcher = Arc::new(Dispatcher::new(pipeline, content, errors));

    let mut state = AppState::new(jobs, logs, broker, dispatcher);
    if let Some(secret) = args.webhook_secret {
        state = state.with_webhook_secret(secret);
    }

    // Build router
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!(namespace = %args.namespace, "Starting server on {}", args.listen);
    let listener = TcpListener::bind(args.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
