use std::{
    env::{self},
    fs::OpenOptions,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    extract::{MatchedPath, Request},
    middleware,
};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use clap::Parser;
use rusqlite::Connection;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use finsync::{
    AppState, SyncConfig, build_router, graceful_shutdown, logging_middleware,
    provider::{PlaidClient, PlaidEnvironment},
};

/// The REST API server for finsync.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long)]
    db_path: String,

    /// File path to an SSL certificate `cert.pem` and key `key.pem`.
    #[arg(long)]
    cert_path: String,

    /// The port to serve the API from.
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// The Plaid environment to sync transactions from.
    #[arg(long, value_enum, default_value_t = PlaidEnvironment::Sandbox)]
    plaid_env: PlaidEnvironment,

    /// Overrides the API root of `--plaid-env`, e.g. for a local mock.
    #[arg(long)]
    plaid_base_url: Option<String>,

    /// The number of transactions to request per page.
    #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u32).range(1..=500))]
    page_size: u32,

    /// Fail a sync if the provider still has more pages after this many.
    #[arg(long, default_value_t = finsync::DEFAULT_MAX_PAGES, value_parser = clap::value_parser!(u32).range(1..))]
    max_pages: u32,

    /// Fail a sync if fetching every page takes longer than this many seconds.
    #[arg(long, default_value_t = 120)]
    sync_timeout_secs: u64,

    /// Give up on a single request to the provider after this many seconds.
    #[arg(long, default_value_t = 30)]
    request_timeout_secs: u64,

    /// Log the headers and bodies of every request and response.
    #[arg(long)]
    log_requests: bool,
}

#[tokio::main]
async fn main() {
    setup_logging();

    let args = Args::parse();

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));

    let tls_config = RustlsConfig::from_pem_file(
        PathBuf::from(&args.cert_path).join("cert.pem"),
        PathBuf::from(&args.cert_path).join("key.pem"),
    )
    .await
    .expect("Could not open TLS certificates.");

    let secret = env::var("SECRET").expect("The environment variable 'SECRET' must be set");
    let plaid_client_id = env::var("PLAID_CLIENT_ID")
        .expect("The environment variable 'PLAID_CLIENT_ID' must be set");
    let plaid_secret =
        env::var("PLAID_SECRET").expect("The environment variable 'PLAID_SECRET' must be set");

    let plaid_base_url = args
        .plaid_base_url
        .as_deref()
        .unwrap_or(args.plaid_env.base_url());
    let provider = PlaidClient::new(
        plaid_base_url,
        &plaid_client_id,
        &plaid_secret,
        args.page_size,
        Duration::from_secs(args.request_timeout_secs),
    )
    .expect("Could not create the Plaid client.");
    tracing::info!("Syncing transactions from {plaid_base_url}");

    let sync_config = SyncConfig {
        max_pages: args.max_pages,
        timeout: Duration::from_secs(args.sync_timeout_secs),
    };

    let conn = Connection::open(&args.db_path).unwrap();
    let app_config = AppState::new(conn, &secret, Arc::new(provider), sync_config)
        .expect("Could not initialize the database.");

    let handle = Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone()));

    let mut router = build_router(app_config);

    if args.log_requests {
        router = router.layer(middleware::from_fn(logging_middleware));
    }

    let router = add_tracing_layer(router);

    tracing::info!("HTTPS server listening on {}", addr);
    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await
        .unwrap();
}

fn setup_logging() {
    let stdout_log = tracing_subscriber::fmt::layer().pretty();
    let stdout_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("Could not create log file");

    let debug_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(
            stdout_log
                .with_filter(stdout_filter)
                .and_then(debug_log)
                .with_filter(filter::LevelFilter::DEBUG),
        )
        .init();
}

fn add_tracing_layer(router: Router) -> Router {
    let tracing_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request| {
            let method = req.method();
            let uri = req.uri();

            let matched_path = req
                .extensions()
                .get::<MatchedPath>()
                .map(|matched_path| matched_path.as_str());

            tracing::debug_span!("request", %method, %uri, matched_path)
        })
        // By default, `TraceLayer` will log 5xx responses but we're doing our specific
        // logging of errors so disable that
        .on_failure(());

    router.layer(tracing_layer)
}
