mod auth;
mod config;
mod convert;
mod epub;
mod error;
mod fb2;
mod i18n;
mod mobi;
mod opds;
mod server;
mod state;
mod stats;
mod store;
mod text;
mod web;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::state::AppState;
use crate::store::{BookStore, MemoryStore};

#[derive(Parser)]
#[command(name = "tinyopds", version, about = "OPDS catalog server")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "tinyopds.toml")]
    config: PathBuf,
}

fn build_router(state: AppState) -> Router {
    let root_prefix = format!("/{}", state.config.opds.root_prefix);
    let http_prefix = format!("/{}", state.config.opds.http_prefix);
    let web_redirect = http_prefix.clone();

    Router::new()
        .route(
            "/",
            get(move || {
                let to = web_redirect.clone();
                async move { axum::response::Redirect::to(&to) }
            }),
        )
        .route("/favicon.ico", get(server::favicon))
        .route("/opds-opensearch.xml", get(opds::feeds::opensearch))
        .nest(&root_prefix, opds::router(state.clone()))
        .nest(&http_prefix, web::router(state.clone()))
        .layer(middleware::from_fn(server::request_guard))
        .layer(DefaultBodyLimit::max(server::MAX_POST_BODY))
        .layer(tower_http::compression::CompressionLayer::new())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::timeout::TimeoutLayer::new(server::REQUEST_TIMEOUT))
        .layer(tower::limit::GlobalConcurrencyLimitLayer::new(
            server::MAX_CONNECTIONS,
        ))
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}");
        std::process::exit(1);
    });

    let filter =
        EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let translations = i18n::load_translations().unwrap_or_else(|e| {
        tracing::error!("Failed to load translations: {e}");
        std::process::exit(1);
    });

    let store = MemoryStore::load_catalog(
        &config.library.catalog_path,
        config.opds.cyrillic_first,
    )
    .unwrap_or_else(|e| {
        tracing::error!("Failed to load catalog: {e}");
        std::process::exit(1);
    });
    tracing::info!(
        "Catalog loaded: {} books from {}",
        store.count(),
        config.library.catalog_path.display()
    );

    tracing::info!("tinyopds v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Library root: {}", config.library.root_path.display());

    let state = AppState::new(config, Arc::new(store), web::default_tera(), translations);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
    };

    if let Err(e) = server::serve(state, shutdown).await {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }
}
