use crate::finder;
use crate::registrar::{self, ShowNotFound};
use crate::rss;
use crate::store::{SeriesStore, TableClient};
use crate::tmdb::{ArtworkApi, TmdbClient};
use crate::trakt::{TraktApi, TraktClient};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::{env, net::SocketAddr, sync::Arc};
use tracing::{error, info, warn};

const FEED_TITLE: &str = "TV shows";
const FEED_LINK: &str = "https://trakt.tv";
const DEFAULT_PORT: u16 = 3000;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SeriesStore>,
    pub trakt: Arc<dyn TraktApi>,
    pub tmdb: Arc<dyn ArtworkApi>,
    /// Lookback window for the feed, in days.
    pub check_days: i64,
}

pub async fn run_server() -> Result<()> {
    let store: Arc<dyn SeriesStore> = Arc::new(TableClient::from_env()?);
    let trakt: Arc<dyn TraktApi> = Arc::new(TraktClient::from_env()?);
    let tmdb: Arc<dyn ArtworkApi> = Arc::new(TmdbClient::from_env()?);
    let check_days = env::var("CHECK_DAYS")
        .context("CHECK_DAYS not set")?
        .parse()
        .context("CHECK_DAYS is not an integer")?;

    let state = AppState {
        store,
        trakt,
        tmdb,
        check_days,
    };
    let app = build_router(state);

    let port = env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/shows", post(add_show))
        .route("/feed", get(get_feed))
        .route("/health", get(health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Deserialize)]
struct AddShowParams {
    #[serde(default)]
    id: String,
}

async fn add_show(State(state): State<AppState>, Query(params): Query<AddShowParams>) -> Response {
    let identifier = params.id.trim();
    if identifier.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing 'id' query parameter").into_response();
    }

    match registrar::add_series(state.store.as_ref(), state.trakt.as_ref(), identifier).await {
        Ok(name) => (StatusCode::OK, name).into_response(),
        Err(e) if e.downcast_ref::<ShowNotFound>().is_some() => {
            warn!("{}", e);
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        Err(e) => {
            error!("Adding '{}' failed: {:#}", identifier, e);
            (StatusCode::BAD_GATEWAY, "Upstream unavailable").into_response()
        }
    }
}

async fn get_feed(State(state): State<AppState>) -> Response {
    let from_date = Utc::now() - Duration::days(state.check_days);

    match finder::find_latest_episodes(state.store.as_ref(), &state.trakt, &state.tmdb, from_date)
        .await
    {
        Ok(episodes) => {
            info!("Aggregated {} episodes into the feed", episodes.len());
            let feed = rss::render(&episodes, FEED_TITLE, FEED_LINK);
            (
                [(header::CONTENT_TYPE, "application/rss+xml")],
                feed,
            )
                .into_response()
        }
        Err(e) => {
            error!("Feed aggregation failed: {:#}", e);
            (StatusCode::BAD_GATEWAY, "Storage unavailable").into_response()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}
