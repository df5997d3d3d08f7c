//! # Server — Registration Portal HTTP API
//!
//! Runs an Axum HTTP server in front of the [`ReservationCoordinator`]. The
//! registration client calls `POST /api/reserve-problem` each time a team opens
//! or refreshes the problem-statement step, and `POST /api/finalize-registration`
//! when it submits.
//!
//! | Endpoint | Purpose |
//! |----------|---------|
//! | `POST /api/reserve-problem` | Assign, extend, or report all-filled |
//! | `POST /api/finalize-registration` | Convert the live hold into a submission |
//! | `GET /api/problem-statements` | Load snapshot per active problem |
//! | `GET /api/events` | Recent allocation events |
//! | `GET /healthz`, `/readyz`, `/metrics` | Probes and Prometheus scrape |
//!
//! Background tasks started by [`run`]: the periodic expiry reaper and the
//! committed-load gauge refresh.

mod routes_health;
mod routes_reserve;
mod routes_status;

use crate::config::AllocationPolicy;
use crate::coordinator::ReservationCoordinator;
use crate::cursor::{CounterStore, SharedCounter};
use crate::events::EventBus;
use crate::prom_metrics::{self, Metrics};
use crate::store::{self, ReservationStore};
use crate::db;
use anyhow::Result;
use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Instrument};

/// Request bodies are a single session id; anything larger is rejected.
const BODY_LIMIT_BYTES: usize = 64 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const GAUGE_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

pub struct AppState<S, C> {
    pub coordinator: ReservationCoordinator<S, C>,
    pub event_bus: Arc<EventBus>,
    pub prom_metrics: Arc<Metrics>,
}

impl<S: ReservationStore, C: CounterStore> AppState<S, C> {
    /// State with the production allocation policy.
    pub fn new(store: S, counter: C) -> Arc<Self> {
        Self::with_policy(store, Arc::new(counter), AllocationPolicy::default())
    }

    pub fn with_policy(store: S, counter: Arc<C>, policy: AllocationPolicy) -> Arc<Self> {
        let event_bus = Arc::new(EventBus::new());
        let prom_metrics = Arc::new(Metrics::new());
        let coordinator = ReservationCoordinator::new(
            store,
            counter,
            event_bus.clone(),
            Arc::clone(&prom_metrics),
            policy,
        );
        Arc::new(AppState {
            coordinator,
            event_bus,
            prom_metrics,
        })
    }

    /// Push current committed load per problem into the gauges.
    pub async fn refresh_load_gauges(&self) {
        match store::load_snapshot(self.coordinator.store(), Utc::now()).await {
            Ok(loads) => {
                for load in &loads {
                    self.prom_metrics
                        .set_committed_load(load.problem.order, load.total_committed());
                }
            }
            Err(e) => warn!(error = %e, "failed to refresh load gauges"),
        }
    }
}

/// Middleware that records HTTP request duration into the Prometheus histogram,
/// propagates or generates an `x-request-id`, and runs the request inside a
/// tracing span.
async fn metrics_middleware<S, C>(
    axum::extract::State(state): axum::extract::State<Arc<AppState<S, C>>>,
    req: Request,
    next: Next,
) -> axum::response::Response
where
    S: ReservationStore,
    C: CounterStore,
{
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = req.method().to_string();
    let raw_path = req.uri().path().to_string();
    let norm_path = normalize_path(&raw_path);
    let start = std::time::Instant::now();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %raw_path,
    );
    let mut response = next.run(req).instrument(span).await;

    state
        .prom_metrics
        .http_request_duration
        .get_or_create(&prom_metrics::HttpLabel {
            method,
            path: norm_path,
        })
        .observe(start.elapsed().as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Collapse numeric and UUID path segments so histogram labels stay bounded.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if seg.is_empty() {
                seg.to_string()
            } else if seg.chars().all(|c| c.is_ascii_digit()) {
                ":id".to_string()
            } else if seg.len() == 36 && seg.chars().filter(|c| *c == '-').count() == 4 {
                ":uuid".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn build_router<S, C>(state: Arc<AppState<S, C>>) -> Router
where
    S: ReservationStore,
    C: CounterStore,
{
    Router::new()
        .route(
            "/api/reserve-problem",
            post(routes_reserve::handler_reserve_problem::<S, C>),
        )
        .route(
            "/api/finalize-registration",
            post(routes_reserve::handler_finalize_registration::<S, C>),
        )
        .route(
            "/api/problem-statements",
            get(routes_status::handler_problem_statements::<S, C>),
        )
        .route("/api/events", get(routes_status::handler_events::<S, C>))
        .route("/healthz", get(routes_health::handler_healthz))
        .route("/readyz", get(routes_health::handler_readyz::<S, C>))
        .route("/metrics", get(routes_health::handler_metrics::<S, C>))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(CatchPanicLayer::new())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware::<S, C>,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        .with_state(state)
}

pub async fn run(
    port: u16,
    database_url: &str,
    redis_url: Option<&str>,
    reap_interval: Duration,
) -> Result<()> {
    let database = db::Database::connect(database_url).await?;
    database.migrate().await?;
    let counter = SharedCounter::from_url(redis_url).await;
    info!(cursor_backend = counter.backend(), "allocation engine ready");
    let state = AppState::new(database, counter);
    let app = build_router(state.clone());

    let reaper = state.coordinator.reaper().clone();
    tokio::spawn(reaper.run_periodic(reap_interval));

    let gauge_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(GAUGE_REFRESH_INTERVAL);
        loop {
            interval.tick().await;
            gauge_state.refresh_load_gauges().await;
        }
    });

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "registration api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
                info!("received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}
