//! HTTP boundary.
//!
//! Thin `axum` layer over [`crate::handlers::AuthHandlers`]: it decodes requests,
//! resolves bearer tokens, and maps outcomes to status codes. Outcomes that would
//! reveal whether an account exists are collapsed here.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
    Extension, Router,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info, info_span, Span};
use ulid::Ulid;

use crate::clock::SystemClock;
use crate::email::LogEmailSender;
use crate::random::OsRandom;
use crate::store::PgStore;

pub mod handlers;
mod state;

pub use state::{AppSettings, AppState};

/// Build the router with every route and the request-id/trace layers.
///
/// `shutdown` is the parent of every request's cancellation token.
#[must_use]
pub fn router(state: AppState, shutdown: CancellationToken) -> Router {
    let AppState {
        handlers: auth_handlers,
        access_tokens,
        store,
    } = state;

    Router::new()
        .route("/health", get(handlers::health).head(handlers::health))
        .route("/v1/auth/register", post(handlers::auth::register))
        .route("/v1/auth/login", post(handlers::auth::login))
        .route("/v1/auth/verify-email", post(handlers::auth::verify_email))
        .route(
            "/v1/auth/resend-verification",
            post(handlers::auth::resend_verification),
        )
        .route(
            "/v1/auth/password-reset/request",
            post(handlers::auth::send_reset_password_email),
        )
        .route("/v1/auth/password-reset", post(handlers::auth::reset_password))
        .route("/v1/auth/refresh", post(handlers::auth::refresh))
        .route("/v1/auth/logout", post(handlers::auth::logout))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(auth_handlers))
                .layer(Extension(access_tokens))
                .layer(Extension(store))
                .layer(Extension(shutdown)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to connect to the database or to start the server
pub async fn new(port: u16, dsn: SecretString, settings: AppSettings) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    let state = AppState::new(
        &settings,
        Arc::new(PgStore::new(pool)),
        Arc::new(SystemClock),
        Arc::new(OsRandom),
        Arc::new(LogEmailSender),
    )?;

    let shutdown = CancellationToken::new();
    let app = router(state, shutdown.clone());

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", err);
                std::future::pending::<()>().await;
            }
            shutdown.cancel();
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
