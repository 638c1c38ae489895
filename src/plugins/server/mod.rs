mod handlers;

use std::net::SocketAddr;

use anyhow::Context;
use async_trait::async_trait;
use axum::{
  Router,
  routing::{get, post},
};
use tower::ServiceBuilder;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{
  cors::{Any, CorsLayer},
  trace::TraceLayer,
};

use crate::{prelude::*, state::AppState};

pub struct Plugin;

/// API routes without the transport layers.
pub fn routes() -> Router<Arc<AppState>> {
  Router::new()
    .route("/health", get(handlers::health))
    .route("/api/pay/notify", post(handlers::notify))
    .route("/api/pay/notify/transfer", post(handlers::notify))
    .route("/api/users", post(handlers::login))
    .route("/api/users/{open_id}/profile", post(handlers::set_profile))
    .route(
      "/api/users/{open_id}/agent",
      post(handlers::promote).delete(handlers::demote),
    )
    .route(
      "/api/users/{open_id}/cart",
      get(handlers::cart).post(handlers::add_to_cart),
    )
    .route("/api/users/{open_id}/orders", post(handlers::checkout))
    .route("/api/orders/{id}", get(handlers::order))
    .route("/api/orders/{id}/prepay", post(handlers::prepay))
    .route("/api/orders/{id}/complete", post(handlers::complete_order))
    .route("/api/orders/{id}/cancel", post(handlers::cancel_order))
    .route(
      "/api/users/{open_id}/referral",
      get(handlers::referral).post(handlers::onboard),
    )
    .route("/api/users/{open_id}/referral/qrcode", get(handlers::qrcode))
    .route("/api/users/{open_id}/commissions", get(handlers::commissions))
    .route("/api/users/{open_id}/balance", get(handlers::balance))
    .route(
      "/api/users/{open_id}/withdrawals",
      get(handlers::withdrawals).post(handlers::withdraw),
    )
    .route("/api/settlement/failures", get(handlers::failures))
}

#[async_trait]
impl super::Plugin for Plugin {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    let governor_conf = Arc::new(
      GovernorConfigBuilder::default()
        .per_second(2)
        .burst_size(100)
        .finish()
        .context("Failed to build rate limiter config")?,
    );

    let governor_limiter = governor_conf.limiter().clone();

    tokio::spawn(async move {
      loop {
        tokio::time::sleep(Duration::from_secs(60)).await;
        governor_limiter.retain_recent();
      }
    });

    let port = app.config.port;
    let router = routes()
      .layer(
        ServiceBuilder::new()
          .layer(TraceLayer::new_for_http())
          .layer(GovernorLayer::new(governor_conf))
          .layer(
            CorsLayer::new()
              .allow_origin(Any)
              .allow_methods(Any)
              .allow_headers(Any),
          ),
      )
      .with_state(app)
      .into_make_service_with_connect_info::<SocketAddr>();

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
      .await
      .with_context(|| format!("binding {addr}"))?;

    info!("HTTP Server listening on {addr}");

    tokio::spawn(async move {
      if let Err(err) = axum::serve(listener, router).await {
        error!("HTTP server stopped: {err}");
      }
    });

    Ok(())
  }
}
