pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod ports;
pub mod secrets;
pub mod services;
pub mod startup;
pub mod utils;
pub mod validation;
pub mod webhook;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::gateway::units::GatewayUnits;
use crate::health::HealthMonitor;
use crate::middleware::auth::{admin_auth, AdminKey};
use crate::middleware::request_logger::{request_logger_middleware, RequestLogging};
use crate::services::SettlementServices;
use crate::webhook::WebhookAuthenticator;

#[derive(Clone)]
pub struct AppState {
    pub services: SettlementServices,
    pub authenticator: Arc<WebhookAuthenticator>,
    pub units: GatewayUnits,
    pub health: HealthMonitor,
    pub admin_key: AdminKey,
    pub request_logging: RequestLogging,
    pub webhook_timeout: Duration,
}

impl AppState {
    pub fn new(
        services: SettlementServices,
        authenticator: Arc<WebhookAuthenticator>,
        health: HealthMonitor,
        config: &Config,
    ) -> Self {
        Self {
            services,
            authenticator,
            units: config.gateway_units,
            health,
            admin_key: AdminKey::new(config.admin_api_key.clone()),
            request_logging: RequestLogging {
                log_body: config.log_request_body,
            },
            webhook_timeout: Duration::from_millis(config.webhook_processing_timeout_ms),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let admin = handlers::admin::admin_routes()
        .layer(from_fn_with_state(state.admin_key.clone(), admin_auth));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/webhooks/gateway", post(handlers::webhook::gateway_webhook))
        .route(
            "/transactions/:reference",
            get(handlers::transactions::get_transaction),
        )
        .nest("/admin", admin)
        .layer(from_fn_with_state(
            state.request_logging,
            request_logger_middleware,
        ))
        .with_state(state)
}
