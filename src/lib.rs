pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
pub mod utils;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::middleware::auth::AuthKeys;
use crate::services::{
    attempt_service::{AttemptPolicy, AttemptService},
    event_service::EventService,
};
use crate::store::postgres::PgStore;
use crate::utils::time::SystemClock;

#[derive(Clone)]
pub struct AppState {
    pub attempt_service: AttemptService,
    pub auth: AuthKeys,
}

impl AppState {
    pub fn new(pool: PgPool, config: &Config) -> Self {
        let store = Arc::new(PgStore::new(pool.clone()));
        let events = Arc::new(EventService::new(
            pool,
            config.events_webhook_url.clone(),
            config.events_webhook_secret.clone(),
        ));
        let attempt_service = AttemptService::new(
            store.clone(),
            store.clone(),
            store,
            events,
            Arc::new(SystemClock),
        )
        .with_policy(AttemptPolicy {
            max_tab_switches: config.max_tab_switches,
        });

        Self::with_service(attempt_service, AuthKeys::from_secret(&config.jwt_secret))
    }

    pub fn with_service(attempt_service: AttemptService, auth: AuthKeys) -> Self {
        Self {
            attempt_service,
            auth,
        }
    }
}
