use quiz_attempt_backend::{
    config::{get_config, init_config},
    database::pool::create_pool,
    routes,
    services::event_service::EventService,
    AppState,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

const EXPIRY_SWEEP_BATCH: i64 = 100;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    init_config()?;
    let config = get_config()?;

    let pool = create_pool(config).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let app_state = AppState::new(pool.clone(), config);

    let events = EventService::new(
        pool.clone(),
        config.events_webhook_url.clone(),
        config.events_webhook_secret.clone(),
    );
    if events.delivery_enabled() {
        tokio::spawn(async move {
            loop {
                match events.run_once().await {
                    Ok(true) => {}
                    Ok(false) => {
                        tokio::time::sleep(Duration::from_millis(1000)).await;
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, "Event delivery worker error");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    if let Some(every) = config.expiry_sweep_secs.filter(|s| *s > 0) {
        let attempt_svc = app_state.attempt_service.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = attempt_svc.expire_overdue(EXPIRY_SWEEP_BATCH).await {
                    tracing::error!(error = ?e, "Expiry sweeper error");
                }
                tokio::time::sleep(Duration::from_secs(every)).await;
            }
        });
    }

    let app = routes::router(app_state)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.server_address).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
