pub mod admin;
pub mod attempts;
pub mod health;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::middleware::auth::{require_admin, require_bearer_auth};
use crate::AppState;

pub fn router(state: AppState) -> Router {
    let student_api = Router::new()
        .route(
            "/api/quizzes/:quiz_id/attempts",
            get(attempts::list_attempts).post(attempts::start_attempt),
        )
        .route("/api/attempts/:id", get(attempts::get_attempt))
        .route("/api/attempts/:id/answers", patch(attempts::save_answer))
        .route(
            "/api/attempts/:id/tab-switches",
            post(attempts::record_tab_switch),
        )
        .route("/api/attempts/:id/submit", post(attempts::submit_attempt))
        .route("/api/attempts/:id/result", get(attempts::get_result))
        .layer(axum::middleware::from_fn_with_state(
            state.auth.clone(),
            require_bearer_auth,
        ));

    let admin_api = Router::new()
        .route("/api/admin/attempts/:id/void", post(admin::void_attempt))
        .route(
            "/api/admin/attempts/:id/evaluate",
            post(admin::retry_evaluation),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.auth.clone(),
            require_admin,
        ));

    Router::new()
        .route("/health", get(health::health))
        .merge(student_api)
        .merge(admin_api)
        .with_state(state)
}
