use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use quiz_attempt_backend::middleware::auth::{AuthKeys, Claims};
use quiz_attempt_backend::models::question::{Question, QuestionOption, QuestionType};
use quiz_attempt_backend::models::quiz::Quiz;
use quiz_attempt_backend::services::attempt_service::AttemptService;
use quiz_attempt_backend::store::memory::{MemoryCatalog, MemoryEventSink, MemoryStore};
use quiz_attempt_backend::utils::time::SystemClock;
use quiz_attempt_backend::{routes, AppState};
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "test_secret_key";

struct TestApp {
    app: Router,
    quiz_id: Uuid,
    q1: Uuid,
    q2: Uuid,
}

fn question(text: &str, correct: &str, order: i32) -> Question {
    Question {
        id: Uuid::new_v4(),
        question_type: QuestionType::SingleChoice,
        text: text.to_string(),
        options: ["A", "B", "C"]
            .iter()
            .map(|id| QuestionOption {
                id: id.to_string(),
                text: format!("{} {}", text, id),
                is_correct: *id == correct,
            })
            .collect(),
        correct_answer: None,
        marks: Decimal::ONE,
        order_number: order,
    }
}

fn test_app(max_attempts: i32) -> TestApp {
    let now = Utc::now();
    let quiz = Quiz {
        id: Uuid::new_v4(),
        title: "API quiz".into(),
        duration_minutes: 30,
        max_attempts,
        passing_marks: Decimal::ONE,
        total_marks: Decimal::from(2),
        shuffle_questions: false,
        shuffle_options: false,
        start_time: Some(now - Duration::hours(1)),
        end_time: None,
        is_active: true,
        is_published: true,
    };
    let questions = vec![question("Q1", "A", 1), question("Q2", "C", 2)];
    let (quiz_id, q1, q2) = (quiz.id, questions[0].id, questions[1].id);

    let catalog = Arc::new(MemoryCatalog::new());
    catalog.upsert_quiz(quiz, questions).unwrap();
    let store = Arc::new(MemoryStore::new());
    let service = AttemptService::new(
        catalog,
        store.clone(),
        store,
        Arc::new(MemoryEventSink::new()),
        Arc::new(SystemClock),
    );
    let state = AppState::with_service(service, AuthKeys::from_secret(SECRET));
    TestApp {
        app: routes::router(state),
        quiz_id,
        q1,
        q2,
    }
}

fn token(sub: Uuid, role: Option<&str>) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
        role: role.map(str::to_string),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes()))
        .expect("encode token")
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<JsonValue>,
) -> (StatusCode, JsonValue) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = bearer {
        builder = builder.header("Authorization", format!("Bearer {}", t));
    }
    let req = match body {
        Some(b) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
    (status, json)
}

fn decimal(v: &JsonValue) -> Decimal {
    match v {
        JsonValue::String(s) => s.parse().expect("decimal string"),
        JsonValue::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal: {}", other),
    }
}

#[tokio::test]
async fn health_is_public() {
    let t = test_app(1);
    let (status, body) = call(&t.app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn student_routes_require_a_valid_token() {
    let t = test_app(1);
    let uri = format!("/api/quizzes/{}/attempts", t.quiz_id);

    let (status, body) = call(&t.app, "POST", &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "missing_authorization");

    let (status, body) = call(&t.app, "POST", &uri, Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn student_flow_end_to_end() {
    let t = test_app(1);
    let student = token(Uuid::new_v4(), None);

    let (status, started) = call(
        &t.app,
        "POST",
        &format!("/api/quizzes/{}/attempts", t.quiz_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(started["status"], "in_progress");
    assert_eq!(started["attempt_number"], 1);
    assert_eq!(started["questions"].as_array().unwrap().len(), 2);
    assert!(started["time_remaining_seconds"].as_i64().unwrap() > 0);
    assert!(!started.to_string().contains("is_correct"));
    let attempt_id = started["attempt_id"].as_str().unwrap().to_string();

    for (question_id, option) in [(t.q1, "A"), (t.q2, "B")] {
        let (status, saved) = call(
            &t.app,
            "PATCH",
            &format!("/api/attempts/{}/answers", attempt_id),
            Some(&student),
            Some(json!({
                "question_id": question_id,
                "answer": { "kind": "single_choice", "option_id": option }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(saved["saved"], true);
    }

    let (status, detail) = call(
        &t.app,
        "GET",
        &format!("/api/attempts/{}", attempt_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["answered"], 2);
    assert_eq!(detail["total_questions"], 2);
    assert!(detail["questions"].is_array());

    let (status, submitted) = call(
        &t.app,
        "POST",
        &format!("/api/attempts/{}/submit", attempt_id),
        Some(&student),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submitted["status"], "evaluated");
    assert_eq!(decimal(&submitted["result"]["total_score"]), Decimal::ONE);
    assert_eq!(decimal(&submitted["result"]["percentage"]), Decimal::from(50));
    assert_eq!(submitted["result"]["correct_answers"], 1);
    assert_eq!(submitted["result"]["incorrect_answers"], 1);

    let (status, result) = call(
        &t.app,
        "GET",
        &format!("/api/attempts/{}/result", attempt_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["id"], submitted["result"]["id"]);

    let (status, body) = call(
        &t.app,
        "POST",
        &format!("/api/attempts/{}/submit", attempt_id),
        Some(&student),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "attempt_not_in_progress");

    let (status, listed) = call(
        &t.app,
        "GET",
        &format!("/api/quizzes/{}/attempts", t.quiz_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["status"], "evaluated");

    let (status, body) = call(
        &t.app,
        "POST",
        &format!("/api/quizzes/{}/attempts", t.quiz_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "attempt_limit_exceeded");
    assert_eq!(
        body["message"],
        "You have already used all your attempts for this quiz"
    );
}

#[tokio::test]
async fn other_students_attempt_is_not_found() {
    let t = test_app(1);
    let owner = token(Uuid::new_v4(), None);
    let intruder = token(Uuid::new_v4(), None);

    let (_, started) = call(
        &t.app,
        "POST",
        &format!("/api/quizzes/{}/attempts", t.quiz_id),
        Some(&owner),
        None,
    )
    .await;
    let attempt_id = started["attempt_id"].as_str().unwrap();

    let (status, body) = call(
        &t.app,
        "GET",
        &format!("/api/attempts/{}", attempt_id),
        Some(&intruder),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "attempt_not_found");
}

#[tokio::test]
async fn unknown_question_is_unprocessable() {
    let t = test_app(1);
    let student = token(Uuid::new_v4(), None);
    let (_, started) = call(
        &t.app,
        "POST",
        &format!("/api/quizzes/{}/attempts", t.quiz_id),
        Some(&student),
        None,
    )
    .await;

    let (status, body) = call(
        &t.app,
        "PATCH",
        &format!("/api/attempts/{}/answers", started["attempt_id"].as_str().unwrap()),
        Some(&student),
        Some(json!({
            "question_id": Uuid::new_v4(),
            "answer": { "kind": "single_choice", "option_id": "A" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "question_not_in_attempt");
}

#[tokio::test]
async fn clients_cannot_submit_with_policy_reason() {
    let t = test_app(1);
    let student = token(Uuid::new_v4(), None);
    let (_, started) = call(
        &t.app,
        "POST",
        &format!("/api/quizzes/{}/attempts", t.quiz_id),
        Some(&student),
        None,
    )
    .await;

    let (status, body) = call(
        &t.app,
        "POST",
        &format!("/api/attempts/{}/submit", started["attempt_id"].as_str().unwrap()),
        Some(&student),
        Some(json!({ "reason": "tab-switch-policy" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn tab_switches_are_counted() {
    let t = test_app(1);
    let student = token(Uuid::new_v4(), None);
    let (_, started) = call(
        &t.app,
        "POST",
        &format!("/api/quizzes/{}/attempts", t.quiz_id),
        Some(&student),
        None,
    )
    .await;
    let uri = format!(
        "/api/attempts/{}/tab-switches",
        started["attempt_id"].as_str().unwrap()
    );

    let (status, body) = call(&t.app, "POST", &uri, Some(&student), Some(json!({ "kind": "blur" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tab_switches"], 1);

    let (status, body) = call(&t.app, "POST", &uri, Some(&student), Some(json!({ "kind": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_failed");
}

#[tokio::test]
async fn admin_routes_require_admin_role_and_void_attempts() {
    let t = test_app(1);
    let student_id = Uuid::new_v4();
    let student = token(student_id, None);
    let admin = token(Uuid::new_v4(), Some("admin"));

    let (_, started) = call(
        &t.app,
        "POST",
        &format!("/api/quizzes/{}/attempts", t.quiz_id),
        Some(&student),
        None,
    )
    .await;
    let attempt_id = started["attempt_id"].as_str().unwrap().to_string();
    let void_uri = format!("/api/admin/attempts/{}/void", attempt_id);

    let (status, body) = call(
        &t.app,
        "POST",
        &void_uri,
        Some(&student),
        Some(json!({ "reason": "cheating" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
    assert_eq!(body["message"], "Forbidden: admin role required");

    let (status, body) = call(
        &t.app,
        "POST",
        &void_uri,
        Some(&admin),
        Some(json!({ "reason": "cheating" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attempt"]["status"], "voided");
    assert_eq!(body["reason"], "cheating");

    let (status, body) = call(
        &t.app,
        "PATCH",
        &format!("/api/attempts/{}/answers", attempt_id),
        Some(&student),
        Some(json!({
            "question_id": t.q1,
            "answer": { "kind": "single_choice", "option_id": "A" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "attempt_not_in_progress");

    let (status, body) = call(
        &t.app,
        "POST",
        &format!("/api/admin/attempts/{}/evaluate", attempt_id),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");
}

#[tokio::test]
async fn admin_can_re_run_evaluation_idempotently() {
    let t = test_app(1);
    let student = token(Uuid::new_v4(), None);
    let admin = token(Uuid::new_v4(), Some("admin"));

    let (_, started) = call(
        &t.app,
        "POST",
        &format!("/api/quizzes/{}/attempts", t.quiz_id),
        Some(&student),
        None,
    )
    .await;
    let attempt_id = started["attempt_id"].as_str().unwrap().to_string();
    let (_, submitted) = call(
        &t.app,
        "POST",
        &format!("/api/attempts/{}/submit", attempt_id),
        Some(&student),
        Some(json!({ "reason": "timeout" })),
    )
    .await;

    let (status, body) = call(
        &t.app,
        "POST",
        &format!("/api/admin/attempts/{}/evaluate", attempt_id),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["id"], submitted["result"]["id"]);
    assert_eq!(body["result"]["unanswered"], 2);
}
