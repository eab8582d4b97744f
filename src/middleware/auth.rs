use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};

pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub role: Option<String>,
}

impl Claims {
    /// The authenticated student. The core trusts this value as-is.
    pub fn student_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| Error::Unauthorized("token subject is not a student id".to_string()))
    }

    pub fn actor_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case(role))
    }
}

/// HS256 verification key shared by the auth layers.
#[derive(Clone)]
pub struct AuthKeys {
    decoding: Arc<DecodingKey>,
}

impl AuthKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            decoding: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
        }
    }

    fn verify(&self, token: &str) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        decode::<Claims>(token, &self.decoding, &validation)
            .ok()
            .map(|data| data.claims)
    }
}

fn reject(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "error": error }))).into_response()
}

fn authenticate(keys: &AuthKeys, req: &Request) -> std::result::Result<Claims, Response> {
    let Some(auth_header) = req.headers().get(axum::http::header::AUTHORIZATION) else {
        return Err(reject(StatusCode::UNAUTHORIZED, "missing_authorization"));
    };
    let Ok(auth_str) = auth_header.to_str() else {
        return Err(reject(StatusCode::UNAUTHORIZED, "bad_authorization"));
    };
    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return Err(reject(StatusCode::UNAUTHORIZED, "unsupported_scheme"));
    };
    keys.verify(token)
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "invalid_token"))
}

pub async fn require_bearer_auth(
    State(keys): State<AuthKeys>,
    mut req: Request,
    next: Next,
) -> Response {
    match authenticate(&keys, &req) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(resp) => resp,
    }
}

pub async fn require_admin(State(keys): State<AuthKeys>, mut req: Request, next: Next) -> Response {
    match authenticate(&keys, &req) {
        Ok(claims) if claims.has_role(ADMIN_ROLE) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Ok(_) => Error::Forbidden("admin role required".to_string()).into_response(),
        Err(resp) => resp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, sub: &str, role: Option<&str>, exp: usize) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp,
            role: role.map(str::to_string),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn future() -> usize {
        (chrono::Utc::now().timestamp() + 3600) as usize
    }

    #[test]
    fn verifies_signed_token() {
        let keys = AuthKeys::from_secret("secret");
        let student = Uuid::new_v4();
        let claims = keys
            .verify(&token("secret", &student.to_string(), None, future()))
            .unwrap();
        assert_eq!(claims.student_id().unwrap(), student);
        assert!(!claims.has_role(ADMIN_ROLE));
    }

    #[test]
    fn rejects_wrong_secret_and_expired() {
        let keys = AuthKeys::from_secret("secret");
        assert!(keys.verify(&token("other", "x", None, future())).is_none());
        assert!(keys.verify(&token("secret", "x", None, 1_000)).is_none());
    }

    #[test]
    fn non_uuid_subject_is_unauthorized() {
        let claims = Claims {
            sub: "alice".into(),
            exp: future(),
            role: Some("Admin".into()),
        };
        assert!(matches!(claims.student_id(), Err(Error::Unauthorized(_))));
        assert!(claims.has_role(ADMIN_ROLE));
    }
}
