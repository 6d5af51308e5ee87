use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::controllers::error::{ApiError, ErrorCategory};

/// Идентификатор вызывающего пользователя из Bearer JWT.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub id: i64,
    pub exp: usize,
}

pub fn decode_user(token: &str, secret: &str) -> Result<AuthUser, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(AuthUser {
        user_id: data.claims.id,
    })
}

fn unauthorized() -> ApiError {
    ApiError::new(ErrorCategory::Unauthorized, "Missing or invalid bearer token")
}

// Bearer auth extractor
impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(unauthorized)?;

        decode_user(token.trim(), &state.config.jwt.secret).map_err(|e| {
            tracing::debug!("Rejected bearer token: {}", e);
            unauthorized()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, exp: usize) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &Claims { id: 42, exp },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn future_exp() -> usize {
        (chrono::Utc::now().timestamp() + 3600) as usize
    }

    #[test]
    fn decodes_user_id_from_valid_token() {
        let user = decode_user(&token("secret", future_exp()), "secret").unwrap();
        assert_eq!(user.user_id, 42);
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        assert!(decode_user(&token("other", future_exp()), "secret").is_err());
        assert!(decode_user(&token("secret", 1_000), "secret").is_err());
    }
}
