use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use jobboard_core::notification::{Actor, Role};

use crate::error::ServiceError;
use crate::messages::{Locale, Message};
use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Validates HS256 bearer tokens minted by the identity service.
#[derive(Clone)]
pub struct TokenValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenValidator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        // Expiry is compared against the injected clock instead.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<Actor, TokenError> {
        let claims = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| TokenError::Invalid(format!("{err}")))?
            .claims;

        if now.timestamp() >= claims.exp {
            return Err(TokenError::Invalid("token_expired".to_string()));
        }
        let user_id = claims
            .sub
            .parse::<i64>()
            .map_err(|_| TokenError::Invalid("subject_not_numeric".to_string()))?;

        Ok(Actor {
            user_id,
            roles: claims.roles,
            company_id: claims.company_id,
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TokenClaims {
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<i64>,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Actor resolved from the `Authorization` header.
#[derive(Debug, Clone)]
pub struct CurrentActor(pub Actor);

#[async_trait]
impl FromRequestParts<AppState> for CurrentActor {
    type Rejection = ProblemResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let locale = Locale::from_headers(&parts.headers);
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ProblemResponse::localized(
                    StatusCode::UNAUTHORIZED,
                    "missing_token",
                    &Message::MissingToken,
                    locale,
                )
            })?;

        let actor = state
            .token_validator()
            .validate(token, state.now())
            .map_err(|err| {
                tracing::debug!(stage = "app", error = %err, "rejected bearer token");
                ProblemResponse::localized(
                    StatusCode::UNAUTHORIZED,
                    "invalid_token",
                    &Message::InvalidToken,
                    locale,
                )
            })?;

        Ok(Self(actor))
    }
}

pub fn require_role(actor: &Actor, role: Role) -> Result<(), ServiceError> {
    if actor.has_role(role) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden)
    }
}

/// Company an admin acts for.
pub fn require_company_admin(actor: &Actor) -> Result<i64, ServiceError> {
    require_role(actor, Role::CompanyAdmin)?;
    actor.company_id.ok_or(ServiceError::Forbidden)
}

#[cfg(test)]
pub(crate) fn mint_token(secret: &[u8], actor: &Actor, exp: DateTime<Utc>) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = TokenClaims {
        sub: actor.user_id.to_string(),
        roles: actor.roles.clone(),
        company_id: actor.company_id,
        exp: exp.timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .expect("encode token")
}
