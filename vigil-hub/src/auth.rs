/**
 * AUTHENTIFICATION - Jeton bearer HS256 sur les routes protégées
 *
 * RÔLE : Vérifier signature (secret partagé), présence de `sub`, et `exp` non dépassé.
 * Tout échec → 401, la ressource n'est jamais servie partiellement.
 *
 * Le jeton vient de `Authorization: Bearer …` ou, pour les clients qui ne
 * peuvent pas poser d'en-tête (websocket navigateur, <img> MJPEG), de `?token=`.
 */

use crate::state::HubContext;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: String,
    pub exp: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication required: missing bearer token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    #[error("token has no subject")]
    MissingSubject,

    #[error("authentication is not configured on this hub")]
    NotConfigured,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = StatusCode::UNAUTHORIZED;
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));
        (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
    }
}

pub struct TokenValidator {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl TokenValidator {
    /// Un secret vide rejette toutes les requêtes.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;
        let required: &[&str] = &["exp", "sub"];
        validation.set_required_spec_claims(required);
        let key = (!secret.is_empty()).then(|| DecodingKey::from_secret(secret.as_bytes()));
        Self { key, validation }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let key = self.key.as_ref().ok_or(AuthError::NotConfigured)?;
        let data = decode::<Claims>(token, key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::MissingRequiredClaim(claim) if claim == "sub" => AuthError::MissingSubject,
            _ => AuthError::InvalidToken(e.to_string()),
        })?;
        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::MissingSubject);
        }
        Ok(data.claims)
    }
}

/// Jeton porté par la requête : en-tête Authorization d'abord, puis `?token=`.
pub fn bearer_token(req: &Request) -> Option<String> {
    let from_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, token) = v.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim().to_string())
        })
        .filter(|t| !t.is_empty());
    if from_header.is_some() {
        return from_header;
    }
    req.uri()
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

pub async fn require_bearer(
    State(ctx): State<HubContext>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = bearer_token(&req).ok_or(AuthError::MissingToken)?;
    let claims = ctx.auth.validate(&token).map_err(|e| {
        debug!(path = %req.uri().path(), error = %e, "rejected request");
        e
    })?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
