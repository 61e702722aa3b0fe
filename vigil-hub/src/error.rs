/**
 * ERREURS DU HUB - Taxonomie des pannes du pipeline d'événements
 *
 * RÔLE : Un seul type d'erreur pour la lib, une variante par classe de panne
 * (payload, registre, capture, analyse, stockage, config).
 *
 * RÈGLE : aucune de ces erreurs ne termine le processus. Chaque appelant
 * journalise puis dégrade pour l'événement courant seulement.
 */

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, HubError>;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("malformed topic: {0}")]
    MalformedTopic(String),

    #[error("malformed payload on {topic}: {reason}")]
    MalformedPayload { topic: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry authority returned HTTP {status} for {operation}")]
    RegistryStatus { operation: &'static str, status: u16 },

    #[error("frame capture failed: {0}")]
    Capture(String),

    #[error("vision analysis failed: {0}")]
    Analysis(String),

    #[error("alert store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            HubError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            HubError::Http(_) | HubError::RegistryStatus { .. } | HubError::Capture(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.to_string(), "status": status.as_u16() }));
        (status, body).into_response()
    }
}

/// Borne un appel externe dans le temps ; l'expiration devient `HubError::Timeout`.
pub async fn bounded<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(HubError::Timeout { operation, after }),
    }
}
