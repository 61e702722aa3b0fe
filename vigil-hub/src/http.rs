/**
 * PASSERELLE HTTP - Routes publiques et protégées du hub
 *
 * ROUTES :
 * - GET /health              : ouvert, "ok"
 * - GET /alerts?limit=N      : N alertes les plus récentes (20 par défaut), plus récente d'abord
 * - GET /ws/alerts           : websocket, une notification JSON par alerte
 * - GET /stream/video.mjpg   : flux MJPEG continu
 * - GET /system/health       : état interne du hub
 * - GET /images/{fichier}     : frames capturées (lecture seule)
 *
 * SÉCURITÉ : tout sauf /health passe par require_bearer (route_layer,
 * donc une route inconnue reste un 404 et non un 401).
 * CORS permissif, comme l'ancien hub.
 * Les spans de trace ne portent que le chemin : un `?token=` n'est jamais journalisé.
 */

use crate::auth::require_bearer;
use crate::error::HubError;
use crate::fanout::{Fanout, Subscription};
use crate::health::HubHealth;
use crate::models::Alert;
use crate::state::HubContext;
use crate::store::{DEFAULT_RECENT_LIMIT, MAX_RECENT_LIMIT};
use crate::video::stream_video;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::middleware;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use axum::body::Body;
use axum::http::Request;
use tracing::{debug, info_span, Span};

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    limit: Option<usize>,
}

pub fn build_router(ctx: HubContext) -> Router {
    let images = ServeDir::new(ctx.camera.image_dir());
    let gated = Router::new()
        .route("/alerts", get(get_alerts))
        .route("/ws/alerts", get(ws_alerts))
        .route("/stream/video.mjpg", get(stream_video))
        .route("/system/health", get(get_system_health))
        .nest_service("/images", images)
        .route_layer(middleware::from_fn_with_state(ctx.clone(), require_bearer));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(gated)
        .with_state(ctx)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
}

/// Span HTTP sans query string (elle peut contenir le jeton bearer).
fn request_span(req: &Request<Body>) -> Span {
    info_span!("request", method = %req.method(), path = %req.uri().path())
}

async fn get_alerts(
    State(ctx): State<HubContext>,
    Query(q): Query<AlertsQuery>,
) -> Result<Json<Vec<Alert>>, HubError> {
    let limit = q.limit.unwrap_or(DEFAULT_RECENT_LIMIT).min(MAX_RECENT_LIMIT);
    Ok(Json(ctx.store.recent(limit).await?))
}

async fn get_system_health(State(ctx): State<HubContext>) -> Json<HubHealth> {
    let nodes = ctx.registry.read().node_count();
    Json(ctx.health.get_health(ctx.identity.id, nodes, ctx.fanout.len()))
}

async fn ws_alerts(ws: WebSocketUpgrade, State(ctx): State<HubContext>) -> Response {
    ws.on_upgrade(move |socket| serve_subscriber(socket, ctx.fanout))
}

/// Relaie les notifications vers le socket jusqu'à fermeture d'un des deux côtés.
async fn serve_subscriber(socket: WebSocket, fanout: Fanout) {
    let Subscription { id, mut receiver } = fanout.subscribe();
    let (mut sink, mut incoming) = socket.split();

    loop {
        tokio::select! {
            outgoing = receiver.recv() => match outgoing {
                Some(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                // retiré par la diffusion (trop lent)
                None => break,
            },
            msg = incoming.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    fanout.unsubscribe(id);
    debug!(subscriber = %id, "websocket closed");
}
