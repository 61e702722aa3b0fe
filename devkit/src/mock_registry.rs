/*!
Autorité registre factice

Sert en mémoire les quatre endpoints consommés par le hub :
- PUT  /hub/register              {name, ip} → {status, hub_id}
- GET  /hub/{hub_id}/config       hub + nœuds + capteurs
- POST /hubs/{hub_id}/nodes/      {location, status} → nœud
- POST /nodes/{node_id}/sensors/  {type, pin, status} → capteur

`set_outage(true)` fait répondre 503 à tout, pour simuler une panne.
*/

use anyhow::Result;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize)]
pub struct SensorRow {
    pub id: i64,
    pub node_id: i64,
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub pin: String,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeRow {
    pub id: i64,
    pub hub_id: i64,
    pub ip: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,
    pub sensor_count: usize,
    pub sensors: Vec<SensorRow>,
}

#[derive(Debug, Clone)]
struct HubRow {
    id: i64,
    name: String,
    ip: String,
}

#[derive(Default)]
struct Db {
    next_id: i64,
    hubs: Vec<HubRow>,
    nodes: Vec<NodeRow>,
    sensors: Vec<SensorRow>,
    nodes_created: usize,
    sensors_created: usize,
}

impl Db {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MockState {
    db: Mutex<Db>,
    outage: AtomicBool,
}

#[derive(Deserialize)]
struct RegisterBody {
    name: String,
    ip: String,
}

#[derive(Deserialize)]
struct NodeBody {
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    ip: Option<String>,
}

#[derive(Deserialize)]
struct SensorBody {
    #[serde(rename = "type")]
    sensor_type: String,
    pin: String,
    #[serde(default = "default_status")]
    status: Option<String>,
}

fn default_status() -> Option<String> {
    Some("enabled".into())
}

type Shared = Arc<MockState>;

async fn outage_gate(State(state): State<Shared>, req: Request, next: Next) -> Response {
    if state.outage.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    next.run(req).await
}

async fn register_hub(State(state): State<Shared>, Json(body): Json<RegisterBody>) -> Json<Value> {
    let mut db = state.db.lock();
    if let Some(hub) = db.hubs.iter_mut().find(|h| h.name == body.name) {
        hub.ip = body.ip;
        return Json(json!({ "status": "updated", "hub_id": hub.id }));
    }
    let id = db.next_id();
    db.hubs.push(HubRow { id, name: body.name, ip: body.ip });
    log::info!("🏠 [MOCK] hub {id} registered");
    Json(json!({ "status": "registered", "hub_id": id }))
}

async fn hub_config(State(state): State<Shared>, Path(hub_id): Path<i64>) -> Result<Json<Value>, StatusCode> {
    let db = state.db.lock();
    let hub = db.hubs.iter().find(|h| h.id == hub_id).ok_or(StatusCode::NOT_FOUND)?;
    let nodes: Vec<NodeRow> = db
        .nodes
        .iter()
        .filter(|n| n.hub_id == hub_id)
        .map(|n| {
            let sensors: Vec<SensorRow> = db.sensors.iter().filter(|s| s.node_id == n.id).cloned().collect();
            NodeRow { sensor_count: sensors.len(), sensors, ..n.clone() }
        })
        .collect();
    Ok(Json(json!({ "id": hub.id, "name": hub.name, "ip": hub.ip, "nodes": nodes })))
}

async fn create_node(
    State(state): State<Shared>,
    Path(hub_id): Path<i64>,
    Json(body): Json<NodeBody>,
) -> Result<Json<NodeRow>, StatusCode> {
    let mut db = state.db.lock();
    if !db.hubs.iter().any(|h| h.id == hub_id) {
        return Err(StatusCode::NOT_FOUND);
    }
    let id = db.next_id();
    let node = NodeRow {
        id,
        hub_id,
        ip: body.ip,
        location: body.location,
        status: body.status,
        sensor_count: 0,
        sensors: Vec::new(),
    };
    db.nodes.push(node.clone());
    db.nodes_created += 1;
    log::info!("📟 [MOCK] node {id} created ({:?})", node.location);
    Ok(Json(node))
}

async fn create_sensor(
    State(state): State<Shared>,
    Path(node_id): Path<i64>,
    Json(body): Json<SensorBody>,
) -> Result<Json<SensorRow>, StatusCode> {
    let mut db = state.db.lock();
    if !db.nodes.iter().any(|n| n.id == node_id) {
        return Err(StatusCode::NOT_FOUND);
    }
    let id = db.next_id();
    let sensor = SensorRow { id, node_id, sensor_type: body.sensor_type, pin: body.pin, status: body.status };
    db.sensors.push(sensor.clone());
    db.sensors_created += 1;
    log::info!("🔎 [MOCK] sensor {id} ({}) created on node {node_id}", sensor.sensor_type);
    Ok(Json(sensor))
}

pub fn router(state: Shared) -> Router {
    Router::new()
        .route("/hub/register", put(register_hub))
        .route("/hub/{hub_id}/config", get(hub_config))
        .route("/hubs/{hub_id}/nodes/", post(create_node))
        .route("/nodes/{node_id}/sensors/", post(create_sensor))
        .layer(middleware::from_fn_with_state(state.clone(), outage_gate))
        .with_state(state)
}

/// Autorité factice servie sur un port local ; arrêtée au drop.
pub struct MockRegistry {
    addr: SocketAddr,
    state: Shared,
    server: JoinHandle<()>,
}

impl MockRegistry {
    /// Port éphémère sur 127.0.0.1
    pub async fn start() -> Result<Self> {
        Self::start_on("127.0.0.1:0").await
    }

    pub async fn start_on(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let state: Shared = Arc::new(MockState::default());
        let app = router(state.clone());
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("❌ [MOCK] registry server stopped: {e}");
            }
        });
        Ok(Self { addr, state, server })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn set_outage(&self, on: bool) {
        self.state.outage.store(on, Ordering::SeqCst);
    }

    /// `None` reproduit un status nul côté base.
    pub fn set_sensor_status(&self, sensor_id: i64, status: Option<&str>) {
        let mut db = self.state.db.lock();
        if let Some(sensor) = db.sensors.iter_mut().find(|s| s.id == sensor_id) {
            sensor.status = status.map(str::to_string);
        }
    }

    pub fn sensor_id(&self, location: &str, sensor_type: &str) -> Option<i64> {
        let db = self.state.db.lock();
        let node = db.nodes.iter().find(|n| n.location.as_deref() == Some(location))?;
        db.sensors.iter().find(|s| s.node_id == node.id && s.sensor_type == sensor_type).map(|s| s.id)
    }

    pub fn nodes_created(&self) -> usize {
        self.state.db.lock().nodes_created
    }

    pub fn sensors_created(&self) -> usize {
        self.state.db.lock().sensors_created
    }

    /// Attend l'arrêt du serveur (binaire mock-registry).
    pub async fn wait(mut self) -> Result<()> {
        (&mut self.server).await?;
        Ok(())
    }
}

impl Drop for MockRegistry {
    fn drop(&mut self) {
        self.server.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_create_and_read_back() {
        let mock = MockRegistry::start().await.unwrap();
        let http = reqwest::Client::new();

        let reg: Value = http
            .put(format!("{}/hub/register", mock.url()))
            .json(&json!({ "name": "site", "ip": "10.0.0.2" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reg["status"], "registered");
        let hub_id = reg["hub_id"].as_i64().unwrap();

        let node: Value = http
            .post(format!("{}/hubs/{hub_id}/nodes/", mock.url()))
            .json(&json!({ "location": "esp01", "status": "online" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let node_id = node["id"].as_i64().unwrap();

        let status = http
            .post(format!("{}/nodes/{node_id}/sensors/", mock.url()))
            .json(&json!({ "type": "pir", "pin": "14" }))
            .send()
            .await
            .unwrap()
            .status();
        assert!(status.is_success());

        let cfg: Value = http
            .get(format!("{}/hub/{hub_id}/config", mock.url()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(cfg["nodes"][0]["sensors"][0]["status"], "enabled");
        assert_eq!(cfg["nodes"][0]["sensor_count"], 1);
        assert_eq!(mock.sensor_id("esp01", "pir"), cfg["nodes"][0]["sensors"][0]["id"].as_i64());
    }

    #[tokio::test]
    async fn outage_answers_503() {
        let mock = MockRegistry::start().await.unwrap();
        mock.set_outage(true);
        let status = reqwest::Client::new()
            .put(format!("{}/hub/register", mock.url()))
            .json(&json!({ "name": "site", "ip": "10.0.0.2" }))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status.as_u16(), 503);
    }
}
