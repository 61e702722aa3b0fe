/**
 * DÉMARRAGE DU HUB - Ordre de boot et câblage des composants
 *
 * ORDRE :
 * 1. Enregistrement du hub auprès de l'autorité (N tentatives, puis id de repli)
 * 2. Sync initiale synchrone, best-effort (échec ⇒ cache vide, tout armé)
 * 3. Boucle de sync, dispatcher, écouteur MQTT en tâches de fond
 * 4. Router HTTP prêt à servir
 */

use crate::analyzer::{OpenAiAnalyzer, VisionAnalyzer};
use crate::auth::TokenValidator;
use crate::capture::{source_from_config, Camera, FrameSource};
use crate::config::{HubConf, HubConfig};
use crate::dispatch::Dispatcher;
use crate::error::{bounded, HubError, Result};
use crate::fanout::Fanout;
use crate::health::HealthTracker;
use crate::http::build_router;
use crate::models::HubIdentity;
use crate::mqtt::spawn_mqtt_listener;
use crate::pipeline::AlertPipeline;
use crate::registry::{AutoRegistrar, DeviceRegistryCache, HttpRegistryClient, RegistryAuthority};
use crate::state::HubContext;
use crate::store::{AlertStore, JsonlAlertStore};
use crate::sync::ConfigSync;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Collaborateurs externes, remplaçables en test.
pub struct Collaborators {
    pub authority: Arc<dyn RegistryAuthority>,
    pub frames: Arc<dyn FrameSource>,
    pub analyzer: Arc<dyn VisionAnalyzer>,
    pub store: Arc<dyn AlertStore>,
}

impl Collaborators {
    pub async fn from_config(cfg: &HubConfig) -> Result<Self> {
        Ok(Self {
            authority: Arc::new(HttpRegistryClient::new(&cfg.registry)?),
            frames: source_from_config(&cfg.camera)?,
            analyzer: Arc::new(OpenAiAnalyzer::new(&cfg.analyzer)?),
            store: Arc::new(JsonlAlertStore::open(&cfg.store.path).await?),
        })
    }
}

pub struct Hub {
    pub context: HubContext,
    pub router: Router,
    pub tasks: Vec<JoinHandle<()>>,
}

/// Adresse locale vue depuis l'autorité registre (route sortante), sans trafic réel.
/// La résolution DNS passe par tokio, sans bloquer le runtime.
pub async fn local_ip_towards(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let port = parsed.port_or_known_default()?;
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect((host, port)).await.ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

pub async fn register_hub(
    authority: &dyn RegistryAuthority,
    hub: &HubConf,
    ip: &str,
    timeout: Duration,
) -> Result<HubIdentity> {
    let attempts = hub.register_attempts.max(1);
    for attempt in 1..=attempts {
        match bounded("register hub", timeout, authority.register_hub(&hub.name, ip)).await {
            Ok(id) => {
                info!(hub_id = id, name = %hub.name, ip = %ip, "hub registered");
                return Ok(HubIdentity { id, name: hub.name.clone() });
            }
            Err(e) => {
                warn!(attempt, attempts, error = %e, "hub registration failed");
                if attempt < attempts {
                    tokio::time::sleep(Duration::from_secs(hub.register_retry_secs)).await;
                }
            }
        }
    }
    match hub.fallback_id {
        Some(id) => {
            warn!(hub_id = id, "registry authority unreachable, using configured fallback hub id");
            Ok(HubIdentity { id, name: hub.name.clone() })
        }
        None => Err(HubError::Config(
            "hub registration failed and no hub.fallback_id is configured".into(),
        )),
    }
}

pub async fn start(cfg: HubConfig) -> Result<Hub> {
    let collaborators = Collaborators::from_config(&cfg).await?;
    start_with(cfg, collaborators).await
}

pub async fn start_with(cfg: HubConfig, collab: Collaborators) -> Result<Hub> {
    let health = HealthTracker::new();
    let registry_timeout = cfg.registry.timeout();

    let ip = match cfg.hub.ip.clone() {
        Some(ip) => ip,
        None => local_ip_towards(&cfg.registry.url).await.unwrap_or_else(|| "127.0.0.1".to_string()),
    };
    let identity = Arc::new(register_hub(collab.authority.as_ref(), &cfg.hub, &ip, registry_timeout).await?);

    let cache = Arc::new(DeviceRegistryCache::new());
    let sync = ConfigSync::new(
        collab.authority.clone(),
        cache.clone(),
        health.clone(),
        identity.id,
        registry_timeout,
    );
    match sync.run_once().await {
        Ok(nodes) => info!(nodes, "initial config sync done"),
        Err(e) => error!(error = %e, "initial config sync failed, every sensor armed until next sync"),
    }

    let camera = Arc::new(Camera::new(collab.frames, cfg.camera.image_dir.clone(), cfg.camera.timeout()));
    tokio::fs::create_dir_all(camera.image_dir()).await?;
    let fanout = Fanout::from_config(&cfg.pipeline);
    let pipeline = Arc::new(
        AlertPipeline::new(
            camera.clone(),
            collab.analyzer,
            collab.store.clone(),
            fanout.clone(),
            cfg.analyzer.timeout(),
        )
        .with_persist_timeout(cfg.store.timeout()),
    );
    let registrar = Arc::new(
        AutoRegistrar::new(collab.authority.clone(), cache.clone(), identity.id, registry_timeout)
            .with_retry_after(cfg.registry.retry_after()),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        registrar,
        cache.clone(),
        pipeline,
        health.clone(),
        cfg.pipeline.workers,
    ));

    let (queue_tx, queue_rx) = mpsc::channel(cfg.mqtt.queue_capacity.max(1));
    let tasks = vec![
        sync.spawn(cfg.registry.sync_interval()),
        dispatcher.spawn(queue_rx),
        spawn_mqtt_listener(cfg.mqtt.clone(), queue_tx, health.clone()),
    ];

    let context = HubContext {
        identity,
        registry: cache,
        fanout,
        store: collab.store,
        camera,
        health,
        auth: Arc::new(TokenValidator::new(&cfg.auth.jwt_secret)),
        stream_interval: cfg.camera.stream_interval(),
    };
    if cfg.auth.jwt_secret.is_empty() {
        warn!("auth.jwt_secret is empty: every gated route will answer 401");
    }
    let router = build_router(context.clone());
    Ok(Hub { context, router, tasks })
}
