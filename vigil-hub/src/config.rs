use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HubConfig {
    pub hub: HubConf,
    pub mqtt: MqttConf,
    pub registry: RegistryConf,
    pub camera: CameraConf,
    pub analyzer: AnalyzerConf,
    pub store: StoreConf,
    pub auth: AuthConf,
    pub pipeline: PipelineConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HubConf {
    pub name: String,
    pub ip: Option<String>,
    pub bind: String,
    /// Id de repli si l'autorité registre reste injoignable au boot
    pub fallback_id: Option<i64>,
    pub register_attempts: u32,
    pub register_retry_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub namespace: String,
    pub keep_alive_secs: u64,
    pub queue_capacity: usize,
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RegistryConf {
    pub url: String,
    pub timeout_secs: u64,
    pub sync_interval_secs: u64,
    /// Pause avant de retenter une auto-création qui a échoué
    pub retry_after_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CameraSource {
    /// Caméra IP exposant une URL de snapshot JPEG
    Http { snapshot_url: String },
    /// Programme externe qui écrit un JPEG sur stdout (ex: ffmpeg sur /dev/video0)
    Command { program: String, #[serde(default)] args: Vec<String> },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CameraConf {
    pub source: CameraSource,
    pub image_dir: PathBuf,
    pub timeout_secs: u64,
    pub stream_interval_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AnalyzerConf {
    pub api_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConf {
    pub path: PathBuf,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AuthConf {
    pub jwt_secret: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConf {
    pub workers: usize,
    pub subscriber_timeout_ms: u64,
    pub fanout_concurrency: usize,
    pub subscriber_buffer: usize,
}

impl Default for HubConf {
    fn default() -> Self {
        Self {
            name: "vigil-hub".into(),
            ip: None,
            bind: "0.0.0.0:8000".into(),
            fallback_id: None,
            register_attempts: 5,
            register_retry_secs: 3,
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "vigil-hub".into(),
            namespace: "home".into(),
            keep_alive_secs: 60,
            queue_capacity: 256,
            reconnect_delay_secs: 2,
        }
    }
}

impl Default for RegistryConf {
    fn default() -> Self {
        Self {
            url: "http://localhost:8001".into(),
            timeout_secs: 5,
            sync_interval_secs: 10,
            retry_after_secs: 30,
        }
    }
}

impl Default for CameraSource {
    fn default() -> Self {
        // équivalent de la caméra index 0
        CameraSource::Command {
            program: "ffmpeg".into(),
            args: [
                "-loglevel", "error", "-f", "v4l2", "-i", "/dev/video0",
                "-frames:v", "1", "-f", "image2pipe", "-vcodec", "mjpeg", "-",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for CameraConf {
    fn default() -> Self {
        Self {
            source: CameraSource::default(),
            image_dir: PathBuf::from("images"),
            timeout_secs: 10,
            stream_interval_ms: 200,
        }
    }
}

impl Default for AnalyzerConf {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/responses".into(),
            model: "gpt-4.1-mini".into(),
            api_key: None,
            timeout_secs: 30,
            prompt: "It's an image from a security camera. Movement was detected via sensors. \
                     Please provide a detailed description of the cause and appearance."
                .into(),
        }
    }
}

impl Default for StoreConf {
    fn default() -> Self {
        Self { path: PathBuf::from("alerts/alerts.jsonl"), timeout_secs: 5 }
    }
}

impl Default for PipelineConf {
    fn default() -> Self {
        Self { workers: 4, subscriber_timeout_ms: 1000, fanout_concurrency: 16, subscriber_buffer: 32 }
    }
}

impl MqttConf {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(5))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl RegistryConf {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_secs)
    }
}

impl StoreConf {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl CameraConf {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stream_interval(&self) -> Duration {
        Duration::from_millis(self.stream_interval_ms.max(10))
    }
}

impl AnalyzerConf {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PipelineConf {
    pub fn subscriber_timeout(&self) -> Duration {
        Duration::from_millis(self.subscriber_timeout_ms)
    }
}

impl HubConfig {
    /// Surcharges d'environnement, appliquées après le fichier YAML.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("CENTRAL_API_URL") {
            self.registry.url = url;
        }
        if let Some(secs) = lookup("CONFIG_SYNC_INTERVAL").and_then(|v| v.parse().ok()) {
            self.registry.sync_interval_secs = secs;
        }
        if let Some(host) = lookup("MQTT_BROKER") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT").and_then(|v| v.parse().ok()) {
            self.mqtt.port = port;
        }
        if let Some(name) = lookup("HUB_NAME") {
            self.hub.name = name;
        }
        if let Some(secret) = lookup("VIGIL_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.analyzer.api_key = Some(key);
        }
    }
}

fn parse_config(txt: &str) -> HubConfig {
    if txt.trim().is_empty() {
        return HubConfig::default();
    }
    serde_yaml::from_str(txt).unwrap_or_else(|e| {
        warn!(error = %e, "invalid hub config, using defaults");
        HubConfig::default()
    })
}

pub async fn load_config() -> HubConfig {
    let path = std::env::var("VIGIL_HUB_CONFIG").unwrap_or_else(|_| "hub.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt)
    } else {
        warn!(path = %path, "no hub config file, using defaults");
        HubConfig::default()
    };
    cfg.apply_env(|key| std::env::var(key).ok());
    cfg
}
