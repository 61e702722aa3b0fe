use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Payload JSON publié par un nœud capteur.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorPayload {
    #[serde(default)]
    pub motion: bool,
    #[serde(default, alias = "ts")]
    pub timestamp: Option<Value>,
    /// Numéro de broche, utilisé seulement à l'auto-enregistrement
    #[serde(default)]
    pub pin: Option<Value>,
}

impl SensorPayload {
    /// La broche peut arriver en texte ou en nombre (GPIO brut côté firmware).
    pub fn pin_label(&self) -> Option<String> {
        match self.pin.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Événement décodé, transitoire (jamais persisté tel quel).
#[derive(Debug, Clone)]
pub struct SensorEvent {
    pub node: String,
    pub sensor: String,
    pub payload: SensorPayload,
    pub received_at: OffsetDateTime,
}

/// Alerte en attente d'identifiant (avant écriture par le store).
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub timestamp: OffsetDateTime,
    pub node: String,
    pub sensor: String,
    pub image_path: String,
    pub description: String,
}

impl NewAlert {
    pub fn with_id(self, id: u64) -> Alert {
        Alert {
            id,
            timestamp: self.timestamp,
            node: self.node,
            sensor: self.sensor,
            image_path: self.image_path,
            description: self.description,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub node: String,
    pub sensor: String,
    pub image_path: String,
    pub description: String,
}

/// Message poussé aux abonnés temps réel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotification {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub node: String,
    pub sensor: String,
    pub image_path: String,
    pub description: String,
}

impl From<&Alert> for AlertNotification {
    fn from(alert: &Alert) -> Self {
        Self {
            timestamp: alert.timestamp,
            node: alert.node.clone(),
            sensor: alert.sensor.clone(),
            image_path: alert.image_path.clone(),
            description: alert.description.clone(),
        }
    }
}

/// Identité attribuée par l'autorité registre au démarrage, immuable ensuite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubIdentity {
    pub id: i64,
    pub name: String,
}

// --- Format filaire de l'autorité registre ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteHub {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub nodes: Vec<RemoteNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteNode {
    pub id: i64,
    /// Identifiant du nœud côté topic
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub sensors: Vec<RemoteSensor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSensor {
    pub id: i64,
    #[serde(rename = "type")]
    pub sensor_type: String,
    #[serde(default)]
    pub pin: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubRegistered {
    #[serde(default)]
    pub status: Option<String>,
    pub hub_id: i64,
}

/// Réponse minimale d'une création (nœud ou capteur).
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedRecord {
    pub id: i64,
}
