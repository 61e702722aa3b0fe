/*!
Builders de messages capteurs

Produit le topic `<ns>/sensor/<node>/<sensor>` et le payload JSON tel que
publié par le firmware des nœuds (motion, ts, pin).
*/

use anyhow::Result;
use rumqttc::{AsyncClient, QoS};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct SensorPayloadBuilder {
    node: String,
    sensor: String,
    motion: bool,
    pin: Option<String>,
    ts: Option<String>,
}

impl SensorPayloadBuilder {
    pub fn new<S: Into<String>>(node: S, sensor: S) -> Self {
        Self { node: node.into(), sensor: sensor.into(), motion: false, pin: None, ts: None }
    }

    pub fn motion(mut self, motion: bool) -> Self {
        self.motion = motion;
        self
    }

    pub fn pin<S: Into<String>>(mut self, pin: S) -> Self {
        self.pin = Some(pin.into());
        self
    }

    /// Horodatage fixe (sinon l'heure courante au moment de la sérialisation)
    pub fn at<S: Into<String>>(mut self, ts: S) -> Self {
        self.ts = Some(ts.into());
        self
    }

    pub fn topic(&self, namespace: &str) -> String {
        format!("{namespace}/sensor/{}/{}", self.node, self.sensor)
    }

    pub fn to_value(&self) -> Value {
        let ts = self.ts.clone().unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
        let mut payload = json!({
            "node": self.node,
            "sensor": self.sensor,
            "motion": self.motion,
            "ts": ts,
        });
        if let Some(pin) = &self.pin {
            payload["pin"] = json!(pin);
        }
        payload
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    pub async fn publish(&self, client: &AsyncClient, namespace: &str) -> Result<()> {
        let topic = self.topic(namespace);
        client.publish(&topic, QoS::AtLeastOnce, false, self.to_json()).await?;
        log::info!("📤 published to {topic} (motion={})", self.motion);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_shapes_topic_and_payload() {
        let b = SensorPayloadBuilder::new("esp01", "pir").motion(true).pin("14").at("2025-01-01T10:00:00Z");
        assert_eq!(b.topic("home"), "home/sensor/esp01/pir");
        let v = b.to_value();
        assert_eq!(v["motion"], true);
        assert_eq!(v["pin"], "14");
        assert_eq!(v["ts"], "2025-01-01T10:00:00Z");
    }

    #[test]
    fn pin_is_omitted_when_unset() {
        let v = SensorPayloadBuilder::new("esp02", "door").to_value();
        assert_eq!(v["motion"], false);
        assert!(v.get("pin").is_none());
        assert!(v["ts"].as_str().is_some());
    }
}
