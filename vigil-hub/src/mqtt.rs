/**
 * ÉCOUTEUR MQTT - Réception des événements capteurs
 *
 * RÔLE : Tenir la connexion au broker, s'abonner à `<ns>/sensor/+/+`,
 * décoder chaque message et le pousser dans la file bornée du dispatcher.
 *
 * FONCTIONNEMENT :
 * - Une seule tâche poll() l'eventloop rumqttc, rien d'autre n'y tourne
 * - try_send : file pleine ⇒ événement jeté (loggé), jamais de blocage du poll
 * - Erreur de connexion : pause puis poll() suivant ⇒ reconnexion rumqttc
 * - Chaque ConnAck ré-émet l'abonnement (session propre côté broker)
 */

use crate::config::MqttConf;
use crate::error::{HubError, Result};
use crate::health::HealthTracker;
use crate::models::{SensorEvent, SensorPayload};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub fn subscription_pattern(namespace: &str) -> String {
    format!("{namespace}/sensor/+/+")
}

/// `<ns>/sensor/<node>/<sensor>` → (node, sensor)
pub fn parse_topic(namespace: &str, topic: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = topic.split('/').collect();
    match parts.as_slice() {
        [ns, "sensor", node, sensor] if *ns == namespace && !node.is_empty() && !sensor.is_empty() => {
            Ok((node.to_string(), sensor.to_string()))
        }
        _ => Err(HubError::MalformedTopic(topic.to_string())),
    }
}

pub fn decode_event(namespace: &str, topic: &str, payload: &[u8]) -> Result<SensorEvent> {
    let (node, sensor) = parse_topic(namespace, topic)?;
    let malformed = |reason: String| HubError::MalformedPayload { topic: topic.to_string(), reason };

    let value: Value = serde_json::from_slice(payload).map_err(|e| malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(malformed("payload is not a JSON object".into()));
    }
    let payload: SensorPayload = serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;

    Ok(SensorEvent { node, sensor, payload, received_at: OffsetDateTime::now_utc() })
}

pub fn mqtt_options(cfg: &MqttConf) -> MqttOptions {
    let mut opts = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
    opts.set_keep_alive(cfg.keep_alive());
    opts
}

pub fn spawn_mqtt_listener(
    cfg: MqttConf,
    queue: mpsc::Sender<SensorEvent>,
    health: HealthTracker,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(&cfg), 10);
        let pattern = subscription_pattern(&cfg.namespace);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    match client.try_subscribe(pattern.as_str(), QoS::AtLeastOnce) {
                        Ok(()) => info!(broker = %cfg.host, pattern = %pattern, "connected, subscription sent"),
                        Err(e) => warn!(pattern = %pattern, error = %e, "subscribe request failed"),
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    match decode_event(&cfg.namespace, &p.topic, &p.payload) {
                        Ok(event) => match queue.try_send(event) {
                            Ok(()) => {}
                            Err(TrySendError::Full(event)) => {
                                warn!(node = %event.node, sensor = %event.sensor, "event queue full, dropping event");
                                health.record_dropped();
                            }
                            Err(TrySendError::Closed(_)) => {
                                error!("dispatcher gone, stopping MQTT listener");
                                return;
                            }
                        },
                        Err(e) => {
                            warn!(topic = %p.topic, error = %e, "dropping malformed message");
                            health.record_dropped();
                        }
                    }
                }
                Ok(other) => debug!(event = ?other, "mqtt event"),
                Err(e) => {
                    warn!(broker = %cfg.host, error = %e, "MQTT connection error, reconnecting");
                    health.increment_reconnects();
                    tokio::time::sleep(cfg.reconnect_delay()).await;
                }
            }
        }
    })
}
