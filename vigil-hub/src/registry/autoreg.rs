/**
 * AUTO-ENREGISTREMENT - Création paresseuse des nœuds et capteurs inconnus
 *
 * FONCTIONNEMENT :
 * 1. Nœud absent du cache → create_node(location), merge de l'id
 * 2. Capteur absent sous ce nœud → create_sensor(type, pin), merge
 * Un échec est journalisé et l'événement continue (drapeau absent = armé).
 *
 * COURSE : deux événements pour le même nœud inconnu passent par un verrou
 * async par nœud, puis relisent le cache. Un seul create_node part par hub.
 * Entre plusieurs hubs, des doublons restent possibles.
 *
 * ÉCHEC : une création ratée est mémorisée `retry_after` (30 s par défaut).
 * Pendant ce délai les événements du même nœud/capteur n'appellent plus
 * l'autorité et passent directement (armés). Une sync qui rapporte le nœud
 * le rend connu, l'entrée n'est alors plus consultée.
 */

use super::{flag_key, DeviceRegistryCache, RegistryAuthority};
use crate::error::bounded;
use crate::models::SensorEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Pin envoyé quand le payload n'en porte pas.
pub const UNKNOWN_PIN: &str = "unknown";

pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Known,
    Created(i64),
    Failed,
    /// Échec récent, pas de nouvel essai avant expiration
    Deferred,
    /// Pas tenté (nœud sans id connu)
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub node: Step,
    pub sensor: Step,
}

impl Registration {
    pub const KNOWN: Registration = Registration { node: Step::Known, sensor: Step::Known };
}

pub struct AutoRegistrar {
    authority: Arc<dyn RegistryAuthority>,
    cache: Arc<DeviceRegistryCache>,
    hub_id: i64,
    timeout: Duration,
    retry_after: Duration,
    node_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Clé nœud ou "nœud/capteur" → instant de l'échec
    failures: Mutex<HashMap<String, Instant>>,
}

impl AutoRegistrar {
    pub fn new(
        authority: Arc<dyn RegistryAuthority>,
        cache: Arc<DeviceRegistryCache>,
        hub_id: i64,
        timeout: Duration,
    ) -> Self {
        Self {
            authority,
            cache,
            hub_id,
            timeout,
            retry_after: DEFAULT_RETRY_AFTER,
            node_locks: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    fn backing_off(&self, key: &str) -> bool {
        let mut failures = self.failures.lock();
        let expired = match failures.get(key) {
            Some(at) => at.elapsed() >= self.retry_after,
            None => return false,
        };
        if expired {
            failures.remove(key);
        }
        !expired
    }

    fn record_failure(&self, key: String) {
        self.failures.lock().insert(key, Instant::now());
    }

    fn clear_failure(&self, key: &str) {
        self.failures.lock().remove(key);
    }

    fn node_lock(&self, node: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.node_locks.lock().entry(node.to_string()).or_default().clone()
    }

    pub async fn ensure_registered(&self, event: &SensorEvent) -> Registration {
        let (node, sensor) = (event.node.as_str(), event.sensor.as_str());
        let snapshot = self.cache.read();
        if snapshot.knows_sensor(node, sensor) {
            return Registration::KNOWN;
        }
        if !snapshot.knows_node(node) && self.backing_off(node) {
            return Registration { node: Step::Deferred, sensor: Step::Skipped };
        }
        if snapshot.knows_node(node) && self.backing_off(&flag_key(node, sensor)) {
            return Registration { node: Step::Known, sensor: Step::Deferred };
        }
        drop(snapshot);

        let lock = self.node_lock(node);
        let _guard = lock.lock().await;

        // relecture : un autre événement a pu enregistrer pendant l'attente
        let snapshot = self.cache.read();
        if snapshot.knows_sensor(node, sensor) {
            debug!(node = %node, sensor = %sensor, "registered concurrently, skipping creation");
            return Registration::KNOWN;
        }

        let (node_step, node_id) = if snapshot.knows_node(node) {
            (Step::Known, snapshot.node_id(node))
        } else if self.backing_off(node) {
            debug!(node = %node, "node creation failed recently, not retrying yet");
            (Step::Deferred, None)
        } else {
            let created = bounded(
                "create node",
                self.timeout,
                self.authority.create_node(self.hub_id, node),
            )
            .await;
            match created {
                Ok(id) => {
                    self.clear_failure(node);
                    self.cache.merge_node(node, id);
                    info!(node = %node, node_id = id, "node auto-registered");
                    (Step::Created(id), Some(id))
                }
                Err(e) => {
                    warn!(node = %node, error = %e, "node auto-registration failed, treating as present");
                    self.record_failure(node.to_string());
                    (Step::Failed, None)
                }
            }
        };

        let Some(node_id) = node_id else {
            if node_step == Step::Known {
                warn!(node = %node, sensor = %sensor, "node has no registry id, sensor not created");
            }
            return Registration { node: node_step, sensor: Step::Skipped };
        };

        let sensor_key = flag_key(node, sensor);
        if self.backing_off(&sensor_key) {
            debug!(node = %node, sensor = %sensor, "sensor creation failed recently, not retrying yet");
            return Registration { node: node_step, sensor: Step::Deferred };
        }

        let pin = event.payload.pin_label().unwrap_or_else(|| UNKNOWN_PIN.to_string());
        let created = bounded(
            "create sensor",
            self.timeout,
            self.authority.create_sensor(node_id, sensor, &pin),
        )
        .await;
        let sensor_step = match created {
            Ok(id) => {
                self.clear_failure(&sensor_key);
                self.cache.merge_sensor(node, sensor);
                info!(node = %node, sensor = %sensor, sensor_id = id, pin = %pin, "sensor auto-registered");
                Step::Created(id)
            }
            Err(e) => {
                warn!(node = %node, sensor = %sensor, error = %e, "sensor auto-registration failed");
                self.record_failure(sensor_key);
                Step::Failed
            }
        };
        Registration { node: node_step, sensor: sensor_step }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRegistrySnapshot;
    use crate::testing::{event, FakeAuthority};

    fn registrar(authority: Arc<FakeAuthority>, cache: Arc<DeviceRegistryCache>) -> AutoRegistrar {
        AutoRegistrar::new(authority, cache, 1, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn unknown_node_and_sensor_are_created_and_merged() {
        let authority = Arc::new(FakeAuthority::new());
        let cache = Arc::new(DeviceRegistryCache::new());
        let reg = registrar(authority.clone(), cache.clone());

        let mut ev = event("esp01", "pir", true);
        ev.payload.pin = Some(serde_json::json!(14));
        let outcome = reg.ensure_registered(&ev).await;

        assert!(matches!(outcome.node, Step::Created(_)));
        assert!(matches!(outcome.sensor, Step::Created(_)));
        assert!(cache.read().knows_sensor("esp01", "pir"));
        assert_eq!(authority.created_sensors(), vec![("esp01".to_string(), "pir".to_string(), "14".to_string())]);

        // deuxième passage : plus aucun appel
        assert_eq!(reg.ensure_registered(&ev).await, Registration::KNOWN);
        assert_eq!(authority.node_calls(), 1);
    }

    #[tokio::test]
    async fn known_node_only_creates_sensor() {
        let authority = Arc::new(FakeAuthority::new());
        let mut snap = DeviceRegistrySnapshot::new();
        snap.insert_node("esp01", Some(7));
        let cache = Arc::new(DeviceRegistryCache::with_snapshot(snap));
        let reg = registrar(authority.clone(), cache);

        let outcome = reg.ensure_registered(&event("esp01", "door", true)).await;
        assert_eq!(outcome.node, Step::Known);
        assert!(matches!(outcome.sensor, Step::Created(_)));
        assert_eq!(authority.node_calls(), 0);
        assert_eq!(authority.created_sensors()[0].2, UNKNOWN_PIN);
    }

    #[tokio::test]
    async fn unreachable_authority_fails_open() {
        let authority = Arc::new(FakeAuthority::new());
        authority.set_unreachable(true);
        let cache = Arc::new(DeviceRegistryCache::new());
        let reg = registrar(authority.clone(), cache.clone());

        let outcome = reg.ensure_registered(&event("esp09", "pir", true)).await;
        assert_eq!(outcome, Registration { node: Step::Failed, sensor: Step::Skipped });
        assert!(!cache.read().knows_node("esp09"));
        assert!(cache.read().is_enabled("esp09", "pir"));
    }

    #[tokio::test]
    async fn failed_node_is_not_retried_until_backoff_expires() {
        let authority = Arc::new(FakeAuthority::new());
        authority.set_unreachable(true);
        let cache = Arc::new(DeviceRegistryCache::new());
        let reg = registrar(authority.clone(), cache.clone()).with_retry_after(Duration::from_millis(80));

        let ev = event("esp09", "pir", true);
        assert_eq!(reg.ensure_registered(&ev).await.node, Step::Failed);
        assert_eq!(reg.ensure_registered(&ev).await, Registration { node: Step::Deferred, sensor: Step::Skipped });
        assert_eq!(authority.node_calls(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        authority.set_unreachable(false);
        assert!(matches!(reg.ensure_registered(&ev).await.node, Step::Created(_)));
        assert_eq!(authority.node_calls(), 2);
    }

    #[tokio::test]
    async fn failed_sensor_on_known_node_is_deferred() {
        let authority = Arc::new(FakeAuthority::new());
        authority.set_unreachable(true);
        let mut snap = DeviceRegistrySnapshot::new();
        snap.insert_node("esp01", Some(7));
        let reg = registrar(authority.clone(), Arc::new(DeviceRegistryCache::with_snapshot(snap)));

        let ev = event("esp01", "door", true);
        assert_eq!(reg.ensure_registered(&ev).await.sensor, Step::Failed);
        assert_eq!(reg.ensure_registered(&ev).await, Registration { node: Step::Known, sensor: Step::Deferred });
    }

    #[tokio::test]
    async fn concurrent_first_sightings_create_one_node() {
        let authority = Arc::new(FakeAuthority::new());
        authority.set_delay(Duration::from_millis(30));
        let cache = Arc::new(DeviceRegistryCache::new());
        let reg = Arc::new(registrar(authority.clone(), cache));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let reg = reg.clone();
                tokio::spawn(async move { reg.ensure_registered(&event("esp02", "pir", true)).await })
            })
            .collect();
        let mut created = 0;
        for h in handles {
            if matches!(h.await.unwrap().node, Step::Created(_)) {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(authority.node_calls(), 1);
        assert_eq!(authority.created_sensors().len(), 1);
    }
}
