/**
 * SYNCHRONISATION DE CONFIG - Boucle périodique registre → cache
 *
 * RÔLE : Rapatrier la hiérarchie complète (nœuds → capteurs → status) et
 * remplacer le snapshot du cache. status == "enabled" ⇒ armé, tout le reste ⇒ désarmé.
 *
 * FONCTIONNEMENT :
 * - Intervalle fixe, pas de backoff ; un tick manqué est décalé (jamais rattrapé en rafale)
 * - Un seul run à la fois : la boucle attend la fin du run avant le tick suivant
 * - Échec : log, snapshot précédent conservé
 */

use crate::error::{bounded, Result};
use crate::health::HealthTracker;
use crate::models::RemoteHub;
use crate::registry::client::ENABLED_STATUS;
use crate::registry::{DeviceRegistryCache, DeviceRegistrySnapshot, RegistryAuthority};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Construit un snapshot depuis la réponse `GET /hub/{id}/config`.
/// Les nœuds sans `location` ne sont pas adressables par topic : ignorés.
pub fn snapshot_from_config(hub: &RemoteHub) -> DeviceRegistrySnapshot {
    let mut snapshot = DeviceRegistrySnapshot::new();
    for node in &hub.nodes {
        let Some(location) = node.location.as_deref().filter(|l| !l.is_empty()) else {
            debug!(node_id = node.id, "node without location skipped");
            continue;
        };
        snapshot.insert_node(location, Some(node.id));
        for sensor in &node.sensors {
            let enabled = sensor.status.as_deref() == Some(ENABLED_STATUS);
            snapshot.insert_sensor(location, &sensor.sensor_type, Some(enabled));
        }
    }
    snapshot
}

#[derive(Clone)]
pub struct ConfigSync {
    authority: Arc<dyn RegistryAuthority>,
    cache: Arc<DeviceRegistryCache>,
    health: HealthTracker,
    hub_id: i64,
    timeout: Duration,
}

impl ConfigSync {
    pub fn new(
        authority: Arc<dyn RegistryAuthority>,
        cache: Arc<DeviceRegistryCache>,
        health: HealthTracker,
        hub_id: i64,
        timeout: Duration,
    ) -> Self {
        Self { authority, cache, health, hub_id, timeout }
    }

    /// Un run complet. Renvoie le nombre de nœuds du nouveau snapshot.
    pub async fn run_once(&self) -> Result<usize> {
        let ticket = self.cache.sync_ticket();
        let fetched = bounded("fetch hub config", self.timeout, self.authority.fetch_config(self.hub_id)).await;
        match fetched {
            Ok(hub) => {
                let snapshot = snapshot_from_config(&hub);
                let nodes = snapshot.node_count();
                self.cache.replace_all_since(snapshot, ticket);
                self.health.record_sync(true);
                debug!(hub_id = self.hub_id, nodes, "registry snapshot replaced");
                Ok(nodes)
            }
            Err(e) => {
                self.health.record_sync(false);
                Err(e)
            }
        }
    }

    pub fn spawn(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // le premier tick est immédiat et la sync initiale vient d'avoir lieu
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = self.run_once().await {
                    warn!(hub_id = self.hub_id, error = %e, "config sync failed, keeping previous snapshot");
                }
            }
        })
    }
}
