/**
 * DISPATCH - De la file d'événements au pipeline
 *
 * Pour chaque événement, dans cet ordre :
 * 1. auto-enregistrement si nœud/capteur inconnu
 * 2. drapeau (absent ⇒ armé) ; désarmé ⇒ fin
 * 3. motion == false ⇒ fin
 * 4. pipeline d'alerte
 *
 * Chaque événement tourne dans sa propre tâche, au plus `workers` en parallèle.
 * Quand tous les workers sont pris, la file se remplit et l'écouteur jette.
 */

use crate::health::HealthTracker;
use crate::models::SensorEvent;
use crate::pipeline::AlertPipeline;
use crate::registry::{AutoRegistrar, DeviceRegistryCache};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Disarmed,
    NoMotion,
    Processed,
    Aborted,
}

pub struct Dispatcher {
    registrar: Arc<AutoRegistrar>,
    cache: Arc<DeviceRegistryCache>,
    pipeline: Arc<AlertPipeline>,
    health: HealthTracker,
    workers: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        registrar: Arc<AutoRegistrar>,
        cache: Arc<DeviceRegistryCache>,
        pipeline: Arc<AlertPipeline>,
        health: HealthTracker,
        workers: usize,
    ) -> Self {
        Self { registrar, cache, pipeline, health, workers: Arc::new(Semaphore::new(workers.max(1))) }
    }

    pub async fn handle(&self, event: SensorEvent) -> Disposition {
        self.registrar.ensure_registered(&event).await;

        if !self.cache.read().is_enabled(&event.node, &event.sensor) {
            debug!(node = %event.node, sensor = %event.sensor, "sensor disarmed, event dropped");
            self.health.record_dropped();
            return Disposition::Disarmed;
        }
        if !event.payload.motion {
            debug!(node = %event.node, sensor = %event.sensor, "no motion, nothing to do");
            return Disposition::NoMotion;
        }

        match self.pipeline.run(&event).await {
            Ok(_) => {
                self.health.record_processed();
                Disposition::Processed
            }
            Err(_) => {
                self.health.record_failed();
                Disposition::Aborted
            }
        }
    }

    pub fn spawn(self: Arc<Self>, mut queue: mpsc::Receiver<SensorEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = queue.recv().await {
                let Ok(permit) = self.workers.clone().acquire_owned().await else {
                    break;
                };
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    dispatcher.handle(event).await;
                });
            }
            debug!("event queue closed, dispatcher stopped");
        })
    }
}
