/**
 * DIFFUSION TEMPS RÉEL - Abonnés live aux notifications d'alerte
 *
 * RÔLE : Tenir l'ensemble des abonnés (un canal borné chacun) et leur pousser
 * chaque notification indépendamment.
 *
 * FONCTIONNEMENT :
 * - subscribe()/unsubscribe() : côté serveur (connexion websocket)
 * - broadcast() : côté pipeline ; copie des senders sous verrou puis envois
 *   concurrents hors verrou, chacun borné par `send_timeout`
 * - Abonné fermé ou trop lent → retiré, les autres sont servis quand même
 */

use crate::config::PipelineConf;
use crate::models::AlertNotification;
use crate::state::{new_state, Shared};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct Subscription {
    pub id: Uuid,
    pub receiver: mpsc::Receiver<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub removed: usize,
}

#[derive(Clone)]
pub struct Fanout {
    subscribers: Shared<HashMap<Uuid, mpsc::Sender<String>>>,
    timeout: Duration,
    concurrency: usize,
    buffer: usize,
}

impl Fanout {
    pub fn new(timeout: Duration, concurrency: usize, buffer: usize) -> Self {
        Self {
            subscribers: new_state(HashMap::new()),
            timeout,
            concurrency: concurrency.max(1),
            buffer: buffer.max(1),
        }
    }

    pub fn from_config(cfg: &PipelineConf) -> Self {
        Self::new(cfg.subscriber_timeout(), cfg.fanout_concurrency, cfg.subscriber_buffer)
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        self.subscribers.lock().insert(id, tx);
        debug!(subscriber = %id, "subscriber connected");
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: Uuid) {
        if self.subscribers.lock().remove(&id).is_some() {
            debug!(subscriber = %id, "subscriber disconnected");
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn broadcast(&self, notification: &AlertNotification) -> BroadcastReport {
        let message = match serde_json::to_string(notification) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "cannot serialize alert notification");
                return BroadcastReport::default();
            }
        };
        self.broadcast_text(message).await
    }

    pub async fn broadcast_text(&self, message: String) -> BroadcastReport {
        let targets: Vec<(Uuid, mpsc::Sender<String>)> =
            self.subscribers.lock().iter().map(|(id, tx)| (*id, tx.clone())).collect();
        if targets.is_empty() {
            return BroadcastReport::default();
        }

        let timeout = self.timeout;
        let attempted = targets.len();
        let failed: Vec<Uuid> = stream::iter(targets)
            .map(|(id, tx)| {
                let message = message.clone();
                async move { tx.send_timeout(message, timeout).await.err().map(|_| id) }
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|failed| async move { failed })
            .collect()
            .await;

        let mut report = BroadcastReport { delivered: attempted - failed.len(), removed: 0 };
        {
            let mut subscribers = self.subscribers.lock();
            for id in &failed {
                if subscribers.remove(id).is_some() {
                    report.removed += 1;
                }
            }
        }
        for id in &failed {
            warn!(subscriber = %id, "delivery failed or timed out, subscriber removed");
        }
        report
    }
}
