/**
 * STOCKAGE DES ALERTES - Historique écrit-une-fois
 *
 * RÔLE :
 * - AlertStore : attribue l'id, persiste, sert les N plus récentes (plus récente d'abord)
 * - JsonlAlertStore : une alerte par ligne JSON, seules les MAX_RECENT_LIMIT
 *   dernières restent en mémoire
 * - MemoryAlertStore : sans disque (démos, tests)
 *
 * Une ligne illisible au chargement est ignorée avec un warning, le reste du
 * fichier reste exploitable.
 */

use crate::error::{HubError, Result};
use crate::models::{Alert, NewAlert};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

pub const DEFAULT_RECENT_LIMIT: usize = 20;
/// Plafond de `recent()`, et taille de la fenêtre gardée en mémoire
pub const MAX_RECENT_LIMIT: usize = 500;

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn append(&self, alert: NewAlert) -> Result<Alert>;
    async fn recent(&self, limit: usize) -> Result<Vec<Alert>>;
}

fn newest_first<'a>(alerts: impl DoubleEndedIterator<Item = &'a Alert>, limit: usize) -> Vec<Alert> {
    alerts.rev().take(limit).cloned().collect()
}

struct RecentWindow {
    alerts: VecDeque<Alert>,
    next_id: u64,
}

impl RecentWindow {
    fn push(&mut self, alert: Alert) {
        self.next_id = self.next_id.max(alert.id + 1);
        if self.alerts.len() == MAX_RECENT_LIMIT {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }
}

struct JsonlInner {
    path: PathBuf,
    /// Sérialise attribution d'id + écriture disque
    write_lock: tokio::sync::Mutex<()>,
    window: Mutex<RecentWindow>,
}

/// Les écritures tournent dans une tâche détachée : un appelant qui abandonne
/// (timeout) n'interrompt jamais une ligne en cours, l'id et la fenêtre
/// restent cohérents avec le fichier.
pub struct JsonlAlertStore {
    inner: Arc<JsonlInner>,
}

impl JsonlAlertStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let (window, total) = load_lines(&path).await?;
        info!(path = %path.display(), alerts = total, next_id = window.next_id, "alert store opened");
        Ok(Self {
            inner: Arc::new(JsonlInner {
                path,
                write_lock: tokio::sync::Mutex::new(()),
                window: Mutex::new(window),
            }),
        })
    }

    #[cfg(test)]
    fn cached(&self) -> usize {
        self.inner.window.lock().alerts.len()
    }
}

async fn load_lines(path: &Path) -> Result<(RecentWindow, usize)> {
    let mut window = RecentWindow { alerts: VecDeque::new(), next_id: 1 };
    let txt = match tokio::fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((window, 0)),
        Err(e) => return Err(e.into()),
    };
    let mut alerts = Vec::new();
    for (n, line) in txt.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        match serde_json::from_str::<Alert>(line) {
            Ok(alert) => alerts.push(alert),
            Err(e) => warn!(line = n + 1, error = %e, "skipping unreadable alert line"),
        }
    }
    alerts.sort_by_key(|a| a.id);
    let total = alerts.len();
    for alert in alerts {
        window.push(alert);
    }
    Ok((window, total))
}

impl JsonlInner {
    async fn append(&self, alert: NewAlert) -> Result<Alert> {
        let _guard = self.write_lock.lock().await;
        let id = self.window.lock().next_id;
        let alert = alert.with_id(id);

        let mut line = serde_json::to_string(&alert)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| HubError::Store(format!("cannot open {}: {e}", self.path.display())))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| HubError::Store(format!("write to {} failed: {e}", self.path.display())))?;
        file.flush().await?;

        self.window.lock().push(alert.clone());
        Ok(alert)
    }
}

#[async_trait]
impl AlertStore for JsonlAlertStore {
    async fn append(&self, alert: NewAlert) -> Result<Alert> {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.append(alert).await })
            .await
            .map_err(|e| HubError::Store(format!("alert write task failed: {e}")))?
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Alert>> {
        Ok(newest_first(self.inner.window.lock().alerts.iter(), limit))
    }
}

#[derive(Default)]
pub struct MemoryAlertStore {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn append(&self, alert: NewAlert) -> Result<Alert> {
        let mut alerts = self.alerts.lock();
        let alert = alert.with_id(alerts.len() as u64 + 1);
        alerts.push(alert.clone());
        Ok(alert)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Alert>> {
        Ok(newest_first(self.alerts.lock().iter(), limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::bounded;
    use std::time::Duration;
    use time::OffsetDateTime;

    fn new_alert(node: &str) -> NewAlert {
        NewAlert {
            timestamp: OffsetDateTime::now_utc(),
            node: node.into(),
            sensor: "pir".into(),
            image_path: "images/cap.jpg".into(),
            description: "motion".into(),
        }
    }

    #[tokio::test]
    async fn jsonl_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts").join("alerts.jsonl");
        {
            let store = JsonlAlertStore::open(&path).await.unwrap();
            assert_eq!(store.append(new_alert("esp01")).await.unwrap().id, 1);
            assert_eq!(store.append(new_alert("esp02")).await.unwrap().id, 2);
        }
        let store = JsonlAlertStore::open(&path).await.unwrap();
        let third = store.append(new_alert("esp03")).await.unwrap();
        assert_eq!(third.id, 3);
        let recent = store.recent(DEFAULT_RECENT_LIMIT).await.unwrap();
        let nodes: Vec<_> = recent.iter().map(|a| a.node.as_str()).collect();
        assert_eq!(nodes, ["esp03", "esp02", "esp01"]);
    }

    #[tokio::test]
    async fn corrupt_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let good = serde_json::to_string(&new_alert("esp01").with_id(4)).unwrap();
        tokio::fs::write(&path, format!("{good}\n{{not json\n\n")).await.unwrap();

        let store = JsonlAlertStore::open(&path).await.unwrap();
        assert_eq!(store.recent(10).await.unwrap().len(), 1);
        assert_eq!(store.append(new_alert("esp02")).await.unwrap().id, 5);
    }

    #[tokio::test]
    async fn memory_window_is_capped_and_ids_keep_growing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let store = JsonlAlertStore::open(&path).await.unwrap();
        for _ in 0..MAX_RECENT_LIMIT + 7 {
            store.append(new_alert("esp01")).await.unwrap();
        }
        assert_eq!(store.cached(), MAX_RECENT_LIMIT);
        let recent = store.recent(usize::MAX).await.unwrap();
        assert_eq!(recent.len(), MAX_RECENT_LIMIT);
        assert_eq!(recent[0].id, MAX_RECENT_LIMIT as u64 + 7);
        assert_eq!(recent[MAX_RECENT_LIMIT - 1].id, 8);

        let reopened = JsonlAlertStore::open(&path).await.unwrap();
        assert_eq!(reopened.cached(), MAX_RECENT_LIMIT);
        assert_eq!(reopened.append(new_alert("esp02")).await.unwrap().id, MAX_RECENT_LIMIT as u64 + 8);
    }

    #[tokio::test]
    async fn abandoned_append_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let store = JsonlAlertStore::open(&path).await.unwrap();

        let _ = bounded("persist", Duration::ZERO, store.append(new_alert("esp01"))).await;
        store.append(new_alert("esp02")).await.unwrap();

        let reopened = JsonlAlertStore::open(&path).await.unwrap();
        let mut ids: Vec<u64> = reopened.recent(10).await.unwrap().iter().map(|a| a.id).collect();
        ids.sort();
        assert_eq!(ids, [1, 2]);
    }

    #[tokio::test]
    async fn recent_is_capped_and_newest_first() {
        let store = MemoryAlertStore::new();
        for i in 0..25 {
            store.append(new_alert(&format!("n{i}"))).await.unwrap();
        }
        let recent = store.recent(DEFAULT_RECENT_LIMIT).await.unwrap();
        assert_eq!(recent.len(), 20);
        assert_eq!(recent[0].id, 25);
        assert_eq!(recent[19].id, 6);
    }
}
