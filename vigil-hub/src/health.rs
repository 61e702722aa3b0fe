use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SyncRecord {
    pub ok: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct HubHealth {
    pub hub_id: i64,
    pub uptime_seconds: u64,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub nodes_known: usize,
    pub subscribers: usize,
    pub last_sync: Option<SyncRecord>,
    pub events_processed: u64,
    pub events_dropped: u64,
    pub alerts_failed: u64,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
    last_sync: Arc<Mutex<Option<SyncRecord>>>,
    counters: Arc<Counters>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("connecting".to_string())),
            last_sync: Arc::new(Mutex::new(None)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn record_sync(&self, ok: bool) {
        *self.last_sync.lock() = Some(SyncRecord { ok, at: OffsetDateTime::now_utc() });
    }

    pub fn last_sync(&self) -> Option<SyncRecord> {
        *self.last_sync.lock()
    }

    /// Alerte menée jusqu'au broadcast
    pub fn record_processed(&self) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Événement écarté avant le pipeline (file pleine, payload invalide, désarmé)
    pub fn record_dropped(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Alerte perdue en cours de pipeline (capture ou persistance)
    pub fn record_failed(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counts(&self) -> (u64, u64, u64) {
        (
            self.counters.processed.load(Ordering::Relaxed),
            self.counters.dropped.load(Ordering::Relaxed),
            self.counters.failed.load(Ordering::Relaxed),
        )
    }

    pub fn get_health(&self, hub_id: i64, nodes_known: usize, subscribers: usize) -> HubHealth {
        let (processed, dropped, failed) = self.counts();
        HubHealth {
            hub_id,
            uptime_seconds: self.start_time.elapsed().as_secs(),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            nodes_known,
            subscribers,
            last_sync: self.last_sync(),
            events_processed: processed,
            events_dropped: dropped,
            alerts_failed: failed,
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
