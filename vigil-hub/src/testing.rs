//! Doublures de test des collaborateurs externes.

use crate::analyzer::VisionAnalyzer;
use crate::capture::FrameSource;
use crate::error::{HubError, Result};
use crate::models::{Alert, NewAlert, RemoteHub, SensorEvent, SensorPayload};
use crate::registry::RegistryAuthority;
use crate::store::AlertStore;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;

/// Plus petit en-tête JPEG accepté par la caméra.
pub const TINY_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];

pub fn event(node: &str, sensor: &str, motion: bool) -> SensorEvent {
    SensorEvent {
        node: node.into(),
        sensor: sensor.into(),
        payload: SensorPayload { motion, timestamp: None, pin: None },
        received_at: OffsetDateTime::now_utc(),
    }
}

#[derive(Default)]
pub struct StaticFrames {
    calls: AtomicUsize,
}

impl StaticFrames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for StaticFrames {
    async fn grab(&self) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from_static(TINY_JPEG))
    }
}

pub struct FailingFrames;

#[async_trait]
impl FrameSource for FailingFrames {
    async fn grab(&self) -> Result<Bytes> {
        Err(HubError::Capture("camera unplugged".into()))
    }
}

pub struct FixedAnalyzer(pub String);

#[async_trait]
impl VisionAnalyzer for FixedAnalyzer {
    async fn describe(&self, _jpeg: &[u8]) -> Result<String> {
        Ok(self.0.clone())
    }
}

pub struct FailingAnalyzer;

#[async_trait]
impl VisionAnalyzer for FailingAnalyzer {
    async fn describe(&self, _jpeg: &[u8]) -> Result<String> {
        Err(HubError::Analysis("model overloaded".into()))
    }
}

pub struct FailingStore;

#[async_trait]
impl AlertStore for FailingStore {
    async fn append(&self, _alert: NewAlert) -> Result<Alert> {
        Err(HubError::Store("disk full".into()))
    }

    async fn recent(&self, _limit: usize) -> Result<Vec<Alert>> {
        Err(HubError::Store("disk full".into()))
    }
}

/// Store qui répond après le délai donné.
pub struct SlowStore(pub Duration);

#[async_trait]
impl AlertStore for SlowStore {
    async fn append(&self, alert: NewAlert) -> Result<Alert> {
        tokio::time::sleep(self.0).await;
        Ok(alert.with_id(1))
    }

    async fn recent(&self, _limit: usize) -> Result<Vec<Alert>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct AuthorityState {
    next_id: i64,
    nodes: Vec<(i64, String)>,
    sensors: Vec<(String, String, String)>,
    config: Option<RemoteHub>,
}

/// Autorité registre en mémoire : compte les appels, simule panne et latence.
#[derive(Default)]
pub struct FakeAuthority {
    state: Mutex<AuthorityState>,
    unreachable: AtomicBool,
    delay: Mutex<Duration>,
    node_calls: AtomicUsize,
}

impl FakeAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, on: bool) {
        self.unreachable.store(on, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn set_config(&self, hub: RemoteHub) {
        self.state.lock().config = Some(hub);
    }

    pub fn node_calls(&self) -> usize {
        self.node_calls.load(Ordering::SeqCst)
    }

    /// (node location, sensor type, pin) dans l'ordre de création
    pub fn created_sensors(&self) -> Vec<(String, String, String)> {
        self.state.lock().sensors.clone()
    }

    async fn answer(&self, operation: &'static str) -> Result<()> {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(HubError::RegistryStatus { operation, status: 503 });
        }
        Ok(())
    }

    fn next_id(state: &mut AuthorityState) -> i64 {
        state.next_id += 1;
        state.next_id
    }
}

#[async_trait]
impl RegistryAuthority for FakeAuthority {
    async fn register_hub(&self, _name: &str, _ip: &str) -> Result<i64> {
        self.answer("register hub").await?;
        Ok(1)
    }

    async fn fetch_config(&self, hub_id: i64) -> Result<RemoteHub> {
        self.answer("fetch hub config").await?;
        let config = self.state.lock().config.clone();
        Ok(config.unwrap_or(RemoteHub { id: hub_id, name: "fake".into(), ip: None, nodes: Vec::new() }))
    }

    async fn create_node(&self, _hub_id: i64, location: &str) -> Result<i64> {
        self.node_calls.fetch_add(1, Ordering::SeqCst);
        self.answer("create node").await?;
        let mut state = self.state.lock();
        let id = Self::next_id(&mut state);
        state.nodes.push((id, location.to_string()));
        Ok(id)
    }

    async fn create_sensor(&self, node_id: i64, sensor_type: &str, pin: &str) -> Result<i64> {
        self.answer("create sensor").await?;
        let mut state = self.state.lock();
        let location = state
            .nodes
            .iter()
            .find(|(id, _)| *id == node_id)
            .map(|(_, loc)| loc.clone())
            .unwrap_or_else(|| format!("node-{node_id}"));
        state.sensors.push((location, sensor_type.to_string(), pin.to_string()));
        Ok(Self::next_id(&mut state))
    }
}
