use crate::auth::TokenValidator;
use crate::capture::Camera;
use crate::fanout::Fanout;
use crate::health::HealthTracker;
use crate::models::HubIdentity;
use crate::registry::DeviceRegistryCache;
use crate::store::AlertStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// État unique du hub, construit une fois au boot puis cloné dans chaque composant.
#[derive(Clone)]
pub struct HubContext {
    pub identity: Arc<HubIdentity>,
    pub registry: Arc<DeviceRegistryCache>,
    pub fanout: Fanout,
    pub store: Arc<dyn AlertStore>,
    pub camera: Arc<Camera>,
    pub health: HealthTracker,
    pub auth: Arc<TokenValidator>,
    /// Cadence du flux MJPEG
    pub stream_interval: Duration,
}
