/**
 * PIPELINE D'ALERTE - capture → analyse → persistance → diffusion
 *
 * Étapes strictement séquentielles pour un événement ; plusieurs événements
 * peuvent avoir chacun leur run en parallèle.
 *
 * - capture KO      → alerte abandonnée (rien persisté, rien diffusé)
 * - analyse KO      → description de repli, on continue
 * - persistance KO  → alerte perdue, pas de retry
 * - diffusion       → seulement après persistance réussie
 */

use crate::analyzer::VisionAnalyzer;
use crate::capture::Camera;
use crate::error::{bounded, HubError};
use crate::fanout::{BroadcastReport, Fanout};
use crate::models::{Alert, AlertNotification, NewAlert, SensorEvent};
use crate::store::AlertStore;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{error, info, warn};

pub const FALLBACK_DESCRIPTION: &str = "analysis unavailable";
pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("capture failed: {0}")]
    Capture(HubError),

    #[error("persist failed: {0}")]
    Persist(HubError),
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub alert: Alert,
    pub analyzed: bool,
    pub broadcast: BroadcastReport,
}

pub struct AlertPipeline {
    camera: Arc<Camera>,
    analyzer: Arc<dyn VisionAnalyzer>,
    store: Arc<dyn AlertStore>,
    fanout: Fanout,
    analyze_timeout: Duration,
    persist_timeout: Duration,
}

impl AlertPipeline {
    pub fn new(
        camera: Arc<Camera>,
        analyzer: Arc<dyn VisionAnalyzer>,
        store: Arc<dyn AlertStore>,
        fanout: Fanout,
        analyze_timeout: Duration,
    ) -> Self {
        Self {
            camera,
            analyzer,
            store,
            fanout,
            analyze_timeout,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
        }
    }

    pub fn with_persist_timeout(mut self, persist_timeout: Duration) -> Self {
        self.persist_timeout = persist_timeout;
        self
    }

    pub async fn run(&self, event: &SensorEvent) -> Result<PipelineOutcome, PipelineError> {
        let (node, sensor) = (event.node.as_str(), event.sensor.as_str());

        let frame = self.camera.capture().await.map_err(|e| {
            error!(node = %node, sensor = %sensor, error = %e, "capture failed, alert aborted");
            PipelineError::Capture(e)
        })?;

        let (description, analyzed) =
            match bounded("analysis", self.analyze_timeout, self.analyzer.describe(&frame.jpeg)).await {
                Ok(text) => (text, true),
                Err(e) => {
                    warn!(node = %node, sensor = %sensor, error = %e, "analysis failed, using fallback description");
                    (FALLBACK_DESCRIPTION.to_string(), false)
                }
            };

        let pending = NewAlert {
            timestamp: OffsetDateTime::now_utc(),
            node: node.to_string(),
            sensor: sensor.to_string(),
            image_path: frame.image_path,
            description,
        };
        let alert = bounded("persist", self.persist_timeout, self.store.append(pending))
            .await
            .map_err(|e| {
                error!(node = %node, sensor = %sensor, error = %e, "persist failed, alert lost");
                PipelineError::Persist(e)
            })?;

        let broadcast = self.fanout.broadcast(&AlertNotification::from(&alert)).await;
        info!(
            alert_id = alert.id,
            node = %node,
            sensor = %sensor,
            analyzed,
            delivered = broadcast.delivered,
            "alert recorded"
        );
        Ok(PipelineOutcome { alert, analyzed, broadcast })
    }
}
