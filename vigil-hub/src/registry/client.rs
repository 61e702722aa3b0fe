/**
 * CLIENT AUTORITÉ REGISTRE - Contrat et implémentation HTTP
 *
 * RÔLE : Les quatre opérations consommées auprès du backend central
 * (enregistrement du hub, config complète, création nœud, création capteur).
 *
 * Toutes les requêtes sont bornées par le timeout du client reqwest ; un statut
 * non-2xx devient HubError::RegistryStatus.
 */

use crate::config::RegistryConf;
use crate::error::{HubError, Result};
use crate::models::{CreatedRecord, HubRegistered, RemoteHub};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

pub const ENABLED_STATUS: &str = "enabled";

#[async_trait]
pub trait RegistryAuthority: Send + Sync {
    /// Créer-ou-mettre-à-jour par nom, renvoie l'id du hub.
    async fn register_hub(&self, name: &str, ip: &str) -> Result<i64>;
    async fn fetch_config(&self, hub_id: i64) -> Result<RemoteHub>;
    async fn create_node(&self, hub_id: i64, location: &str) -> Result<i64>;
    async fn create_sensor(&self, node_id: i64, sensor_type: &str, pin: &str) -> Result<i64>;
}

#[derive(Serialize)]
struct RegisterHubBody<'a> {
    name: &'a str,
    ip: &'a str,
}

#[derive(Serialize)]
struct NewNodeBody<'a> {
    location: &'a str,
    status: &'a str,
}

#[derive(Serialize)]
struct NewSensorBody<'a> {
    #[serde(rename = "type")]
    sensor_type: &'a str,
    pin: &'a str,
    status: &'a str,
}

pub struct HttpRegistryClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRegistryClient {
    pub fn new(cfg: &RegistryConf) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(cfg.timeout()).build()?;
        Ok(Self { http, base_url: cfg.url.trim_end_matches('/').to_string() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn expect_success(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            return Err(HubError::RegistryStatus { operation, status: status.as_u16() });
        }
        Ok(response)
    }
}

#[async_trait]
impl RegistryAuthority for HttpRegistryClient {
    async fn register_hub(&self, name: &str, ip: &str) -> Result<i64> {
        let response = self
            .http
            .put(self.url("/hub/register"))
            .json(&RegisterHubBody { name, ip })
            .send()
            .await?;
        let registered: HubRegistered =
            Self::expect_success("register hub", response).await?.json().await?;
        debug!(hub_id = registered.hub_id, status = ?registered.status, "hub registration answered");
        Ok(registered.hub_id)
    }

    async fn fetch_config(&self, hub_id: i64) -> Result<RemoteHub> {
        let response = self.http.get(self.url(&format!("/hub/{hub_id}/config"))).send().await?;
        Ok(Self::expect_success("fetch hub config", response).await?.json().await?)
    }

    async fn create_node(&self, hub_id: i64, location: &str) -> Result<i64> {
        let response = self
            .http
            .post(self.url(&format!("/hubs/{hub_id}/nodes/")))
            .json(&NewNodeBody { location, status: "online" })
            .send()
            .await?;
        let created: CreatedRecord = Self::expect_success("create node", response).await?.json().await?;
        Ok(created.id)
    }

    async fn create_sensor(&self, node_id: i64, sensor_type: &str, pin: &str) -> Result<i64> {
        let response = self
            .http
            .post(self.url(&format!("/nodes/{node_id}/sensors/")))
            .json(&NewSensorBody { sensor_type, pin, status: ENABLED_STATUS })
            .send()
            .await?;
        let created: CreatedRecord =
            Self::expect_success("create sensor", response).await?.json().await?;
        Ok(created.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_devkit::mock_registry::MockRegistry;

    fn client_for(url: &str) -> HttpRegistryClient {
        HttpRegistryClient::new(&RegistryConf {
            url: format!("{url}/"),
            timeout_secs: 2,
            ..RegistryConf::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn full_round_against_mock_authority() {
        let mock = MockRegistry::start().await.unwrap();
        let client = client_for(&mock.url());

        let hub_id = client.register_hub("site-a", "10.0.0.2").await.unwrap();
        // idempotent par nom
        assert_eq!(client.register_hub("site-a", "10.0.0.3").await.unwrap(), hub_id);

        let node_id = client.create_node(hub_id, "esp01").await.unwrap();
        let sensor_id = client.create_sensor(node_id, "pir", "14").await.unwrap();
        mock.set_sensor_status(sensor_id, Some("disabled"));

        let hub = client.fetch_config(hub_id).await.unwrap();
        assert_eq!(hub.id, hub_id);
        assert_eq!(hub.nodes.len(), 1);
        assert_eq!(hub.nodes[0].location.as_deref(), Some("esp01"));
        assert_eq!(hub.nodes[0].sensors[0].sensor_type, "pir");
        assert_eq!(hub.nodes[0].sensors[0].status.as_deref(), Some("disabled"));
        assert_eq!(mock.nodes_created(), 1);
        assert_eq!(mock.sensors_created(), 1);
    }

    #[tokio::test]
    async fn outage_maps_to_registry_status() {
        let mock = MockRegistry::start().await.unwrap();
        mock.set_outage(true);
        let client = client_for(&mock.url());
        let err = client.create_node(1, "esp01").await.unwrap_err();
        assert!(matches!(err, HubError::RegistryStatus { operation: "create node", status: 503 }));
    }

    #[tokio::test]
    async fn unknown_hub_config_is_not_found() {
        let mock = MockRegistry::start().await.unwrap();
        let client = client_for(&mock.url());
        let err = client.fetch_config(42).await.unwrap_err();
        assert!(matches!(err, HubError::RegistryStatus { status: 404, .. }));
    }
}
