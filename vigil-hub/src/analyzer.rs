/**
 * ANALYSE VISION - Description textuelle d'une frame capturée
 *
 * RÔLE : Envoyer le JPEG (data URL base64) à un endpoint compatible
 * OpenAI Responses et récupérer le texte de sortie.
 *
 * Toute panne ici est non-fatale pour l'alerte : le pipeline substitue
 * une description de repli.
 */

use crate::config::AnalyzerConf;
use crate::error::{HubError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};

#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn describe(&self, jpeg: &[u8]) -> Result<String>;
}

pub struct OpenAiAnalyzer {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    prompt: String,
}

impl OpenAiAnalyzer {
    pub fn new(cfg: &AnalyzerConf) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(cfg.timeout()).build()?;
        Ok(Self {
            http,
            api_url: cfg.api_url.clone(),
            api_key: cfg.api_key.clone().filter(|k| !k.is_empty()),
            model: cfg.model.clone(),
            prompt: cfg.prompt.clone(),
        })
    }

    fn request_body(&self, jpeg: &[u8]) -> Value {
        let data_url = format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg));
        json!({
            "model": self.model,
            "input": [{
                "role": "user",
                "content": [
                    { "type": "input_text", "text": self.prompt },
                    { "type": "input_image", "image_url": data_url },
                ],
            }],
        })
    }
}

/// Texte de sortie d'une réponse Responses API : champ agrégé `output_text`
/// s'il existe, sinon concaténation des blocs `output[].content[]` de type output_text.
pub fn extract_output_text(body: &Value) -> Option<String> {
    if let Some(text) = body.get("output_text").and_then(Value::as_str) {
        let text = text.trim();
        return (!text.is_empty()).then(|| text.to_string());
    }
    let parts: Vec<&str> = body
        .get("output")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|c| c.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|c| c.get("text").and_then(Value::as_str))
        .collect();
    let joined = parts.join("\n");
    let joined = joined.trim();
    (!joined.is_empty()).then(|| joined.to_string())
}

#[async_trait]
impl VisionAnalyzer for OpenAiAnalyzer {
    async fn describe(&self, jpeg: &[u8]) -> Result<String> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(HubError::Analysis("no API key configured".into()));
        };
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(key)
            .json(&self.request_body(jpeg))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HubError::Analysis(format!("vision endpoint returned HTTP {}", status.as_u16())));
        }
        let body: Value = response.json().await?;
        extract_output_text(&body).ok_or_else(|| HubError::Analysis("response carried no output text".into()))
    }
}
