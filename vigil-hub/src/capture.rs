/**
 * CAPTURE D'IMAGE - Source de frames JPEG pour les alertes et le flux vidéo
 *
 * RÔLE :
 * - FrameSource : contrat minimal "donne-moi un JPEG maintenant"
 * - HttpSnapshotSource : caméra IP exposant une URL de snapshot
 * - CommandFrameSource : programme externe (ffmpeg sur /dev/video0 par défaut)
 * - Camera : borne la capture dans le temps et écrit la frame sur disque
 *
 * Un processus externe est tué si le timeout expire (kill_on_drop).
 */

use crate::config::{CameraConf, CameraSource};
use crate::error::{bounded, HubError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn grab(&self) -> Result<Bytes>;
}

pub struct HttpSnapshotSource {
    http: reqwest::Client,
    url: String,
}

impl HttpSnapshotSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url: url.into() })
    }
}

#[async_trait]
impl FrameSource for HttpSnapshotSource {
    async fn grab(&self) -> Result<Bytes> {
        let response = self.http.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HubError::Capture(format!("snapshot endpoint returned HTTP {}", status.as_u16())));
        }
        Ok(response.bytes().await?)
    }
}

pub struct CommandFrameSource {
    program: String,
    args: Vec<String>,
}

impl CommandFrameSource {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

#[async_trait]
impl FrameSource for CommandFrameSource {
    async fn grab(&self) -> Result<Bytes> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HubError::Capture(format!("cannot start {}: {e}", self.program)))?;

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HubError::Capture(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(Bytes::from(output.stdout))
    }
}

pub fn source_from_config(cfg: &CameraConf) -> Result<Arc<dyn FrameSource>> {
    Ok(match &cfg.source {
        CameraSource::Http { snapshot_url } => Arc::new(HttpSnapshotSource::new(snapshot_url, cfg.timeout())?),
        CameraSource::Command { program, args } => Arc::new(CommandFrameSource::new(program, args.clone())),
    })
}

#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Chemin relatif tel que référencé par l'alerte (ex: images/cap_20250101_100000_000123.jpg)
    pub image_path: String,
    pub jpeg: Bytes,
}

fn is_jpeg(data: &[u8]) -> bool {
    data.len() > 4 && data[0] == 0xFF && data[1] == 0xD8
}

pub fn capture_file_name(at: OffsetDateTime) -> String {
    let fmt = format_description!("[year][month][day]_[hour][minute][second]_[subsecond digits:6]");
    let stamp = at.format(&fmt).unwrap_or_else(|_| at.unix_timestamp_nanos().to_string());
    format!("cap_{stamp}.jpg")
}

pub struct Camera {
    source: Arc<dyn FrameSource>,
    image_dir: PathBuf,
    timeout: Duration,
}

impl Camera {
    pub fn new(source: Arc<dyn FrameSource>, image_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { source, image_dir: image_dir.into(), timeout }
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// Frame brute, sans écriture disque (flux vidéo).
    pub async fn grab(&self) -> Result<Bytes> {
        let jpeg = bounded("capture", self.timeout, self.source.grab()).await?;
        if !is_jpeg(&jpeg) {
            return Err(HubError::Capture(format!("source returned {} bytes that are not a JPEG", jpeg.len())));
        }
        Ok(jpeg)
    }

    /// Frame de preuve pour une alerte, écrite dans `image_dir`.
    pub async fn capture(&self) -> Result<CapturedFrame> {
        let jpeg = self.grab().await?;
        tokio::fs::create_dir_all(&self.image_dir).await?;
        let path = self.image_dir.join(capture_file_name(OffsetDateTime::now_utc()));
        tokio::fs::write(&path, &jpeg).await?;
        let image_path = path.to_string_lossy().replace('\\', "/");
        debug!(path = %image_path, bytes = jpeg.len(), "frame captured");
        Ok(CapturedFrame { image_path, jpeg })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingFrames, StaticFrames, TINY_JPEG};
    use time::macros::datetime;

    #[test]
    fn file_name_has_microseconds() {
        let name = capture_file_name(datetime!(2025-03-04 05:06:07.000123 UTC));
        assert_eq!(name, "cap_20250304_050607_000123.jpg");
    }

    #[tokio::test]
    async fn capture_writes_frame_under_image_dir() {
        let dir = tempfile::tempdir().unwrap();
        let camera = Camera::new(Arc::new(StaticFrames::new()), dir.path().join("images"), Duration::from_secs(1));
        let frame = camera.capture().await.unwrap();
        assert!(frame.image_path.ends_with(".jpg"));
        assert_eq!(tokio::fs::read(&frame.image_path).await.unwrap(), TINY_JPEG);
    }

    #[tokio::test]
    async fn failing_source_is_a_capture_error() {
        let camera = Camera::new(Arc::new(FailingFrames), "unused", Duration::from_secs(1));
        assert!(matches!(camera.capture().await, Err(HubError::Capture(_))));
    }

    #[tokio::test]
    async fn non_jpeg_output_is_rejected() {
        let source = CommandFrameSource::new("echo", vec!["hello".into()]);
        let camera = Camera::new(Arc::new(source), "unused", Duration::from_secs(5));
        assert!(matches!(camera.grab().await, Err(HubError::Capture(_))));
    }

    #[tokio::test]
    async fn missing_program_is_a_capture_error() {
        let source = CommandFrameSource::new("vigil-no-such-camera-tool", vec![]);
        assert!(matches!(source.grab().await, Err(HubError::Capture(_))));
    }
}
