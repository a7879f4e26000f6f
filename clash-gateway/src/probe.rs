//! Audio metadata probing
//!
//! The gateway never decodes audio itself; it asks an external prober for
//! sample rate, channel count, and duration. The production implementation
//! shells out to ffprobe. Tests substitute a stub through the trait.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("audio probe failed: {0}")]
    Failed(String),
}

/// Probed stream properties. Fields the prober cannot determine stay None.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioInfo {
    pub sample_rate: Option<u32>,
    pub num_channels: Option<u16>,
    pub duration: Option<f64>,
}

/// Capability interface for audio metadata extraction.
#[async_trait]
pub trait AudioProbe: Send + Sync {
    async fn probe(&self, audio: &[u8]) -> Result<AudioInfo, ProbeError>;
}

/// ffprobe-backed prober. Writes the bytes to a temp file and parses
/// `ffprobe -print_format json` output.
pub struct FfprobeProbe {
    binary: PathBuf,
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[async_trait]
impl AudioProbe for FfprobeProbe {
    async fn probe(&self, audio: &[u8]) -> Result<AudioInfo, ProbeError> {
        let file = tempfile::Builder::new()
            .suffix(".mp3")
            .tempfile()
            .map_err(|e| ProbeError::Failed(format!("temp file: {}", e)))?;
        std::fs::write(file.path(), audio)
            .map_err(|e| ProbeError::Failed(format!("temp write: {}", e)))?;

        let output = tokio::process::Command::new(&self.binary)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(file.path())
            .output()
            .await
            .map_err(|e| ProbeError::Failed(format!("spawn {}: {}", self.binary.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Failed(format!(
                "ffprobe exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_ffprobe_output(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    sample_rate: Option<String>,
    #[serde(default)]
    channels: Option<u16>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

// ffprobe emits numeric fields as JSON strings.
fn parse_ffprobe_output(stdout: &str) -> Result<AudioInfo, ProbeError> {
    let parsed: FfprobeOutput = serde_json::from_str(stdout)
        .map_err(|e| ProbeError::Failed(format!("ffprobe JSON: {}", e)))?;

    let stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .ok_or_else(|| ProbeError::Failed("no audio stream".to_string()))?;

    let duration = stream
        .duration
        .as_deref()
        .or(parsed.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok());

    Ok(AudioInfo {
        sample_rate: stream.sample_rate.as_deref().and_then(|r| r.parse().ok()),
        num_channels: stream.channels,
        duration,
    })
}
