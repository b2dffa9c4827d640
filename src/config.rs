use std::path::{Path, PathBuf};

use anyhow::Context;
use capture_session::{PixelFormat, SampleFormat, SessionConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub input_format: PixelFormat,
    pub output_format: PixelFormat,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps_num: 30000,
            fps_den: 1001,
            input_format: PixelFormat::Nv12,
            output_format: PixelFormat::Yuv420p,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub sample_format: SampleFormat,
    /// Bytes per sample group; 0 means tightly packed.
    pub block_align: u32,
    pub tone_hz: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 16,
            sample_format: SampleFormat::S16,
            block_align: 4,
            tone_hz: 440.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub output: PathBuf,
    pub duration_secs: f64,
    /// Pace the synthetic sources at the capture rate instead of as fast as
    /// possible.
    pub realtime: bool,
    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("capture.mkv"),
            duration_secs: 3.0,
            realtime: false,
            video: VideoConfig::default(),
            audio: AudioConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Number of video frames covering `duration_secs`.
    pub fn frame_count(&self) -> u64 {
        let fps = self.video.fps_num as f64 / self.video.fps_den.max(1) as f64;
        (self.duration_secs * fps).round().max(0.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{
                "output": "out.avi",
                "video": { "width": 640, "height": 480, "input_format": "argb", "output_format": "argb" },
                "session": { "gate_timeout_ms": 5000 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.output, PathBuf::from("out.avi"));
        assert_eq!(config.video.width, 640);
        assert_eq!(config.video.fps_num, 30000);
        assert_eq!(config.video.input_format, PixelFormat::Argb);
        assert_eq!(config.audio, AudioConfig::default());
        assert_eq!(config.session.gate_timeout_ms, Some(5000));
        assert_eq!(config.session.video_slices, 16);
    }

    #[test]
    fn frame_count_follows_rate() {
        let config = AppConfig::default();
        assert_eq!(config.frame_count(), 90);
    }
}
