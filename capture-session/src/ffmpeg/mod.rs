//! FFmpeg backend: FFV1 video and PCM audio in the container named by the
//! output file's extension.

mod encoder;
mod output;

use std::path::Path;

pub use encoder::{AudioContext, FfmpegAudioEncoder, FfmpegVideoEncoder, VideoContext};
pub use output::FfmpegContainer;

use crate::{
    backend::{Backend, OpenedOutput},
    format::Rational,
    stream::{AudioParams, VideoParams},
};

pub(crate) fn to_av(r: Rational) -> ffmpeg_next::Rational {
    ffmpeg_next::Rational::new(r.num, r.den)
}

pub(crate) fn from_av(r: ffmpeg_next::Rational) -> Rational {
    Rational::new(r.numerator(), r.denominator())
}

#[derive(Debug, Clone, Copy)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    /// Registers FFmpeg components before handing out the backend.
    pub fn new() -> anyhow::Result<Self> {
        crate::init()?;
        Ok(Self)
    }
}

impl Backend for FfmpegBackend {
    type VideoContext = VideoContext;
    type AudioContext = AudioContext;
    type VideoEncoder = FfmpegVideoEncoder;
    type AudioEncoder = FfmpegAudioEncoder;
    type Container = FfmpegContainer;

    fn create_video_context(&self, params: &VideoParams) -> anyhow::Result<VideoContext> {
        VideoContext::new(params)
    }

    fn create_audio_context(&self, params: &AudioParams) -> anyhow::Result<AudioContext> {
        AudioContext::new(params)
    }

    fn open_output(
        &self,
        path: &Path,
        video: VideoContext,
        audio: AudioContext,
    ) -> anyhow::Result<OpenedOutput<FfmpegVideoEncoder, FfmpegAudioEncoder, FfmpegContainer>>
    {
        FfmpegContainer::open(path, video, audio)
    }
}

#[cfg(test)]
#[path = "ffmpeg_test.rs"]
mod ffmpeg_test;
