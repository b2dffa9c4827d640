use crate::format::{PixelFormat, Rational, SampleFormat};

pub const VIDEO_STREAM_INDEX: usize = 0;
pub const AUDIO_STREAM_INDEX: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    /// Container stream index this kind is muxed into.
    pub fn index(self) -> usize {
        match self {
            StreamKind::Video => VIDEO_STREAM_INDEX,
            StreamKind::Audio => AUDIO_STREAM_INDEX,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            VIDEO_STREAM_INDEX => Some(StreamKind::Video),
            AUDIO_STREAM_INDEX => Some(StreamKind::Audio),
            _ => None,
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Video => f.write_str("video"),
            StreamKind::Audio => f.write_str("audio"),
        }
    }
}

/// Everything a backend needs to allocate the video encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    /// Layout delivered by the capture source.
    pub input_format: PixelFormat,
    /// Layout handed to the encoder.
    pub output_format: PixelFormat,
    pub frame_rate: Rational,
    /// Encoder time-base, the inverse of the frame rate.
    pub time_base: Rational,
    pub gop_size: u32,
    pub slices: u32,
}

impl VideoParams {
    pub fn fps(&self) -> f64 {
        self.frame_rate.as_f64()
    }
}

/// Everything a backend needs to allocate the PCM audio encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParams {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub sample_format: SampleFormat,
    pub block_align: u32,
    pub bit_rate: u64,
    /// One tick per sample.
    pub time_base: Rational,
}

impl AudioParams {
    /// Bytes occupied by one sample across all channels.
    pub fn group_size(&self) -> usize {
        self.sample_format
            .group_size(self.channels, self.block_align)
    }
}
