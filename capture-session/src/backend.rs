//! Seam between the session and the codec/container library.
//!
//! Setup happens in two phases. `create_*_context` allocates and configures
//! an encoder without opening it; `open_output` consumes both contexts once
//! the container format is known, opens the encoders, creates the streams
//! and writes the header.

use std::path::Path;

use crate::{
    format::Rational,
    frame::{AudioFrame, VideoFrame},
    packet::Packet,
    stream::{AudioParams, VideoParams},
};

pub trait VideoEncoder: Send {
    fn time_base(&self) -> Rational;

    /// Encodes one frame. Intra-only codecs return exactly one packet.
    fn encode(&mut self, frame: &VideoFrame<'_>) -> anyhow::Result<Vec<Packet>>;

    /// Signals end of stream and returns any packets still buffered.
    fn finish(&mut self) -> anyhow::Result<Vec<Packet>>;
}

pub trait AudioEncoder: Send {
    fn time_base(&self) -> Rational;

    fn encode(&mut self, frame: &AudioFrame<'_>) -> anyhow::Result<Vec<Packet>>;

    fn finish(&mut self) -> anyhow::Result<Vec<Packet>>;
}

/// An open output file. Dropping it closes the file.
pub trait Container: Send {
    /// Writes `packet` into the stream named by its index, letting the
    /// muxer buffer as needed to keep streams interleaved by time.
    fn write_interleaved(&mut self, packet: Packet) -> anyhow::Result<()>;

    /// Flushes interleaving buffers and writes the trailer.
    fn write_trailer(&mut self) -> anyhow::Result<()>;
}

/// Encoders and container produced by [`Backend::open_output`].
pub struct OpenedOutput<V, A, C> {
    pub video: V,
    pub audio: A,
    pub container: C,
}

pub trait Backend: Send + Sync {
    type VideoContext: Send;
    type AudioContext: Send;
    type VideoEncoder: VideoEncoder;
    type AudioEncoder: AudioEncoder;
    type Container: Container;

    fn create_video_context(&self, params: &VideoParams) -> anyhow::Result<Self::VideoContext>;

    fn create_audio_context(&self, params: &AudioParams) -> anyhow::Result<Self::AudioContext>;

    /// Creates the file at `path` with the video stream at index 0 and the
    /// audio stream at index 1. The container format follows the extension.
    fn open_output(
        &self,
        path: &Path,
        video: Self::VideoContext,
        audio: Self::AudioContext,
    ) -> anyhow::Result<OpenedOutput<Self::VideoEncoder, Self::AudioEncoder, Self::Container>>;
}
