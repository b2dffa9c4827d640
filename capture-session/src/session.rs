//! The encoding session: three setup steps that may run on any thread in any
//! order, two submission paths, and a two-party finalize.
//!
//! ```text
//! setup_video ──► [video gate] ──┐
//!                                ├─► setup_container ──► [container gate] ──► submit_*_frame
//! setup_audio ──► [audio gate] ──┘                                                 │
//!                                                                  InterleavedWriter
//! mark_video_done ─┐                                                                │
//!                  ├─► FinalizeBarrier ──► trailer, close file, close encoders ◄────┘
//! mark_audio_done ─┘
//! ```
//!
//! Locks are always taken in the order video, audio, writer. The state lock
//! is never held while acquiring another lock.

use std::{path::Path, sync::OnceLock};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{AudioEncoder, Backend, VideoEncoder},
    barrier::{Arrival, FinalizeBarrier},
    config::SessionConfig,
    convert::PixelConverter,
    error::{SessionError, SessionResult, SetupStage},
    format::{PixelFormat, Rational, SampleFormat, rescale},
    frame::{AudioFrame, VideoFrame},
    gate::ReadinessGate,
    packet::Packet,
    state::{SessionState, Transition},
    stream::{AudioParams, StreamKind, VideoParams},
    writer::{InterleavedWriter, WriterStats},
};

struct VideoState<B: Backend> {
    params: VideoParams,
    converter: PixelConverter,
    context: Option<B::VideoContext>,
    encoder: Option<B::VideoEncoder>,
}

struct AudioState<B: Backend> {
    params: AudioParams,
    /// Samples handed to the encoder so far; doubles as the next pts.
    samples_sent: i64,
    context: Option<B::AudioContext>,
    encoder: Option<B::AudioEncoder>,
}

pub struct EncodingSession<B: Backend> {
    id: String,
    backend: B,
    config: SessionConfig,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
    video_gate: ReadinessGate,
    audio_gate: ReadinessGate,
    container_gate: ReadinessGate,
    video: Mutex<Option<VideoState<B>>>,
    audio: Mutex<Option<AudioState<B>>>,
    writer: OnceLock<InterleavedWriter<B::Container>>,
    barrier: FinalizeBarrier,
}

impl<B: Backend> EncodingSession<B> {
    pub fn new(id: &str, backend: B, config: SessionConfig) -> Self {
        log::info!("session {}: creating session", id);
        Self {
            id: id.to_string(),
            backend,
            config,
            cancel: CancellationToken::new(),
            state: Mutex::new(SessionState::Idle),
            video_gate: ReadinessGate::new("video context"),
            audio_gate: ReadinessGate::new("audio context"),
            container_gate: ReadinessGate::new("container"),
            video: Mutex::new(None),
            audio: Mutex::new(None),
            writer: OnceLock::new(),
            barrier: FinalizeBarrier::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_capturing(&self) -> bool {
        self.state().is_capturing()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Packet counters of the container writer, zero before it exists.
    pub fn stats(&self) -> WriterStats {
        self.writer
            .get()
            .map(InterleavedWriter::stats)
            .unwrap_or_default()
    }

    /// Releases every thread blocked on a readiness gate with
    /// [`GateError::Cancelled`](crate::gate::GateError::Cancelled).
    pub fn cancel(&self) {
        log::info!("session {}: cancelled", self.id);
        self.cancel.cancel();
    }

    /// Allocates the lossless video encoder context and opens the video gate.
    pub fn setup_video(
        &self,
        width: u32,
        height: u32,
        input_format: PixelFormat,
        fps_num: u32,
        fps_den: u32,
        output_format: PixelFormat,
    ) -> SessionResult<()> {
        self.ensure_setup(Transition::VideoConfigured, &self.video_gate)?;
        let mut video = self.video.lock();
        if video.is_some() {
            return Err(self.invalid(Transition::VideoConfigured));
        }

        let params = match video_params(
            width,
            height,
            input_format,
            fps_num,
            fps_den,
            output_format,
            &self.config,
        ) {
            Ok(params) => params,
            Err(e) => return Err(self.fail(SetupStage::Video, e)),
        };
        let context = match self.backend.create_video_context(&params) {
            Ok(context) => context,
            Err(e) => return Err(self.fail(SetupStage::Video, e)),
        };

        let converter = PixelConverter::new(input_format, output_format, width, height);
        if !converter.is_supported() {
            log::warn!(
                "session {}: no conversion from {} to {}, video frames will be rejected",
                self.id,
                input_format,
                output_format
            );
        }
        log::info!(
            "session {}: video context was created: {}x{} {} -> {} at {:.3} fps",
            self.id,
            width,
            height,
            input_format,
            output_format,
            params.fps()
        );
        *video = Some(VideoState {
            params,
            converter,
            context: Some(context),
            encoder: None,
        });
        drop(video);

        self.transition(Transition::VideoConfigured)?;
        self.video_gate.signal();
        Ok(())
    }

    /// Allocates the PCM audio encoder context and opens the audio gate.
    pub fn setup_audio(
        &self,
        channels: u16,
        sample_rate: u32,
        bits_per_sample: u16,
        sample_format: SampleFormat,
        block_align: u32,
    ) -> SessionResult<()> {
        self.ensure_setup(Transition::AudioConfigured, &self.audio_gate)?;
        let mut audio = self.audio.lock();
        if audio.is_some() {
            return Err(self.invalid(Transition::AudioConfigured));
        }

        let params = match audio_params(
            channels,
            sample_rate,
            bits_per_sample,
            sample_format,
            block_align,
        ) {
            Ok(params) => params,
            Err(e) => return Err(self.fail(SetupStage::Audio, e)),
        };
        let context = match self.backend.create_audio_context(&params) {
            Ok(context) => context,
            Err(e) => return Err(self.fail(SetupStage::Audio, e)),
        };

        log::info!(
            "session {}: audio context was created: {} channel(s) {} Hz {} ({} bit), {} bps",
            self.id,
            channels,
            sample_rate,
            sample_format,
            bits_per_sample,
            params.bit_rate
        );
        *audio = Some(AudioState {
            params,
            samples_sent: 0,
            context: Some(context),
            encoder: None,
        });
        drop(audio);

        self.transition(Transition::AudioConfigured)?;
        self.audio_gate.signal();
        Ok(())
    }

    /// Waits for both encoder contexts, then creates the output file, opens
    /// the encoders and writes the header. Opens the container gate.
    pub fn setup_container(&self, path: impl AsRef<Path>) -> SessionResult<()> {
        let path = path.as_ref();

        log::info!("session {}: waiting for video context to be created...", self.id);
        self.wait(&self.video_gate)?;
        log::info!("session {}: waiting for audio context to be created...", self.id);
        self.wait(&self.audio_gate)?;

        self.ensure(Transition::ContainerOpened)?;
        log::info!("session {}: exporting to file: {}", self.id, path.display());

        let mut video = self.video.lock();
        let mut audio = self.audio.lock();
        let (Some(v), Some(a)) = (video.as_mut(), audio.as_mut()) else {
            return Err(self.invalid(Transition::ContainerOpened));
        };
        let (video_context, audio_context) = match (v.context.take(), a.context.take()) {
            (Some(vc), Some(ac)) => (vc, ac),
            (vc, ac) => {
                v.context = vc;
                a.context = ac;
                return Err(self.invalid(Transition::ContainerOpened));
            }
        };

        let opened = match self
            .backend
            .open_output(path, video_context, audio_context)
        {
            Ok(opened) => opened,
            Err(e) => {
                *video = None;
                *audio = None;
                return Err(self.fail(SetupStage::Container, e));
            }
        };
        log::debug!(
            "session {}: video time-base {}, audio time-base {}",
            self.id,
            opened.video.time_base(),
            opened.audio.time_base()
        );
        v.encoder = Some(opened.video);
        a.encoder = Some(opened.audio);
        if self
            .writer
            .set(InterleavedWriter::new(opened.container))
            .is_err()
        {
            return Err(self.invalid(Transition::ContainerOpened));
        }
        drop(audio);
        drop(video);

        // replay completions that arrived before capture
        self.barrier.with_arrived(|arrived| {
            self.transition(Transition::ContainerOpened)?;
            for kind in arrived {
                self.transition(Transition::StreamFinished(*kind))?;
            }
            Ok::<_, SessionError>(())
        })?;
        log::info!("session {}: format context was created successfully", self.id);
        self.container_gate.signal();
        Ok(())
    }

    /// Encodes one captured video frame. `timestamp` is on the capture clock.
    /// Returns the number of packets written to the container.
    pub fn submit_video_frame(&self, data: &[u8], timestamp: i64) -> SessionResult<usize> {
        self.wait(&self.container_gate)?;

        let mut video = self.video.lock();
        let Some(stream) = video.as_mut() else {
            return Err(SessionError::StreamClosed {
                stream: StreamKind::Video,
            });
        };
        let Some(encoder) = stream.encoder.as_mut() else {
            return Err(SessionError::StreamClosed {
                stream: StreamKind::Video,
            });
        };

        let converted = stream.converter.convert(data).inspect_err(|e| {
            log::warn!("session {}: dropping video frame: {}", self.id, e);
        })?;
        let pts = rescale(
            timestamp,
            self.config.capture_time_base(),
            encoder.time_base(),
        );
        let frame = VideoFrame {
            data: &converted,
            format: stream.params.output_format,
            width: stream.params.width,
            height: stream.params.height,
            pts,
        };
        let packets = encoder.encode(&frame).map_err(|source| {
            log::error!("session {}: video encode failed: {:#}", self.id, source);
            SessionError::Encode {
                stream: StreamKind::Video,
                source,
            }
        })?;
        Ok(self.write_packets(StreamKind::Video, packets))
    }

    /// Encodes one chunk of interleaved PCM. Timing comes from the running
    /// sample count; `timestamp` is only logged.
    pub fn submit_audio_frame(&self, data: &[u8], timestamp: i64) -> SessionResult<usize> {
        self.wait(&self.container_gate)?;

        let mut audio = self.audio.lock();
        let Some(stream) = audio.as_mut() else {
            return Err(SessionError::StreamClosed {
                stream: StreamKind::Audio,
            });
        };
        let Some(encoder) = stream.encoder.as_mut() else {
            return Err(SessionError::StreamClosed {
                stream: StreamKind::Audio,
            });
        };

        let group = stream.params.group_size();
        let samples = data.len() / group;
        let used = samples * group;
        if used != data.len() {
            log::warn!(
                "session {}: audio chunk of {} bytes is not a multiple of {}, ignoring {} trailing bytes",
                self.id,
                data.len(),
                group,
                data.len() - used
            );
        }
        if samples == 0 {
            return Ok(0);
        }
        log::trace!(
            "session {}: {} audio samples captured at {}",
            self.id,
            samples,
            timestamp
        );

        let frame = AudioFrame {
            data: &data[..used],
            format: stream.params.sample_format,
            channels: stream.params.channels,
            sample_rate: stream.params.sample_rate,
            samples,
            pts: stream.samples_sent,
        };
        stream.samples_sent += samples as i64;
        let packets = encoder.encode(&frame).map_err(|source| {
            log::error!("session {}: audio encode failed: {:#}", self.id, source);
            SessionError::Encode {
                stream: StreamKind::Audio,
                source,
            }
        })?;
        Ok(self.write_packets(StreamKind::Audio, packets))
    }

    pub fn mark_video_done(&self) -> SessionResult<()> {
        self.finish_stream(StreamKind::Video)
    }

    pub fn mark_audio_done(&self) -> SessionResult<()> {
        self.finish_stream(StreamKind::Audio)
    }

    fn finish_stream(&self, kind: StreamKind) -> SessionResult<()> {
        self.barrier.arrive(kind, |arrival| match arrival {
            Arrival::Repeated => {
                log::warn!("session {}: {} was already marked done", self.id, kind);
                Ok(())
            }
            Arrival::First => {
                log::info!("session {}: {} done", self.id, kind);
                self.transition(Transition::StreamFinished(kind))
                    .map(|_| ())
            }
            Arrival::Last => {
                log::info!("session {}: {} done", self.id, kind);
                self.end_session()
            }
        })
    }

    /// Runs under the barrier lock, once per session.
    fn end_session(&self) -> SessionResult<()> {
        self.transition(Transition::Finalize)?;
        log::info!("session {}: ending session...", self.id);

        let mut video = self.video.lock();
        let mut audio = self.audio.lock();
        match self.writer.get() {
            Some(writer) => {
                if let Some(encoder) = video.as_mut().and_then(|v| v.encoder.as_mut()) {
                    match encoder.finish() {
                        Ok(packets) => {
                            self.write_packets(StreamKind::Video, packets);
                        }
                        Err(e) => {
                            log::error!("session {}: could not flush the video encoder: {:#}", self.id, e)
                        }
                    }
                }
                if let Some(encoder) = audio.as_mut().and_then(|a| a.encoder.as_mut()) {
                    match encoder.finish() {
                        Ok(packets) => {
                            self.write_packets(StreamKind::Audio, packets);
                        }
                        Err(e) => {
                            log::error!("session {}: could not flush the audio encoder: {:#}", self.id, e)
                        }
                    }
                }
                log::info!("session {}: closing files...", self.id);
                if let Err(e) = writer.finish() {
                    log::error!("session {}: could not finalize the output file: {:#}", self.id, e);
                }
                let stats = writer.stats();
                log::info!(
                    "session {}: wrote {} video and {} audio packets ({} failed)",
                    self.id,
                    stats.video_packets,
                    stats.audio_packets,
                    stats.write_failures
                );
            }
            None => {
                log::warn!(
                    "session {}: finishing before the container was created, nothing written",
                    self.id
                );
            }
        }
        *video = None;
        *audio = None;
        drop(audio);
        drop(video);

        // nothing will open these any more
        self.abort_gates();
        self.transition(Transition::TeardownComplete)?;
        log::info!("session {}: done", self.id);
        Ok(())
    }

    fn write_packets(&self, kind: StreamKind, packets: Vec<Packet>) -> usize {
        let Some(writer) = self.writer.get() else {
            return 0;
        };
        let mut written = 0;
        for mut packet in packets {
            packet.set_stream(kind.index());
            match writer.write(packet) {
                Ok(()) => written += 1,
                Err(e) => log::error!("session {}: {} packet dropped: {}", self.id, kind, e),
            }
        }
        written
    }

    fn wait(&self, gate: &ReadinessGate) -> SessionResult<()> {
        gate.wait(
            self.config.poll_interval(),
            self.config.gate_timeout(),
            &self.cancel,
        )
        .map_err(|e| {
            log::warn!("session {}: {}", self.id, e);
            SessionError::from(e)
        })
    }

    fn ensure(&self, transition: Transition) -> SessionResult<()> {
        let from = self.state();
        match from.next(transition) {
            Some(_) => Ok(()),
            None => Err(SessionError::InvalidState { from, transition }),
        }
    }

    fn invalid(&self, transition: Transition) -> SessionError {
        SessionError::InvalidState {
            from: self.state(),
            transition,
        }
    }

    fn transition(&self, transition: Transition) -> SessionResult<SessionState> {
        let mut state = self.state.lock();
        let from = *state;
        let to = from
            .next(transition)
            .ok_or(SessionError::InvalidState { from, transition })?;
        if to != from {
            log::info!("session {}: {} -> {}", self.id, from, to);
        }
        *state = to;
        Ok(to)
    }

    /// Records a fatal setup failure. A failed session never captures, so
    /// every gate still pending is aborted.
    fn fail(&self, stage: SetupStage, source: anyhow::Error) -> SessionError {
        log::error!("session {}: {} setup failed: {:#}", self.id, stage, source);
        if let Err(e) = self.transition(Transition::Fail) {
            log::debug!("session {}: {}", self.id, e);
        }
        self.abort_gates();
        SessionError::Setup { stage, source }
    }

    /// Checks a context setup step. When the session has already failed the
    /// step's own gate is aborted as well.
    fn ensure_setup(&self, transition: Transition, gate: &ReadinessGate) -> SessionResult<()> {
        self.ensure(transition).inspect_err(|_| {
            if self.state() == SessionState::Failed {
                gate.abort();
            }
        })
    }

    fn abort_gates(&self) {
        self.video_gate.abort();
        self.audio_gate.abort();
        self.container_gate.abort();
    }
}

impl<B: Backend> Drop for EncodingSession<B> {
    fn drop(&mut self) {
        log::info!("session {}: deleting session", self.id);
    }
}

fn video_params(
    width: u32,
    height: u32,
    input_format: PixelFormat,
    fps_num: u32,
    fps_den: u32,
    output_format: PixelFormat,
    config: &SessionConfig,
) -> anyhow::Result<VideoParams> {
    if width == 0 || height == 0 {
        anyhow::bail!("invalid video size {}x{}", width, height);
    }
    let num = i32::try_from(fps_num)?;
    let den = i32::try_from(fps_den)?;
    let frame_rate = Rational::new(num, den);
    if !frame_rate.is_valid() {
        anyhow::bail!("invalid frame rate {}", frame_rate);
    }
    Ok(VideoParams {
        width,
        height,
        input_format,
        output_format,
        frame_rate,
        time_base: frame_rate.invert(),
        gop_size: config.gop_size,
        slices: config.video_slices,
    })
}

fn audio_params(
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    sample_format: SampleFormat,
    block_align: u32,
) -> anyhow::Result<AudioParams> {
    if channels == 0 {
        anyhow::bail!("audio needs at least one channel");
    }
    let rate = i32::try_from(sample_rate)?;
    if rate == 0 {
        anyhow::bail!("invalid sample rate {}", sample_rate);
    }
    let container_bits = sample_format.bytes_per_sample() * 8;
    if bits_per_sample == 0 || bits_per_sample as usize > container_bits {
        anyhow::bail!(
            "{} bits per sample does not fit in {}",
            bits_per_sample,
            sample_format
        );
    }
    Ok(AudioParams {
        channels,
        sample_rate,
        bits_per_sample,
        sample_format,
        block_align,
        bit_rate: sample_rate as u64 * bits_per_sample as u64 * channels as u64,
        time_base: Rational::new(1, rate),
    })
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
