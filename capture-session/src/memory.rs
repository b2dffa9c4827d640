//! In-memory backend that records everything a session does instead of
//! touching the disk. Used for dry runs and tests.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    backend::{AudioEncoder, Backend, Container, OpenedOutput, VideoEncoder},
    format::{Rational, rescale},
    frame::{AudioFrame, VideoFrame},
    packet::Packet,
    stream::{AudioParams, StreamKind, VideoParams},
};

/// Backend step that should fail, for exercising error paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    MissingVideoEncoder,
    AudioContext,
    OpenOutput,
    VideoEncode,
    Write,
    Trailer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPacket {
    pub stream_index: usize,
    /// In the container stream's time-base.
    pub pts: Option<i64>,
    pub duration: i64,
    pub size: usize,
    pub is_key: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Recording {
    pub path: Option<PathBuf>,
    pub video_params: Option<VideoParams>,
    pub audio_params: Option<AudioParams>,
    /// Time-base of each container stream, by index.
    pub stream_time_bases: Vec<Rational>,
    pub header_written: bool,
    pub packets: Vec<RecordedPacket>,
    pub trailer_writes: usize,
    pub encoders_closed: usize,
    pub containers_closed: usize,
    /// Writes that started while another write was still in progress.
    pub overlapping_writes: usize,
}

impl Recording {
    pub fn packets_for(&self, kind: StreamKind) -> impl Iterator<Item = &RecordedPacket> {
        self.packets
            .iter()
            .filter(move |p| p.stream_index == kind.index())
    }

    /// Presentation end of the last packet on `kind`, in seconds.
    pub fn duration_secs(&self, kind: StreamKind) -> f64 {
        let Some(tb) = self.stream_time_bases.get(kind.index()) else {
            return 0.0;
        };
        self.packets_for(kind)
            .filter_map(|p| p.pts.map(|pts| pts + p.duration))
            .max()
            .map(|end| end as f64 * tb.as_f64())
            .unwrap_or(0.0)
    }
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    recording: Arc<Mutex<Recording>>,
    faults: Vec<Fault>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Copy of everything recorded so far.
    pub fn recording(&self) -> Recording {
        self.recording.lock().clone()
    }

    fn fails(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }
}

pub struct MemoryVideoContext {
    params: VideoParams,
}

pub struct MemoryAudioContext {
    params: AudioParams,
}

pub struct MemoryVideoEncoder {
    time_base: Rational,
    fail_encode: bool,
    recording: Arc<Mutex<Recording>>,
}

impl VideoEncoder for MemoryVideoEncoder {
    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn encode(&mut self, frame: &VideoFrame<'_>) -> anyhow::Result<Vec<Packet>> {
        if self.fail_encode {
            anyhow::bail!("encoder rejected frame at pts {}", frame.pts);
        }
        let packet = Packet::new(Bytes::copy_from_slice(frame.data), self.time_base)
            .with_pts(Some(frame.pts))
            .with_dts(Some(frame.pts))
            .with_duration(1)
            .with_key(true);
        Ok(vec![packet])
    }

    fn finish(&mut self) -> anyhow::Result<Vec<Packet>> {
        Ok(Vec::new())
    }
}

impl Drop for MemoryVideoEncoder {
    fn drop(&mut self) {
        self.recording.lock().encoders_closed += 1;
    }
}

pub struct MemoryAudioEncoder {
    time_base: Rational,
    recording: Arc<Mutex<Recording>>,
}

impl AudioEncoder for MemoryAudioEncoder {
    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn encode(&mut self, frame: &AudioFrame<'_>) -> anyhow::Result<Vec<Packet>> {
        let packet = Packet::new(Bytes::copy_from_slice(frame.data), self.time_base)
            .with_pts(Some(frame.pts))
            .with_dts(Some(frame.pts))
            .with_duration(frame.samples as i64)
            .with_key(true);
        Ok(vec![packet])
    }

    fn finish(&mut self) -> anyhow::Result<Vec<Packet>> {
        Ok(Vec::new())
    }
}

impl Drop for MemoryAudioEncoder {
    fn drop(&mut self) {
        self.recording.lock().encoders_closed += 1;
    }
}

pub struct MemoryContainer {
    recording: Arc<Mutex<Recording>>,
    stream_time_bases: Vec<Rational>,
    in_write: AtomicBool,
    fail_writes: bool,
    fail_trailer: bool,
}

impl Container for MemoryContainer {
    fn write_interleaved(&mut self, packet: Packet) -> anyhow::Result<()> {
        let overlapped = self.in_write.swap(true, Ordering::SeqCst);
        std::thread::yield_now();
        let result = self.record(packet, overlapped);
        self.in_write.store(false, Ordering::SeqCst);
        result
    }

    fn write_trailer(&mut self) -> anyhow::Result<()> {
        if self.fail_trailer {
            anyhow::bail!("could not finalize the output file");
        }
        self.recording.lock().trailer_writes += 1;
        Ok(())
    }
}

impl MemoryContainer {
    fn record(&self, packet: Packet, overlapped: bool) -> anyhow::Result<()> {
        let mut recording = self.recording.lock();
        if overlapped {
            recording.overlapping_writes += 1;
        }
        if self.fail_writes {
            anyhow::bail!("write refused for stream {}", packet.index());
        }
        let out_time_base = *self
            .stream_time_bases
            .get(packet.index())
            .ok_or(anyhow::anyhow!("stream not found: {}", packet.index()))?;
        let in_time_base = packet.time_base();
        recording.packets.push(RecordedPacket {
            stream_index: packet.index(),
            pts: packet
                .pts()
                .map(|pts| rescale(pts, in_time_base, out_time_base)),
            duration: rescale(packet.duration(), in_time_base, out_time_base),
            size: packet.size(),
            is_key: packet.is_key(),
        });
        Ok(())
    }
}

impl Drop for MemoryContainer {
    fn drop(&mut self) {
        self.recording.lock().containers_closed += 1;
    }
}

impl Backend for MemoryBackend {
    type VideoContext = MemoryVideoContext;
    type AudioContext = MemoryAudioContext;
    type VideoEncoder = MemoryVideoEncoder;
    type AudioEncoder = MemoryAudioEncoder;
    type Container = MemoryContainer;

    fn create_video_context(&self, params: &VideoParams) -> anyhow::Result<MemoryVideoContext> {
        if self.fails(Fault::MissingVideoEncoder) {
            anyhow::bail!("could not find video encoder");
        }
        self.recording.lock().video_params = Some(params.clone());
        Ok(MemoryVideoContext {
            params: params.clone(),
        })
    }

    fn create_audio_context(&self, params: &AudioParams) -> anyhow::Result<MemoryAudioContext> {
        if self.fails(Fault::AudioContext) {
            anyhow::bail!("could not allocate audio context");
        }
        self.recording.lock().audio_params = Some(params.clone());
        Ok(MemoryAudioContext {
            params: params.clone(),
        })
    }

    fn open_output(
        &self,
        path: &Path,
        video: MemoryVideoContext,
        audio: MemoryAudioContext,
    ) -> anyhow::Result<OpenedOutput<MemoryVideoEncoder, MemoryAudioEncoder, MemoryContainer>>
    {
        if self.fails(Fault::OpenOutput) {
            anyhow::bail!("could not open output file {}", path.display());
        }
        let video_time_base = video.params.time_base;
        let audio_time_base = Rational::new(1, audio.params.sample_rate as i32);
        {
            let mut recording = self.recording.lock();
            recording.path = Some(path.to_path_buf());
            recording.stream_time_bases = vec![video_time_base, audio_time_base];
            recording.header_written = true;
        }
        Ok(OpenedOutput {
            video: MemoryVideoEncoder {
                time_base: video_time_base,
                fail_encode: self.fails(Fault::VideoEncode),
                recording: self.recording.clone(),
            },
            audio: MemoryAudioEncoder {
                time_base: audio.params.time_base,
                recording: self.recording.clone(),
            },
            container: MemoryContainer {
                recording: self.recording.clone(),
                stream_time_bases: vec![video_time_base, audio_time_base],
                in_write: AtomicBool::new(false),
                fail_writes: self.fails(Fault::Write),
                fail_trailer: self.fails(Fault::Trailer),
            },
        })
    }
}
