use bytes::Bytes;
use ffmpeg_next::{
    ChannelLayout, Dictionary,
    codec::{self, Id},
    format::{Pixel, Sample, sample},
};

use super::{from_av, to_av};
use crate::{
    backend::{AudioEncoder, VideoEncoder},
    format::{PixelFormat, Rational, SampleFormat},
    frame::{AudioFrame, VideoFrame},
    packet::Packet,
    stream::{AudioParams, VideoParams},
};

pub(crate) fn pixel(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::Argb => Pixel::ARGB,
        PixelFormat::Bgra => Pixel::BGRA,
        PixelFormat::Rgba => Pixel::RGBA,
        PixelFormat::Yuv420p => Pixel::YUV420P,
        PixelFormat::Nv12 => Pixel::NV12,
    }
}

pub(crate) fn sample_format(format: SampleFormat) -> Sample {
    match format {
        SampleFormat::U8 => Sample::U8(sample::Type::Packed),
        SampleFormat::S16 => Sample::I16(sample::Type::Packed),
        SampleFormat::S32 => Sample::I32(sample::Type::Packed),
        SampleFormat::F32 => Sample::F32(sample::Type::Packed),
        SampleFormat::F64 => Sample::F64(sample::Type::Packed),
    }
}

/// Little-endian PCM codec that stores `format` without conversion.
pub(crate) fn pcm_codec(format: SampleFormat) -> Id {
    match format {
        SampleFormat::U8 => Id::PCM_U8,
        SampleFormat::S16 => Id::PCM_S16LE,
        SampleFormat::S32 => Id::PCM_S32LE,
        SampleFormat::F32 => Id::PCM_F32LE,
        SampleFormat::F64 => Id::PCM_F64LE,
    }
}

/// Pulls every packet the encoder has ready.
fn drain(
    encoder: &mut codec::encoder::Encoder,
    time_base: Rational,
) -> anyhow::Result<Vec<Packet>> {
    let mut packets = Vec::new();
    loop {
        let mut packet = ffmpeg_next::Packet::empty();
        match encoder.receive_packet(&mut packet) {
            Ok(()) => packets.push(
                Packet::new(
                    Bytes::copy_from_slice(packet.data().unwrap_or_default()),
                    time_base,
                )
                .with_pts(packet.pts())
                .with_dts(packet.dts())
                .with_duration(packet.duration())
                .with_key(packet.is_key()),
            ),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                break;
            }
            Err(ffmpeg_next::Error::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(packets)
}

/// Time-base the opened encoder settled on, which may differ from the
/// one requested.
fn opened_time_base(encoder: &codec::encoder::Encoder) -> Rational {
    from_av(unsafe { (*encoder.as_ptr()).time_base.into() })
}

/// Configured FFV1 encoder that has not been opened yet.
pub struct VideoContext {
    codec: ffmpeg_next::Codec,
    encoder: codec::encoder::Video,
    params: VideoParams,
}

unsafe impl Send for VideoContext {}

impl VideoContext {
    pub fn new(params: &VideoParams) -> anyhow::Result<Self> {
        let codec = ffmpeg_next::encoder::find(Id::FFV1)
            .ok_or(anyhow::anyhow!("could not find the ffv1 encoder"))?;
        let mut encoder = codec::Context::new_with_codec(codec).encoder().video()?;
        encoder.set_width(params.width);
        encoder.set_height(params.height);
        encoder.set_format(pixel(params.output_format));
        encoder.set_time_base(to_av(params.time_base));
        encoder.set_frame_rate(Some(to_av(params.frame_rate)));
        encoder.set_gop(params.gop_size);
        Ok(Self {
            codec,
            encoder,
            params: params.clone(),
        })
    }

    pub fn codec(&self) -> ffmpeg_next::Codec {
        self.codec
    }

    pub fn open(mut self, global_header: bool) -> anyhow::Result<FfmpegVideoEncoder> {
        if global_header {
            self.encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let mut options = Dictionary::new();
        if self.params.slices > 1 {
            // multi-slice output needs bitstream version 3
            options.set("level", "3");
            options.set("slices", &self.params.slices.to_string());
        }
        let encoder = self.encoder.open_with(options)?;
        let frame = ffmpeg_next::frame::Video::new(
            pixel(self.params.output_format),
            self.params.width,
            self.params.height,
        );
        log::debug!(
            "ffv1 encoder opened: {}x{} {} slices, gop {}",
            self.params.width,
            self.params.height,
            self.params.slices,
            self.params.gop_size
        );
        Ok(FfmpegVideoEncoder {
            time_base: opened_time_base(&encoder),
            encoder,
            frame,
            params: self.params,
        })
    }
}

pub struct FfmpegVideoEncoder {
    encoder: codec::encoder::video::Encoder,
    frame: ffmpeg_next::frame::Video,
    time_base: Rational,
    params: VideoParams,
}

unsafe impl Send for FfmpegVideoEncoder {}

impl FfmpegVideoEncoder {
    pub(crate) fn context(&self) -> &codec::encoder::video::Encoder {
        &self.encoder
    }

    /// Copies the packed planes of `src` into the reusable frame, row by row
    /// since the frame's lines may be padded.
    fn fill(&mut self, src: &VideoFrame<'_>) -> anyhow::Result<()> {
        let layout = src.format.planes(self.params.width, self.params.height);
        for (index, (plane, data)) in layout.iter().zip(src.planes()).enumerate() {
            if data.len() < plane.len() {
                anyhow::bail!("plane {} is {} bytes, expected {}", index, data.len(), plane.len());
            }
            let stride = self.frame.stride(index);
            let dst = self.frame.data_mut(index);
            for (row, line) in data.chunks_exact(plane.row_bytes).take(plane.rows).enumerate() {
                let start = row * stride;
                dst[start..start + plane.row_bytes].copy_from_slice(line);
            }
        }
        Ok(())
    }
}

impl VideoEncoder for FfmpegVideoEncoder {
    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn encode(&mut self, frame: &VideoFrame<'_>) -> anyhow::Result<Vec<Packet>> {
        self.fill(frame)?;
        self.frame.set_pts(Some(frame.pts));
        self.encoder.send_frame(&self.frame)?;
        drain(&mut self.encoder, self.time_base)
    }

    fn finish(&mut self) -> anyhow::Result<Vec<Packet>> {
        self.encoder.send_eof()?;
        drain(&mut self.encoder, self.time_base)
    }
}

/// Configured PCM encoder that has not been opened yet.
pub struct AudioContext {
    codec: ffmpeg_next::Codec,
    encoder: codec::encoder::Audio,
    params: AudioParams,
}

unsafe impl Send for AudioContext {}

impl AudioContext {
    pub fn new(params: &AudioParams) -> anyhow::Result<Self> {
        let id = pcm_codec(params.sample_format);
        let codec = ffmpeg_next::encoder::find(id)
            .ok_or(anyhow::anyhow!("could not find encoder for {:?}", id))?;
        let mut encoder = codec::Context::new_with_codec(codec).encoder().audio()?;
        encoder.set_rate(params.sample_rate as i32);
        encoder.set_channel_layout(ChannelLayout::default(params.channels as i32));
        encoder.set_format(sample_format(params.sample_format));
        encoder.set_bit_rate(params.bit_rate as usize);
        encoder.set_time_base(to_av(params.time_base));
        unsafe {
            (*encoder.as_mut_ptr()).bits_per_raw_sample = params.bits_per_sample as i32;
        }
        Ok(Self {
            codec,
            encoder,
            params: params.clone(),
        })
    }

    pub fn codec(&self) -> ffmpeg_next::Codec {
        self.codec
    }

    pub fn open(mut self, global_header: bool) -> anyhow::Result<FfmpegAudioEncoder> {
        if global_header {
            self.encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let encoder = self.encoder.open_as(self.codec)?;
        Ok(FfmpegAudioEncoder {
            time_base: opened_time_base(&encoder),
            encoder,
            params: self.params,
        })
    }
}

pub struct FfmpegAudioEncoder {
    encoder: codec::encoder::audio::Encoder,
    time_base: Rational,
    params: AudioParams,
}

unsafe impl Send for FfmpegAudioEncoder {}

impl FfmpegAudioEncoder {
    pub(crate) fn context(&self) -> &codec::encoder::audio::Encoder {
        &self.encoder
    }
}

impl AudioEncoder for FfmpegAudioEncoder {
    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn encode(&mut self, src: &AudioFrame<'_>) -> anyhow::Result<Vec<Packet>> {
        let mut frame = ffmpeg_next::frame::Audio::new(
            sample_format(src.format),
            src.samples,
            ChannelLayout::default(src.channels as i32),
        );
        frame.set_rate(src.sample_rate);
        frame.set_pts(Some(src.pts));

        // a block align wider than the samples carries padding to skip
        let sample_bytes = src.format.bytes_per_sample() * src.channels as usize;
        let group = self.params.group_size();
        let dst = frame.data_mut(0);
        if group == sample_bytes {
            dst[..src.data.len()].copy_from_slice(src.data);
        } else {
            for (i, chunk) in src.data.chunks_exact(group).enumerate() {
                let start = i * sample_bytes;
                dst[start..start + sample_bytes].copy_from_slice(&chunk[..sample_bytes]);
            }
        }

        self.encoder.send_frame(&frame)?;
        drain(&mut self.encoder, self.time_base)
    }

    fn finish(&mut self) -> anyhow::Result<Vec<Packet>> {
        self.encoder.send_eof()?;
        drain(&mut self.encoder, self.time_base)
    }
}
