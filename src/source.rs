//! Synthetic capture sources standing in for a real screen and audio tap.

use bytes::{BufMut, Bytes, BytesMut};
use capture_session::{PixelFormat, SampleFormat, format::Plane};

/// Moving vertical bar over a luma ramp.
pub struct TestPattern {
    format: PixelFormat,
    width: u32,
    height: u32,
    planes: Vec<Plane>,
}

impl TestPattern {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            planes: format.planes(width, height),
        }
    }

    pub fn frame(&self, index: u64) -> Bytes {
        let size: usize = self.planes.iter().map(Plane::len).sum();
        let mut buf = BytesMut::with_capacity(size);
        let bar = (index as u32 * 8) % self.width.max(1);
        let shade = |x: u32, y: u32| -> u8 {
            if x.abs_diff(bar) < 16 {
                235
            } else {
                ((x + y) * 255 / (self.width + self.height).max(1)) as u8
            }
        };

        match self.format {
            PixelFormat::Argb | PixelFormat::Bgra | PixelFormat::Rgba => {
                for y in 0..self.height {
                    for x in 0..self.width {
                        let v = shade(x, y);
                        match self.format {
                            PixelFormat::Argb => buf.put_slice(&[255, v, v, v]),
                            _ => buf.put_slice(&[v, v, v, 255]),
                        }
                    }
                }
            }
            PixelFormat::Yuv420p | PixelFormat::Nv12 => {
                for y in 0..self.height {
                    for x in 0..self.width {
                        buf.put_u8(shade(x, y));
                    }
                }
                // neutral chroma
                for plane in &self.planes[1..] {
                    buf.put_bytes(128, plane.len());
                }
            }
        }
        buf.freeze()
    }
}

/// Sine tone in interleaved PCM, with every channel carrying the same signal.
pub struct Tone {
    format: SampleFormat,
    channels: u16,
    sample_rate: u32,
    group_size: usize,
    frequency: f64,
    position: u64,
}

impl Tone {
    pub fn new(
        format: SampleFormat,
        channels: u16,
        sample_rate: u32,
        block_align: u32,
        frequency: f64,
    ) -> Self {
        Self {
            format,
            channels,
            sample_rate,
            group_size: format.group_size(channels, block_align),
            frequency,
            position: 0,
        }
    }

    /// Next `samples` sample groups.
    pub fn next_chunk(&mut self, samples: usize) -> Bytes {
        let mut buf = BytesMut::with_capacity(samples * self.group_size);
        let raw = self.format.bytes_per_sample() * self.channels as usize;
        for _ in 0..samples {
            let t = self.position as f64 / self.sample_rate as f64;
            let v = (t * self.frequency * std::f64::consts::TAU).sin() * 0.25;
            for _ in 0..self.channels {
                match self.format {
                    SampleFormat::U8 => buf.put_u8((v * 127.0 + 128.0) as u8),
                    SampleFormat::S16 => buf.put_i16_le((v * i16::MAX as f64) as i16),
                    SampleFormat::S32 => buf.put_i32_le((v * i32::MAX as f64) as i32),
                    SampleFormat::F32 => buf.put_f32_le(v as f32),
                    SampleFormat::F64 => buf.put_f64_le(v),
                }
            }
            buf.put_bytes(0, self.group_size - raw);
            self.position += 1;
        }
        buf.freeze()
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }
}

/// Samples that belong to video frame `index` so audio tracks the video
/// clock without drift.
pub fn samples_for_frame(index: u64, sample_rate: u32, fps_num: u32, fps_den: u32) -> usize {
    let at = |i: u64| i as u128 * sample_rate as u128 * fps_den as u128 / fps_num.max(1) as u128;
    (at(index + 1) - at(index)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_match_format_size() {
        for format in [PixelFormat::Argb, PixelFormat::Nv12, PixelFormat::Yuv420p] {
            let pattern = TestPattern::new(format, 33, 17);
            assert_eq!(pattern.frame(3).len(), format.buffer_size(33, 17));
        }
    }

    #[test]
    fn tone_respects_block_align() {
        let mut tone = Tone::new(SampleFormat::S16, 1, 8000, 4, 440.0);
        assert_eq!(tone.group_size(), 4);
        assert_eq!(tone.next_chunk(10).len(), 40);
    }

    #[test]
    fn audio_chunks_add_up_to_whole_duration() {
        let total: usize = (0..90)
            .map(|i| samples_for_frame(i, 48000, 30000, 1001))
            .sum();
        assert_eq!(total, 144144);
        assert_eq!(samples_for_frame(0, 48000, 30000, 1001), 1601);
        assert_eq!(samples_for_frame(1, 48000, 30000, 1001), 1602);
    }
}
