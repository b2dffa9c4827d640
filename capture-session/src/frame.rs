use std::fmt::{Display, Formatter};

use crate::format::{PixelFormat, SampleFormat};

/// A video frame ready for the encoder: tightly packed planes in `format`,
/// presentation time already in the encoder time-base.
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    pub data: &'a [u8],
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub pts: i64,
}

impl<'a> VideoFrame<'a> {
    /// Splits `data` into its planes.
    pub fn planes(&self) -> Vec<&'a [u8]> {
        let mut rest = self.data;
        let mut out = Vec::with_capacity(3);
        for plane in self.format.planes(self.width, self.height) {
            let (head, tail) = rest.split_at(plane.len().min(rest.len()));
            out.push(head);
            rest = tail;
        }
        out
    }
}

impl Display for VideoFrame<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "VideoFrame data_len: {}, width: {}, height: {}, format: {}, pts: {}",
            self.data.len(),
            self.width,
            self.height,
            self.format,
            self.pts
        )
    }
}

/// Interleaved PCM chunk, passed through to the encoder untouched.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    pub data: &'a [u8],
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: usize,
    /// Index of the first sample, in 1/sample_rate units.
    pub pts: i64,
}

impl Display for AudioFrame<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "AudioFrame data_len: {}, samples: {}, channels: {}, rate: {}, format: {}, pts: {}",
            self.data.len(),
            self.samples,
            self.channels,
            self.sample_rate,
            self.format,
            self.pts
        )
    }
}
