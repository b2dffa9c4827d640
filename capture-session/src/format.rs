use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// Exact rational, used for time-bases and frame rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn invert(self) -> Self {
        Self::new(self.den, self.num)
    }

    pub fn as_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    pub fn is_valid(self) -> bool {
        self.num > 0 && self.den > 0
    }
}

impl Display for Rational {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Rescales `value` from time-base `from` into time-base `to`, rounding to the
/// nearest integer with halves away from zero.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    let num = value as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    if den == 0 {
        return 0;
    }
    let magnitude = (num.abs() + den.abs() / 2) / den.abs();
    let rounded = if (num < 0) != (den < 0) {
        -magnitude
    } else {
        magnitude
    };
    rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Byte geometry of one image plane with 1-byte row alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plane {
    pub row_bytes: usize,
    pub rows: usize,
}

impl Plane {
    pub fn len(&self) -> usize {
        self.row_bytes * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Argb,
    Bgra,
    Rgba,
    Yuv420p,
    Nv12,
}

impl PixelFormat {
    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Argb => "argb",
            PixelFormat::Bgra => "bgra",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Nv12 => "nv12",
        }
    }

    /// Plane layout of a tightly packed `width`x`height` image. Chroma
    /// dimensions of 4:2:0 formats round up for odd sizes.
    pub fn planes(self, width: u32, height: u32) -> Vec<Plane> {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        match self {
            PixelFormat::Argb | PixelFormat::Bgra | PixelFormat::Rgba => vec![Plane {
                row_bytes: w * 4,
                rows: h,
            }],
            PixelFormat::Yuv420p => vec![
                Plane {
                    row_bytes: w,
                    rows: h,
                },
                Plane {
                    row_bytes: cw,
                    rows: ch,
                },
                Plane {
                    row_bytes: cw,
                    rows: ch,
                },
            ],
            PixelFormat::Nv12 => vec![
                Plane {
                    row_bytes: w,
                    rows: h,
                },
                Plane {
                    row_bytes: cw * 2,
                    rows: ch,
                },
            ],
        }
    }

    pub fn buffer_size(self, width: u32, height: u32) -> usize {
        self.planes(width, height).iter().map(Plane::len).sum()
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "argb" => Ok(PixelFormat::Argb),
            "bgra" => Ok(PixelFormat::Bgra),
            "rgba" => Ok(PixelFormat::Rgba),
            "yuv420p" | "i420" => Ok(PixelFormat::Yuv420p),
            "nv12" => Ok(PixelFormat::Nv12),
            other => anyhow::bail!("unknown pixel format: {}", other),
        }
    }
}

/// Interleaved PCM sample formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
    F64,
}

impl SampleFormat {
    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16",
            SampleFormat::S32 => "s32",
            SampleFormat::F32 => "f32",
            SampleFormat::F64 => "f64",
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }

    /// Size in bytes of one sample across all channels, padded up to a
    /// multiple of `block_align` when that is non-zero.
    pub fn group_size(self, channels: u16, block_align: u32) -> usize {
        let raw = channels as usize * self.bytes_per_sample();
        match block_align as usize {
            0 => raw,
            align => raw.div_ceil(align) * align,
        }
    }
}

impl Display for SampleFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "u8" => Ok(SampleFormat::U8),
            "s16" | "s16le" => Ok(SampleFormat::S16),
            "s32" | "s32le" => Ok(SampleFormat::S32),
            "f32" | "flt" => Ok(SampleFormat::F32),
            "f64" | "dbl" => Ok(SampleFormat::F64),
            other => anyhow::bail!("unknown sample format: {}", other),
        }
    }
}
