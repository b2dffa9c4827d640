//! Pixel layout normalization applied before a frame reaches the encoder.

use std::borrow::Cow;

use crate::{error::SessionError, format::PixelFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    Identity,
    Nv12ToYuv420p,
}

/// Converts tightly packed frames from the capture layout into the layout
/// the video encoder was configured with.
#[derive(Debug, Clone)]
pub struct PixelConverter {
    input: PixelFormat,
    output: PixelFormat,
    width: u32,
    height: u32,
    conversion: Option<Conversion>,
}

impl PixelConverter {
    pub fn new(input: PixelFormat, output: PixelFormat, width: u32, height: u32) -> Self {
        let conversion = match (input, output) {
            (a, b) if a == b => Some(Conversion::Identity),
            (PixelFormat::Nv12, PixelFormat::Yuv420p) => Some(Conversion::Nv12ToYuv420p),
            _ => None,
        };
        Self {
            input,
            output,
            width,
            height,
            conversion,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.conversion.is_some()
    }

    /// Number of bytes a capture buffer must carry.
    pub fn input_size(&self) -> usize {
        self.input.buffer_size(self.width, self.height)
    }

    pub fn output_size(&self) -> usize {
        self.output.buffer_size(self.width, self.height)
    }

    /// Returns the frame in the output layout. Matching layouts are passed
    /// through borrowed; anything else is written into a buffer owned by the
    /// returned value and freed when it drops.
    pub fn convert<'a>(&self, src: &'a [u8]) -> Result<Cow<'a, [u8]>, SessionError> {
        let expected = self.input_size();
        if src.len() != expected {
            return Err(SessionError::InvalidLength {
                expected,
                actual: src.len(),
            });
        }
        match self.conversion {
            Some(Conversion::Identity) => Ok(Cow::Borrowed(src)),
            Some(Conversion::Nv12ToYuv420p) => {
                let mut dst = vec![0u8; self.output_size()];
                nv12_to_yuv420p(src, &mut dst, self.width, self.height);
                Ok(Cow::Owned(dst))
            }
            None => Err(SessionError::UnsupportedConversion {
                input: self.input,
                output: self.output,
            }),
        }
    }
}

/// Splits the interleaved UV plane of an NV12 image into separate U and V
/// planes. `src` and `dst` must both be sized for `width`x`height`.
pub fn nv12_to_yuv420p(src: &[u8], dst: &mut [u8], width: u32, height: u32) {
    let luma = width as usize * height as usize;
    let chroma = (width as usize).div_ceil(2) * (height as usize).div_ceil(2);

    dst[..luma].copy_from_slice(&src[..luma]);
    let (u, v) = dst[luma..luma + 2 * chroma].split_at_mut(chroma);
    for (i, uv) in src[luma..luma + 2 * chroma].chunks_exact(2).enumerate() {
        u[i] = uv[0];
        v[i] = uv[1];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_borrows_the_input() {
        let conv = PixelConverter::new(PixelFormat::Argb, PixelFormat::Argb, 2, 2);
        let src = vec![7u8; 16];
        let out = conv.convert(&src).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&*out, &src[..]);
    }

    #[test]
    fn nv12_chroma_is_deinterleaved() {
        let conv = PixelConverter::new(PixelFormat::Nv12, PixelFormat::Yuv420p, 4, 2);
        // 8 luma bytes, then 2 UV pairs
        let src = [0, 1, 2, 3, 4, 5, 6, 7, 10, 20, 11, 21];
        let out = conv.convert(&src).unwrap();
        assert_eq!(&*out, &[0, 1, 2, 3, 4, 5, 6, 7, 10, 11, 20, 21]);
    }

    #[test]
    fn odd_dimensions_round_chroma_up() {
        let conv = PixelConverter::new(PixelFormat::Nv12, PixelFormat::Yuv420p, 3, 1);
        // 3 luma, 2 chroma pairs
        let src = [1, 2, 3, 9, 8, 7, 6];
        let out = conv.convert(&src).unwrap();
        assert_eq!(&*out, &[1, 2, 3, 9, 7, 8, 6]);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let conv = PixelConverter::new(PixelFormat::Nv12, PixelFormat::Yuv420p, 1920, 1080);
        let src = vec![0u8; conv.input_size() - 1];
        match conv.convert(&src) {
            Err(SessionError::InvalidLength { expected, actual }) => {
                assert_eq!(expected, 1920 * 1080 * 3 / 2);
                assert_eq!(actual, expected - 1);
            }
            other => panic!("unexpected result: {:?}", other.map(|c| c.len())),
        }
    }

    #[test]
    fn unsupported_pair_is_reported() {
        let conv = PixelConverter::new(PixelFormat::Bgra, PixelFormat::Yuv420p, 2, 2);
        assert!(!conv.is_supported());
        let src = vec![0u8; 16];
        assert!(matches!(
            conv.convert(&src),
            Err(SessionError::UnsupportedConversion { .. })
        ));
    }
}
