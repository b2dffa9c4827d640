//! Real-time capture-and-mux session: raw video frames and PCM audio arrive
//! on independent threads and are encoded losslessly into one container.

/// Registers FFmpeg components. Call once at startup before opening outputs.
#[cfg(feature = "ffmpeg")]
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod backend;
pub mod barrier;
pub mod config;
pub mod convert;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod format;
pub mod frame;
pub mod gate;
pub mod memory;
pub mod packet;
pub mod session;
pub mod state;
pub mod stream;
pub mod writer;

pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use format::{PixelFormat, Rational, SampleFormat};
pub use session::EncodingSession;
pub use state::SessionState;
