use std::{path::PathBuf, sync::Arc};

use capture_session::{EncodingSession, PixelFormat, SampleFormat, backend::Backend, memory::MemoryBackend};
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod config;
mod host;
mod source;

use config::AppConfig;

/// Capture a synthetic video and audio source into a lossless container.
#[derive(Parser, Debug)]
#[command(name = "capture-mux", version, about)]
struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output file; the extension picks the container
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Frame rate numerator
    #[arg(long)]
    fps_num: Option<u32>,

    /// Frame rate denominator
    #[arg(long)]
    fps_den: Option<u32>,

    /// Pixel format produced by the source (argb, bgra, rgba, yuv420p, nv12)
    #[arg(long)]
    input_format: Option<PixelFormat>,

    /// Pixel format handed to the encoder
    #[arg(long)]
    output_format: Option<PixelFormat>,

    #[arg(long)]
    channels: Option<u16>,

    #[arg(long)]
    sample_rate: Option<u32>,

    /// Sample format of the source (u8, s16, s32, f32, f64)
    #[arg(long)]
    sample_format: Option<SampleFormat>,

    /// Capture length in seconds
    #[arg(short, long)]
    duration: Option<f64>,

    /// Give up on a readiness wait after this many milliseconds
    #[arg(long)]
    gate_timeout_ms: Option<u64>,

    /// Pace the sources at the capture rate
    #[arg(long)]
    realtime: bool,

    /// Run the whole pipeline without writing a file
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        let video = &mut config.video;
        video.width = self.width.unwrap_or(video.width);
        video.height = self.height.unwrap_or(video.height);
        video.fps_num = self.fps_num.unwrap_or(video.fps_num);
        video.fps_den = self.fps_den.unwrap_or(video.fps_den);
        video.input_format = self.input_format.unwrap_or(video.input_format);
        video.output_format = self.output_format.unwrap_or(video.output_format);

        let audio = &mut config.audio;
        audio.channels = self.channels.unwrap_or(audio.channels);
        audio.sample_rate = self.sample_rate.unwrap_or(audio.sample_rate);
        if let Some(format) = self.sample_format {
            audio.sample_format = format;
            audio.bits_per_sample = (format.bytes_per_sample() * 8) as u16;
            audio.block_align = format.group_size(audio.channels, 0) as u32;
        }

        config.duration_secs = self.duration.unwrap_or(config.duration_secs);
        if self.gate_timeout_ms.is_some() {
            config.session.gate_timeout_ms = self.gate_timeout_ms;
        }
        config.realtime |= self.realtime;
    }
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("ffmpeg_next", log::LevelFilter::Warn)
        .init();
}

async fn capture<B: Backend + 'static>(
    backend: B,
    config: &AppConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let id = config
        .output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture".to_string());
    let session = Arc::new(EncodingSession::new(&id, backend, config.session.clone()));
    let report = host::run(session, config, cancel).await?;
    log::info!(
        "captured {} video frames and {} audio chunks, {} + {} bytes written, session {}",
        report.frames,
        report.audio_chunks,
        report.stats.video_bytes,
        report.stats.audio_bytes,
        report.state
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    cli.apply(&mut config);
    log::debug!("{}", serde_json::to_string_pretty(&config)?);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("interrupted, finishing the capture");
                cancel.cancel();
            }
        });
    }

    #[cfg(feature = "ffmpeg")]
    if !cli.dry_run {
        let backend = capture_session::ffmpeg::FfmpegBackend::new()?;
        return capture(backend, &config, cancel).await;
    }

    if !cli.dry_run {
        log::warn!("built without the ffmpeg feature, running a dry run");
    }
    capture(MemoryBackend::new(), &config, cancel).await
}
