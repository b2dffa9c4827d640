//! Drives a session the way a capture host does: every setup call and both
//! capture loops run on their own blocking thread, in no particular order.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use capture_session::{
    EncodingSession, Rational, SessionError, SessionState, backend::Backend, format::rescale,
    writer::WriterStats,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::AppConfig,
    source::{TestPattern, Tone, samples_for_frame},
};

#[derive(Debug, Clone)]
pub struct Report {
    pub frames: u64,
    pub audio_chunks: u64,
    pub state: SessionState,
    pub stats: WriterStats,
}

pub async fn run<B: Backend + 'static>(
    session: Arc<EncodingSession<B>>,
    config: &AppConfig,
    cancel: CancellationToken,
) -> anyhow::Result<Report> {
    let forward_cancel = {
        let session = session.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            session.cancel();
        })
    };

    let container = {
        let session = session.clone();
        let path = config.output.clone();
        tokio::task::spawn_blocking(move || session.setup_container(&path))
    };
    let video_setup = {
        let session = session.clone();
        let video = config.video.clone();
        tokio::task::spawn_blocking(move || {
            session.setup_video(
                video.width,
                video.height,
                video.input_format,
                video.fps_num,
                video.fps_den,
                video.output_format,
            )
        })
    };
    let audio_setup = {
        let session = session.clone();
        let audio = config.audio.clone();
        tokio::task::spawn_blocking(move || {
            session.setup_audio(
                audio.channels,
                audio.sample_rate,
                audio.bits_per_sample,
                audio.sample_format,
                audio.block_align,
            )
        })
    };
    let video = {
        let session = session.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || capture_video(&session, &config, &cancel))
    };
    let audio = {
        let session = session.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || capture_audio(&session, &config, &cancel))
    };

    let (container, video_setup, audio_setup) = tokio::join!(container, video_setup, audio_setup);
    let mut setup_error = None;
    for (step, result) in [
        ("container", container?),
        ("video", video_setup?),
        ("audio", audio_setup?),
    ] {
        if let Err(e) = result {
            log::error!("{} setup: {}", step, e);
            setup_error.get_or_insert(e);
        }
    }

    let (video, audio) = tokio::join!(video, audio);
    let (frames, audio_chunks) = (video?, audio?);
    forward_cancel.abort();

    if let Some(e) = setup_error {
        return Err(e.into());
    }
    Ok(Report {
        frames: frames?,
        audio_chunks: audio_chunks?,
        state: session.state(),
        stats: session.stats(),
    })
}

fn pace(start: Instant, at: Duration, realtime: bool) {
    if realtime {
        if let Some(wait) = at.checked_sub(start.elapsed()) {
            std::thread::sleep(wait);
        }
    }
}

/// Keeps going past per-frame errors; a gate error means the session will
/// never capture, so the loop stops there. The stream is always marked done.
fn capture_video<B: Backend>(
    session: &EncodingSession<B>,
    config: &AppConfig,
    cancel: &CancellationToken,
) -> Result<u64, SessionError> {
    let video = &config.video;
    let pattern = TestPattern::new(video.input_format, video.width, video.height);
    let frame_tb = Rational::new(video.fps_den as i32, video.fps_num as i32);
    let capture_tb = session.config().capture_time_base();
    let start = Instant::now();

    let mut sent = 0;
    let mut result = Ok(());
    for index in 0..config.frame_count() {
        if cancel.is_cancelled() {
            log::info!("video capture interrupted after {} frames", sent);
            break;
        }
        let timestamp = rescale(index as i64, frame_tb, capture_tb);
        pace(start, Duration::from_secs_f64(timestamp as f64 * capture_tb.as_f64()), config.realtime);

        match session.submit_video_frame(&pattern.frame(index), timestamp) {
            Ok(_) => sent += 1,
            Err(e @ SessionError::Gate(_)) => {
                result = Err(e);
                break;
            }
            Err(e) => log::warn!("video frame {}: {}", index, e),
        }
    }
    session.mark_video_done()?;
    result.map(|_| sent)
}

fn capture_audio<B: Backend>(
    session: &EncodingSession<B>,
    config: &AppConfig,
    cancel: &CancellationToken,
) -> Result<u64, SessionError> {
    let (audio, video) = (&config.audio, &config.video);
    let mut tone = Tone::new(
        audio.sample_format,
        audio.channels,
        audio.sample_rate,
        audio.block_align,
        audio.tone_hz,
    );
    let frame_tb = Rational::new(video.fps_den as i32, video.fps_num as i32);
    let capture_tb = session.config().capture_time_base();
    let start = Instant::now();

    let mut sent = 0;
    let mut result = Ok(());
    for index in 0..config.frame_count() {
        if cancel.is_cancelled() {
            log::info!("audio capture interrupted after {} chunks", sent);
            break;
        }
        let timestamp = rescale(index as i64, frame_tb, capture_tb);
        pace(start, Duration::from_secs_f64(timestamp as f64 * capture_tb.as_f64()), config.realtime);

        let samples = samples_for_frame(index, audio.sample_rate, video.fps_num, video.fps_den);
        match session.submit_audio_frame(&tone.next_chunk(samples), timestamp) {
            Ok(_) => sent += 1,
            Err(e @ SessionError::Gate(_)) => {
                result = Err(e);
                break;
            }
            Err(e) => log::warn!("audio chunk {}: {}", index, e),
        }
    }
    session.mark_audio_done()?;
    result.map(|_| sent)
}

#[cfg(test)]
mod tests {
    use capture_session::{
        PixelFormat, SessionConfig,
        memory::{Fault, MemoryBackend},
        stream::StreamKind,
    };

    use super::*;

    fn small_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.video.width = 64;
        config.video.height = 48;
        config.video.input_format = PixelFormat::Nv12;
        config.video.output_format = PixelFormat::Yuv420p;
        config.session = SessionConfig {
            poll_interval_ms: 5,
            ..Default::default()
        };
        config
    }

    #[tokio::test]
    async fn captures_whole_duration() {
        let backend = MemoryBackend::new();
        let config = small_config();
        let session = Arc::new(EncodingSession::new(
            "host",
            backend.clone(),
            config.session.clone(),
        ));

        let report = run(session, &config, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.frames, 90);
        assert_eq!(report.audio_chunks, 90);
        assert_eq!(report.state, SessionState::Finished);
        assert_eq!(report.stats.video_packets, 90);

        let recording = backend.recording();
        assert_eq!(recording.trailer_writes, 1);
        assert_eq!(recording.overlapping_writes, 0);
        let audio_secs = recording.duration_secs(StreamKind::Audio);
        assert!((audio_secs - 3.003).abs() < 1e-6, "audio lasts {audio_secs}s");
    }

    #[tokio::test]
    async fn container_failure_is_reported() {
        let backend = MemoryBackend::new().with_fault(Fault::OpenOutput);
        let config = small_config();
        let session = Arc::new(EncodingSession::new(
            "host-failure",
            backend.clone(),
            config.session.clone(),
        ));

        let err = run(session.clone(), &config, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("container setup failed"));
        assert!(session.is_finished());
        assert!(backend.recording().packets.is_empty());
    }

    #[tokio::test]
    async fn cancel_stops_capture() {
        let backend = MemoryBackend::new();
        let mut config = small_config();
        config.realtime = true;
        config.duration_secs = 30.0;
        let session = Arc::new(EncodingSession::new(
            "host-cancel",
            backend.clone(),
            config.session.clone(),
        ));

        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { run(session, &config, cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        let report = handle.await.unwrap().unwrap();
        assert!(report.frames < 900);
        assert_eq!(report.state, SessionState::Finished);
        assert_eq!(backend.recording().trailer_writes, 1);
    }
}
